//! Telegram Bot API message conversion.
//!
//! Media payloads are kept as raw JSON so the history assembler can show the
//! model whatever the platform said about a file (duration, emoji, file name)
//! after stripping structural fields.

use anyhow::{Context, Result};
use parley_storage::{
    Attachment, AttachmentKind, ForwardOrigin, Message, MessageMeta, ReplyTo, UserId,
};
use serde::Deserialize;
use serde_json::Value;

use super::types::{ChatKind, InboundMessage};

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl TelegramUser {
    pub fn display_name(&self) -> String {
        match &self.last_name {
            Some(last) if !last.is_empty() => format!("{} {}", self.first_name, last),
            _ => self.first_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    pub r#type: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub from: Option<TelegramUser>,
    pub chat: TelegramChat,
    #[serde(default)]
    pub date: i64,
    pub text: Option<String>,
    pub caption: Option<String>,
    pub photo: Option<Vec<Value>>,
    pub sticker: Option<Value>,
    pub animation: Option<Value>,
    pub video: Option<Value>,
    pub video_note: Option<Value>,
    pub voice: Option<Value>,
    pub audio: Option<Value>,
    pub document: Option<Value>,
    pub reply_to_message: Option<Box<TelegramMessage>>,
    pub forward_origin: Option<Value>,
    pub via_bot: Option<TelegramUser>,
    #[serde(default)]
    pub new_chat_members: Vec<TelegramUser>,
    #[serde(default)]
    pub is_automatic_forward: bool,
}

impl TelegramMessage {
    /// Text or media caption.
    fn body(&self) -> Option<&str> {
        self.text
            .as_deref()
            .or(self.caption.as_deref())
            .filter(|text| !text.is_empty())
    }
}

/// Convert an update (`message` or `edited_message`) into an inbound message.
///
/// Edits reuse the original message id, so storing them replaces the earlier
/// version in place. Updates without a message or sender yield `None`.
pub fn convert_update(update: &Value, agent_id: UserId) -> Result<Option<InboundMessage>> {
    let Some(raw) = update.get("message").or_else(|| update.get("edited_message")) else {
        return Ok(None);
    };
    let message: TelegramMessage =
        serde_json::from_value(raw.clone()).context("Failed to parse Telegram message")?;
    Ok(convert_message(&message, agent_id))
}

/// Convert a parsed Telegram message.
pub fn convert_message(message: &TelegramMessage, agent_id: UserId) -> Option<InboundMessage> {
    let from = message.from.as_ref()?;

    let mut converted = Message::new(message.message_id, from.id, from.display_name());
    converted.handle = from.username.clone();
    converted.text = message.body().map(str::to_string);
    converted.is_self = from.id == agent_id;
    converted.attachments = extract_attachment(message).into_iter().collect();
    converted.reply_to = message.reply_to_message.as_deref().map(|reply| ReplyTo {
        id: reply.message_id,
        text: reply.body().unwrap_or_default().to_string(),
        is_self: reply.from.as_ref().is_some_and(|user| user.id == agent_id),
        sender_id: reply.from.as_ref().map(|user| user.id),
    });
    converted.meta = MessageMeta {
        forward_origin: message.forward_origin.as_ref().and_then(convert_forward_origin),
        via_bot_id: message.via_bot.as_ref().map(|bot| bot.id),
        new_members: message
            .new_chat_members
            .iter()
            .map(TelegramUser::display_name)
            .collect(),
        is_automatic_forward: message.is_automatic_forward,
        date: message.date,
    };

    let mut inbound = InboundMessage::new(
        message.chat.id,
        ChatKind::from_telegram(&message.chat.r#type),
        converted,
    );
    if let Some(title) = &message.chat.title {
        inbound = inbound.with_title(title.clone());
    }
    Some(inbound)
}

/// The single media item of a message, if any.
fn extract_attachment(message: &TelegramMessage) -> Option<Attachment> {
    if let Some(photos) = &message.photo {
        let best = photos
            .iter()
            .max_by_key(|photo| photo.get("file_size").and_then(Value::as_i64).unwrap_or(0))?;
        return media_attachment(AttachmentKind::Photo, best, "image/jpeg");
    }

    if let Some(sticker) = &message.sticker {
        let mime = if flag(sticker, "is_animated") {
            "application/x-tgsticker"
        } else if flag(sticker, "is_video") {
            "video/webm"
        } else {
            "image/webp"
        };
        return media_attachment(AttachmentKind::Sticker, sticker, mime);
    }

    // Animations also carry a `document` field, so they must be checked first.
    let candidates = [
        (AttachmentKind::Animation, &message.animation, "video/mp4"),
        (AttachmentKind::Video, &message.video, "video/mp4"),
        (AttachmentKind::VideoNote, &message.video_note, "video/mp4"),
        (AttachmentKind::Voice, &message.voice, "audio/ogg"),
        (AttachmentKind::Audio, &message.audio, "audio/mpeg"),
        (
            AttachmentKind::Document,
            &message.document,
            "application/octet-stream",
        ),
    ];
    candidates
        .into_iter()
        .find_map(|(kind, payload, mime)| {
            payload
                .as_ref()
                .and_then(|payload| media_attachment(kind, payload, mime))
        })
}

fn media_attachment(kind: AttachmentKind, payload: &Value, default_mime: &str) -> Option<Attachment> {
    let file_id = payload.get("file_id").and_then(Value::as_str)?;
    let mime = if kind == AttachmentKind::Sticker {
        default_mime
    } else {
        payload
            .get("mime_type")
            .and_then(Value::as_str)
            .unwrap_or(default_mime)
    };
    Some(Attachment::new(kind, file_id, mime).with_details(payload.clone()))
}

fn flag(payload: &Value, key: &str) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn convert_forward_origin(origin: &Value) -> Option<ForwardOrigin> {
    let id_at = |outer: &str| origin.get(outer)?.get("id")?.as_i64();
    match origin.get("type")?.as_str()? {
        "user" => Some(ForwardOrigin::User {
            sender_user_id: id_at("sender_user")?,
        }),
        "hidden_user" => Some(ForwardOrigin::HiddenUser {
            sender_user_name: origin.get("sender_user_name")?.as_str()?.to_string(),
        }),
        "chat" => Some(ForwardOrigin::Chat {
            sender_chat_id: id_at("sender_chat")?,
        }),
        "channel" => Some(ForwardOrigin::Channel {
            chat_id: id_at("chat")?,
        }),
        _ => None,
    }
}
