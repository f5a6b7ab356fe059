//! Persistent chat models.

use std::collections::{HashSet, VecDeque};

use parley_traits::ResolvedRef;
use serde::{Deserialize, Serialize};

pub type ChatId = i64;
pub type UserId = i64;
pub type MessageId = i64;

/// Telegram's service account that relays channel posts into discussion groups.
const CHANNEL_RELAY_USER_ID: UserId = 777_000;

/// Per-chat overrides of global settings. `None` falls back to the global config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages_to_pass: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub random_reply_probability: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hate_mode: Option<bool>,
}

/// Active persona for a chat. Managed by external command handlers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    pub name: String,
    /// Names the persona answers to, in addition to the global name list.
    #[serde(default)]
    pub names: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl Character {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            names: vec![name.clone()],
            name,
            description: description.into(),
        }
    }

    pub fn with_names(mut self, names: Vec<String>) -> Self {
        self.names = names;
        self
    }
}

/// A user who asked the agent to stop observing them in this chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptOutUser {
    pub id: UserId,
    pub first_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Back-reference to the message being replied to. Never owning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTo {
    pub id: MessageId,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<UserId>,
}

/// Where a forwarded message originally came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ForwardOrigin {
    User { sender_user_id: UserId },
    HiddenUser { sender_user_name: String },
    Chat { sender_chat_id: ChatId },
    Channel { chat_id: ChatId },
}

/// Raw platform metadata kept for filtering only; never authoritative content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MessageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_origin: Option<ForwardOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub via_bot_id: Option<UserId>,
    /// Display names of members who joined with this message.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub new_members: Vec<String>,
    pub is_automatic_forward: bool,
    /// Platform timestamp (seconds since epoch).
    pub date: i64,
}

/// Attachment kinds the platform can deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Photo,
    Sticker,
    Animation,
    Video,
    VideoNote,
    Voice,
    Audio,
    Document,
}

impl AttachmentKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Sticker => "sticker",
            Self::Animation => "animation",
            Self::Video => "video",
            Self::VideoNote => "video_note",
            Self::Voice => "voice",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    /// Whether a model can consume this kind of attachment with the given MIME type.
    pub fn is_supported(&self, mime_type: &str) -> bool {
        match self {
            Self::Photo | Self::Animation | Self::Video | Self::VideoNote => true,
            Self::Voice | Self::Audio => true,
            // Animated (Lottie) stickers have no model-readable form.
            Self::Sticker => mime_type != "application/x-tgsticker",
            Self::Document => is_supported_document_mime(mime_type),
        }
    }
}

impl std::fmt::Display for AttachmentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

fn is_supported_document_mime(mime_type: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    ["image/", "audio/", "video/", "text/"]
        .iter()
        .any(|prefix| mime.starts_with(prefix))
        || mime == "application/pdf"
}

/// Media attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentKind,
    /// Platform file id.
    pub source_ref: String,
    pub mime_type: String,
    /// Raw platform payload describing the attachment.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    /// Populated lazily the first time the attachment is assembled into context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedRef>,
}

impl Attachment {
    pub fn new(
        kind: AttachmentKind,
        source_ref: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            source_ref: source_ref.into(),
            mime_type: mime_type.into(),
            details: serde_json::Value::Null,
            resolved: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    pub fn is_supported(&self) -> bool {
        self.kind.is_supported(&self.mime_type)
    }

    /// Previously resolved reference, if it is still young enough to reuse.
    pub fn fresh_resolution(&self, ttl_ms: i64, now_ms: i64) -> Option<&ResolvedRef> {
        self.resolved
            .as_ref()
            .filter(|resolved| resolved.is_fresh(ttl_ms, now_ms))
    }
}

/// A chat message as remembered by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTo>,
    #[serde(default)]
    pub is_self: bool,
    /// Set when the agent replied because this message addressed it directly.
    #[serde(default)]
    pub addresses_agent: bool,
    #[serde(default)]
    pub meta: MessageMeta,
}

impl Message {
    pub fn new(id: MessageId, sender_id: UserId, sender_name: impl Into<String>) -> Self {
        Self {
            id,
            sender_id,
            sender_name: sender_name.into(),
            handle: None,
            text: None,
            attachments: Vec::new(),
            reply_to: None,
            is_self: false,
            addresses_agent: false,
            meta: MessageMeta::default(),
        }
    }

    /// Plain text message from a chat member.
    pub fn text(
        id: MessageId,
        sender_id: UserId,
        sender_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self::new(id, sender_id, sender_name).with_text(text)
    }

    /// Message authored by the agent itself.
    pub fn from_agent(
        id: MessageId,
        agent_id: UserId,
        agent_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let mut message = Self::text(id, agent_id, agent_name, text);
        message.is_self = true;
        message
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }

    pub fn with_reply_to(mut self, reply_to: ReplyTo) -> Self {
        self.reply_to = Some(reply_to);
        self
    }

    pub fn with_meta(mut self, meta: MessageMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Non-empty text, if any.
    pub fn text_content(&self) -> Option<&str> {
        self.text.as_deref().filter(|text| !text.is_empty())
    }

    pub fn has_supported_attachment(&self) -> bool {
        self.attachments.iter().any(Attachment::is_supported)
    }

    pub fn is_membership_change(&self) -> bool {
        !self.meta.new_members.is_empty()
    }

    /// Whether the message carries anything worth remembering or showing a model.
    pub fn has_observable_content(&self) -> bool {
        self.text_content().is_some() || self.has_supported_attachment() || self.is_membership_change()
    }

    /// Sender handle with a leading `@`.
    pub fn display_handle(&self) -> Option<String> {
        self.handle
            .as_deref()
            .map(|handle| handle.trim_start_matches('@'))
            .filter(|handle| !handle.is_empty())
            .map(|handle| format!("@{handle}"))
    }
}

/// A resolved attachment reference to write back into a stored message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionUpdate {
    pub message_id: MessageId,
    pub attachment_index: usize,
    pub resolved: ResolvedRef,
}

/// A recently active chat participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: UserId,
    pub name: String,
    pub handle: Option<String>,
}

/// Everything the agent remembers about one chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatState {
    pub settings: ChatSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character: Option<Character>,
    pub notes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    pub opt_out_users: Vec<OptOutUser>,
    /// Oldest first.
    pub history: VecDeque<Message>,
    /// Milliseconds since epoch.
    pub last_use: i64,
}

impl ChatState {
    /// Append a message, evicting the single oldest entry when over `cap`.
    ///
    /// A message whose id is already present replaces that entry in place.
    pub fn push_message(&mut self, message: Message, cap: usize) -> Option<Message> {
        self.touch();

        if let Some(existing) = self.history.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
            return None;
        }

        self.history.push_back(message);
        if self.history.len() > cap {
            self.history.pop_front()
        } else {
            None
        }
    }

    /// Append a note, dropping the oldest ones beyond `cap`.
    pub fn push_note(&mut self, note: impl Into<String>, cap: usize) {
        self.notes.push(note.into());
        if self.notes.len() > cap {
            let excess = self.notes.len() - cap;
            self.notes.drain(..excess);
        }
    }

    /// Returns true when the user was not opted out before.
    pub fn opt_out(&mut self, user: OptOutUser) -> bool {
        if self.is_opted_out(user.id) {
            return false;
        }
        self.opt_out_users.push(user);
        true
    }

    /// Returns true when the user had been opted out.
    pub fn opt_in(&mut self, user_id: UserId) -> bool {
        let before = self.opt_out_users.len();
        self.opt_out_users.retain(|user| user.id != user_id);
        before != self.opt_out_users.len()
    }

    pub fn is_opted_out(&self, user_id: UserId) -> bool {
        self.opt_out_users.iter().any(|user| user.id == user_id)
    }

    pub fn opted_out_ids(&self) -> HashSet<UserId> {
        self.opt_out_users.iter().map(|user| user.id).collect()
    }

    pub fn clear_history(&mut self) {
        self.history.clear();
    }

    /// Forget history, notes and long-term memory.
    pub fn lobotomy(&mut self) {
        self.history.clear();
        self.notes.clear();
        self.memory = None;
    }

    pub fn touch(&mut self) {
        self.last_use = chrono::Utc::now().timestamp_millis();
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.history.back()
    }

    /// Distinct non-agent senders among the last `window` messages, newest first.
    pub fn active_members(&self, window: usize) -> Vec<Member> {
        let mut seen = HashSet::new();
        self.history
            .iter()
            .rev()
            .take(window)
            .filter(|m| !m.is_self && m.sender_id != CHANNEL_RELAY_USER_ID)
            .filter(|m| seen.insert(m.sender_id))
            .map(|m| Member {
                id: m.sender_id,
                name: m.sender_name.clone(),
                handle: m.handle.clone(),
            })
            .collect()
    }

    /// Whether this chat is the discussion thread under a channel post.
    pub fn is_comment_thread(&self) -> bool {
        self.history.iter().any(|m| {
            m.meta.is_automatic_forward
                || (matches!(m.meta.forward_origin, Some(ForwardOrigin::Channel { .. }))
                    && m.sender_id == CHANNEL_RELAY_USER_ID)
        })
    }

    pub fn character_names(&self) -> &[String] {
        self.character
            .as_ref()
            .map(|character| character.names.as_slice())
            .unwrap_or(&[])
    }

    pub fn effective_messages_to_pass(&self, default: usize) -> usize {
        self.settings.messages_to_pass.unwrap_or(default)
    }

    pub fn effective_random_reply_probability(&self, default: f64) -> f64 {
        self.settings.random_reply_probability.unwrap_or(default)
    }

    pub fn effective_model<'a>(&'a self, default: &'a str) -> &'a str {
        self.settings.model.as_deref().unwrap_or(default)
    }

    pub fn hate_mode(&self) -> bool {
        self.settings.hate_mode.unwrap_or(false)
    }

    /// Trim history and notes down to the caps, oldest first.
    pub(crate) fn enforce_caps(&mut self, max_messages: usize, max_notes: usize) {
        while self.history.len() > max_messages {
            self.history.pop_front();
        }
        if self.notes.len() > max_notes {
            let excess = self.notes.len() - max_notes;
            self.notes.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(id: MessageId, sender: UserId) -> Message {
        Message::text(id, sender, format!("user-{sender}"), format!("message {id}"))
    }

    #[test]
    fn test_push_message_evicts_single_oldest() {
        let mut chat = ChatState::default();
        for id in 1..=3 {
            chat.push_message(text(id, 1), 3);
        }

        let evicted = chat.push_message(text(4, 1), 3);
        assert_eq!(evicted.map(|m| m.id), Some(1));
        let ids: Vec<_> = chat.history.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
    }

    #[test]
    fn test_push_message_replaces_duplicate_id() {
        let mut chat = ChatState::default();
        chat.push_message(text(1, 1), 10);
        chat.push_message(text(2, 1), 10);
        chat.push_message(Message::text(1, 1, "user-1", "edited"), 10);

        assert_eq!(chat.history.len(), 2);
        assert_eq!(chat.history[0].text.as_deref(), Some("edited"));
        assert_eq!(chat.history[1].id, 2);
    }

    #[test]
    fn test_push_note_keeps_newest() {
        let mut chat = ChatState::default();
        for i in 0..5 {
            chat.push_note(format!("note {i}"), 3);
        }
        assert_eq!(chat.notes, vec!["note 2", "note 3", "note 4"]);
    }

    #[test]
    fn test_opt_out_is_unique_by_id() {
        let mut chat = ChatState::default();
        let user = OptOutUser {
            id: 42,
            first_name: "Alice".to_string(),
            username: None,
        };
        assert!(chat.opt_out(user.clone()));
        assert!(!chat.opt_out(user));
        assert_eq!(chat.opt_out_users.len(), 1);

        assert!(chat.opt_in(42));
        assert!(!chat.opt_in(42));
        assert!(!chat.is_opted_out(42));
    }

    #[test]
    fn test_lobotomy_clears_notes_and_memory_but_not_character() {
        let mut chat = ChatState::default();
        chat.push_message(text(1, 1), 10);
        chat.push_note("a note", 3);
        chat.memory = Some("remember".to_string());
        chat.character = Some(Character::new("Mira", "a cat"));

        chat.clear_history();
        assert!(chat.history.is_empty());
        assert_eq!(chat.notes.len(), 1);

        chat.lobotomy();
        assert!(chat.notes.is_empty());
        assert!(chat.memory.is_none());
        assert!(chat.character.is_some());
    }

    #[test]
    fn test_active_members_dedupes_and_skips_agent() {
        let mut chat = ChatState::default();
        chat.push_message(text(1, 10), 100);
        chat.push_message(text(2, 20), 100);
        chat.push_message(Message::from_agent(3, 99, "agent", "hi"), 100);
        chat.push_message(text(4, 10), 100);

        let members = chat.active_members(10);
        let ids: Vec<_> = members.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![10, 20]);

        let recent = chat.active_members(1);
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_comment_thread_detection() {
        let mut chat = ChatState::default();
        chat.push_message(text(1, 10), 100);
        assert!(!chat.is_comment_thread());

        let relayed = Message::text(2, CHANNEL_RELAY_USER_ID, "Telegram", "post").with_meta(
            MessageMeta {
                forward_origin: Some(ForwardOrigin::Channel { chat_id: -100 }),
                ..MessageMeta::default()
            },
        );
        chat.push_message(relayed, 100);
        assert!(chat.is_comment_thread());
    }

    #[test]
    fn test_attachment_support_by_kind_and_mime() {
        assert!(AttachmentKind::Photo.is_supported("image/jpeg"));
        assert!(AttachmentKind::Sticker.is_supported("image/webp"));
        assert!(!AttachmentKind::Sticker.is_supported("application/x-tgsticker"));
        assert!(AttachmentKind::Document.is_supported("application/pdf"));
        assert!(AttachmentKind::Document.is_supported("Text/Plain"));
        assert!(!AttachmentKind::Document.is_supported("application/zip"));
    }

    #[test]
    fn test_observable_content() {
        let empty = Message::new(1, 1, "a");
        assert!(!empty.has_observable_content());

        let blank_text = Message::text(2, 1, "a", "");
        assert!(!blank_text.has_observable_content());

        let sticker = Message::new(3, 1, "a").with_attachment(Attachment::new(
            AttachmentKind::Sticker,
            "file",
            "image/webp",
        ));
        assert!(sticker.has_observable_content());

        let joined = Message::new(4, 1, "a").with_meta(MessageMeta {
            new_members: vec!["Bob".to_string()],
            ..MessageMeta::default()
        });
        assert!(joined.has_observable_content());
    }

    #[test]
    fn test_display_handle_normalizes_prefix() {
        let message = Message::text(1, 1, "a", "hi").with_handle("@alice");
        assert_eq!(message.display_handle().as_deref(), Some("@alice"));
        let message = Message::text(1, 1, "a", "hi").with_handle("bob");
        assert_eq!(message.display_handle().as_deref(), Some("@bob"));
    }

    #[test]
    fn test_chat_state_reads_sparse_json() {
        let chat: ChatState = serde_json::from_str(r#"{"notes": ["n"]}"#).unwrap();
        assert_eq!(chat.notes, vec!["n"]);
        assert!(chat.history.is_empty());
        assert_eq!(chat.effective_messages_to_pass(12), 12);
        assert!(!chat.hate_mode());
    }
}
