//! Rendering stored messages into model-facing text.

use std::collections::HashSet;

use parley_storage::{Attachment, Message, MessageId, UserId};
use serde::Serialize;
use serde_json::Value;

/// Attachment payload keys with these suffixes are platform plumbing.
const STRUCTURAL_SUFFIXES: [&str; 4] = ["id", "size", "thumbnail", "date"];

pub const TRUNCATION_MARKER: &str = "...";

/// Remove structural fields from a platform payload, recursively.
pub fn strip_structural_fields(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(key, _)| !STRUCTURAL_SUFFIXES.iter().any(|suffix| key.ends_with(suffix)))
                .map(|(key, value)| (key.clone(), strip_structural_fields(value)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(strip_structural_fields).collect()),
        other => other.clone(),
    }
}

/// Keep the first `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}{TRUNCATION_MARKER}", &text[..cut]),
        None => text.to_string(),
    }
}

/// Which messages of a history may be shown, given the chat's opt-outs.
#[derive(Debug, Default)]
pub struct Visibility {
    opted_out: HashSet<UserId>,
    /// Messages of opted-out users that someone explicitly asked the agent about.
    rescued: HashSet<MessageId>,
}

impl Visibility {
    pub fn new(history: &[Message], opted_out: HashSet<UserId>) -> Self {
        let rescued = history
            .iter()
            .filter(|m| !m.is_self && m.addresses_agent && !opted_out.contains(&m.sender_id))
            .filter_map(|m| m.reply_to.as_ref().map(|reply| reply.id))
            .collect();
        Self { opted_out, rescued }
    }

    pub fn is_visible(&self, message: &Message) -> bool {
        message.is_self
            || !self.opted_out.contains(&message.sender_id)
            || self.rescued.contains(&message.id)
    }

    /// Whether the quote inside `message` must be hidden.
    pub fn hides_quote(&self, message: &Message) -> bool {
        let Some(reply) = &message.reply_to else {
            return false;
        };
        let quoted_opted_out = !reply.is_self
            && reply
                .sender_id
                .is_some_and(|sender| self.opted_out.contains(&sender));
        quoted_opted_out && !message.addresses_agent
    }
}

#[derive(Debug, Serialize)]
struct QuoteHeader {
    text: String,
    from_agent: bool,
}

#[derive(Debug, Serialize)]
struct AttachmentHeader<'a> {
    kind: &'a str,
    mime_type: &'a str,
    #[serde(skip_serializing_if = "is_empty_payload")]
    details: Value,
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[derive(Debug, Serialize)]
struct UserHeader<'a> {
    from: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    handle: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reply_to: Option<QuoteHeader>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<AttachmentHeader<'a>>,
    #[serde(skip_serializing_if = "<[String]>::is_empty")]
    joined: &'a [String],
}

fn attachment_header(attachment: &Attachment) -> AttachmentHeader<'_> {
    AttachmentHeader {
        kind: attachment.kind.label(),
        mime_type: &attachment.mime_type,
        details: strip_structural_fields(&attachment.details),
    }
}

/// Compact JSON header describing a chat member's message.
pub fn render_user_text(message: &Message, max_symbols: usize, hide_quote: bool) -> String {
    let reply_to = match &message.reply_to {
        Some(reply) if !hide_quote => Some(QuoteHeader {
            text: truncate_chars(&reply.text, max_symbols),
            from_agent: reply.is_self,
        }),
        _ => None,
    };

    let header = UserHeader {
        from: &message.sender_name,
        handle: message.display_handle(),
        text: message
            .text_content()
            .map(|text| truncate_chars(text, max_symbols)),
        reply_to,
        attachments: message.attachments.iter().map(attachment_header).collect(),
        joined: &message.meta.new_members,
    };

    // Plain structs of strings, bools and JSON values always serialize.
    serde_json::to_string(&header).unwrap_or_default()
}

/// The agent's own words, truncated.
pub fn render_agent_text(message: &Message, max_symbols: usize) -> Option<String> {
    message
        .text_content()
        .map(|text| truncate_chars(text, max_symbols))
}
