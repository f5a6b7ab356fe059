use parley_storage::{ChatId, Message};
use serde::{Deserialize, Serialize};

/// Kind of conversation a message arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    Private,
    Group,
    Channel,
}

impl ChatKind {
    /// Parse a Telegram chat type. Supergroups are groups.
    pub fn from_telegram(kind: &str) -> Self {
        match kind {
            "private" => Self::Private,
            "channel" => Self::Channel,
            _ => Self::Group,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private)
    }
}

/// A message received from the platform, ready for the eligibility engine.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub chat_id: ChatId,
    pub chat_kind: ChatKind,
    pub chat_title: Option<String>,
    pub message: Message,
}

impl InboundMessage {
    pub fn new(chat_id: ChatId, chat_kind: ChatKind, message: Message) -> Self {
        Self {
            chat_id,
            chat_kind,
            chat_title: None,
            message,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.chat_title = Some(title.into());
        self
    }
}
