//! History-to-context assembly.
//!
//! Turns a chat's stored history into a chronological, budget-bounded list of
//! model messages. The walk goes newest to oldest and stops at the first
//! message that would break the message-count or byte budget, so the output is
//! always a contiguous suffix of what the chat is allowed to show.
//!
//! Attachments are resolved through an [`AttachmentResolver`] the first time
//! they are included. Successful resolutions are returned alongside the
//! messages so the caller can write them back into the store; a failed
//! resolution drops only that attachment.

mod render;

pub use render::{
    TRUNCATION_MARKER, Visibility, render_agent_text, render_user_text, strip_structural_fields,
    truncate_chars,
};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use parley_storage::{ChatId, ChatMemoryStore, Message, MessageId, ResolutionUpdate, UserId};
use parley_traits::AttachmentResolver;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Limits on an assembled context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextBudget {
    pub max_messages: usize,
    /// Serialized JSON size of the whole emitted sequence.
    pub max_bytes: usize,
    pub max_symbols_per_message: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    Media { uri: String, mime_type: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: Role,
    pub content: Vec<ContentPart>,
}

impl ContextMessage {
    fn encoded_len(&self) -> usize {
        serde_json::to_vec(self).map(|bytes| bytes.len()).unwrap_or(usize::MAX)
    }
}

/// Result of one assembly pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Assembly {
    /// Chronological.
    pub messages: Vec<ContextMessage>,
    /// Ids of the included history messages, chronological.
    pub message_ids: Vec<MessageId>,
    /// New attachment resolutions to record in the store.
    pub resolutions: Vec<ResolutionUpdate>,
    /// Attachments left out because resolution failed.
    pub dropped_attachments: usize,
    /// Serialized size of `messages`.
    pub total_bytes: usize,
}

impl Assembly {
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// JSON array size of elements with the given encoded lengths.
fn sequence_len(element_bytes: usize, elements: usize) -> usize {
    2 + element_bytes + elements.saturating_sub(1)
}

#[derive(Clone)]
pub struct HistoryAssembler {
    resolver: Option<Arc<dyn AttachmentResolver>>,
    resolved_ttl: Duration,
}

impl std::fmt::Debug for HistoryAssembler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryAssembler")
            .field("online", &self.resolver.is_some())
            .field("resolved_ttl", &self.resolved_ttl)
            .finish()
    }
}

impl HistoryAssembler {
    pub fn new(resolver: Arc<dyn AttachmentResolver>, resolved_ttl: Duration) -> Self {
        Self {
            resolver: Some(resolver),
            resolved_ttl,
        }
    }

    /// An assembler that never resolves media; attachments appear only as descriptors.
    pub fn offline() -> Self {
        Self {
            resolver: None,
            resolved_ttl: Duration::ZERO,
        }
    }

    /// Assemble a stored chat and record new resolutions back into it.
    pub async fn assemble_chat(
        &self,
        store: &ChatMemoryStore,
        chat_id: ChatId,
        budget: ContextBudget,
    ) -> Assembly {
        let (history, opted_out) = store.with_chat(chat_id, |chat| {
            (chat.history.iter().cloned().collect::<Vec<_>>(), chat.opted_out_ids())
        });

        let assembly = self.assemble(&history, opted_out, budget).await;
        let recorded = store.record_resolutions(chat_id, &assembly.resolutions);
        debug!(
            chat_id,
            messages = assembly.messages.len(),
            bytes = assembly.total_bytes,
            recorded,
            "Assembled context"
        );
        assembly
    }

    /// Assemble `history` (oldest first) under `budget`.
    ///
    /// A message's attachments are resolved only once its text already fits,
    /// and its resolutions are kept only if the message is included.
    pub async fn assemble(
        &self,
        history: &[Message],
        opted_out: HashSet<UserId>,
        budget: ContextBudget,
    ) -> Assembly {
        let visibility = Visibility::new(history, opted_out);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut assembly = Assembly::default();
        let mut element_bytes = 0usize;

        for message in history.iter().rev() {
            if !visibility.is_visible(message) || !is_renderable(message) {
                continue;
            }
            if assembly.messages.len() + 1 > budget.max_messages {
                break;
            }

            let fits = |size: usize| {
                sequence_len(element_bytes.saturating_add(size), assembly.messages.len() + 1)
                    <= budget.max_bytes
            };

            let mut rendered = render_text(message, &visibility, budget);
            let mut size = rendered.encoded_len();
            if !fits(size) {
                break;
            }

            let media = self.resolve_media(message, now_ms).await;
            if !media.parts.is_empty() {
                rendered.content.extend(media.parts);
                size = rendered.encoded_len();
                if !fits(size) {
                    debug!(message_id = message.id, "Media pushed message over the byte budget");
                    break;
                }
            }

            element_bytes += size;
            assembly.resolutions.extend(media.resolutions);
            assembly.dropped_attachments += media.dropped;
            assembly.messages.push(rendered);
            assembly.message_ids.push(message.id);
        }

        assembly.messages.reverse();
        assembly.message_ids.reverse();
        assembly.total_bytes = if assembly.messages.is_empty() {
            0
        } else {
            sequence_len(element_bytes, assembly.messages.len())
        };
        assembly
    }

    async fn resolve_media(&self, message: &Message, now_ms: i64) -> ResolvedMedia {
        let mut media = ResolvedMedia::default();
        if message.is_self {
            return media;
        }
        let ttl_ms = i64::try_from(self.resolved_ttl.as_millis()).unwrap_or(i64::MAX);

        for (index, attachment) in message.attachments.iter().enumerate() {
            if !attachment.is_supported() {
                continue;
            }

            if let Some(resolved) = attachment.fresh_resolution(ttl_ms, now_ms) {
                media.parts.push(ContentPart::Media {
                    uri: resolved.uri.clone(),
                    mime_type: resolved.mime_type.clone(),
                });
                continue;
            }

            let Some(resolver) = &self.resolver else {
                continue;
            };

            match resolver
                .resolve(&attachment.source_ref, &attachment.mime_type)
                .await
            {
                Ok(resolved) => {
                    media.parts.push(ContentPart::Media {
                        uri: resolved.uri.clone(),
                        mime_type: resolved.mime_type.clone(),
                    });
                    media.resolutions.push(ResolutionUpdate {
                        message_id: message.id,
                        attachment_index: index,
                        resolved,
                    });
                }
                Err(e) => {
                    warn!(
                        message_id = message.id,
                        kind = %attachment.kind,
                        error = %e,
                        "Dropping attachment from context"
                    );
                    media.dropped += 1;
                }
            }
        }

        media
    }
}

/// Media parts for one message, with what to record if it is included.
#[derive(Default)]
struct ResolvedMedia {
    parts: Vec<ContentPart>,
    resolutions: Vec<ResolutionUpdate>,
    dropped: usize,
}

/// Agent messages are shown by their text alone; everything else needs observable content.
fn is_renderable(message: &Message) -> bool {
    if message.is_self {
        message.text_content().is_some()
    } else {
        message.has_observable_content()
    }
}

/// The text part of a message, before any media.
fn render_text(message: &Message, visibility: &Visibility, budget: ContextBudget) -> ContextMessage {
    let max_symbols = budget.max_symbols_per_message;
    if message.is_self {
        return ContextMessage {
            role: Role::Assistant,
            content: vec![ContentPart::Text {
                text: render_agent_text(message, max_symbols).unwrap_or_default(),
            }],
        };
    }
    ContextMessage {
        role: Role::User,
        content: vec![ContentPart::Text {
            text: render_user_text(message, max_symbols, visibility.hides_quote(message)),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use parley_storage::{Attachment, AttachmentKind, ReplyTo, StoreLimits};
    use parley_traits::{ResolveError, ResolvedRef};

    fn budget(max_messages: usize) -> ContextBudget {
        ContextBudget {
            max_messages,
            max_bytes: 1_000_000,
            max_symbols_per_message: 4096,
        }
    }

    fn text(id: i64, sender: i64, body: &str) -> Message {
        Message::text(id, sender, format!("user{sender}"), body)
    }

    fn photo(id: i64, source: &str) -> Message {
        text(id, 7, "pic").with_attachment(Attachment::new(AttachmentKind::Photo, source, "image/jpeg"))
    }

    /// Resolves everything except refs starting with `bad`, counting calls.
    #[derive(Default)]
    struct FakeResolver {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AttachmentResolver for FakeResolver {
        async fn resolve(&self, source_ref: &str, mime_type: &str) -> Result<ResolvedRef, ResolveError> {
            self.calls.lock().push(source_ref.to_string());
            if source_ref.starts_with("bad") {
                return Err(ResolveError::retrieval(source_ref, "gone"));
            }
            Ok(ResolvedRef::new(format!("https://files/{source_ref}"), mime_type))
        }
    }

    fn first_text(message: &ContextMessage) -> &str {
        match &message.content[0] {
            ContentPart::Text { text } => text,
            ContentPart::Media { .. } => "",
        }
    }

    #[tokio::test]
    async fn test_window_keeps_newest_in_order() {
        let history: Vec<Message> = (1..=20).map(|id| text(id, 7, "hi")).collect();
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), budget(12))
            .await;

        assert_eq!(assembly.messages.len(), 12);
        assert_eq!(assembly.message_ids, (9..=20).collect::<Vec<_>>());
        assert_eq!(
            assembly.total_bytes,
            serde_json::to_vec(&assembly.messages).unwrap().len()
        );
    }

    #[tokio::test]
    async fn test_byte_budget_is_exact() {
        let history: Vec<Message> = (1..=5).map(|id| text(id, 7, "0123456789")).collect();
        let full = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), budget(10))
            .await;
        let tail_two = serde_json::to_vec(&full.messages[3..]).unwrap().len();

        let mut tight = budget(10);
        tight.max_bytes = tail_two;
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), tight)
            .await;
        assert_eq!(assembly.message_ids, vec![4, 5]);
        assert_eq!(assembly.total_bytes, tail_two);

        tight.max_bytes = tail_two - 1;
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), tight)
            .await;
        assert_eq!(assembly.message_ids, vec![5]);
    }

    #[tokio::test]
    async fn test_budget_too_small_for_newest() {
        let history = vec![text(1, 7, "hello")];
        let mut tiny = budget(10);
        tiny.max_bytes = 10;
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), tiny)
            .await;
        assert!(assembly.is_empty());
        assert_eq!(assembly.total_bytes, 0);
    }

    #[tokio::test]
    async fn test_truncation_before_counting() {
        let history = vec![text(1, 7, &"x".repeat(50))];
        let mut small = budget(10);
        small.max_symbols_per_message = 10;
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), small)
            .await;

        let header: serde_json::Value =
            serde_json::from_str(first_text(&assembly.messages[0])).unwrap();
        assert_eq!(header["text"], format!("{}...", "x".repeat(10)));
    }

    #[tokio::test]
    async fn test_opted_out_excluded_without_consuming_budget() {
        let history = vec![
            text(1, 7, "a"),
            text(2, 66, "private"),
            text(3, 7, "b"),
            text(4, 66, "private"),
            text(5, 7, "c"),
        ];
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::from([66]), budget(3))
            .await;
        assert_eq!(assembly.message_ids, vec![1, 3, 5]);
    }

    #[tokio::test]
    async fn test_quote_of_opted_out_user_is_stripped() {
        let quote = ReplyTo {
            id: 1,
            text: "private words".to_string(),
            is_self: false,
            sender_id: Some(66),
        };
        let history = vec![
            text(1, 66, "private words"),
            text(2, 7, "lol").with_reply_to(quote),
        ];
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::from([66]), budget(10))
            .await;

        assert_eq!(assembly.message_ids, vec![2]);
        assert!(!first_text(&assembly.messages[0]).contains("private words"));
    }

    #[tokio::test]
    async fn test_agent_messages_become_assistant() {
        let history = vec![
            text(1, 7, "hi"),
            Message::from_agent(2, 4242, "Parley", "hello there"),
        ];
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), budget(10))
            .await;
        assert_eq!(assembly.messages[0].role, Role::User);
        assert_eq!(
            assembly.messages[1],
            ContextMessage {
                role: Role::Assistant,
                content: vec![ContentPart::Text {
                    text: "hello there".to_string()
                }],
            }
        );
    }

    #[tokio::test]
    async fn test_skips_messages_without_content() {
        let history = vec![
            text(1, 7, "a"),
            Message::new(2, 7, "Ann"),
            Message::new(3, 7, "Ann").with_attachment(Attachment::new(
                AttachmentKind::Sticker,
                "st",
                "application/x-tgsticker",
            )),
            text(4, 7, "b"),
        ];
        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), budget(10))
            .await;
        assert_eq!(assembly.message_ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_failed_resolution_drops_only_that_attachment() {
        let resolver = Arc::new(FakeResolver::default());
        let assembler = HistoryAssembler::new(resolver.clone(), Duration::from_secs(3600));
        let history = vec![photo(1, "good-1"), photo(2, "bad-2")];

        let assembly = assembler.assemble(&history, HashSet::new(), budget(10)).await;
        assert_eq!(assembly.message_ids, vec![1, 2]);
        assert_eq!(assembly.dropped_attachments, 1);
        assert_eq!(assembly.messages[0].content.len(), 2);
        assert_eq!(assembly.messages[1].content.len(), 1);
        assert_eq!(assembly.resolutions.len(), 1);
        assert_eq!(assembly.resolutions[0].message_id, 1);

        // Failures are retried on the next pass.
        assembler.assemble(&history, HashSet::new(), budget(10)).await;
        let calls = resolver.calls.lock().clone();
        assert_eq!(calls.iter().filter(|c| c.as_str() == "bad-2").count(), 2);
    }

    #[tokio::test]
    async fn test_assemble_chat_records_and_reuses_resolutions() {
        let resolver = Arc::new(FakeResolver::default());
        let assembler = HistoryAssembler::new(resolver.clone(), Duration::from_secs(3600));
        let store = ChatMemoryStore::new("unused.json", StoreLimits::default());
        store.add_message(1, photo(1, "good-1"));
        store.add_message(1, text(2, 8, "nice"));

        let first = assembler.assemble_chat(&store, 1, budget(10)).await;
        let second = assembler.assemble_chat(&store, 1, budget(10)).await;

        assert_eq!(first.messages, second.messages);
        assert!(second.resolutions.is_empty());
        assert_eq!(resolver.calls.lock().len(), 1);
        assert!(store.history(1)[0].attachments[0].resolved.is_some());
    }

    #[tokio::test]
    async fn test_stale_resolution_is_refreshed() {
        let resolver = Arc::new(FakeResolver::default());
        let assembler = HistoryAssembler::new(resolver.clone(), Duration::from_secs(3600));
        let mut message = photo(1, "good-1");
        let mut stale = ResolvedRef::new("https://files/old", "image/jpeg");
        stale.resolved_at -= 2 * 3600 * 1000;
        message.attachments[0].resolved = Some(stale);

        let assembly = assembler.assemble(&[message], HashSet::new(), budget(10)).await;
        assert_eq!(resolver.calls.lock().len(), 1);
        assert_eq!(
            assembly.messages[0].content[1],
            ContentPart::Media {
                uri: "https://files/good-1".to_string(),
                mime_type: "image/jpeg".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_excluded_photo_message_is_not_resolved() {
        let newer = text(2, 8, "just text");
        let alone = HistoryAssembler::offline()
            .assemble(std::slice::from_ref(&newer), HashSet::new(), budget(10))
            .await;

        let resolver = Arc::new(FakeResolver::default());
        let assembler = HistoryAssembler::new(resolver.clone(), Duration::from_secs(3600));
        let mut tight = budget(10);
        tight.max_bytes = alone.total_bytes;
        let assembly = assembler
            .assemble(&[photo(1, "old-photo"), newer], HashSet::new(), tight)
            .await;

        assert_eq!(assembly.message_ids, vec![2]);
        assert!(resolver.calls.lock().is_empty());
        assert!(assembly.resolutions.is_empty());
    }

    #[tokio::test]
    async fn test_media_overflow_keeps_no_resolution() {
        let message = photo(1, "good-1");
        let text_only = HistoryAssembler::offline()
            .assemble(std::slice::from_ref(&message), HashSet::new(), budget(10))
            .await;

        let resolver = Arc::new(FakeResolver::default());
        let assembler = HistoryAssembler::new(resolver.clone(), Duration::from_secs(3600));
        let mut tight = budget(10);
        tight.max_bytes = text_only.total_bytes;
        let assembly = assembler.assemble(&[message], HashSet::new(), tight).await;

        assert!(assembly.is_empty());
        assert!(assembly.resolutions.is_empty());
        assert_eq!(assembly.dropped_attachments, 0);
    }

    #[tokio::test]
    async fn test_textless_agent_message_is_filtered_out() {
        let mut agent_photo = Message::new(2, 4242, "Parley").with_attachment(Attachment::new(
            AttachmentKind::Photo,
            "agent-pic",
            "image/jpeg",
        ));
        agent_photo.is_self = true;
        let history = vec![text(1, 7, "a"), agent_photo, text(3, 7, "b")];

        let assembly = HistoryAssembler::offline()
            .assemble(&history, HashSet::new(), budget(2))
            .await;
        assert_eq!(assembly.message_ids, vec![1, 3]);
        assert_eq!(assembly.messages[0].role, Role::User);
    }
}
