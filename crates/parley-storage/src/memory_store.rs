//! Process-wide per-chat memory store.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{PersistenceError, SettingsError};
use crate::models::{
    Character, ChatId, ChatState, Message, OptOutUser, ResolutionUpdate, UserId,
};

/// Current snapshot schema version.
pub const STORE_SCHEMA_VERSION: u32 = 1;

const MIN_MESSAGE_WINDOW: usize = 1;
const MAX_MESSAGE_WINDOW: usize = 200;
const MAX_RANDOM_REPLY_PROBABILITY: f64 = 50.0;

/// Shared handle to one chat's state. Never hold the lock across an `.await`.
pub type ChatHandle = Arc<Mutex<ChatState>>;

/// Caps applied to every chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub max_messages: usize,
    pub max_notes: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_messages: 200,
            max_notes: 3,
        }
    }
}

/// The persisted document: schema version plus every chat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    /// Documents written before versioning carry no field and read as 0.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub chats: BTreeMap<ChatId, ChatState>,
}

/// Durable keyed chat state.
///
/// Each chat sits behind its own lock, so handlers for different chats never
/// block each other and a running `save()` only holds each lock long enough to
/// copy that chat.
#[derive(Debug)]
pub struct ChatMemoryStore {
    chats: DashMap<ChatId, ChatHandle>,
    limits: StoreLimits,
    path: PathBuf,
    save_gate: tokio::sync::Mutex<()>,
}

impl ChatMemoryStore {
    /// Create an empty store that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>, limits: StoreLimits) -> Self {
        Self {
            chats: DashMap::new(),
            limits,
            path: path.into(),
            save_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Load the snapshot at `path`.
    ///
    /// A missing file yields an empty store. A file that exists but cannot be
    /// read or parsed is an error; it is never silently replaced.
    pub fn load(path: impl Into<PathBuf>, limits: StoreLimits) -> Result<Self, PersistenceError> {
        let path = path.into();
        let store = Self::new(path.clone(), limits);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No memory snapshot found, starting empty");
                return Ok(store);
            }
            Err(source) => return Err(PersistenceError::Read { path, source }),
        };

        let document: StoreDocument = serde_json::from_slice(&bytes)
            .map_err(|source| PersistenceError::Corrupt {
                path: path.clone(),
                source,
            })?;

        if document.version > STORE_SCHEMA_VERSION {
            warn!(
                found = document.version,
                supported = STORE_SCHEMA_VERSION,
                "Memory snapshot written by a newer version; unknown fields are ignored"
            );
        }

        for (chat_id, mut chat) in document.chats {
            chat.enforce_caps(limits.max_messages, limits.max_notes);
            store.chats.insert(chat_id, Arc::new(Mutex::new(chat)));
        }

        info!(path = %path.display(), chats = store.len(), "Memory snapshot loaded");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self.chats.iter().map(|entry| *entry.key()).collect();
        ids.sort_unstable();
        ids
    }

    /// Handle to a chat's state, inserting a default one on first use.
    pub fn get(&self, chat_id: ChatId) -> ChatHandle {
        self.chats.entry(chat_id).or_default().value().clone()
    }

    /// Handle to a chat's state without creating it.
    pub fn peek(&self, chat_id: ChatId) -> Option<ChatHandle> {
        self.chats.get(&chat_id).map(|entry| entry.value().clone())
    }

    /// Run `f` with exclusive access to a chat's state.
    pub fn with_chat<R>(&self, chat_id: ChatId, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let handle = self.get(chat_id);
        let mut chat = handle.lock();
        f(&mut chat)
    }

    /// Append a message, evicting the oldest entry when the history is full.
    pub fn add_message(&self, chat_id: ChatId, message: Message) {
        let max_messages = self.limits.max_messages;
        let evicted = self.with_chat(chat_id, |chat| chat.push_message(message, max_messages));
        if let Some(evicted) = evicted {
            debug!(chat_id, message_id = evicted.id, "Evicted oldest message from history");
        }
    }

    /// Copy of a chat's history, oldest first.
    pub fn history(&self, chat_id: ChatId) -> Vec<Message> {
        self.with_chat(chat_id, |chat| chat.history.iter().cloned().collect())
    }

    /// Forget the message history only.
    pub fn clear(&self, chat_id: ChatId) {
        self.with_chat(chat_id, ChatState::clear_history);
    }

    /// Forget history, notes and long-term memory.
    pub fn lobotomy(&self, chat_id: ChatId) {
        self.with_chat(chat_id, ChatState::lobotomy);
    }

    pub fn touch(&self, chat_id: ChatId) {
        self.with_chat(chat_id, ChatState::touch);
    }

    pub fn add_note(&self, chat_id: ChatId, note: impl Into<String>) {
        let max_notes = self.limits.max_notes;
        let note = note.into();
        self.with_chat(chat_id, |chat| chat.push_note(note, max_notes));
    }

    pub fn set_memory(&self, chat_id: ChatId, memory: Option<String>) {
        self.with_chat(chat_id, |chat| chat.memory = memory);
    }

    /// Returns true when the user was newly opted out.
    pub fn opt_out(&self, chat_id: ChatId, user: OptOutUser) -> bool {
        self.with_chat(chat_id, |chat| chat.opt_out(user))
    }

    /// Returns true when the user had been opted out.
    pub fn opt_in(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.with_chat(chat_id, |chat| chat.opt_in(user_id))
    }

    pub fn set_character(&self, chat_id: ChatId, character: Option<Character>) {
        self.with_chat(chat_id, |chat| chat.character = character);
    }

    pub fn clear_character(&self, chat_id: ChatId) {
        self.set_character(chat_id, None);
    }

    /// Override the context window; `None` restores the global default.
    pub fn set_messages_to_pass(
        &self,
        chat_id: ChatId,
        value: Option<usize>,
    ) -> Result<(), SettingsError> {
        if let Some(value) = value
            && !(MIN_MESSAGE_WINDOW..=MAX_MESSAGE_WINDOW).contains(&value)
        {
            return Err(SettingsError::MessageWindow {
                value,
                min: MIN_MESSAGE_WINDOW,
                max: MAX_MESSAGE_WINDOW,
            });
        }
        self.with_chat(chat_id, |chat| chat.settings.messages_to_pass = value);
        Ok(())
    }

    /// Override the random reply probability; `None` restores the global default.
    pub fn set_random_reply_probability(
        &self,
        chat_id: ChatId,
        value: Option<f64>,
    ) -> Result<(), SettingsError> {
        if let Some(value) = value
            && !(0.0..=MAX_RANDOM_REPLY_PROBABILITY).contains(&value)
        {
            return Err(SettingsError::RandomProbability {
                value,
                max: MAX_RANDOM_REPLY_PROBABILITY,
            });
        }
        self.with_chat(chat_id, |chat| chat.settings.random_reply_probability = value);
        Ok(())
    }

    pub fn set_model(&self, chat_id: ChatId, model: Option<String>) {
        self.with_chat(chat_id, |chat| chat.settings.model = model);
    }

    /// Flip hate mode and return the new value.
    pub fn toggle_hate_mode(&self, chat_id: ChatId) -> bool {
        self.with_chat(chat_id, |chat| {
            let enabled = !chat.hate_mode();
            chat.settings.hate_mode = Some(enabled);
            enabled
        })
    }

    /// Write resolved attachment references back into stored messages.
    ///
    /// Updates for messages that have since been evicted are ignored. Returns
    /// the number of attachments updated.
    pub fn record_resolutions(&self, chat_id: ChatId, updates: &[ResolutionUpdate]) -> usize {
        if updates.is_empty() {
            return 0;
        }
        let Some(handle) = self.peek(chat_id) else {
            return 0;
        };

        let mut chat = handle.lock();
        let mut applied = 0;
        for update in updates {
            let attachment = chat
                .history
                .iter_mut()
                .find(|m| m.id == update.message_id)
                .and_then(|m| m.attachments.get_mut(update.attachment_index));
            if let Some(attachment) = attachment {
                attachment.resolved = Some(update.resolved.clone());
                applied += 1;
            }
        }
        applied
    }

    /// Point-in-time value copy of every chat.
    ///
    /// Handles are collected first so no map shard is locked while a chat lock
    /// is taken.
    pub fn snapshot(&self) -> StoreDocument {
        let handles: Vec<(ChatId, ChatHandle)> = self
            .chats
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let chats = handles
            .into_iter()
            .map(|(chat_id, handle)| (chat_id, handle.lock().clone()))
            .collect();

        StoreDocument {
            version: STORE_SCHEMA_VERSION,
            chats,
        }
    }

    /// Persist a snapshot of the whole store.
    ///
    /// Saves are serialized; the write goes to a temporary file in the target
    /// directory that atomically replaces the previous snapshot.
    pub async fn save(&self) -> Result<(), PersistenceError> {
        let _gate = self.save_gate.lock().await;

        let document = self.snapshot();
        let path = self.path.clone();
        let chats = document.chats.len();

        let join = tokio::task::spawn_blocking(move || write_document(&path, &document)).await;
        match join {
            Ok(result) => result?,
            Err(e) => {
                return Err(PersistenceError::Write {
                    path: self.path.clone(),
                    source: std::io::Error::other(e),
                });
            }
        }

        debug!(path = %self.path.display(), chats, "Memory snapshot saved");
        Ok(())
    }
}

fn write_document(path: &Path, document: &StoreDocument) -> Result<(), PersistenceError> {
    let bytes = serde_json::to_vec(document)?;

    let write_err = |source: std::io::Error| PersistenceError::Write {
        path: path.to_path_buf(),
        source,
    };

    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir).map_err(write_err)?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir).map_err(write_err)?;
    temp.write_all(&bytes).map_err(write_err)?;
    temp.as_file().sync_all().map_err(write_err)?;
    temp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}
