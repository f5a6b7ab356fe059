//! Parley Storage - Per-chat memory persistence
//!
//! This crate owns the durable state of the agent: one [`ChatState`] per chat,
//! kept in a process-wide [`ChatMemoryStore`] and persisted as a single JSON
//! snapshot document.
//!
//! # Architecture
//!
//! Every chat sits behind its own lock inside a concurrent map, so handlers for
//! different chats never contend. Saving copies each chat under its short lock
//! and writes the resulting snapshot on a blocking thread through a temporary
//! file that atomically replaces the previous snapshot.
//!
//! # Files
//!
//! - `memory.json` - the memory store snapshot
//! - `media/` - cached attachment bytes keyed by platform file id
//! - `logs/` - rolling log files

pub mod blob_cache;
pub mod error;
pub mod memory_store;
pub mod models;
pub mod paths;

pub use blob_cache::{DiskBlobCache, MemoryBlobCache};
pub use error::{PersistenceError, SettingsError};
pub use memory_store::{ChatHandle, ChatMemoryStore, STORE_SCHEMA_VERSION, StoreDocument, StoreLimits};
pub use models::{
    Attachment, AttachmentKind, ChatId, ChatSettings, ChatState, Character, ForwardOrigin,
    Member, Message, MessageId, MessageMeta, OptOutUser, ReplyTo, ResolutionUpdate, UserId,
};
