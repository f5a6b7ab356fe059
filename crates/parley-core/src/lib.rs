//! Parley Core - reply gating and context assembly for a group-chat agent.
//!
//! For each inbound message the [`ConversationCore`] decides whether to reply
//! ([`eligibility`]), remembers the message in the shared
//! [`ChatMemoryStore`](parley_storage::ChatMemoryStore), and on a reply builds
//! a budget-bounded context from the chat's history ([`history`]), resolving
//! media through the [`media`] resolver. [`maintenance`] keeps the store saved
//! and the media cache swept.

pub mod channel;
pub mod config;
pub mod eligibility;
pub mod error;
pub mod history;
pub mod janitor;
pub mod maintenance;
pub mod media;
pub mod turn;

pub use config::{BotConfig, Secrets};
pub use error::ConfigError;
pub use turn::{ConversationCore, ReplyPlan, TurnPlan, fallback_reply};
