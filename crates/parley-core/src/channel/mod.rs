//! Platform message intake.
//!
//! Converts platform payloads into stored [`Message`](parley_storage::Message)
//! values plus the chat kind the eligibility engine needs.

pub mod telegram;
mod types;

pub use types::{ChatKind, InboundMessage};
