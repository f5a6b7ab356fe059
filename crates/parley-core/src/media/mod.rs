//! Attachment resolution.
//!
//! [`CachingResolver`] implements the resolver seam over two collaborators:
//! a [`MediaSource`](parley_traits::MediaSource) for raw bytes and a
//! [`FileIngestor`](parley_traits::FileIngestor) for the AI provider.

mod gemini;
mod resolver;
mod telegram;

pub use gemini::{GEMINI_API_BASE, GeminiFileIngestor};
pub use resolver::{CachingResolver, ResolverConfig};
pub use telegram::{TELEGRAM_API_BASE, TelegramMediaSource};
