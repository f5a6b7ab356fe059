use std::path::PathBuf;

use thiserror::Error;

/// Failures loading or saving the memory store snapshot.
///
/// `Read` and `Corrupt` are fatal at startup: a snapshot that exists but cannot
/// be understood is never replaced by an empty store. `Write` and `Encode` are
/// reported by `save()` and retried on the next save tick.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read memory snapshot {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("memory snapshot {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to write memory snapshot {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode memory snapshot: {0}")]
    Encode(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Whether the process must refuse to continue.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Corrupt { .. })
    }
}

/// Rejected per-chat setting change.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SettingsError {
    #[error("message window must be between {min} and {max}, got {value}")]
    MessageWindow { value: usize, min: usize, max: usize },

    #[error("random reply probability must be between 0 and {max}, got {value}")]
    RandomProbability { value: f64, max: f64 },
}
