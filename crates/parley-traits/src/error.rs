use thiserror::Error;

/// Attachment resolution failure.
///
/// Cloneable so a single in-flight resolution can hand the same outcome to
/// every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// Raw bytes could not be fetched from the messaging platform.
    #[error("failed to retrieve {source_ref}: {message}")]
    Retrieval { source_ref: String, message: String },

    /// The AI provider rejected the upload or failed to process it.
    #[error("provider failed to process {source_ref}: {message}")]
    Processing { source_ref: String, message: String },

    /// Processing did not finish within the polling budget.
    #[error("resolution of {source_ref} timed out after {waited_ms}ms")]
    Timeout { source_ref: String, waited_ms: u64 },
}

impl ResolveError {
    pub fn retrieval(source_ref: impl Into<String>, message: impl ToString) -> Self {
        Self::Retrieval {
            source_ref: source_ref.into(),
            message: message.to_string(),
        }
    }

    pub fn processing(source_ref: impl Into<String>, message: impl ToString) -> Self {
        Self::Processing {
            source_ref: source_ref.into(),
            message: message.to_string(),
        }
    }

    /// Source reference the failure belongs to.
    pub fn source_ref(&self) -> &str {
        match self {
            Self::Retrieval { source_ref, .. }
            | Self::Processing { source_ref, .. }
            | Self::Timeout { source_ref, .. } => source_ref,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
