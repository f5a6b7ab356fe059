use std::path::PathBuf;

use thiserror::Error;

/// Configuration problems. All of them stop the process at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{field} must be between 0 and 100, got {value}")]
    Probability { field: &'static str, value: f64 },

    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },

    #[error("invalid pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
}
