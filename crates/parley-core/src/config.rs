//! Bot configuration.
//!
//! Loaded from a TOML file where every field has a default, so an empty or
//! missing file yields a working configuration. Secrets never live in the file.

use std::path::Path;
use std::time::Duration;

use parley_storage::StoreLimits;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::history::ContextBudget;

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_BOT_TOKEN";
pub const AI_TOKEN_ENV: &str = "AI_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    pub agent: AgentConfig,
    /// Names the agent answers to, matched case-insensitively on word boundaries.
    pub names: Vec<String>,
    pub nudge: NudgeConfig,
    pub ignore: IgnoreConfig,
    /// Percent chance of joining in unprompted.
    pub random_reply_probability: f64,
    pub max_messages_to_store: usize,
    pub max_notes_to_store: usize,
    pub context: ContextConfig,
    pub media: MediaConfig,
    pub save_interval_secs: u64,
    pub janitor_interval_secs: u64,
    pub model: String,
    /// Canned replies used when a directly addressed turn fails.
    pub apologies: Vec<String>,
    pub admin_ids: Vec<i64>,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            names: vec!["parley".to_string()],
            nudge: NudgeConfig::default(),
            ignore: IgnoreConfig::default(),
            random_reply_probability: 2.0,
            max_messages_to_store: 200,
            max_notes_to_store: 3,
            context: ContextConfig::default(),
            media: MediaConfig::default(),
            save_interval_secs: 60,
            janitor_interval_secs: 3600,
            model: "gemini-2.0-flash".to_string(),
            apologies: vec![
                "not sure..".to_string(),
                "I don't want to answer right now".to_string(),
                "I'm zoning out, try later".to_string(),
            ],
            admin_ids: Vec::new(),
        }
    }
}

/// The agent's own platform identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub id: i64,
    /// Platform handle, with or without the leading `@`.
    pub handle: String,
}

/// Phrases that make the agent more likely to chime in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NudgeConfig {
    pub patterns: Vec<PatternSpec>,
    pub probability: f64,
}

impl Default for NudgeConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            probability: 50.0,
        }
    }
}

/// Short low-content messages the agent usually lets pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IgnoreConfig {
    pub patterns: Vec<PatternSpec>,
    pub probability: f64,
    /// Only messages shorter than this many characters are considered.
    pub max_length: usize,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            probability: 90.0,
            max_length: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub messages_to_pass: usize,
    pub bytes_limit: usize,
    pub message_max_length: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            messages_to_pass: 12,
            bytes_limit: 20 * 1024 * 1024,
            message_max_length: 4096,
        }
    }
}

impl ContextConfig {
    /// Budget for a chat whose window may be overridden.
    pub fn budget(&self, messages_to_pass: usize) -> ContextBudget {
        ContextBudget {
            max_messages: messages_to_pass,
            max_bytes: self.bytes_limit,
            max_symbols_per_message: self.message_max_length,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub files_max_age_hours: u64,
    pub poll_interval_ms: u64,
    pub max_polls: u32,
    pub max_wait_secs: u64,
    /// Provider files expire after 48h, so stored references are reused for less.
    pub resolved_ref_ttl_hours: u64,
    pub telegram_api_base: String,
    pub gemini_api_base: String,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            files_max_age_hours: 72,
            poll_interval_ms: 1000,
            max_polls: 60,
            max_wait_secs: 90,
            resolved_ref_ttl_hours: 47,
            telegram_api_base: "https://api.telegram.org".to_string(),
            gemini_api_base: "https://generativelanguage.googleapis.com".to_string(),
        }
    }
}

impl MediaConfig {
    pub fn files_max_age(&self) -> Duration {
        Duration::from_secs(self.files_max_age_hours * 3600)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    pub fn resolved_ref_ttl(&self) -> Duration {
        Duration::from_secs(self.resolved_ref_ttl_hours * 3600)
    }
}

/// A trigger pattern as written in the config file.
///
/// ```toml
/// patterns = ["best bot", { regex = "^ok$", case_insensitive = true }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatternSpec {
    Literal(String),
    Regex {
        regex: String,
        #[serde(default)]
        case_insensitive: bool,
    },
}

impl PatternSpec {
    pub fn compile(&self) -> Result<MessagePattern, ConfigError> {
        match self {
            Self::Literal(text) => Ok(MessagePattern::Literal(text.clone())),
            Self::Regex {
                regex,
                case_insensitive,
            } => RegexBuilder::new(regex)
                .case_insensitive(*case_insensitive)
                .multi_line(true)
                .build()
                .map(MessagePattern::Regex)
                .map_err(|source| ConfigError::Pattern {
                    pattern: regex.clone(),
                    source,
                }),
        }
    }
}

/// A compiled trigger pattern.
#[derive(Debug, Clone)]
pub enum MessagePattern {
    /// Case-sensitive substring.
    Literal(String),
    Regex(Regex),
}

impl MessagePattern {
    pub fn matches(&self, text: &str) -> bool {
        match self {
            Self::Literal(needle) => !needle.is_empty() && text.contains(needle.as_str()),
            Self::Regex(regex) => regex.is_match(text),
        }
    }
}

pub fn compile_patterns(specs: &[PatternSpec]) -> Result<Vec<MessagePattern>, ConfigError> {
    specs.iter().map(PatternSpec::compile).collect()
}

impl BotConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "Config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("nudge.probability", self.nudge.probability),
            ("ignore.probability", self.ignore.probability),
            ("random_reply_probability", self.random_reply_probability),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ConfigError::Probability { field, value });
            }
        }

        for (field, value) in [
            ("max_messages_to_store", self.max_messages_to_store),
            ("max_notes_to_store", self.max_notes_to_store),
            ("context.messages_to_pass", self.context.messages_to_pass),
            ("context.bytes_limit", self.context.bytes_limit),
            ("context.message_max_length", self.context.message_max_length),
            ("media.max_polls", self.media.max_polls as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroLimit { field });
            }
        }

        compile_patterns(&self.nudge.patterns)?;
        compile_patterns(&self.ignore.patterns)?;
        Ok(())
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_messages: self.max_messages_to_store,
            max_notes: self.max_notes_to_store,
        }
    }

    pub fn is_admin(&self, user_id: i64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

/// Credentials read from the environment.
#[derive(Clone)]
pub struct Secrets {
    pub telegram_token: String,
    pub ai_token: String,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("telegram_token", &"***")
            .field("ai_token", &"***")
            .finish()
    }
}

impl Secrets {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telegram_token: require_env(TELEGRAM_TOKEN_ENV)?,
            ai_token: require_env(AI_TOKEN_ENV)?,
        })
    }
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .ok_or(ConfigError::MissingEnv(name))
}
