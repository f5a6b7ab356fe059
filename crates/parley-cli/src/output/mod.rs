pub mod json;
pub mod table;

use clap::ValueEnum;

/// How command results are printed.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Tables and plain lines
    #[default]
    Text,
    /// Pretty-printed JSON on stdout; logs stay on stderr
    Json,
}

impl OutputFormat {
    pub fn is_json(self) -> bool {
        self == Self::Json
    }
}
