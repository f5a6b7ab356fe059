use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser)]
#[command(name = "parley")]
#[command(version, about = "Parley - group-chat agent core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ~/.config/parley/config.toml)
    #[arg(long, global = true, env = "PARLEY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the save and retention timers until Ctrl-C
    Serve(ServeArgs),

    /// Validate the config file and the memory snapshot
    Check,

    /// Run one media retention sweep
    Sweep(SweepArgs),

    /// Show a chat's stored state
    Inspect {
        #[arg(allow_negative_numbers = true)]
        chat_id: i64,
    },

    /// Dry-run the reply decision for a message
    Decide(DecideArgs),

    /// Assemble the context a reply in this chat would see
    Context(ContextArgs),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Read Telegram updates as JSON lines from stdin and print a plan per update
    #[arg(long)]
    pub stdin: bool,

    /// Resolve attachments while assembling context (needs TELEGRAM_BOT_TOKEN and AI_TOKEN)
    #[arg(long, requires = "stdin")]
    pub online: bool,
}

#[derive(Args)]
pub struct SweepArgs {
    /// Override the configured maximum file age
    #[arg(long)]
    pub max_age_hours: Option<u64>,
}

#[derive(Args)]
pub struct DecideArgs {
    #[arg(allow_negative_numbers = true)]
    pub chat_id: i64,

    /// Message text
    #[arg(long, conflicts_with = "update")]
    pub text: Option<String>,

    /// Telegram update JSON file to decide on instead of --text
    #[arg(long)]
    pub update: Option<PathBuf>,

    /// Treat the chat as a private conversation
    #[arg(long)]
    pub private: bool,

    /// The message replies to one of the agent's messages
    #[arg(long)]
    pub reply_to_self: bool,

    /// Sender id
    #[arg(long, default_value_t = 1)]
    pub from: i64,

    /// Sender handle, without '@'
    #[arg(long)]
    pub handle: Option<String>,

    /// Fix every probability roll to this value (0-100) instead of rolling
    #[arg(long)]
    pub roll: Option<f64>,
}

#[derive(Args)]
pub struct ContextArgs {
    #[arg(allow_negative_numbers = true)]
    pub chat_id: i64,

    /// Never resolve attachments; show them as descriptors only
    #[arg(long)]
    pub offline: bool,

    /// Override the chat's message window
    #[arg(long)]
    pub messages: Option<usize>,
}
