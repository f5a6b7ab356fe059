mod cli;
mod commands;
mod logging;
mod output;
mod setup;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use parley_storage::paths;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(&paths::logs_dir()?, cli.verbose)?;

    let config_path = cli.config.as_deref();
    let format = cli.format;

    match cli.command {
        Commands::Check => commands::check::run(config_path, format),
        Commands::Sweep(args) => {
            let config = setup::load_config(config_path)?;
            commands::sweep::run(&config, args, format).await
        }
        Commands::Serve(args) => {
            let config = setup::load_config(config_path)?;
            let store = setup::open_store(&config)?;
            commands::serve::run(config, store, args).await
        }
        Commands::Inspect { chat_id } => {
            let config = setup::load_config(config_path)?;
            let store = setup::open_store(&config)?;
            commands::inspect::run(&store, chat_id, format)
        }
        Commands::Decide(args) => {
            let config = setup::load_config(config_path)?;
            let store = setup::open_store(&config)?;
            commands::decide::run(&config, &store, args, format)
        }
        Commands::Context(args) => {
            let config = setup::load_config(config_path)?;
            let store = setup::open_store(&config)?;
            commands::context::run(&config, &store, args, format).await
        }
    }
}
