use std::sync::Arc;

use anyhow::Result;
use parley_core::channel::telegram::convert_update;
use parley_core::eligibility::ThreadDice;
use parley_core::history::HistoryAssembler;
use parley_core::maintenance::{MaintenanceConfig, spawn_maintenance};
use parley_core::turn::PlanSummary;
use parley_core::{BotConfig, ConversationCore};
use parley_storage::{ChatMemoryStore, paths};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::output::json::print_json_line;
use crate::setup::online_assembler;

pub async fn run(config: BotConfig, store: Arc<ChatMemoryStore>, args: ServeArgs) -> Result<()> {
    let maintenance = spawn_maintenance(
        store.clone(),
        MaintenanceConfig::from_bot_config(&config, paths::media_dir()?),
    );
    info!(chats = store.len(), "Parley serving");

    let outcome = if args.stdin {
        let assembler = if args.online {
            online_assembler(&config)?
        } else {
            HistoryAssembler::offline()
        };
        let core = ConversationCore::new(store.clone(), Arc::new(config), assembler)?;
        tokio::select! {
            result = pump_stdin(&core) => result,
            _ = tokio::signal::ctrl_c() => Ok(()),
        }
    } else {
        tokio::signal::ctrl_c().await.map_err(anyhow::Error::from)
    };

    info!("Shutting down");
    maintenance.shutdown().await?;
    outcome
}

/// Feed newline-delimited Telegram updates through the core until EOF.
async fn pump_stdin(core: &ConversationCore) -> Result<()> {
    let agent_id = core.engine().agent().id;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut dice = ThreadDice;

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let update: serde_json::Value = match serde_json::from_str(&line) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, "Skipping malformed update line");
                continue;
            }
        };
        let inbound = match convert_update(&update, agent_id) {
            Ok(Some(inbound)) => inbound,
            Ok(None) => continue,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable update");
                continue;
            }
        };

        let plan = core.handle_inbound(inbound, &mut dice).await;
        print_json_line(&PlanSummary::from(&plan))?;
    }
    Ok(())
}
