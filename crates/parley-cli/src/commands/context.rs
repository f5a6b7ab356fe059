use anyhow::Result;
use parley_core::BotConfig;
use parley_core::history::HistoryAssembler;
use parley_storage::ChatMemoryStore;
use serde_json::json;

use crate::cli::ContextArgs;
use crate::output::OutputFormat;
use crate::output::json::print_json;
use crate::setup::online_assembler;

pub async fn run(
    config: &BotConfig,
    store: &ChatMemoryStore,
    args: ContextArgs,
    format: OutputFormat,
) -> Result<()> {
    let assembler = if args.offline {
        HistoryAssembler::offline()
    } else {
        online_assembler(config)?
    };

    let window = match args.messages {
        Some(messages) => messages,
        None => store.with_chat(args.chat_id, |chat| {
            chat.effective_messages_to_pass(config.context.messages_to_pass)
        }),
    };
    let assembly = assembler
        .assemble_chat(store, args.chat_id, config.context.budget(window))
        .await;

    // New resolutions were recorded in the store; keep them.
    if !assembly.resolutions.is_empty() {
        store.save().await?;
    }

    if format.is_json() {
        return print_json(&json!({
            "chat_id": args.chat_id,
            "message_ids": assembly.message_ids,
            "total_bytes": assembly.total_bytes,
            "dropped_attachments": assembly.dropped_attachments,
            "messages": assembly.messages,
        }));
    }

    print_json(&assembly.messages)?;
    eprintln!(
        "{} messages, {} bytes, {} attachments dropped",
        assembly.messages.len(),
        assembly.total_bytes,
        assembly.dropped_attachments
    );
    Ok(())
}
