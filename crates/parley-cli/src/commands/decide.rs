use anyhow::{Context, Result, bail};
use parley_core::BotConfig;
use parley_core::channel::telegram::convert_update;
use parley_core::channel::{ChatKind, InboundMessage};
use parley_core::eligibility::{Dice, EligibilityEngine, SequenceDice, ThreadDice};
use parley_storage::{ChatMemoryStore, Message, ReplyTo};
use serde_json::json;

use crate::cli::DecideArgs;
use crate::output::OutputFormat;
use crate::output::json::print_json;

/// Enough fixed rolls for every probabilistic rule.
const FIXED_ROLLS: usize = 8;

fn inbound_from_args(config: &BotConfig, args: &DecideArgs) -> Result<InboundMessage> {
    if let Some(path) = &args.update {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let update: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("Invalid JSON in {}", path.display()))?;
        return convert_update(&update, config.agent.id)?
            .context("Update carries no message with a sender");
    }

    let Some(text) = &args.text else {
        bail!("Either --text or --update is required");
    };
    let mut message = Message::text(0, args.from, "cli", text.as_str());
    message.handle = args.handle.clone();
    if args.reply_to_self {
        message.reply_to = Some(ReplyTo {
            id: 0,
            text: String::new(),
            is_self: true,
            sender_id: Some(config.agent.id),
        });
    }

    let kind = if args.private {
        ChatKind::Private
    } else {
        ChatKind::Group
    };
    Ok(InboundMessage::new(args.chat_id, kind, message))
}

pub fn run(
    config: &BotConfig,
    store: &ChatMemoryStore,
    args: DecideArgs,
    format: OutputFormat,
) -> Result<()> {
    let engine = EligibilityEngine::from_config(config)?;
    let inbound = inbound_from_args(config, &args)?;

    let chat = store
        .peek(args.chat_id)
        .map(|handle| handle.lock().clone())
        .unwrap_or_default();

    let mut fixed;
    let mut thread = ThreadDice;
    let dice: &mut dyn Dice = match args.roll {
        Some(roll) => {
            fixed = SequenceDice::new(std::iter::repeat_n(roll, FIXED_ROLLS));
            &mut fixed
        }
        None => &mut thread,
    };

    let observed = engine.should_observe(&inbound.message);
    let decision = engine.decide(&inbound, &chat, dice);

    if format.is_json() {
        return print_json(&json!({
            "observed": observed,
            "decision": decision,
        }));
    }

    if !observed {
        println!("Message would not be observed (no content, or sent via the agent)");
    }
    println!(
        "reply: {}  random: {}  reason: {}",
        decision.reply, decision.is_random, decision.reason
    );
    if let Some(handle) = &decision.target_handle {
        println!("address: {handle}");
    }
    Ok(())
}
