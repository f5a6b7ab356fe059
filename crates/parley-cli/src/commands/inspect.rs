use anyhow::{Result, bail};
use chrono::{TimeZone, Utc};
use parley_storage::{ChatId, ChatMemoryStore};
use serde_json::json;

use crate::output::OutputFormat;
use crate::output::json::print_json;
use crate::output::table::{key_value_table, print_table};

fn or_default<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "default".to_string(), |value| value.to_string())
}

pub fn run(store: &ChatMemoryStore, chat_id: ChatId, format: OutputFormat) -> Result<()> {
    let Some(handle) = store.peek(chat_id) else {
        bail!("No stored chat with id {chat_id}");
    };
    let chat = handle.lock().clone();

    if format.is_json() {
        return print_json(&json!({
            "chat_id": chat_id,
            "settings": chat.settings,
            "character": chat.character,
            "notes": chat.notes,
            "memory": chat.memory,
            "opt_out_users": chat.opt_out_users,
            "history_len": chat.history.len(),
            "last_use": chat.last_use,
        }));
    }

    let last_use = Utc
        .timestamp_millis_opt(chat.last_use)
        .single()
        .map_or_else(|| "never".to_string(), |at| at.to_rfc3339());
    let opt_outs: Vec<String> = chat
        .opt_out_users
        .iter()
        .map(|user| format!("{} ({})", user.first_name, user.id))
        .collect();

    print_table(key_value_table([
        ("chat", chat_id.to_string()),
        ("history", chat.history.len().to_string()),
        ("last use", last_use),
        ("messages to pass", or_default(chat.settings.messages_to_pass)),
        (
            "random reply %",
            or_default(chat.settings.random_reply_probability),
        ),
        ("model", or_default(chat.settings.model.as_deref())),
        ("hate mode", chat.hate_mode().to_string()),
        (
            "character",
            or_default(chat.character.as_ref().map(|c| c.name.as_str())),
        ),
        ("opted out", opt_outs.join(", ")),
    ]));

    if !chat.notes.is_empty() {
        println!("Notes:");
        for note in &chat.notes {
            println!("  - {note}");
        }
    }
    if let Some(memory) = &chat.memory {
        println!("Memory:\n  {memory}");
    }
    Ok(())
}
