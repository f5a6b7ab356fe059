use anyhow::Result;
use parley_core::Secrets;
use parley_core::eligibility::EligibilityEngine;
use parley_storage::paths;
use serde_json::json;

use crate::output::OutputFormat;
use crate::output::json::print_json;
use crate::output::table::{key_value_table, print_table};
use crate::setup::{load_config, open_store};

pub fn run(config_path: Option<&std::path::Path>, format: OutputFormat) -> Result<()> {
    let config = load_config(config_path)?;
    let engine = EligibilityEngine::from_config(&config)?;
    let store = open_store(&config)?;
    let secrets = Secrets::from_env().is_ok();

    if format.is_json() {
        return print_json(&json!({
            "ok": true,
            "memory_path": paths::memory_path()?,
            "chats": store.len(),
            "names": config.names,
            "rules": engine.rule_names(),
            "secrets": secrets,
        }));
    }

    print_table(key_value_table([
        ("memory", paths::memory_path()?.display().to_string()),
        ("chats", store.len().to_string()),
        ("names", config.names.join(", ")),
        ("rules", engine.rule_names().join(" > ")),
        ("model", config.model.clone()),
        ("secrets", if secrets { "present" } else { "missing" }.to_string()),
    ]));
    println!("Configuration OK");
    Ok(())
}
