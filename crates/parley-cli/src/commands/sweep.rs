use std::time::Duration;

use anyhow::Result;
use parley_core::BotConfig;
use parley_core::janitor::run_sweep;
use parley_storage::paths;

use crate::cli::SweepArgs;
use crate::output::OutputFormat;
use crate::output::json::print_json;

pub async fn run(config: &BotConfig, args: SweepArgs, format: OutputFormat) -> Result<()> {
    let max_age = args
        .max_age_hours
        .map(|hours| Duration::from_secs(hours * 3600))
        .unwrap_or_else(|| config.media.files_max_age());
    let dir = paths::media_dir()?;
    let report = run_sweep(dir.clone(), max_age).await?;

    if format.is_json() {
        return print_json(&report);
    }

    println!("Sweep of {} finished:", dir.display());
    println!("  scanned: {}", report.scanned);
    println!("  deleted: {}", report.deleted);
    println!("  failed: {}", report.failed.len());
    for failure in &report.failed {
        println!("    {}: {}", failure.path.display(), failure.error);
    }
    println!("  skipped: {}", report.skipped.len());
    for skipped in &report.skipped {
        println!("    {}: {}", skipped.path.display(), skipped.error);
    }
    Ok(())
}
