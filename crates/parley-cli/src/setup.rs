use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use parley_core::{BotConfig, Secrets};
use parley_core::history::HistoryAssembler;
use parley_core::media::{CachingResolver, GeminiFileIngestor, ResolverConfig, TelegramMediaSource};
use parley_storage::{ChatMemoryStore, DiskBlobCache, paths};
use tracing::info;

const CONFIG_DIR: &str = "parley";
const CONFIG_FILE: &str = "config.toml";

/// `~/.config/parley/config.toml` or the platform equivalent.
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine config directory"))
}

pub fn load_config(path: Option<&Path>) -> Result<BotConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => default_config_path()?,
    };
    let config = BotConfig::load(&path)?;
    info!(config = %path.display(), "Config loaded");
    Ok(config)
}

pub fn open_store(config: &BotConfig) -> Result<Arc<ChatMemoryStore>> {
    paths::ensure_parley_dir()?;
    let path = paths::memory_path()?;
    let store = ChatMemoryStore::load(&path, config.store_limits())
        .with_context(|| format!("Failed to load memory from {}", path.display()))?;
    Ok(Arc::new(store))
}

/// An assembler that resolves attachments through Telegram and Gemini.
pub fn online_assembler(config: &BotConfig) -> Result<HistoryAssembler> {
    let secrets = Secrets::from_env()?;
    let media = &config.media;

    let resolver = CachingResolver::new(
        Arc::new(TelegramMediaSource::with_api_base(
            secrets.telegram_token,
            &media.telegram_api_base,
        )),
        Arc::new(GeminiFileIngestor::with_api_base(
            secrets.ai_token,
            &media.gemini_api_base,
        )),
        Arc::new(DiskBlobCache::new(paths::media_dir()?)),
        ResolverConfig::from(media),
    );
    Ok(HistoryAssembler::new(
        Arc::new(resolver),
        media.resolved_ref_ttl(),
    ))
}
