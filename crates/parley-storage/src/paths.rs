use anyhow::Result;
use std::path::PathBuf;

const PARLEY_DIR: &str = ".parley";
const MEMORY_FILE: &str = "memory.json";
const MEDIA_DIR: &str = "media";
const LOGS_DIR: &str = "logs";

/// Environment variable to override the data directory.
const PARLEY_DIR_ENV: &str = "PARLEY_DIR";

/// Resolve the data directory.
/// Priority: PARLEY_DIR env var > ~/.parley/
pub fn resolve_parley_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(PARLEY_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|h| h.join(PARLEY_DIR))
        .ok_or_else(|| anyhow::anyhow!("Failed to determine home directory"))
}

/// Ensure the data directory exists and return its path.
pub fn ensure_parley_dir() -> Result<PathBuf> {
    let dir = resolve_parley_dir()?;
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Memory snapshot path: ~/.parley/memory.json
pub fn memory_path() -> Result<PathBuf> {
    Ok(resolve_parley_dir()?.join(MEMORY_FILE))
}

/// Attachment cache directory: ~/.parley/media/
pub fn media_dir() -> Result<PathBuf> {
    let dir = ensure_parley_dir()?.join(MEDIA_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Logs directory: ~/.parley/logs/
pub fn logs_dir() -> Result<PathBuf> {
    let dir = ensure_parley_dir()?.join(LOGS_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
