//! Configuration loading.

use std::path::{Path, PathBuf};

use super::schema::AppConfig;

/// Directory holding runtime state (`config.toml`, databases, PID file).
pub fn engram_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(".engram")
}

/// Default config file location: `~/.engram/config.toml`.
pub fn default_config_path() -> PathBuf {
    engram_dir().join("config.toml")
}

/// Load configuration from `path`.
///
/// A missing file yields the defaults; a malformed file is an error (silent
/// fallback on a typo'd config is worse than failing fast).
pub fn load_config(path: &Path) -> Result<AppConfig, String> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    toml::from_str(&raw).map_err(|e| format!("failed to parse {}: {e}", path.display()))
}

/// Load from the default location.
pub fn load_default_config() -> Result<AppConfig, String> {
    load_config(&default_config_path())
}
