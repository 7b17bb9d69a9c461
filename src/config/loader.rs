// Configuration loader
// Loads engine settings from $PATHWISE_CONFIG or ~/.pathwise/config.toml

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::settings::EngineConfig;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "PATHWISE_CONFIG";

/// Load configuration, falling back to defaults when no file exists
pub fn load_config() -> Result<EngineConfig> {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return load_config_from(&path);
        }
    }

    match default_config_path() {
        Some(path) if path.exists() => load_config_from(&path),
        _ => {
            tracing::debug!("No config file found, using defaults");
            Ok(EngineConfig::default())
        }
    }
}

/// Load and validate configuration from a TOML file
pub fn load_config_from<P: AsRef<Path>>(path: P) -> Result<EngineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let config: EngineConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    tracing::info!(path = %path.display(), "Loaded engine configuration");
    Ok(config)
}

fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".pathwise/config.toml"))
}
