use anyhow::{Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::params::EncodeParameters;

/// Environment variable naming a parameter file
pub const CONFIG_ENV: &str = "FRAMEMUX_CONFIG";

/// Resolve the parameter file to use
///
/// Priority: CLI `--config` → `FRAMEMUX_CONFIG` → None (built-in defaults)
pub fn config_path(cli_path: Option<PathBuf>) -> Option<PathBuf> {
    cli_path.or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
}

/// Read encode parameters from a JSON file. Missing fields take their defaults.
pub fn load_params(path: &Path) -> Result<EncodeParameters> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let params: EncodeParameters = serde_json::from_str(&text)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    debug!("Loaded parameters from {}: {:?}", path.display(), params);
    Ok(params)
}

/// Load from the resolved path, or fall back to defaults
pub fn load_or_default(cli_path: Option<PathBuf>) -> Result<EncodeParameters> {
    match config_path(cli_path) {
        Some(path) => {
            info!("Using config: {}", path.display());
            load_params(&path)
        }
        None => Ok(EncodeParameters::default()),
    }
}

/// Write encode parameters as pretty JSON, creating parent directories
pub fn save_params(path: &Path, params: &EncodeParameters) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;
    }
    let json = serde_json::to_string_pretty(params).context("Failed to serialize parameters")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write config file: {}", path.display()))?;
    info!("Saved parameters to {}", path.display());
    Ok(())
}
