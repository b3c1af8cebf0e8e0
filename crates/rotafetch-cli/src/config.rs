//! Configuration file resolution and the front-end's own settings.

use anyhow::{Context, Result};
use rotafetch::EngineConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "ROTAFETCH_CONFIG";
/// Config file picked up from the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "rotafetch.json";

/// Engine settings plus output and credential settings, in one JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    #[serde(flatten)]
    pub engine: EngineConfig,
    pub output: OutputConfig,
    pub credentials: CredentialsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory records are exported into.
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("output"),
        }
    }
}

/// Where session credentials come from when `--cookie` is not given.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// `<PREFIX>_COOKIE` holds a full cookie string.
    pub env_prefix: String,
    /// Individual cookies read from `<PREFIX>_<NAME>`.
    pub cookie_names: Vec<String>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_prefix: "ROTAFETCH".to_string(),
            cookie_names: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from `path`, or defaults when there is no file to load.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::debug!("no config file, using defaults");
            return Ok(Self::default());
        };
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("malformed config {}", path.display()))?;
        config.engine.validate()?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }
}

/// Resolve the config file path.
///
/// An explicit path always wins, even if it does not exist, so a typo is
/// reported instead of silently falling back to defaults.
pub fn resolve_config_path(explicit: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(PathBuf::from(path));
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let cwd_config = PathBuf::from(DEFAULT_CONFIG_FILE);
    cwd_config.exists().then_some(cwd_config)
}
