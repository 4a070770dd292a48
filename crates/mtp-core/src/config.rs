//! Runtime configuration loaded from a JSON file.
//!
//! Looked up in this order: an explicit path, `$MTP_CORE_CONFIG`, then
//! `<config dir>/mtp-core/config.json`. A missing or broken file is not an
//! error; defaults are used instead.

use log::{debug, warn};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "MTP_CORE_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CoreConfig {
    /// How often `watch` re-runs device detection.
    #[serde(alias = "poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// `env_logger` filter used when `RUST_LOG` isn't set.
    #[serde(alias = "log_filter")]
    pub log_filter: String,
    /// JSON fixture for the virtual transport.
    #[serde(alias = "fixture_path")]
    pub fixture_path: Option<PathBuf>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            log_filter: "info".to_string(),
            fixture_path: None,
        }
    }
}

impl CoreConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Picks the config file to read. `env_value` is the value of `MTP_CORE_CONFIG`, if set.
pub fn resolve_config_path(explicit: Option<&Path>, env_value: Option<PathBuf>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(path) = env_value.filter(|p| !p.as_os_str().is_empty()) {
        return Some(path);
    }
    dirs::config_dir().map(|dir| dir.join("mtp-core").join("config.json"))
}

pub fn parse_config(contents: &str) -> Result<CoreConfig, serde_json::Error> {
    serde_json::from_str(contents)
}

/// Loads the config, falling back to defaults if the file doesn't exist or can't be parsed.
pub fn load_config(explicit: Option<&Path>) -> CoreConfig {
    let env_value = std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from);
    let Some(path) = resolve_config_path(explicit, env_value) else {
        return CoreConfig::default();
    };

    let contents = match fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(e) => {
            // Only worth a warning when the user pointed at the file
            if explicit.is_some() {
                warn!("Couldn't read config {}: {}, using defaults", path.display(), e);
            } else {
                debug!("No config at {}, using defaults", path.display());
            }
            return CoreConfig::default();
        }
    };

    match parse_config(&contents) {
        Ok(config) => config,
        Err(e) => {
            warn!("Couldn't parse config {}: {}, using defaults", path.display(), e);
            CoreConfig::default()
        }
    }
}

/// Initializes logging. `RUST_LOG` wins over `default_filter`.
pub fn init_logging(default_filter: &str) {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .format_timestamp_millis()
        .try_init();
}
