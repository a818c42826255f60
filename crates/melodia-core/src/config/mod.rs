mod defaults;
mod runtime;


pub use runtime::*;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::BotError;
use defaults::*;

/// Top-level Melodia configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

/// Which transport adapter drives the session.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// In-process simulated network (development and tests).
    #[default]
    Loopback,
}

/// General bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Also write logs to `{data_dir}/logs/melodia.log` (rotated daily).
    #[serde(default)]
    pub log_to_file: bool,
    #[serde(default)]
    pub transport: TransportKind,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: default_data_dir(),
            log_level: default_log_level(),
            log_to_file: false,
            transport: TransportKind::default(),
        }
    }
}

/// Ledger (song requests + connected users) storage config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
    /// Default page size for `GET /api/requests`.
    #[serde(default = "default_request_limit")]
    pub request_limit: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            request_limit: default_request_limit(),
        }
    }
}

/// HTTP control surface for the admin client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, BotError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| BotError::Config(format!("failed to read {}: {}", path.display(), e)))?;

    parse(&content)
}

/// Parse and validate configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, BotError> {
    let config: Config = toml::from_str(content)
        .map_err(|e| BotError::Config(format!("failed to parse config: {}", e)))?;

    if config.playback.duration_secs == 0 {
        return Err(BotError::Config(
            "playback.duration_secs must be greater than zero".into(),
        ));
    }
    if config.playback.tick_increment_secs == 0 {
        return Err(BotError::Config(
            "playback.tick_increment_secs must be greater than zero".into(),
        ));
    }
    if config.commands.play_aliases.is_empty() {
        return Err(BotError::Config(
            "commands.play_aliases must not be empty".into(),
        ));
    }

    Ok(config)
}
