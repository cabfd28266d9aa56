//! Configuration loader and validator for the check-in client.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub service: Service,
    pub scanner: Scanner,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    pub queue_key: String,
    pub sync_interval_ms: u64,
}

/// Remote attendance service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Service {
    pub base_url: String,
    pub request_timeout_ms: u64,
    pub health_path: String,
    pub probe_interval_ms: u64,
}

/// Camera polling settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Scanner {
    pub poll_interval_ms: u64,
    pub repeat_cooldown_ms: u64,
}

impl App {
    /// Data directory with a leading `~/` expanded against `$HOME`.
    pub fn resolved_data_dir(&self) -> String {
        if let Some(rest) = self.data_dir.strip_prefix("~/") {
            if let Ok(home) = std::env::var("HOME") {
                return format!("{}/{}", home.trim_end_matches('/'), rest);
            }
        }
        self.data_dir.clone()
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

impl Service {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

impl Scanner {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn repeat_cooldown(&self) -> Duration {
        Duration::from_millis(self.repeat_cooldown_ms)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(self.app.resolved_data_dir())
    }

    /// SQLite URL for the local store; `DATABASE_URL` wins when set.
    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/checkin.db", self.app.resolved_data_dir()))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.queue_key.trim().is_empty() {
        return Err(ConfigError::Invalid("app.queue_key must be non-empty"));
    }
    if cfg.app.sync_interval_ms == 0 {
        return Err(ConfigError::Invalid("app.sync_interval_ms must be > 0"));
    }

    if Url::parse(&cfg.service.base_url).is_err() {
        return Err(ConfigError::Invalid("service.base_url must be a valid URL"));
    }
    if cfg.service.request_timeout_ms == 0 {
        return Err(ConfigError::Invalid("service.request_timeout_ms must be > 0"));
    }
    if cfg.service.health_path.trim().is_empty() {
        return Err(ConfigError::Invalid("service.health_path must be non-empty"));
    }
    if cfg.service.probe_interval_ms == 0 {
        return Err(ConfigError::Invalid("service.probe_interval_ms must be > 0"));
    }

    if cfg.scanner.poll_interval_ms == 0 {
        return Err(ConfigError::Invalid("scanner.poll_interval_ms must be > 0"));
    }
    // repeat_cooldown_ms may be 0: every decoded frame counts.

    Ok(())
}

/// Returns the example YAML content shipped with the client.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  queue_key: "offline_scans"
  sync_interval_ms: 30000

service:
  base_url: "https://anchor.example.org/"
  request_timeout_ms: 10000
  health_path: "api/health"
  probe_interval_ms: 5000

scanner:
  poll_interval_ms: 250
  repeat_cooldown_ms: 3000
"#
}
