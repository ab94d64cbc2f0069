//! Configuration loader and validator for the pinned-verse sync client.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::gate::MainSyncGate;
use crate::sync::RetryPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub api: Api,
    #[serde(default)]
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Quran edition the user reads in; sent along with pushed pins.
    pub mushaf_id: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Api {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
}

/// Retry and main-sync gate tuning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SyncSettings {
    pub max_attempts: u32,
    pub base_retry_delay_ms: u64,
    pub main_sync_poll_interval_ms: u64,
    pub main_sync_max_polls: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_retry_delay_ms: 1000,
            main_sync_poll_interval_ms: 500,
            main_sync_max_polls: 20,
        }
    }
}

impl SyncSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_retry_delay_ms),
        }
    }

    pub fn main_sync_poll_interval(&self) -> Duration {
        Duration::from_millis(self.main_sync_poll_interval_ms)
    }

    /// Apply the gate settings to `gate`.
    pub fn configure_gate(&self, gate: MainSyncGate) -> MainSyncGate {
        gate.with_polling(self.main_sync_poll_interval(), self.main_sync_max_polls)
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    pub fn database_url(&self) -> String {
        std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| format!("sqlite://{}/pins.db", self.app.data_dir))
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

fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.mushaf_id == 0 {
        return Err(ConfigError::Invalid("app.mushaf_id must be > 0"));
    }

    let base = cfg.api.base_url.trim();
    if base.is_empty() {
        return Err(ConfigError::Invalid("api.base_url must be non-empty"));
    }
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ConfigError::Invalid("api.base_url must be an http(s) URL"));
    }

    if cfg.sync.max_attempts == 0 {
        return Err(ConfigError::Invalid("sync.max_attempts must be > 0"));
    }
    if cfg.sync.main_sync_poll_interval_ms == 0 {
        return Err(ConfigError::Invalid(
            "sync.main_sync_poll_interval_ms must be > 0",
        ));
    }
    // Keep 2^attempt from overflowing the delay.
    if cfg.sync.max_attempts > 16 {
        return Err(ConfigError::Invalid("sync.max_attempts must be <= 16"));
    }
    if cfg.sync.main_sync_poll_interval_ms > 60_000 {
        return Err(ConfigError::Invalid(
            "sync.main_sync_poll_interval_ms must be <= 60000",
        ));
    }
    if cfg.sync.main_sync_max_polls > 1_000 {
        return Err(ConfigError::Invalid("sync.main_sync_max_polls must be <= 1000"));
    }

    Ok(())
}

/// Returns a complete, valid example configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  mushaf_id: 4

api:
  base_url: "https://api.quran.com/auth/"
  token: "YOUR_ACCESS_TOKEN"

sync:
  max_attempts: 3
  base_retry_delay_ms: 1000
  main_sync_poll_interval_ms: 500
  main_sync_max_polls: 20
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parse_example_ok() {
        let cfg: Config = serde_yaml::from_str(example()).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync, SyncSettings::default());
    }

    #[test]
    fn sync_section_defaults_when_missing() {
        let cfg: Config = serde_yaml::from_str(
            "app:\n  data_dir: ./d\n  mushaf_id: 1\napi:\n  base_url: http://localhost/\n",
        )
        .unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.sync.max_attempts, 3);
        assert_eq!(cfg.api.token, None);
        let policy = cfg.sync.retry_policy();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
    }

    #[test]
    fn invalid_base_url() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.api.base_url = "".into();
        let err = validate(&cfg).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("api.base_url")),
            _ => panic!("wrong error"),
        }

        cfg.api.base_url = "ftp://example".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn invalid_app_and_sync_values() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.mushaf_id = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("mushaf_id")));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.max_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.main_sync_poll_interval_ms = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn gate_settings_are_bounded() {
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.main_sync_poll_interval_ms = u64::MAX;
        assert!(
            matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("poll_interval"))
        );

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.main_sync_max_polls = u32::MAX;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(m)) if m.contains("max_polls")));

        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.sync.main_sync_poll_interval_ms = 60_000;
        cfg.sync.main_sync_max_polls = 1_000;
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg: Config = serde_yaml::from_str(example()).unwrap();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.app.mushaf_id, 4);
        assert_eq!(cfg.api.token.as_deref(), Some("YOUR_ACCESS_TOKEN"));
    }
}
