use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::DEFAULT_API_BASE;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Env var overriding `api.base_url`.
pub const ENV_API_BASE: &str = "DASHBOARD_API_BASE";
/// Env var overriding `realtime.url`.
pub const ENV_REALTIME_URL: &str = "REALTIME_URL";
/// Env var overriding `realtime.api_key`.
pub const ENV_REALTIME_API_KEY: &str = "REALTIME_API_KEY";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Backend REST settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL the REST paths are appended to, e.g. `http://localhost:8000/api`.
    #[serde(default = "default_api_base")]
    pub base_url: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// Change-feed settings. The feed is disabled unless both fields are set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Project URL of the realtime service, e.g. `https://xyz.supabase.co`.
    #[serde(default)]
    pub url: Option<String>,
    /// Anonymous API key sent on connect and join.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl RealtimeConfig {
    pub fn is_enabled(&self) -> bool {
        matches!((&self.url, &self.api_key), (Some(u), Some(k)) if !u.is_empty() && !k.is_empty())
    }
}

/// Timing for the prediction run poller and the analytics refresher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between detail fetches while a run is in progress.
    #[serde(default = "default_poll_interval_ms")]
    pub run_poll_interval_ms: u64,
    /// Give up on a run after this many seconds.
    #[serde(default = "default_run_timeout")]
    pub run_timeout_secs: u64,
    /// Analytics refresh cadence.
    #[serde(default = "default_performance_interval")]
    pub performance_interval_secs: u64,
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_run_timeout() -> u64 {
    180
}

fn default_performance_interval() -> u64 {
    30
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            run_poll_interval_ms: default_poll_interval_ms(),
            run_timeout_secs: default_run_timeout(),
            performance_interval_secs: default_performance_interval(),
        }
    }
}

impl PollingConfig {
    pub fn run_poll_interval(&self) -> Duration {
        Duration::from_millis(self.run_poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }

    pub fn performance_interval(&self) -> Duration {
        Duration::from_secs(self.performance_interval_secs.max(1))
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&contents).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Load config if the file exists, otherwise start from defaults.
    /// Environment overrides are applied in both cases.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            Self::load(path)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents)?;
        Ok(config)
    }

    /// Overlay values from the environment (or any key lookup).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base) = lookup(ENV_API_BASE) {
            self.api.base_url = base;
        }
        if let Some(url) = lookup(ENV_REALTIME_URL) {
            self.realtime.url = Some(url);
        }
        if let Some(key) = lookup(ENV_REALTIME_API_KEY) {
            self.realtime.api_key = Some(key);
        }
    }

    /// Write config to the given TOML file path.
    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.api.base_url, DEFAULT_API_BASE);
        assert_eq!(config.polling.run_poll_interval(), Duration::from_secs(2));
        assert_eq!(config.polling.run_timeout(), Duration::from_secs(180));
        assert_eq!(config.polling.performance_interval(), Duration::from_secs(30));
        assert!(!config.realtime.is_enabled());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::parse(
            r#"
            [api]
            base_url = "http://backend:8000/api"

            [polling]
            run_timeout_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.api.base_url, "http://backend:8000/api");
        assert_eq!(config.api.request_timeout_secs, 30);
        assert_eq!(config.polling.run_timeout_secs, 60);
        assert_eq!(config.polling.run_poll_interval_ms, 2_000);
    }

    #[test]
    fn env_overrides_enable_realtime() {
        let mut config = AppConfig::default();
        config.apply_env(|key| match key {
            ENV_REALTIME_URL => Some("https://demo.supabase.co".to_string()),
            ENV_REALTIME_API_KEY => Some("anon".to_string()),
            _ => None,
        });
        assert!(config.realtime.is_enabled());
        assert_eq!(config.api.base_url, DEFAULT_API_BASE);
    }

    #[test]
    fn blank_realtime_key_stays_disabled() {
        let config = AppConfig::parse(
            r#"
            [realtime]
            url = "https://demo.supabase.co"
            api_key = ""
            "#,
        )
        .unwrap();
        assert!(!config.realtime.is_enabled());
    }

    #[test]
    fn save_then_load() {
        let dir = std::env::temp_dir().join(format!("dashboard-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.polling.run_poll_interval_ms = 500;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.polling.run_poll_interval_ms, 500);
        std::fs::remove_dir_all(&dir).ok();
    }
}
