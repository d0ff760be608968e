use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::warn;

/// Callers poll `/api/stats` on this interval, so a cached snapshot may never be older.
pub const MAX_STATS_STALENESS_SECS: u64 = 30;

/// Ten years. Keeps `now - window` inside chrono's representable range.
pub const MAX_RECENT_WINDOW_HOURS: u64 = 24 * 365 * 10;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub history: HistoryConfig,

    #[serde(default)]
    pub stats: StatsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RelayConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_proxy_client_cache")]
    pub proxy_client_cache: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct HistoryConfig {
    #[serde(default = "default_history_backend")]
    pub backend: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
    #[serde(default = "default_limit")]
    pub default_limit: usize,
    #[serde(default = "default_max_limit")]
    pub max_limit: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enable")]
    pub enable: bool,
    #[serde(default = "default_log_interval")]
    pub log_interval_seconds: u64,
    #[serde(default = "default_recent_window_hours")]
    pub recent_window_hours: u64,
    #[serde(default = "default_failure_rate_threshold")]
    pub failure_rate_threshold: f64,
    #[serde(default)]
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_enable")]
    pub enable: bool,
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
    #[serde(default = "default_log_completed")]
    pub log_completed: bool,
    #[serde(default = "default_log_failed")]
    pub log_failed: bool,
    #[serde(default = "default_access_log_sinks")]
    pub access_log_sinks: Vec<String>,
    /// Lines kept by the `memory` sink and served from `/api/logs`.
    #[serde(default = "default_memory_log_capacity")]
    pub memory_log_capacity: usize,
}

// Defaults
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5000
}
fn default_timeout_ms() -> u64 {
    30_000
}
fn default_user_agent() -> String {
    format!("api-relay/{}", env!("CARGO_PKG_VERSION"))
}
fn default_proxy_client_cache() -> u64 {
    64
}
fn default_history_backend() -> String {
    "memory".to_string()
}
fn default_sqlite_path() -> String {
    "api_requests.db".to_string()
}
fn default_limit() -> usize {
    50
}
fn default_max_limit() -> usize {
    1000
}
fn default_stats_enable() -> bool {
    true
}
fn default_log_interval() -> u64 {
    300
}
fn default_recent_window_hours() -> u64 {
    24
}
fn default_failure_rate_threshold() -> f64 {
    0.5
}
fn default_log_enable() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}
fn default_log_completed() -> bool {
    true
}
fn default_log_failed() -> bool {
    true
}
fn default_access_log_sinks() -> Vec<String> {
    vec!["console".to_string(), "memory".to_string()]
}
fn default_memory_log_capacity() -> usize {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            relay: RelayConfig::default(),
            history: HistoryConfig::default(),
            stats: StatsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            proxy_client_cache: default_proxy_client_cache(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: default_history_backend(),
            sqlite_path: default_sqlite_path(),
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enable: default_stats_enable(),
            log_interval_seconds: default_log_interval(),
            recent_window_hours: default_recent_window_hours(),
            failure_rate_threshold: default_failure_rate_threshold(),
            cache_ttl_secs: 0,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enable: default_log_enable(),
            level: default_log_level(),
            format: default_log_format(),
            log_completed: default_log_completed(),
            log_failed: default_log_failed(),
            access_log_sinks: default_access_log_sinks(),
            memory_log_capacity: default_memory_log_capacity(),
        }
    }
}

impl Config {
    /// Reads and parses only. Call `validate` once logging is installed so
    /// its warnings are visible.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .await
            .context("Failed to read config file")?;
        toml::from_str(&contents).context("Failed to parse config TOML")
    }

    /// Rejects values the relay cannot run with and clamps the stats cache TTL.
    pub fn validate(&mut self) -> Result<()> {
        if self.relay.timeout_ms == 0 {
            bail!("relay.timeout_ms must be positive");
        }
        match self.history.backend.as_str() {
            "memory" | "sqlite" => {}
            other => bail!("Unknown history backend '{}'", other),
        }
        if self.history.default_limit == 0 {
            bail!("history.default_limit must be positive");
        }
        if self.history.max_limit < self.history.default_limit {
            bail!(
                "history.max_limit ({}) is below history.default_limit ({})",
                self.history.max_limit,
                self.history.default_limit
            );
        }
        if self.stats.recent_window_hours == 0 {
            bail!("stats.recent_window_hours must be positive");
        }
        if self.stats.recent_window_hours > MAX_RECENT_WINDOW_HOURS {
            bail!(
                "stats.recent_window_hours must be at most {}, got {}",
                MAX_RECENT_WINDOW_HOURS,
                self.stats.recent_window_hours
            );
        }
        if !(0.0..=1.0).contains(&self.stats.failure_rate_threshold) {
            bail!(
                "stats.failure_rate_threshold must be within [0, 1], got {}",
                self.stats.failure_rate_threshold
            );
        }
        if self.stats.cache_ttl_secs > MAX_STATS_STALENESS_SECS {
            warn!(
                "stats.cache_ttl_secs={} exceeds the {}s polling interval, clamping",
                self.stats.cache_ttl_secs, MAX_STATS_STALENESS_SECS
            );
            self.stats.cache_ttl_secs = MAX_STATS_STALENESS_SECS;
        }
        Ok(())
    }

    pub fn relay_timeout(&self) -> Duration {
        Duration::from_millis(self.relay.timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.port, 5000);
        assert_eq!(config.history.default_limit, 50);
        assert_eq!(config.relay_timeout(), Duration::from_secs(30));
        assert_eq!(config.stats.recent_window_hours, 24);
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let text = r#"
            port = 8088

            [relay]
            timeout_ms = 1500

            [stats]
            failure_rate_threshold = 0.25
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.port, 8088);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.relay.timeout_ms, 1500);
        assert_eq!(config.history.backend, "memory");
        assert_eq!(config.stats.failure_rate_threshold, 0.25);
        assert!(config.logging.log_failed);
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut config = Config::default();
        config.stats.failure_rate_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_backend() {
        let mut config = Config::default();
        config.history.backend = "redis".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_clamps_stats_cache() {
        let mut config = Config::default();
        config.stats.cache_ttl_secs = 120;
        config.validate().unwrap();
        assert_eq!(config.stats.cache_ttl_secs, MAX_STATS_STALENESS_SECS);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[history]\nbackend = \"sqlite\"\nsqlite_path = \"relay.db\"\n",
        )
        .unwrap();

        let config = Config::load(&path).await.unwrap();
        assert_eq!(config.history.backend, "sqlite");
        assert_eq!(config.history.sqlite_path, "relay.db");
    }

    #[tokio::test]
    async fn test_load_defers_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[stats]\ncache_ttl_secs = 120\n").unwrap();

        let mut config = Config::load(&path).await.unwrap();
        assert_eq!(config.stats.cache_ttl_secs, 120);

        config.validate().unwrap();
        assert_eq!(config.stats.cache_ttl_secs, MAX_STATS_STALENESS_SECS);
    }

    #[test]
    fn test_validate_bounds_recent_window() {
        let mut config = Config::default();
        config.stats.recent_window_hours = MAX_RECENT_WINDOW_HOURS;
        assert!(config.validate().is_ok());

        config.stats.recent_window_hours = u64::MAX;
        assert!(config.validate().is_err());
    }
}
