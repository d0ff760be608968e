//! Initialization helpers for the application startup.

use crate::config::Config;
use crate::history::{HistoryStore, MemoryHistoryStore, SqliteHistoryStore};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

/// Dependency targets that flood the log at debug level.
const NOISY_TARGETS: [&str; 4] = ["hyper", "hyper_util", "reqwest", "rusqlite"];

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter_directives(config)));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Configured level plus `=off` for noisy targets unless the level names them.
fn filter_directives(config: &Config) -> String {
    let mut filter = config.logging.level.clone();
    for target in NOISY_TARGETS {
        let named = filter
            .split(',')
            .any(|d| d.split('=').next().map(str::trim) == Some(target));
        if !named {
            filter.push_str(&format!(",{}=off", target));
        }
    }
    filter
}

/// Opens the history backend named by `history.backend`.
pub fn init_history_store(config: &Config) -> Result<Arc<dyn HistoryStore>> {
    match config.history.backend.as_str() {
        "memory" => {
            info!("Using in-memory history store. Entries are lost on restart.");
            Ok(Arc::new(MemoryHistoryStore::new()))
        }
        "sqlite" => {
            let store = SqliteHistoryStore::open(&config.history.sqlite_path).with_context(|| {
                format!(
                    "Failed to open history database {}",
                    config.history.sqlite_path
                )
            })?;
            Ok(Arc::new(store))
        }
        other => bail!("Unknown history backend '{}'", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_noisy_targets_silenced() {
        let config = Config::default();
        let filter = filter_directives(&config);
        assert!(filter.starts_with("info"));
        assert!(filter.contains("hyper=off"));
        assert!(filter.contains("rusqlite=off"));
    }

    #[test]
    fn test_named_target_is_kept() {
        let mut config = Config::default();
        config.logging.level = "info,reqwest=debug".to_string();
        let filter = filter_directives(&config);
        assert!(!filter.contains("reqwest=off"));
        assert!(filter.contains("hyper_util=off"));
    }

    #[test]
    fn test_sqlite_backend_opens_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.history.backend = "sqlite".to_string();
        config.history.sqlite_path = dir.path().join("h.db").to_string_lossy().into_owned();

        let store = init_history_store(&config).unwrap();
        assert!(store.ping().is_ok());
        assert!(dir.path().join("h.db").exists());
    }
}
