use anyhow::{Context, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use api_relay::api::{start_api_server, ApiState};
use api_relay::config::Config;
use api_relay::init::{init_history_store, setup_logging};
use api_relay::logger::AccessLogger;
use api_relay::relay::{Relay, ReqwestTransport};
use api_relay::stats::StatsAggregator;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args().nth(1).unwrap_or("config.toml".to_string());
    let config_exists = Path::new(&config_path).exists();
    let mut config = if config_exists {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting api-relay...");

    if !config_exists {
        info!("Config file not found, using defaults.");
    }
    config.validate()?;

    // 3. Init History Store
    let store = init_history_store(&config)?;

    // 4. Init Stats
    let stats = StatsAggregator::new(store.clone(), &config.stats);
    if config.stats.enable {
        stats.spawn_reporter();
    }

    // 5. Init Relay & Access Log
    let transport = Arc::new(ReqwestTransport::new(&config.relay)?);
    let access_log = AccessLogger::new(config.logging.clone());
    let relay = Relay::new(transport, store.clone(), config.relay_timeout())
        .with_access_log(access_log.clone());

    // 6. Start API Server
    let host: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("Invalid listen host '{}'", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let state = Arc::new(ApiState {
        relay: Arc::new(relay),
        store,
        stats,
        history: config.history.clone(),
        access_log: Some(access_log),
    });

    // 7. Graceful Shutdown
    tokio::select! {
        result = start_api_server(state, addr) => result?,
        _ = signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    Ok(())
}
