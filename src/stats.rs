use crate::config::{StatsConfig, MAX_RECENT_WINDOW_HOURS};
use crate::error::StoreError;
use crate::history::{HistoryStore, HistoryTally, HttpMethod};
use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::{self, Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Degraded,
}

impl Health {
    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "healthy",
            Health::Degraded => "degraded",
        }
    }
}

/// Point-in-time summary of the history ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub recent_requests: u64,
    pub recent_failures: u64,
    /// Always carries every method, with zero for unused ones.
    pub method_counts: BTreeMap<HttpMethod, u64>,
    /// Mean over completed entries only; 0 when there are none.
    pub avg_response_seconds: f64,
    pub health: Health,
    pub generated_at: DateTime<Utc>,
}

struct CachedSnapshot {
    taken: Instant,
    snapshot: StatsSnapshot,
}

/// Read path over the history store.
///
/// With `cache_ttl_secs = 0` every call recomputes from the store. Otherwise a
/// snapshot may be reused for at most `cache_ttl_secs`, which config validation
/// caps at the 30s polling interval.
pub struct StatsAggregator {
    store: Arc<dyn HistoryStore>,
    recent_window: chrono::Duration,
    failure_rate_threshold: f64,
    cache_ttl: Duration,
    cached: ArcSwapOption<CachedSnapshot>,
    log_interval: Duration,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn HistoryStore>, config: &StatsConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            recent_window: chrono::Duration::hours(
                config.recent_window_hours.min(MAX_RECENT_WINDOW_HOURS) as i64,
            ),
            failure_rate_threshold: config.failure_rate_threshold,
            cache_ttl: Duration::from_secs(config.cache_ttl_secs),
            cached: ArcSwapOption::empty(),
            log_interval: Duration::from_secs(config.log_interval_seconds.max(1)),
        })
    }

    pub fn snapshot(&self) -> Result<StatsSnapshot, StoreError> {
        if self.cache_ttl.is_zero() {
            return self.snapshot_at(Utc::now());
        }

        if let Some(cached) = self.cached.load_full() {
            if cached.taken.elapsed() < self.cache_ttl {
                return Ok(cached.snapshot.clone());
            }
        }

        let snapshot = self.snapshot_at(Utc::now())?;
        self.cached.store(Some(Arc::new(CachedSnapshot {
            taken: Instant::now(),
            snapshot: snapshot.clone(),
        })));
        Ok(snapshot)
    }

    /// Uncached snapshot with the recent window ending at `now`.
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Result<StatsSnapshot, StoreError> {
        let window_start = now
            .checked_sub_signed(self.recent_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let tally = self.store.tally(window_start, now)?;
        Ok(self.summarize(tally, now))
    }

    fn summarize(&self, tally: HistoryTally, now: DateTime<Utc>) -> StatsSnapshot {
        let method_counts = HttpMethod::ALL
            .into_iter()
            .map(|m| (m, tally.method_counts.get(&m).copied().unwrap_or(0)))
            .collect();

        let avg_response_seconds = if tally.completed > 0 {
            tally.elapsed_sum / tally.completed as f64
        } else {
            0.0
        };

        let health = if tally.recent > 0
            && (tally.recent_failed as f64 / tally.recent as f64) > self.failure_rate_threshold
        {
            Health::Degraded
        } else {
            Health::Healthy
        };

        StatsSnapshot {
            total_requests: tally.total,
            recent_requests: tally.recent,
            recent_failures: tally.recent_failed,
            method_counts,
            avg_response_seconds,
            health,
            generated_at: now,
        }
    }

    /// Starts the background task that periodically logs a summary line.
    pub fn spawn_reporter(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let stats = self.clone();
        tokio::spawn(async move {
            stats.run_logger().await;
        })
    }

    async fn run_logger(&self) {
        let mut interval = time::interval(self.log_interval);
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.dump_stats();
        }
    }

    fn dump_stats(&self) {
        let snapshot = match self.snapshot_at(Utc::now()) {
            Ok(s) => s,
            Err(e) => {
                error!("Failed to compute stats: {}", e);
                return;
            }
        };

        let methods: Vec<String> = snapshot
            .method_counts
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(method, count)| format!("{}={}", method, count))
            .collect();

        info!(
            "STATS DUMP: Total: {}, Recent: {} ({} failed, {:.1}%), AvgResponse: {:.3}s, Health: {}, Methods: [{}]",
            snapshot.total_requests,
            snapshot.recent_requests,
            snapshot.recent_failures,
            if snapshot.recent_requests > 0 {
                (snapshot.recent_failures as f64 / snapshot.recent_requests as f64) * 100.0
            } else {
                0.0
            },
            snapshot.avg_response_seconds,
            snapshot.health.as_str(),
            methods.join(" ")
        );
    }
}
