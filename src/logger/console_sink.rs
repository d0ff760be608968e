use crate::config::LoggingConfig;
use crate::logger::types::{AccessLogAction, AccessLogEntry, AccessLogSink};
use tracing::{info, warn};

pub struct ConsoleLogSink {
    config: LoggingConfig,
}

impl ConsoleLogSink {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }

    fn should_log(&self, entry: &AccessLogEntry) -> bool {
        if !self.config.enable {
            return false;
        }
        match entry.action {
            AccessLogAction::Completed => self.config.log_completed,
            AccessLogAction::Failed => self.config.log_failed,
        }
    }
}

impl AccessLogSink for ConsoleLogSink {
    fn log(&self, entry: &AccessLogEntry) {
        if !self.should_log(entry) {
            return;
        }

        if self.config.format == "json" {
            info!(
                target: "relay_access",
                id = entry.id,
                method = %entry.method,
                url = %entry.url,
                proxy = ?entry.proxy,
                action = ?entry.action,
                status = ?entry.status_code,
                lat = entry.latency_ms,
                error = ?entry.error
            );
            return;
        }

        let via = entry
            .proxy
            .as_deref()
            .map(|p| format!(" via {}", p))
            .unwrap_or_default();

        match entry.action {
            AccessLogAction::Completed => info!(
                "#{} {} {}{} -> {} [{}ms]",
                entry.id,
                entry.method,
                entry.url,
                via,
                entry.status_code.unwrap_or_default(),
                entry.latency_ms
            ),
            AccessLogAction::Failed => warn!(
                "#{} {} {}{} -> failed: {} [{}ms]",
                entry.id,
                entry.method,
                entry.url,
                via,
                entry.error.as_deref().unwrap_or("unknown error"),
                entry.latency_ms
            ),
        }
    }
}
