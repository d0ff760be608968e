pub mod console_sink;
pub mod memory_sink;
pub mod types;

pub use self::console_sink::ConsoleLogSink;
pub use self::memory_sink::{LogBuffer, MemoryLogSink};
pub use self::types::{AccessLogAction, AccessLogEntry, AccessLogSink};

use crate::config::LoggingConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

const SINK_BUFFER: usize = 1000;

/// Fans each access log line out to every configured sink.
pub struct AccessLogger {
    sinks: Vec<mpsc::Sender<AccessLogEntry>>,
    recent: Option<LogBuffer>,
}

impl AccessLogger {
    pub fn new(config: LoggingConfig) -> Arc<Self> {
        let mut sinks: Vec<Box<dyn AccessLogSink>> = Vec::new();
        let mut recent = None;
        for sink_type in &config.access_log_sinks {
            match sink_type.as_str() {
                "console" => sinks.push(Box::new(ConsoleLogSink::new(config.clone()))),
                "memory" => {
                    let sink = MemoryLogSink::new(config.memory_log_capacity);
                    recent = Some(sink.clone_buffer());
                    sinks.push(Box::new(sink));
                }
                other => warn!("Unknown access log sink type: {}", other),
            }
        }
        Self::spawn(sinks, recent)
    }

    /// Each sink gets its own bounded channel and drain task.
    pub fn with_sinks(sinks: Vec<Box<dyn AccessLogSink>>) -> Arc<Self> {
        Self::spawn(sinks, None)
    }

    fn spawn(sinks: Vec<Box<dyn AccessLogSink>>, recent: Option<LogBuffer>) -> Arc<Self> {
        let senders = sinks
            .into_iter()
            .map(|sink| {
                let (tx, mut rx) = mpsc::channel::<AccessLogEntry>(SINK_BUFFER);
                tokio::spawn(async move {
                    while let Some(entry) = rx.recv().await {
                        sink.log(&entry);
                    }
                });
                tx
            })
            .collect();

        Arc::new(Self {
            sinks: senders,
            recent,
        })
    }

    /// Lines held by the `memory` sink, newest first. `None` when it is not configured.
    pub fn recent(&self) -> Option<Vec<AccessLogEntry>> {
        let buffer = self.recent.as_ref()?;
        let lines = match buffer.read() {
            Ok(buffer) => buffer.iter().rev().cloned().collect(),
            Err(_) => Vec::new(),
        };
        Some(lines)
    }

    pub async fn log(&self, entry: AccessLogEntry) {
        let Some((last, rest)) = self.sinks.split_last() else {
            return;
        };
        // Fire and forget, don't block the relay if a buffer is full
        for sink in rest {
            let _ = sink.try_send(entry.clone());
        }
        let _ = last.try_send(entry);
    }
}
