use super::{AccessLogEntry, AccessLogSink};
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

pub type LogBuffer = Arc<RwLock<VecDeque<AccessLogEntry>>>;

/// Keeps the most recent access log lines in a bounded ring.
pub struct MemoryLogSink {
    buffer: LogBuffer,
    capacity: usize,
}

impl MemoryLogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    // Allow reading the buffer after the sink has been handed to the logger
    pub fn clone_buffer(&self) -> LogBuffer {
        self.buffer.clone()
    }
}

impl AccessLogSink for MemoryLogSink {
    fn log(&self, entry: &AccessLogEntry) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut buffer) = self.buffer.write() else {
            return;
        };
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(entry.clone());
    }
}
