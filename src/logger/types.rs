use crate::history::{EntryId, HttpMethod};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct AccessLogEntry {
    pub id: EntryId,
    pub method: HttpMethod,
    pub url: String,
    pub proxy: Option<String>,
    pub action: AccessLogAction,
    pub status_code: Option<u16>, // If completed
    pub latency_ms: u64,
    pub error: Option<String>, // If failed
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessLogAction {
    Completed,
    Failed,
}

pub trait AccessLogSink: Send + Sync {
    fn log(&self, entry: &AccessLogEntry);
}
