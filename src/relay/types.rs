use crate::history::{EntryId, HeaderMap, HttpMethod, Outcome, ResponseBody};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Abstract outbound HTTP client, so the relay can run against a mock.
#[async_trait::async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

/// A validated request ready to leave the process.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub proxy: Option<Url>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

/// Failure to obtain any HTTP response at all.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Timeout - request exceeded {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Connection error - unable to reach server: {0}")]
    Connect(String),

    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Request error: {0}")]
    Request(String),
}

/// What the caller asked to send. Header and body are already structured data.
#[derive(Debug, Clone, Default)]
pub struct RelayRequest {
    pub method: String,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub proxy: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Timeout,
    Connect,
    Proxy,
    Other,
}

impl From<&TransportError> for FailureKind {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::Timeout(_) => FailureKind::Timeout,
            TransportError::Connect(_) => FailureKind::Connect,
            TransportError::Proxy(_) => FailureKind::Proxy,
            TransportError::Request(_) => FailureKind::Other,
        }
    }
}

/// Result of one dispatch; the entry `id` has already been stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResult {
    pub id: EntryId,
    pub outcome: Outcome,
    /// Set only when `outcome` is `Failed`.
    pub failure: Option<FailureKind>,
}
