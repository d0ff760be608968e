pub mod client;
pub mod types;

pub use self::client::ReqwestTransport;
pub use self::types::{
    FailureKind, HttpTransport, OutboundRequest, RelayRequest, RelayResult, TransportError,
    TransportResponse,
};

use crate::error::RelayError;
use crate::history::{EntryDraft, HistoryStore, HttpMethod, Outcome};
use crate::logger::{AccessLogAction, AccessLogEntry, AccessLogger};
use reqwest::header::{HeaderName, HeaderValue};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};
use tracing::debug;
use url::Url;

const PROXY_SCHEMES: [&str; 3] = ["http", "https", "socks5"];

/// Executes caller-specified HTTP calls and records each attempt in the history.
pub struct Relay {
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn HistoryStore>,
    timeout: Duration,
    access_log: Option<Arc<AccessLogger>>,
}

impl Relay {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        store: Arc<dyn HistoryStore>,
        timeout: Duration,
    ) -> Self {
        Self {
            transport,
            store,
            timeout,
            access_log: None,
        }
    }

    pub fn with_access_log(mut self, logger: Arc<AccessLogger>) -> Self {
        self.access_log = Some(logger);
        self
    }

    /// Validates, sends, and records one request.
    ///
    /// Validation errors return before anything is stored. Otherwise exactly one
    /// history entry is written, `completed` for any HTTP status and `failed` for
    /// transport errors and timeouts. The call and the insert run on their own
    /// task, so dropping the returned future does not lose the entry.
    pub async fn dispatch(&self, request: RelayRequest) -> Result<RelayResult, RelayError> {
        let outbound = prepare(&request)?;
        let draft = DraftTemplate {
            url: request.url.trim().to_string(),
            proxy: non_blank(request.proxy.as_deref()),
        };

        let task = tokio::spawn(execute(
            self.transport.clone(),
            self.store.clone(),
            self.timeout,
            self.access_log.clone(),
            outbound,
            draft,
        ));

        task.await.map_err(|e| RelayError::Task(e.to_string()))?
    }
}

/// Caller-facing text stored with the entry, as typed rather than normalized.
struct DraftTemplate {
    url: String,
    proxy: Option<String>,
}

async fn execute(
    transport: Arc<dyn HttpTransport>,
    store: Arc<dyn HistoryStore>,
    timeout: Duration,
    access_log: Option<Arc<AccessLogger>>,
    outbound: OutboundRequest,
    template: DraftTemplate,
) -> Result<RelayResult, RelayError> {
    let started = Instant::now();
    let result = match time::timeout(timeout, transport.send(&outbound)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(timeout)),
    };
    let elapsed = started.elapsed();

    let (outcome, failure) = match result {
        Ok(response) => (
            Outcome::Completed {
                status_code: response.status,
                response_headers: response.headers,
                response_body: response.body,
                elapsed_seconds: elapsed.as_secs_f64(),
            },
            None,
        ),
        Err(e) => {
            debug!("{} {} failed: {}", outbound.method, template.url, e);
            let kind = FailureKind::from(&e);
            (
                Outcome::Failed {
                    error: e.to_string(),
                },
                Some(kind),
            )
        }
    };

    let id = store.insert(EntryDraft {
        method: outbound.method,
        url: template.url.clone(),
        request_headers: outbound.headers,
        request_body: outbound.body,
        proxy: template.proxy.clone(),
        outcome: outcome.clone(),
    })?;

    if let Some(logger) = access_log {
        let (action, status_code, error) = match &outcome {
            Outcome::Completed { status_code, .. } => {
                (AccessLogAction::Completed, Some(*status_code), None)
            }
            Outcome::Failed { error } => (AccessLogAction::Failed, None, Some(error.clone())),
        };
        logger
            .log(AccessLogEntry {
                id,
                method: outbound.method,
                url: template.url,
                proxy: template.proxy,
                action,
                status_code,
                latency_ms: elapsed.as_millis() as u64,
                error,
            })
            .await;
    }

    Ok(RelayResult {
        id,
        outcome,
        failure,
    })
}

/// Checks the caller's input and builds the outbound request.
pub fn prepare(request: &RelayRequest) -> Result<OutboundRequest, RelayError> {
    let method: HttpMethod = request
        .method
        .parse()
        .map_err(RelayError::InvalidMethod)?;

    let url = parse_target(&request.url)?;

    let proxy = match non_blank(request.proxy.as_deref()) {
        Some(raw) => Some(parse_proxy(&raw)?),
        None => None,
    };

    for (name, value) in &request.headers {
        HeaderName::from_bytes(name.as_bytes()).map_err(|e| RelayError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        HeaderValue::from_str(value).map_err(|e| RelayError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
    }

    let body = match &request.body {
        Some(body) if method.allows_body() && !body.is_null() => Some(body.clone()),
        _ => None,
    };

    Ok(OutboundRequest {
        method,
        url,
        headers: request.headers.clone(),
        body,
        proxy,
    })
}

fn parse_target(raw: &str) -> Result<Url, RelayError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(RelayError::InvalidUrl("URL is missing".to_string()));
    }

    let url = Url::parse(raw).map_err(|e| RelayError::InvalidUrl(format!("{}: {}", raw, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(RelayError::InvalidUrl(format!(
            "{}: scheme must be http or https",
            raw
        )));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(RelayError::InvalidUrl(format!("{}: missing host", raw)));
    }
    Ok(url)
}

fn parse_proxy(raw: &str) -> Result<Url, RelayError> {
    let invalid = || {
        RelayError::InvalidProxy(format!(
            "{}: proxy must start with http://, https:// or socks5://",
            raw
        ))
    };

    let url = Url::parse(raw).map_err(|_| invalid())?;
    if !PROXY_SCHEMES.contains(&url.scheme()) || url.host_str().is_none() {
        return Err(invalid());
    }
    Ok(url)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
