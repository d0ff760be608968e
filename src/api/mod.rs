use crate::config::HistoryConfig;
use crate::error::StoreError;
use crate::history::{resolve_limit, EntryId, HeaderMap, HistoryStore, HttpMethod, Outcome};
use crate::logger::AccessLogger;
use crate::relay::{FailureKind, Relay, RelayRequest};
use crate::stats::StatsAggregator;
use anyhow::Context;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub struct ApiState {
    pub relay: Arc<Relay>,
    pub store: Arc<dyn HistoryStore>,
    pub stats: Arc<StatsAggregator>,
    pub history: HistoryConfig,
    pub access_log: Option<Arc<AccessLogger>>,
}

pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/call", post(call))
        .route("/api/history", get(list_history))
        .route("/api/history/{id}", get(get_entry).delete(delete_entry))
        .route("/api/stats", get(get_stats))
        .route("/api/logs", get(get_logs))
        .route("/health", get(health))
        .with_state(state)
}

pub async fn start_api_server(state: Arc<ApiState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API listener on {}", addr))?;
    info!("API Server listening on http://{}", addr);

    axum::serve(listener, app).await.context("API server failed")
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

fn not_found() -> Response {
    failure(StatusCode::NOT_FOUND, "Request not found")
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Non-numeric ids can never match an entry.
fn parse_id(raw: &str) -> Option<EntryId> {
    raw.parse().ok()
}

/// Every field may be missing or `null`.
#[derive(Debug, Deserialize)]
struct CallPayload {
    url: Option<String>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    headers: Option<HeaderMap>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    proxy: Option<String>,
}

async fn call(
    State(state): State<Arc<ApiState>>,
    payload: Result<Json<CallPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(p) => p,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let request = RelayRequest {
        method: payload.method.unwrap_or_else(|| "GET".to_string()),
        url: payload.url.unwrap_or_default(),
        headers: payload.headers.unwrap_or_default(),
        body: payload.body,
        proxy: payload.proxy,
    };

    let result = match state.relay.dispatch(request).await {
        Ok(result) => result,
        Err(e) if e.is_validation() => return failure(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!("Dispatch failed: {}", e);
            return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
        }
    };

    match result.outcome {
        Outcome::Completed {
            status_code,
            response_headers,
            response_body,
            elapsed_seconds,
        } => Json(json!({
            "success": true,
            "status_code": status_code,
            "response_data": response_body,
            "response_time": round3(elapsed_seconds),
            "headers": response_headers,
            "request_id": result.id,
        }))
        .into_response(),
        Outcome::Failed { error } => {
            let status = match result.failure {
                Some(FailureKind::Timeout) => StatusCode::REQUEST_TIMEOUT,
                Some(FailureKind::Connect) | Some(FailureKind::Proxy) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                Some(FailureKind::Other) | None => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (
                status,
                Json(json!({
                    "success": false,
                    "error": error,
                    "request_id": result.id,
                })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<String>,
}

async fn list_history(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    // Unparseable limits fall back to the default, like a missing one
    let requested = query.limit.and_then(|l| l.trim().parse::<i64>().ok());
    let limit = resolve_limit(requested, &state.history);

    match state.store.list(limit) {
        Ok(entries) => Json(json!({ "success": true, "requests": entries })).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn get_entry(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_id(&id) else {
        return not_found();
    };
    match state.store.get(id) {
        Ok(Some(entry)) => Json(json!({ "success": true, "request": entry })).into_response(),
        Ok(None) => not_found(),
        Err(e) => storage_failure(e),
    }
}

async fn delete_entry(State(state): State<Arc<ApiState>>, Path(id): Path<String>) -> Response {
    let Some(id) = parse_id(&id) else {
        return not_found();
    };
    match state.store.delete(id) {
        Ok(true) => Json(json!({ "success": true, "message": "Request deleted" })).into_response(),
        Ok(false) => not_found(),
        Err(e) => storage_failure(e),
    }
}

async fn get_stats(State(state): State<Arc<ApiState>>) -> Response {
    let snapshot = match state.stats.snapshot() {
        Ok(s) => s,
        Err(e) => return storage_failure(e),
    };

    let methods: Map<String, Value> = HttpMethod::ALL
        .into_iter()
        .map(|m| {
            let count = snapshot.method_counts.get(&m).copied().unwrap_or(0);
            (m.as_str().to_string(), Value::from(count))
        })
        .collect();

    Json(json!({
        "success": true,
        "total_requests": snapshot.total_requests,
        "recent_requests_24h": snapshot.recent_requests,
        "recent_failures": snapshot.recent_failures,
        "methods": methods,
        "avg_response_time": round3(snapshot.avg_response_seconds),
        "health_status": snapshot.health.as_str(),
        "version": VERSION,
        "timestamp": snapshot.generated_at,
    }))
    .into_response()
}

async fn get_logs(State(state): State<Arc<ApiState>>) -> Response {
    let logs = state
        .access_log
        .as_ref()
        .and_then(|logger| logger.recent())
        .unwrap_or_default();
    Json(json!({ "success": true, "logs": logs })).into_response()
}

async fn health(State(state): State<Arc<ApiState>>) -> Response {
    let (status, database) = match state.store.ping() {
        Ok(()) => (StatusCode::OK, "healthy".to_string()),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, format!("unhealthy: {}", e)),
    };

    let overall = if status == StatusCode::OK {
        "healthy"
    } else {
        "degraded"
    };
    let body = json!({
        "status": overall,
        "timestamp": Utc::now(),
        "version": VERSION,
        "services": {
            "database": database,
            "api": "healthy",
        },
    });
    (status, Json(body)).into_response()
}

fn storage_failure(e: StoreError) -> Response {
    error!("{}", e);
    failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.123456), 0.123);
        assert_eq!(round3(1.9996), 2.0);
        assert_eq!(round3(0.0), 0.0);
    }

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("42"), Some(42));
        assert_eq!(parse_id("nope"), None);
        assert_eq!(parse_id(""), None);
    }

    #[test]
    fn test_call_payload_defaults() {
        let payload: CallPayload =
            serde_json::from_value(json!({ "url": "https://example.com" })).unwrap();
        assert!(payload.method.is_none());
        assert!(payload.headers.is_none());
        assert!(payload.body.is_none());
        assert!(payload.proxy.is_none());
    }

    #[test]
    fn test_call_payload_accepts_nulls() {
        let payload: CallPayload = serde_json::from_value(json!({
            "url": "https://example.com",
            "method": null,
            "headers": null,
            "body": null,
            "proxy": null,
        }))
        .unwrap();
        assert!(payload.method.is_none());
        assert!(payload.headers.is_none());
    }
}
