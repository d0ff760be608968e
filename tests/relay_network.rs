use api_relay::config::RelayConfig;
use api_relay::history::{HistoryStore, MemoryHistoryStore, Outcome, ResponseBody};
use api_relay::relay::{FailureKind, Relay, RelayRequest, ReqwestTransport};
use axum::http::{header, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;

async fn spawn_upstream() -> SocketAddr {
    let app = Router::new()
        .route("/json", get(|| async { Json(json!({ "hello": "world" })) }))
        .route("/text", get(|| async { "plain body" }))
        .route(
            "/broken",
            get(|| async {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    [(header::CONTENT_TYPE, "application/json")],
                    "{\"error\": \"boom\"}",
                )
            }),
        )
        .route(
            "/not-json",
            get(|| async { ([(header::CONTENT_TYPE, "application/json")], "<html>") }),
        )
        .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn relay(timeout: Duration) -> (Relay, Arc<MemoryHistoryStore>) {
    let config = RelayConfig {
        timeout_ms: timeout.as_millis() as u64,
        ..RelayConfig::default()
    };
    let transport = ReqwestTransport::new(&config).unwrap();
    let store = Arc::new(MemoryHistoryStore::new());
    (Relay::new(Arc::new(transport), store.clone(), timeout), store)
}

fn request(method: &str, url: String) -> RelayRequest {
    RelayRequest {
        method: method.to_string(),
        url,
        ..RelayRequest::default()
    }
}

fn completed(outcome: &Outcome) -> (u16, &ResponseBody) {
    match outcome {
        Outcome::Completed {
            status_code,
            response_body,
            ..
        } => (*status_code, response_body),
        other => panic!("expected completed outcome, got {:?}", other),
    }
}

#[tokio::test]
async fn test_json_and_text_bodies() {
    let addr = spawn_upstream().await;
    let (relay, _store) = relay(Duration::from_secs(5));

    let result = relay
        .dispatch(request("GET", format!("http://{}/json", addr)))
        .await
        .unwrap();
    let (status, body) = completed(&result.outcome);
    assert_eq!(status, 200);
    assert_eq!(body, &ResponseBody::Json(json!({ "hello": "world" })));

    let result = relay
        .dispatch(request("GET", format!("http://{}/text", addr)))
        .await
        .unwrap();
    let (_, body) = completed(&result.outcome);
    assert_eq!(body, &ResponseBody::Text("plain body".to_string()));

    // Declared JSON that does not parse is kept as text
    let result = relay
        .dispatch(request("GET", format!("http://{}/not-json", addr)))
        .await
        .unwrap();
    let (_, body) = completed(&result.outcome);
    assert_eq!(body, &ResponseBody::Text("<html>".to_string()));
}

#[tokio::test]
async fn test_error_status_is_completed() {
    let addr = spawn_upstream().await;
    let (relay, store) = relay(Duration::from_secs(5));

    let result = relay
        .dispatch(request("GET", format!("http://{}/broken", addr)))
        .await
        .unwrap();
    let (status, body) = completed(&result.outcome);
    assert_eq!(status, 500);
    assert_eq!(body, &ResponseBody::Json(json!({ "error": "boom" })));
    assert!(!store.get(result.id).unwrap().unwrap().outcome.is_failed());
}

#[tokio::test]
async fn test_post_body_is_sent_as_json() {
    let addr = spawn_upstream().await;
    let (relay, store) = relay(Duration::from_secs(5));

    let result = relay
        .dispatch(RelayRequest {
            body: Some(json!({ "name": "relay", "n": 3 })),
            ..request("POST", format!("http://{}/echo", addr))
        })
        .await
        .unwrap();
    let (status, body) = completed(&result.outcome);
    assert_eq!(status, 200);
    assert_eq!(body, &ResponseBody::Json(json!({ "name": "relay", "n": 3 })));

    let entry = store.get(result.id).unwrap().unwrap();
    assert_eq!(entry.request_body, Some(json!({ "name": "relay", "n": 3 })));
}

#[tokio::test]
async fn test_connection_refused_is_failed() {
    // Bind then drop to get a port nothing listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (relay, store) = relay(Duration::from_secs(5));
    let result = relay
        .dispatch(request("GET", format!("http://{}/", addr)))
        .await
        .unwrap();

    assert!(result.outcome.is_failed());
    assert_eq!(result.failure, Some(FailureKind::Connect));
    assert_eq!(store.list(10).unwrap().len(), 1);
}

#[tokio::test]
async fn test_unroutable_host_times_out() {
    let (relay, store) = relay(Duration::from_secs(1));

    let started = Instant::now();
    let result = relay
        .dispatch(request("POST", "http://10.255.255.1/".to_string()))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    assert!(result.outcome.is_failed());
    let entry = store.get(result.id).unwrap().unwrap();
    assert!(matches!(entry.outcome, Outcome::Failed { .. }));
}
