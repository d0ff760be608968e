use super::types::{HttpTransport, OutboundRequest, TransportError, TransportResponse};
use crate::config::RelayConfig;
use crate::history::{HeaderMap, HttpMethod, ResponseBody};
use anyhow::{Context, Result};
use moka::future::Cache;
use reqwest::header::{HeaderMap as ReqwestHeaders, CONTENT_TYPE};
use reqwest::{Client, Method, Proxy};
use std::collections::btree_map::Entry;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// `reqwest`-backed transport. Direct calls share one client; each distinct
/// proxy gets its own client, cached by proxy URL.
pub struct ReqwestTransport {
    direct: Client,
    proxied: Cache<String, Client>,
    user_agent: String,
    timeout: Duration,
}

impl ReqwestTransport {
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeout_ms);
        let direct = build_client(&config.user_agent, timeout, None)
            .context("Failed to build HTTP client")?;

        Ok(Self {
            direct,
            proxied: Cache::builder()
                .max_capacity(config.proxy_client_cache)
                .build(),
            user_agent: config.user_agent.clone(),
            timeout,
        })
    }

    async fn client_for(&self, proxy: Option<&Url>) -> Result<Client, TransportError> {
        let Some(proxy) = proxy else {
            return Ok(self.direct.clone());
        };

        self.proxied
            .try_get_with(proxy.to_string(), async {
                debug!("Building client for proxy {}", proxy);
                build_client(&self.user_agent, self.timeout, Some(proxy))
            })
            .await
            .map_err(|e| TransportError::Proxy(describe(e.as_ref())))
    }

    fn classify(&self, e: reqwest::Error, via_proxy: bool) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() && via_proxy {
            TransportError::Proxy(describe(&e))
        } else if e.is_connect() {
            TransportError::Connect(describe(&e))
        } else {
            TransportError::Request(describe(&e))
        }
    }
}

#[async_trait::async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let via_proxy = request.proxy.is_some();
        let client = self.client_for(request.proxy.as_ref()).await?;

        let mut builder = client.request(to_method(request.method), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| self.classify(e, via_proxy))?;

        let status = response.status().as_u16();
        let headers = flatten_headers(response.headers());
        let json = is_json_content(response.headers());
        let text = response
            .text()
            .await
            .map_err(|e| self.classify(e, via_proxy))?;

        let body = if json {
            match serde_json::from_str(&text) {
                Ok(value) => ResponseBody::Json(value),
                Err(_) => ResponseBody::Text(text),
            }
        } else {
            ResponseBody::Text(text)
        };

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

fn build_client(
    user_agent: &str,
    timeout: Duration,
    proxy: Option<&Url>,
) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder().user_agent(user_agent).timeout(timeout);
    if let Some(proxy) = proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }
    builder.build()
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Multi-valued headers are joined with ", ".
fn flatten_headers(headers: &ReqwestHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        match map.entry(name.as_str().to_string()) {
            Entry::Occupied(mut existing) => {
                let existing = existing.get_mut();
                existing.push_str(", ");
                existing.push_str(&value);
            }
            Entry::Vacant(slot) => {
                slot.insert(value);
            }
        }
    }
    map
}

fn is_json_content(headers: &ReqwestHeaders) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(is_json_mime)
        .unwrap_or(false)
}

fn is_json_mime(content_type: &str) -> bool {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    essence == "application/json" || essence.ends_with("+json")
}

/// Error text including its source chain; reqwest's top-level message alone hides the cause.
fn describe(e: &(dyn std::error::Error + 'static)) -> String {
    let mut message = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_json_mime_detection() {
        assert!(is_json_mime("application/json"));
        assert!(is_json_mime("application/json; charset=utf-8"));
        assert!(is_json_mime("application/problem+json"));
        assert!(is_json_mime("Application/JSON"));
        assert!(!is_json_mime("text/html"));
        assert!(!is_json_mime("text/plain; charset=utf-8"));
    }

    #[test]
    fn test_flatten_joins_repeated_headers() {
        let mut headers = ReqwestHeaders::new();
        headers.append("set-cookie", HeaderValue::from_static("a=1"));
        headers.append("set-cookie", HeaderValue::from_static("b=2"));
        headers.insert("content-type", HeaderValue::from_static("text/plain"));

        let flat = flatten_headers(&headers);
        assert_eq!(flat["set-cookie"], "a=1, b=2");
        assert_eq!(flat["content-type"], "text/plain");
    }

    #[tokio::test]
    async fn test_proxy_clients_are_cached() {
        let transport = ReqwestTransport::new(&RelayConfig::default()).unwrap();
        let proxy = Url::parse("http://127.0.0.1:3128").unwrap();

        transport.client_for(Some(&proxy)).await.unwrap();
        transport.client_for(Some(&proxy)).await.unwrap();
        transport.proxied.run_pending_tasks().await;
        assert_eq!(transport.proxied.entry_count(), 1);
    }
}
