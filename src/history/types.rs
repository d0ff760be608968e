use crate::error::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub type EntryId = i64;
pub type HeaderMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
}

impl HttpMethod {
    pub const ALL: [HttpMethod; 7] = [
        HttpMethod::Get,
        HttpMethod::Post,
        HttpMethod::Put,
        HttpMethod::Patch,
        HttpMethod::Delete,
        HttpMethod::Head,
        HttpMethod::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
        }
    }

    /// Methods whose request body is forwarded and recorded.
    pub fn allows_body(&self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        HttpMethod::ALL
            .into_iter()
            .find(|m| m.as_str() == upper)
            .ok_or_else(|| s.to_string())
    }
}

/// Response payload: parsed JSON when the upstream declared it, raw text otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            ResponseBody::Json(_) => "json",
            ResponseBody::Text(_) => "text",
        }
    }

    pub(crate) fn to_column(&self) -> Result<String, StoreError> {
        Ok(match self {
            ResponseBody::Json(v) => serde_json::to_string(v)?,
            ResponseBody::Text(s) => s.clone(),
        })
    }

    pub(crate) fn from_column(kind: &str, raw: String) -> Result<Self, StoreError> {
        Ok(match kind {
            "json" => ResponseBody::Json(serde_json::from_str(&raw)?),
            _ => ResponseBody::Text(raw),
        })
    }
}

/// How a dispatch attempt ended.
///
/// Wire names follow the history records the web client already renders
/// (`response_status`, `response_data`, `response_time`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed {
        #[serde(rename = "response_status")]
        status_code: u16,
        response_headers: HeaderMap,
        #[serde(rename = "response_data")]
        response_body: ResponseBody,
        #[serde(rename = "response_time")]
        elapsed_seconds: f64,
    },
    Failed {
        error: String,
    },
}

impl Outcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    pub fn tag(&self) -> &'static str {
        match self {
            Outcome::Completed { .. } => "completed",
            Outcome::Failed { .. } => "failed",
        }
    }
}

/// A dispatch record before the store has assigned it an id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub method: HttpMethod,
    pub url: String,
    pub request_headers: HeaderMap,
    pub request_body: Option<Value>,
    pub proxy: Option<String>,
    pub outcome: Outcome,
}

impl EntryDraft {
    pub(crate) fn into_entry(self, id: EntryId, created_at: DateTime<Utc>) -> HistoryEntry {
        HistoryEntry {
            id,
            method: self.method,
            url: self.url,
            request_headers: self.request_headers,
            request_body: self.request_body,
            proxy: self.proxy,
            outcome: self.outcome,
            created_at,
        }
    }
}

/// One persisted dispatch attempt. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub id: EntryId,
    pub method: HttpMethod,
    pub url: String,
    #[serde(rename = "headers")]
    pub request_headers: HeaderMap,
    #[serde(rename = "body")]
    pub request_body: Option<Value>,
    pub proxy: Option<String>,
    #[serde(flatten)]
    pub outcome: Outcome,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

/// Aggregate counts read from a store in one consistent pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryTally {
    pub total: u64,
    pub recent: u64,
    pub recent_failed: u64,
    pub completed: u64,
    pub elapsed_sum: f64,
    pub method_counts: BTreeMap<HttpMethod, u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_method_parse_is_case_insensitive() {
        assert_eq!("get".parse::<HttpMethod>(), Ok(HttpMethod::Get));
        assert_eq!(" Patch ".parse::<HttpMethod>(), Ok(HttpMethod::Patch));
        assert_eq!("TRACE".parse::<HttpMethod>(), Err("TRACE".to_string()));
    }

    #[test]
    fn test_body_methods() {
        let with_body: Vec<_> = HttpMethod::ALL
            .into_iter()
            .filter(HttpMethod::allows_body)
            .collect();
        assert_eq!(
            with_body,
            vec![HttpMethod::Post, HttpMethod::Put, HttpMethod::Patch]
        );
    }

    #[test]
    fn test_entry_serializes_with_flat_status() {
        let entry = EntryDraft {
            method: HttpMethod::Get,
            url: "https://example.com/".to_string(),
            request_headers: HeaderMap::new(),
            request_body: None,
            proxy: None,
            outcome: Outcome::Failed {
                error: "Connection refused".to_string(),
            },
        }
        .into_entry(7, Utc::now());

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], 7);
        assert_eq!(value["method"], "GET");
        assert_eq!(value["status"], "failed");
        assert_eq!(value["error"], "Connection refused");
        assert!(value.get("response_status").is_none());
        assert!(value["timestamp"].is_string());
    }

    #[test]
    fn test_completed_entry_uses_history_wire_names() {
        let entry = EntryDraft {
            method: HttpMethod::Post,
            url: "https://example.com/items".to_string(),
            request_headers: HeaderMap::from([("accept".to_string(), "*/*".to_string())]),
            request_body: Some(json!({"name": "x"})),
            proxy: None,
            outcome: Outcome::Completed {
                status_code: 201,
                response_headers: HeaderMap::new(),
                response_body: ResponseBody::Json(json!({"id": 9})),
                elapsed_seconds: 0.25,
            },
        }
        .into_entry(3, Utc::now());

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["response_status"], 201);
        assert_eq!(value["response_data"]["id"], 9);
        assert_eq!(value["response_time"], 0.25);
        assert_eq!(value["headers"]["accept"], "*/*");
        assert_eq!(value["body"]["name"], "x");
        assert!(value["timestamp"].is_string());
        for stale in ["status_code", "response_body", "elapsed_seconds", "created_at"] {
            assert!(value.get(stale).is_none(), "unexpected key {}", stale);
        }
    }

    #[test]
    fn test_response_body_column_keeps_kind() {
        let body = ResponseBody::Json(json!({"ok": true}));
        let raw = body.to_column().unwrap();
        assert_eq!(ResponseBody::from_column(body.kind(), raw).unwrap(), body);

        let text = ResponseBody::Text("{not json".to_string());
        let raw = text.to_column().unwrap();
        assert_eq!(ResponseBody::from_column(text.kind(), raw).unwrap(), text);
    }
}
