//! SQLite-backed history.
//!
//! A single connection behind a mutex serializes every read and write, which
//! is what makes inserts, listings and deletions linearizable. Ids come from
//! `AUTOINCREMENT`, so a deleted id is never handed out again.

use super::types::{
    EntryDraft, EntryId, HeaderMap, HistoryEntry, HistoryTally, HttpMethod, Outcome, ResponseBody,
};
use super::HistoryStore;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

const SELECT_COLUMNS: &str = "SELECT id, created_at, method, url, request_headers, request_body, proxy, \
     status, status_code, response_headers, response_kind, response_body, elapsed_seconds, error \
     FROM history";

pub struct SqliteHistoryStore {
    conn: Mutex<Connection>,
}

/// Column values as stored, before they are decoded into a `HistoryEntry`.
struct StoredRow {
    id: i64,
    created_at: i64,
    method: String,
    url: String,
    request_headers: String,
    request_body: Option<String>,
    proxy: Option<String>,
    status: String,
    status_code: Option<i64>,
    response_headers: Option<String>,
    response_kind: Option<String>,
    response_body: Option<String>,
    elapsed_seconds: Option<f64>,
    error: Option<String>,
}

impl StoredRow {
    fn read(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            created_at: row.get(1)?,
            method: row.get(2)?,
            url: row.get(3)?,
            request_headers: row.get(4)?,
            request_body: row.get(5)?,
            proxy: row.get(6)?,
            status: row.get(7)?,
            status_code: row.get(8)?,
            response_headers: row.get(9)?,
            response_kind: row.get(10)?,
            response_body: row.get(11)?,
            elapsed_seconds: row.get(12)?,
            error: row.get(13)?,
        })
    }

    fn decode(self) -> Result<HistoryEntry, StoreError> {
        let method: HttpMethod = self.method.parse().map_err(|m| {
            StoreError::Unavailable(format!("corrupt record {}: method {}", self.id, m))
        })?;
        let created_at = DateTime::from_timestamp_millis(self.created_at).ok_or_else(|| {
            StoreError::Unavailable(format!("corrupt record {}: timestamp", self.id))
        })?;

        let outcome = match self.status.as_str() {
            "completed" => Outcome::Completed {
                status_code: self.status_code.unwrap_or_default() as u16,
                response_headers: match self.response_headers {
                    Some(raw) => serde_json::from_str(&raw)?,
                    None => HeaderMap::new(),
                },
                response_body: ResponseBody::from_column(
                    self.response_kind.as_deref().unwrap_or("text"),
                    self.response_body.unwrap_or_default(),
                )?,
                elapsed_seconds: self.elapsed_seconds.unwrap_or_default(),
            },
            _ => Outcome::Failed {
                error: self.error.unwrap_or_default(),
            },
        };

        Ok(HistoryEntry {
            id: self.id,
            method,
            url: self.url,
            request_headers: serde_json::from_str(&self.request_headers)?,
            request_body: self
                .request_body
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            proxy: self.proxy,
            outcome,
            created_at,
        })
    }
}

impl SqliteHistoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        info!("SQLite history initialized at {}", path.as_ref().display());
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at INTEGER NOT NULL,
                method TEXT NOT NULL,
                url TEXT NOT NULL,
                request_headers TEXT NOT NULL,
                request_body TEXT,
                proxy TEXT,
                status TEXT NOT NULL,
                status_code INTEGER,
                response_headers TEXT,
                response_kind TEXT,
                response_body TEXT,
                elapsed_seconds REAL,
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_history_created_at ON history(created_at);
            CREATE INDEX IF NOT EXISTS idx_history_method ON history(method);",
        )?;
        Ok(())
    }
}

impl HistoryStore for SqliteHistoryStore {
    fn insert(&self, draft: EntryDraft) -> Result<EntryId, StoreError> {
        let request_headers = serde_json::to_string(&draft.request_headers)?;
        let request_body = draft
            .request_body
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let (status_code, response_headers, response_kind, response_body, elapsed, error) =
            match &draft.outcome {
                Outcome::Completed {
                    status_code,
                    response_headers,
                    response_body,
                    elapsed_seconds,
                } => (
                    Some(*status_code as i64),
                    Some(serde_json::to_string(response_headers)?),
                    Some(response_body.kind()),
                    Some(response_body.to_column()?),
                    Some(*elapsed_seconds),
                    None,
                ),
                Outcome::Failed { error } => (None, None, None, None, None, Some(error.as_str())),
            };

        let conn = self.conn.lock()?;
        // created_at never goes backwards, even if the wall clock does
        let mut stmt = conn.prepare_cached(
            "INSERT INTO history (
                created_at, method, url, request_headers, request_body, proxy,
                status, status_code, response_headers, response_kind, response_body,
                elapsed_seconds, error
            ) VALUES (
                MAX(?1, COALESCE((SELECT MAX(created_at) FROM history), ?1)),
                ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13
            )",
        )?;
        stmt.execute(params![
            super::now_millis().timestamp_millis(),
            draft.method.as_str(),
            draft.url,
            request_headers,
            request_body,
            draft.proxy,
            draft.outcome.tag(),
            status_code,
            response_headers,
            response_kind,
            response_body,
            elapsed,
            error,
        ])?;

        Ok(conn.last_insert_rowid())
    }

    fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "{} ORDER BY created_at DESC, id DESC LIMIT ?1",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([limit as i64], StoredRow::read)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.decode()?);
        }
        Ok(entries)
    }

    fn get(&self, id: EntryId) -> Result<Option<HistoryEntry>, StoreError> {
        let conn = self.conn.lock()?;
        let mut stmt = conn.prepare_cached(&format!("{} WHERE id = ?1", SELECT_COLUMNS))?;
        let row = stmt.query_row([id], StoredRow::read).optional()?;
        row.map(StoredRow::decode).transpose()
    }

    fn delete(&self, id: EntryId) -> Result<bool, StoreError> {
        let conn = self.conn.lock()?;
        let affected = conn
            .prepare_cached("DELETE FROM history WHERE id = ?1")?
            .execute([id])?;
        Ok(affected > 0)
    }

    fn tally(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<HistoryTally, StoreError> {
        let conn = self.conn.lock()?;
        let start = super::ceil_millis(window_start);
        let end = super::ceil_millis(now);

        let mut tally = conn
            .prepare_cached(
                "SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN created_at >= ?1 AND created_at < ?2 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN created_at >= ?1 AND created_at < ?2 AND status = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN status = 'completed' THEN elapsed_seconds ELSE 0.0 END), 0.0)
                 FROM history",
            )?
            .query_row(params![start, end], |r| {
                Ok(HistoryTally {
                    total: r.get::<_, i64>(0)? as u64,
                    recent: r.get::<_, i64>(1)? as u64,
                    recent_failed: r.get::<_, i64>(2)? as u64,
                    completed: r.get::<_, i64>(3)? as u64,
                    elapsed_sum: r.get(4)?,
                    method_counts: Default::default(),
                })
            })?;

        let mut stmt =
            conn.prepare_cached("SELECT method, COUNT(*) FROM history GROUP BY method")?;
        let rows = stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?;
        for row in rows {
            let (method, count) = row?;
            let method: HttpMethod = method
                .parse()
                .map_err(|m| StoreError::Unavailable(format!("corrupt method {}", m)))?;
            tally.method_counts.insert(method, count as u64);
        }

        Ok(tally)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock()?;
        conn.query_row("SELECT 1", [], |r| r.get::<_, i64>(0))?;
        Ok(())
    }
}
