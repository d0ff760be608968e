pub mod memory;
pub mod sqlite;
pub mod types;

pub use self::memory::MemoryHistoryStore;
pub use self::sqlite::SqliteHistoryStore;
pub use self::types::{
    EntryDraft, EntryId, HeaderMap, HistoryEntry, HistoryTally, HttpMethod, Outcome,
    ResponseBody,
};

use crate::config::HistoryConfig;
use crate::error::StoreError;
use chrono::{DateTime, Utc};

/// Ordered ledger of dispatch records.
///
/// Implementations serialize writers against readers: an entry is visible to
/// `list`/`tally` only once `insert` has returned, and never after `delete` has.
pub trait HistoryStore: Send + Sync {
    /// Assigns the next id and the creation timestamp, then appends.
    fn insert(&self, draft: EntryDraft) -> Result<EntryId, StoreError>;

    /// Up to `limit` entries, newest first (`created_at` desc, then `id` desc).
    fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError>;

    fn get(&self, id: EntryId) -> Result<Option<HistoryEntry>, StoreError>;

    /// Returns whether the entry existed. Deleting an unknown id is not an error.
    fn delete(&self, id: EntryId) -> Result<bool, StoreError>;

    /// Counts over the whole ledger; "recent" covers `[window_start, now)`.
    fn tally(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<HistoryTally, StoreError>;

    fn ping(&self) -> Result<(), StoreError>;
}

/// Current time truncated to the millisecond resolution both backends store.
pub(crate) fn now_millis() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// Smallest whole millisecond not before `t`, for comparing against stored
/// millisecond timestamps without losing sub-millisecond precision.
pub(crate) fn ceil_millis(t: DateTime<Utc>) -> i64 {
    let millis = t.timestamp_millis();
    if t.timestamp_subsec_nanos() % 1_000_000 == 0 {
        millis
    } else {
        millis + 1
    }
}

/// Turns the caller's `limit` query parameter into a usable row count.
pub fn resolve_limit(requested: Option<i64>, config: &HistoryConfig) -> usize {
    match requested {
        Some(n) if n > 0 => (n as u64).min(config.max_limit as u64) as usize,
        _ => config.default_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_millis() {
        let exact = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(ceil_millis(exact), 1_700_000_000_123);
        let partial = exact + chrono::Duration::microseconds(10);
        assert_eq!(ceil_millis(partial), 1_700_000_000_124);
    }

    #[test]
    fn test_resolve_limit() {
        let config = HistoryConfig::default();
        assert_eq!(resolve_limit(None, &config), 50);
        assert_eq!(resolve_limit(Some(0), &config), 50);
        assert_eq!(resolve_limit(Some(-3), &config), 50);
        assert_eq!(resolve_limit(Some(2), &config), 2);
        assert_eq!(resolve_limit(Some(1_000_000), &config), 1000);
    }
}
