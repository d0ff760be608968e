use super::types::{EntryDraft, EntryId, HistoryEntry, HistoryTally, Outcome};
use super::HistoryStore;
use crate::error::StoreError;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
struct Ledger {
    entries: BTreeMap<EntryId, HistoryEntry>,
    next_id: EntryId,
    last_created: Option<DateTime<Utc>>,
}

/// History kept in process memory; lost on restart.
///
/// Ids and timestamps are assigned under the write lock and timestamps never go
/// backwards, so id order and `created_at` order agree.
#[derive(Default)]
pub struct MemoryHistoryStore {
    ledger: RwLock<Ledger>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn insert(&self, draft: EntryDraft) -> Result<EntryId, StoreError> {
        let mut ledger = self.ledger.write()?;

        ledger.next_id += 1;
        let id = ledger.next_id;

        let now = super::now_millis();
        let created_at = match ledger.last_created {
            Some(last) if last > now => last,
            _ => now,
        };
        ledger.last_created = Some(created_at);

        ledger.entries.insert(id, draft.into_entry(id, created_at));
        Ok(id)
    }

    fn list(&self, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let ledger = self.ledger.read()?;
        Ok(ledger.entries.values().rev().take(limit).cloned().collect())
    }

    fn get(&self, id: EntryId) -> Result<Option<HistoryEntry>, StoreError> {
        let ledger = self.ledger.read()?;
        Ok(ledger.entries.get(&id).cloned())
    }

    fn delete(&self, id: EntryId) -> Result<bool, StoreError> {
        let mut ledger = self.ledger.write()?;
        Ok(ledger.entries.remove(&id).is_some())
    }

    fn tally(
        &self,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<HistoryTally, StoreError> {
        let ledger = self.ledger.read()?;
        let mut tally = HistoryTally::default();

        for entry in ledger.entries.values() {
            tally.total += 1;
            *tally.method_counts.entry(entry.method).or_insert(0) += 1;

            if entry.created_at >= window_start && entry.created_at < now {
                tally.recent += 1;
                if entry.outcome.is_failed() {
                    tally.recent_failed += 1;
                }
            }

            if let Outcome::Completed {
                elapsed_seconds, ..
            } = entry.outcome
            {
                tally.completed += 1;
                tally.elapsed_sum += elapsed_seconds;
            }
        }

        Ok(tally)
    }

    fn ping(&self) -> Result<(), StoreError> {
        let _ledger = self.ledger.read()?;
        Ok(())
    }
}
