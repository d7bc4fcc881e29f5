//! In-memory store for tests and single-process development.
//!
//! Every operation takes one mutex, so the conditional-create semantics of
//! [`DistributedLock::try_acquire`] hold exactly across tasks and threads
//! sharing the same `InMemoryStore`. Lock expiry follows the Tokio clock,
//! which lets tests drive it with paused time.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::traits::{DistributedLock, RecordFields, ScheduleStore};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, RecordFields>,
    /// `(score, id)` pairs, ordered by score.
    index: BTreeSet<(i64, String)>,
    /// Reverse index: id to score, for O(log n) removal.
    scores: HashMap<String, i64>,
    /// Lock key to expiry deadline.
    locks: HashMap<String, Instant>,
}

/// Process-local [`ScheduleStore`] and [`DistributedLock`].
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an unreachable store: while set, every operation fails with
    /// [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of ids currently in the delivery index.
    pub fn index_len(&self) -> usize {
        self.state.lock().map(|s| s.index.len()).unwrap_or_default()
    }

    /// Number of stored records, indexed or not.
    pub fn record_count(&self) -> usize {
        self.state.lock().map(|s| s.records.len()).unwrap_or_default()
    }

    /// Write an index entry without a record, as left behind by a torn
    /// write or a concurrent removal.
    #[cfg(test)]
    pub(crate) fn put_index_entry(&self, id: &str, score: i64) {
        let mut state = self.state.lock().unwrap();
        state.index.insert((score, id.to_string()));
        state.scores.insert(id.to_string(), score);
    }

    /// Overwrite a record without touching the index.
    #[cfg(test)]
    pub(crate) fn put_record(&self, id: &str, fields: RecordFields) {
        let mut state = self.state.lock().unwrap();
        state.records.insert(id.to_string(), fields);
    }

    fn state(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

#[async_trait]
impl ScheduleStore for InMemoryStore {
    async fn insert(&self, id: &str, fields: &RecordFields, score: i64) -> StoreResult<()> {
        let mut state = self.state()?;
        if let Some(previous) = state.scores.insert(id.to_string(), score) {
            state.index.remove(&(previous, id.to_string()));
        }
        state.index.insert((score, id.to_string()));
        state
            .records
            .entry(id.to_string())
            .or_default()
            .extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        Ok(())
    }

    async fn range_by_score(&self, min: i64, max: i64) -> StoreResult<Vec<String>> {
        if min > max {
            return Ok(Vec::new());
        }
        let state = self.state()?;
        Ok(state
            .index
            .range((min, String::new())..)
            .take_while(|(score, _)| *score <= max)
            .map(|(_, id)| id.clone())
            .collect())
    }

    async fn get_records(&self, ids: &[String]) -> StoreResult<Vec<Option<RecordFields>>> {
        let state = self.state()?;
        Ok(ids.iter().map(|id| state.records.get(id).cloned()).collect())
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        let mut state = self.state()?;
        if let Some(score) = state.scores.remove(id) {
            state.index.remove(&(score, id.to_string()));
        }
        state.records.remove(id);
        Ok(())
    }
}

#[async_trait]
impl DistributedLock for InMemoryStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut state = self.state()?;
        let now = Instant::now();
        if let Some(expires_at) = state.locks.get(key) {
            if *expires_at > now {
                return Ok(false);
            }
        }
        state.locks.insert(key.to_string(), now + ttl);
        // Opportunistic cleanup keeps the lock table bounded.
        state.locks.retain(|_, expires_at| *expires_at > now);
        Ok(true)
    }
}
