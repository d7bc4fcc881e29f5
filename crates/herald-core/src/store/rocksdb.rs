use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, Direction, IteratorMode,
    MultiThreaded, Options, WriteBatch,
};
use tracing::debug;

use super::keys;
use super::traits::{DistributedLock, RecordFields, ScheduleStore};
use crate::error::{StoreError, StoreResult};
use crate::time::now_millis;

const CF_RECORDS: &str = "records";
const CF_SCHEDULE: &str = "schedule";
const CF_SCHEDULE_MEMBERS: &str = "schedule_members";
const CF_LOCKS: &str = "locks";

/// Column families opened alongside `default`.
const COLUMN_FAMILIES: &[&str] = &[CF_RECORDS, CF_SCHEDULE, CF_SCHEDULE_MEMBERS, CF_LOCKS];

/// Minimum gap between two sweeps of expired lock entries.
const LOCK_SWEEP_INTERVAL_MS: i64 = 1000;

type DB = DBWithThreadMode<MultiThreaded>;

/// RocksDB-backed store.
///
/// Column families:
/// - `records`: message id to JSON-encoded record fields
/// - `schedule`: `{encoded_score}{id}` to empty, the ordered delivery index
/// - `schedule_members`: message id to encoded score, for removal by id
/// - `locks`: lock key to big-endian expiry (epoch millis)
///
/// A RocksDB directory is owned by one process, so lock atomicity is
/// provided by an in-process mutex around the check-and-put. Dispatchers in
/// other processes need a shared backend.
///
/// RocksDB calls block, so every trait method runs on Tokio's blocking pool.
pub struct RocksDbStore {
    inner: Arc<Inner>,
}

struct Inner {
    db: DB,
    /// Serializes lock check-and-put. Holds the time of the last sweep of
    /// expired lock entries.
    lock_guard: Mutex<i64>,
}

impl RocksDbStore {
    /// Open the database at `path`, creating it and its column families if needed.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect();

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;
        Ok(Self {
            inner: Arc::new(Inner {
                db,
                lock_guard: Mutex::new(0),
            }),
        })
    }

    /// Flush memtables so all writes are durable before shutdown.
    pub fn flush(&self) -> StoreResult<()> {
        for name in COLUMN_FAMILIES {
            let cf = self.inner.cf(name)?;
            self.inner.db.flush_cf(&cf)?;
        }
        Ok(())
    }

    /// Delete every lock entry whose TTL has passed and return how many were
    /// removed. `try_acquire` also does this on its own, at most once per
    /// second.
    pub fn prune_expired_locks(&self) -> StoreResult<usize> {
        let now = now_millis();
        let mut last_sweep = self.inner.lock_guard.lock().map_err(|_| StoreError::Poisoned)?;
        let removed = self.inner.sweep_expired_locks(now)?;
        *last_sweep = now;
        Ok(removed)
    }

    async fn blocking<T, F>(&self, op: F) -> StoreResult<T>
    where
        F: FnOnce(&Inner) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::RocksDb(format!("blocking task failed: {e}")))?
    }
}

impl Inner {
    fn cf(&self, name: &str) -> StoreResult<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::RocksDb(format!("column family not found: {name}")))
    }

    fn insert(&self, id: &str, fields: &RecordFields, score: i64) -> StoreResult<()> {
        let records = self.cf(CF_RECORDS)?;
        let schedule = self.cf(CF_SCHEDULE)?;
        let members = self.cf(CF_SCHEDULE_MEMBERS)?;

        let mut batch = WriteBatch::default();
        if let Some(previous) = self.db.get_cf(&members, id.as_bytes())? {
            if let Some(previous) = keys::decode_score(&previous) {
                batch.delete_cf(&schedule, keys::schedule_key(previous, id));
            }
        }
        batch.put_cf(&records, id.as_bytes(), serde_json::to_vec(fields)?);
        batch.put_cf(&schedule, keys::schedule_key(score, id), b"");
        batch.put_cf(&members, id.as_bytes(), keys::encode_score(score));
        self.db.write(batch)?;
        Ok(())
    }

    fn range_by_score(&self, min: i64, max: i64) -> StoreResult<Vec<String>> {
        if min > max {
            return Ok(Vec::new());
        }
        let schedule = self.cf(CF_SCHEDULE)?;
        let start = keys::encode_score(min);
        let iter = self
            .db
            .iterator_cf(&schedule, IteratorMode::From(&start, Direction::Forward));

        let mut ids = Vec::new();
        for item in iter {
            let (key, _) = item?;
            let Some((score, id)) = keys::parse_schedule_key(&key) else {
                debug!("corrupt schedule key, skipping");
                continue;
            };
            if score > max {
                break;
            }
            ids.push(id);
        }
        Ok(ids)
    }

    fn get_records(&self, ids: &[String]) -> StoreResult<Vec<Option<RecordFields>>> {
        let records = self.cf(CF_RECORDS)?;
        self.db
            .multi_get_cf(ids.iter().map(|id| (&records, id.as_bytes())))
            .into_iter()
            .map(|value| -> StoreResult<Option<RecordFields>> {
                match value? {
                    Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
                    None => Ok(None),
                }
            })
            .collect()
    }

    fn remove(&self, id: &str) -> StoreResult<()> {
        let records = self.cf(CF_RECORDS)?;
        let schedule = self.cf(CF_SCHEDULE)?;
        let members = self.cf(CF_SCHEDULE_MEMBERS)?;

        let mut batch = WriteBatch::default();
        if let Some(score) = self.db.get_cf(&members, id.as_bytes())? {
            if let Some(score) = keys::decode_score(&score) {
                batch.delete_cf(&schedule, keys::schedule_key(score, id));
            }
        }
        batch.delete_cf(&members, id.as_bytes());
        batch.delete_cf(&records, id.as_bytes());
        self.db.write(batch)?;
        Ok(())
    }

    fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let locks = self.cf(CF_LOCKS)?;
        let now = now_millis();
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        let mut last_sweep = self.lock_guard.lock().map_err(|_| StoreError::Poisoned)?;
        if now.saturating_sub(*last_sweep) >= LOCK_SWEEP_INTERVAL_MS {
            let removed = self.sweep_expired_locks(now)?;
            if removed > 0 {
                debug!(removed, "pruned expired lock entries");
            }
            *last_sweep = now;
        }

        if let Some(value) = self.db.get_cf(&locks, key.as_bytes())? {
            if lock_expiry(&value) > now {
                return Ok(false);
            }
        }
        let expires_at = now.saturating_add(ttl_ms);
        self.db
            .put_cf(&locks, key.as_bytes(), expires_at.to_be_bytes())?;
        Ok(true)
    }

    /// Delete lock entries that expired at or before `now`. Callers hold
    /// `lock_guard`.
    fn sweep_expired_locks(&self, now: i64) -> StoreResult<usize> {
        let locks = self.cf(CF_LOCKS)?;
        let mut batch = WriteBatch::default();
        let mut removed = 0;
        for item in self.db.iterator_cf(&locks, IteratorMode::Start) {
            let (key, value) = item?;
            if lock_expiry(&value) <= now {
                batch.delete_cf(&locks, key);
                removed += 1;
            }
        }
        if removed > 0 {
            self.db.write(batch)?;
        }
        Ok(removed)
    }
}

/// Expiry stored in a lock entry. Unreadable entries count as expired.
fn lock_expiry(value: &[u8]) -> i64 {
    value
        .get(..8)
        .and_then(|b| b.try_into().ok())
        .map(i64::from_be_bytes)
        .unwrap_or(i64::MIN)
}

#[async_trait]
impl ScheduleStore for RocksDbStore {
    async fn insert(&self, id: &str, fields: &RecordFields, score: i64) -> StoreResult<()> {
        let id = id.to_string();
        let fields = fields.clone();
        self.blocking(move |db| db.insert(&id, &fields, score)).await
    }

    async fn range_by_score(&self, min: i64, max: i64) -> StoreResult<Vec<String>> {
        self.blocking(move |db| db.range_by_score(min, max)).await
    }

    async fn get_records(&self, ids: &[String]) -> StoreResult<Vec<Option<RecordFields>>> {
        let ids = ids.to_vec();
        self.blocking(move |db| db.get_records(&ids)).await
    }

    async fn remove(&self, id: &str) -> StoreResult<()> {
        let id = id.to_string();
        self.blocking(move |db| db.remove(&id)).await
    }
}

#[async_trait]
impl DistributedLock for RocksDbStore {
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let key = key.to_string();
        self.blocking(move |db| db.try_acquire(&key, ttl)).await
    }
}
