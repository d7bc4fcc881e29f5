use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreResult;

/// Hash-like record stored per message: field name to value.
pub type RecordFields = HashMap<String, String>;

/// Time-ordered store of pending messages. Implementations must be thread-safe.
///
/// The store keeps two structures per message: a record holding the payload
/// fields, and an index entry mapping the id to its delivery score. The
/// index is ordered by score ascending; order among equal scores is
/// unspecified.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Write the record and its index entry in one atomic operation.
    async fn insert(&self, id: &str, fields: &RecordFields, score: i64) -> StoreResult<()>;

    /// Ids whose score lies in `[min, max]`, ascending by score.
    async fn range_by_score(&self, min: i64, max: i64) -> StoreResult<Vec<String>>;

    /// Resolve the records for `ids` in one round trip. The result is aligned
    /// with `ids`; an absent record yields `None`.
    async fn get_records(&self, ids: &[String]) -> StoreResult<Vec<Option<RecordFields>>>;

    /// Atomically remove the index entry and the record for `id`.
    /// Removing an unknown id is not an error.
    async fn remove(&self, id: &str) -> StoreResult<()>;
}

/// Conditional, expiring key-set used to arbitrate between dispatchers.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Create `key` with a time-to-live of `ttl` only if it does not exist.
    ///
    /// Returns `Ok(true)` when this caller created the key and `Ok(false)`
    /// (with no side effect) when the key already existed. The
    /// check-and-create step is atomic with respect to every caller sharing
    /// the backend. There is no release: keys expire.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;
}
