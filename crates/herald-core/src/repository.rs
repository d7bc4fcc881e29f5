use std::sync::Arc;

use tracing::{debug, instrument};

use crate::error::{ScheduleError, StoreResult};
use crate::message::ScheduledMessage;
use crate::metrics::Metrics;
use crate::store::ScheduleStore;
use crate::time::DeliveryTime;

/// Lowest score considered by [`MessageRepository::fetch_due`]. Messages
/// scheduled before the epoch are never due.
const MIN_DUE_SCORE: i64 = 0;

/// Combines the store's record and index primitives into enqueue,
/// fetch-due and remove. Knows nothing about locking or emission.
#[derive(Clone)]
pub struct MessageRepository {
    store: Arc<dyn ScheduleStore>,
    metrics: Metrics,
}

impl MessageRepository {
    pub fn new(store: Arc<dyn ScheduleStore>) -> Self {
        Self {
            store,
            metrics: Metrics::new(),
        }
    }

    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Schedule `message` for delivery at `time` and return its new id.
    ///
    /// The record and its index entry are written in one atomic store
    /// operation, so a failed enqueue leaves nothing behind.
    #[instrument(skip_all)]
    pub async fn enqueue(
        &self,
        time: impl Into<DeliveryTime>,
        message: impl Into<String>,
    ) -> Result<String, ScheduleError> {
        let timestamp = time.into().to_epoch_millis()?;
        let scheduled = ScheduledMessage {
            id: ScheduledMessage::new_id(),
            message: message.into(),
            timestamp,
        };

        self.store
            .insert(&scheduled.id, &scheduled.to_fields(), scheduled.timestamp)
            .await?;

        self.metrics.record_scheduled();
        debug!(msg_id = %scheduled.id, timestamp, "message scheduled");
        Ok(scheduled.id)
    }

    /// All messages whose delivery time lies in `[0, now_ms]`, ascending by
    /// delivery time.
    ///
    /// The index and the records are not coupled transactionally with
    /// concurrent removals: an index entry whose record is missing or
    /// incomplete is skipped, not reported.
    #[instrument(skip(self))]
    pub async fn fetch_due(&self, now_ms: i64) -> StoreResult<Vec<ScheduledMessage>> {
        let ids = self.store.range_by_score(MIN_DUE_SCORE, now_ms).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let records = self.store.get_records(&ids).await?;
        let mut due = Vec::with_capacity(ids.len());
        let mut dropped = 0u64;
        for (id, record) in ids.iter().zip(records) {
            match record.and_then(|fields| ScheduledMessage::from_fields(id, &fields)) {
                Some(message) => due.push(message),
                None => {
                    debug!(msg_id = %id, "skipping index entry with missing or incomplete record");
                    dropped += 1;
                }
            }
        }
        self.metrics.record_dropped(dropped);
        Ok(due)
    }

    /// Remove the record and index entry for `id`. Idempotent.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: &str) -> StoreResult<()> {
        self.store.remove(id).await
    }
}
