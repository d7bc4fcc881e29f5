use std::sync::Arc;

use crate::error::{ScheduleError, StoreResult};
use crate::message::ScheduledMessage;
use crate::repository::MessageRepository;
use crate::time::DeliveryTime;

/// Application-facing entry point shared by the HTTP handlers and the
/// dispatcher. Cheap to clone.
#[derive(Clone)]
pub struct DispatchService {
    repository: Arc<MessageRepository>,
}

impl DispatchService {
    pub fn new(repository: MessageRepository) -> Self {
        Self {
            repository: Arc::new(repository),
        }
    }

    /// Submit `message` for delivery at `time`.
    pub async fn schedule_message(
        &self,
        time: impl Into<DeliveryTime>,
        message: impl Into<String>,
    ) -> Result<String, ScheduleError> {
        self.repository.enqueue(time, message).await
    }

    pub async fn due_messages(&self, now_ms: i64) -> StoreResult<Vec<ScheduledMessage>> {
        self.repository.fetch_due(now_ms).await
    }

    pub async fn remove_message(&self, id: &str) -> StoreResult<()> {
        self.repository.remove(id).await
    }
}
