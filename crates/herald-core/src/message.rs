use uuid::Uuid;

use crate::store::RecordFields;

/// Hash field holding the payload of a stored record.
pub const FIELD_MESSAGE: &str = "message";
/// Hash field holding the delivery timestamp (epoch millis) of a stored record.
pub const FIELD_TIMESTAMP: &str = "timestamp";

/// A message waiting for (or due for) delivery. Immutable once scheduled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledMessage {
    /// Opaque member name in the delivery index. Ids minted here are UUIDv7
    /// strings, but any id written to the same keyspace is accepted.
    pub id: String,
    pub message: String,
    /// Delivery time in epoch milliseconds.
    pub timestamp: i64,
}

impl ScheduledMessage {
    /// Generate a new UUIDv7 message ID.
    pub fn new_id() -> String {
        Uuid::now_v7().to_string()
    }

    /// Hash fields as written to the record store.
    pub fn to_fields(&self) -> RecordFields {
        RecordFields::from([
            (FIELD_MESSAGE.to_string(), self.message.clone()),
            (FIELD_TIMESTAMP.to_string(), self.timestamp.to_string()),
        ])
    }

    /// Rebuild a message from its record fields. Returns `None` when the
    /// record is incomplete: missing or empty payload, missing or
    /// unparseable timestamp.
    pub fn from_fields(id: &str, fields: &RecordFields) -> Option<Self> {
        let message = fields.get(FIELD_MESSAGE).filter(|m| !m.is_empty())?;
        let timestamp = fields.get(FIELD_TIMESTAMP)?.trim().parse::<i64>().ok()?;
        Some(Self {
            id: id.to_string(),
            message: message.clone(),
            timestamp,
        })
    }
}
