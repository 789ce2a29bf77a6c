use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the number of the attempt a redelivered envelope is on.
/// Absent on first delivery; parsed as 1 when missing or unreadable.
pub const ATTEMPT_COUNT_HEADER: &str = "attempt-count";
/// Headers carrying the coordinates of the first consumption of an envelope.
/// Set when an envelope is re-enqueued so later attempts (and the dead-letter
/// topic) still know where the message originally came from.
pub const ORIGINAL_TOPIC_HEADER: &str = "original-topic";
pub const ORIGINAL_PARTITION_HEADER: &str = "original-partition";
pub const ORIGINAL_OFFSET_HEADER: &str = "original-offset";

/// The typed body of a delivery request: what we are asked to send, and to whom.
#[derive(Deserialize, Serialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct NotificationPayload {
    pub recipient: String,
    pub subject: String,
    pub body: String,
    #[serde(default)]
    pub priority: u8,
}

/// The unit of work that travels through the pipeline.
///
/// `id` identifies the logical message and never changes: every retry of the
/// same message carries the same `id` with a bumped `attempt-count` header.
/// `key` drives partition assignment, so envelopes sharing a key are consumed
/// in publish order.
#[derive(Deserialize, Serialize, Debug, PartialEq, Clone)]
pub struct Envelope {
    pub id: Uuid,
    pub key: String,
    pub payload: NotificationPayload,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Envelope {
    pub fn new(key: &str, payload: NotificationPayload) -> Self {
        Self {
            id: Uuid::now_v7(),
            key: key.to_owned(),
            payload,
            headers: HashMap::new(),
        }
    }

    /// The attempt this envelope is on, starting at 1 for first deliveries.
    pub fn attempt(&self) -> u32 {
        self.headers
            .get(ATTEMPT_COUNT_HEADER)
            .and_then(|value| value.parse::<u32>().ok())
            .unwrap_or(1)
    }

    /// Clone this envelope for redelivery, bumping the attempt counter.
    /// Identity and payload are preserved.
    pub fn for_retry(&self) -> Self {
        let mut retry = self.clone();
        retry
            .headers
            .insert(ATTEMPT_COUNT_HEADER.to_owned(), (self.attempt() + 1).to_string());
        retry
    }

    /// Record where this envelope was first consumed from. A no-op if origin
    /// headers are already present, so retries keep first-consumption
    /// coordinates.
    pub fn record_origin(&mut self, topic: &str, partition: i32, offset: i64) {
        if self.headers.contains_key(ORIGINAL_TOPIC_HEADER) {
            return;
        }
        self.headers
            .insert(ORIGINAL_TOPIC_HEADER.to_owned(), topic.to_owned());
        self.headers
            .insert(ORIGINAL_PARTITION_HEADER.to_owned(), partition.to_string());
        self.headers
            .insert(ORIGINAL_OFFSET_HEADER.to_owned(), offset.to_string());
    }

    /// The coordinates this envelope was first consumed from, if recorded.
    pub fn origin(&self) -> Option<(String, i32, i64)> {
        let topic = self.headers.get(ORIGINAL_TOPIC_HEADER)?;
        let partition = self
            .headers
            .get(ORIGINAL_PARTITION_HEADER)?
            .parse::<i32>()
            .ok()?;
        let offset = self
            .headers
            .get(ORIGINAL_OFFSET_HEADER)?
            .parse::<i64>()
            .ok()?;
        Some((topic.to_owned(), partition, offset))
    }
}
