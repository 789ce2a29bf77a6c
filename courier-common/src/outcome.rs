use std::collections::HashMap;
use std::str::FromStr;
use std::time;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::dead_letter::FailureReason;

/// Enumeration of errors for operations against an `OutcomeStore`.
#[derive(Error, Debug)]
pub enum PersistError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError { command: String, error: sqlx::Error },
    #[error("{0} is not a valid OutcomeStatus")]
    ParseStatusError(String),
}

/// The result of a single consumption attempt. Created once per attempt and
/// never mutated; the store merges records by message id instead.
#[derive(Debug, PartialEq)]
pub enum Outcome {
    Delivered,
    Retrying { attempt: u32, next_delay: time::Duration },
    DeadLettered { reason: FailureReason },
}

/// Where a message currently stands, as persisted against its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Delivered,
    Retrying,
    DeadLettered,
}

impl OutcomeStatus {
    /// A terminal status ends the message's lifecycle; only a write carrying
    /// an equal or later attempt number may replace it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OutcomeStatus::Delivered | OutcomeStatus::DeadLettered)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeStatus::Delivered => "delivered",
            OutcomeStatus::Retrying => "retrying",
            OutcomeStatus::DeadLettered => "dead-lettered",
        }
    }
}

impl FromStr for OutcomeStatus {
    type Err = PersistError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "delivered" => Ok(OutcomeStatus::Delivered),
            "retrying" => Ok(OutcomeStatus::Retrying),
            "dead-lettered" => Ok(OutcomeStatus::DeadLettered),
            invalid => Err(PersistError::ParseStatusError(invalid.to_owned())),
        }
    }
}

/// The durable record answering "did this message ultimately succeed".
#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeRecord {
    pub id: Uuid,
    pub status: OutcomeStatus,
    pub attempt_count: u32,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Whether a new write may replace `existing`. Writes are last-write-wins
    /// by attempt number: a stale attempt never overwrites, which protects
    /// against out-of-order retry-completion writes racing a terminal one.
    pub fn replaces(&self, existing: &OutcomeRecord) -> bool {
        self.attempt_count >= existing.attempt_count
    }
}

/// Persistence seam for processing outcomes, keyed by message id. Safe for
/// concurrent use from independent partition workers; ids are unique per
/// message so no cross-worker coordination is needed.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Record the status a message reached on its `attempt_count`th attempt.
    /// Idempotent: repeated writes for the same id and attempt converge on the
    /// same record.
    async fn record(
        &self,
        id: Uuid,
        status: OutcomeStatus,
        attempt_count: u32,
        reason: Option<String>,
    ) -> Result<(), PersistError>;

    async fn get(&self, id: Uuid) -> Result<Option<OutcomeRecord>, PersistError>;
}

/// An in-process `OutcomeStore` for tests and single-node runs.
#[derive(Default)]
pub struct MemoryOutcomeStore {
    records: RwLock<HashMap<Uuid, OutcomeRecord>>,
}

impl MemoryOutcomeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutcomeStore for MemoryOutcomeStore {
    async fn record(
        &self,
        id: Uuid,
        status: OutcomeStatus,
        attempt_count: u32,
        reason: Option<String>,
    ) -> Result<(), PersistError> {
        let incoming = OutcomeRecord {
            id,
            status,
            attempt_count,
            reason,
            updated_at: Utc::now(),
        };

        let mut records = self.records.write().await;
        match records.get(&id) {
            Some(existing) if !incoming.replaces(existing) => Ok(()),
            _ => {
                records.insert(id, incoming);
                Ok(())
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutcomeRecord>, PersistError> {
        Ok(self.records.read().await.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_later_attempt_overwrites() {
        let store = MemoryOutcomeStore::new();
        let id = Uuid::now_v7();

        store
            .record(id, OutcomeStatus::Retrying, 1, Some("send timeout".to_owned()))
            .await
            .unwrap();
        store
            .record(id, OutcomeStatus::Delivered, 3, None)
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutcomeStatus::Delivered);
        assert_eq!(record.attempt_count, 3);
        assert_eq!(record.reason, None);
    }

    #[tokio::test]
    async fn test_stale_attempt_is_a_no_op_against_terminal_status() {
        let store = MemoryOutcomeStore::new();
        let id = Uuid::now_v7();

        store
            .record(
                id,
                OutcomeStatus::DeadLettered,
                6,
                Some("exhausted-retries".to_owned()),
            )
            .await
            .unwrap();
        // A retry-completion write from attempt 4 arrives late.
        store
            .record(id, OutcomeStatus::Retrying, 4, Some("send timeout".to_owned()))
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutcomeStatus::DeadLettered);
        assert_eq!(record.attempt_count, 6);
    }

    #[tokio::test]
    async fn test_equal_attempt_overwrites() {
        let store = MemoryOutcomeStore::new();
        let id = Uuid::now_v7();

        store
            .record(id, OutcomeStatus::Retrying, 2, Some("send timeout".to_owned()))
            .await
            .unwrap();
        store
            .record(id, OutcomeStatus::Delivered, 2, None)
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.status, OutcomeStatus::Delivered);
    }

    #[tokio::test]
    async fn test_get_unknown_id() {
        let store = MemoryOutcomeStore::new();
        assert_eq!(store.get(Uuid::now_v7()).await.unwrap(), None);
    }
}
