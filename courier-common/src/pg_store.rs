use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::outcome::{OutcomeRecord, OutcomeStatus, OutcomeStore, PersistError};

/// An `OutcomeStore` backed by a PostgreSQL table.
///
/// Idempotency is enforced in the upsert itself: the update only applies when
/// the incoming attempt count is equal to or later than the stored one, so
/// out-of-order writes from racing partition workers cannot roll a terminal
/// status back.
pub struct PgOutcomeStore {
    table: String,
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct OutcomeRow {
    id: Uuid,
    status: String,
    attempt_count: i32,
    reason: Option<String>,
    updated_at: DateTime<Utc>,
}

impl OutcomeRow {
    fn into_record(self) -> Result<OutcomeRecord, PersistError> {
        Ok(OutcomeRecord {
            id: self.id,
            status: OutcomeStatus::from_str(&self.status)?,
            attempt_count: self.attempt_count.max(0) as u32,
            reason: self.reason,
            updated_at: self.updated_at,
        })
    }
}

impl PgOutcomeStore {
    /// Initialize a new PgOutcomeStore backed by a table in PostgreSQL.
    pub async fn new(table: &str, url: &str, max_connections: u32) -> Result<Self, PersistError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(|error| PersistError::ConnectionError { error })?;

        Ok(Self {
            table: table.to_owned(),
            pool,
        })
    }

}

#[async_trait]
impl OutcomeStore for PgOutcomeStore {
    async fn record(
        &self,
        id: Uuid,
        status: OutcomeStatus,
        attempt_count: u32,
        reason: Option<String>,
    ) -> Result<(), PersistError> {
        // TODO: Escaping. I think sqlx doesn't support identifiers.
        let base_query = format!(
            r#"
INSERT INTO {0}
    (id, status, attempt_count, reason, updated_at)
VALUES
    ($1, $2, $3, $4, NOW())
ON CONFLICT (id) DO UPDATE
SET
    status = EXCLUDED.status,
    attempt_count = EXCLUDED.attempt_count,
    reason = EXCLUDED.reason,
    updated_at = NOW()
WHERE
    {0}.attempt_count <= EXCLUDED.attempt_count
            "#,
            &self.table
        );

        sqlx::query(&base_query)
            .bind(id)
            .bind(status.as_str())
            .bind(attempt_count as i32)
            .bind(&reason)
            .execute(&self.pool)
            .await
            .map_err(|error| PersistError::QueryError {
                command: "INSERT".to_owned(),
                error,
            })?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<OutcomeRecord>, PersistError> {
        let base_query = format!(
            r#"
SELECT
    id, status, attempt_count, reason, updated_at
FROM
    {0}
WHERE
    id = $1
            "#,
            &self.table
        );

        let row: Option<OutcomeRow> = sqlx::query_as(&base_query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| PersistError::QueryError {
                command: "SELECT".to_owned(),
                error,
            })?;

        row.map(OutcomeRow::into_record).transpose()
    }
}
