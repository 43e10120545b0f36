//! `ProcessedEvent` model for notification idempotence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgExecutor};

use crate::error::DbError;

/// Record of a message whose notification was dispatched successfully.
///
/// Rows are only ever inserted. Nothing in this crate updates or deletes them.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Storage-assigned surrogate key.
    pub id: i64,
    /// Producer-supplied message id, unique across the table.
    pub message_id: String,
    /// Entity the event was about. Kept for audit only.
    pub subject_id: String,
    /// When the record was written.
    pub processed_at: DateTime<Utc>,
}

/// Data needed to create a new processed event record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateProcessedEvent {
    pub message_id: String,
    pub subject_id: String,
}

impl ProcessedEvent {
    /// Look up the record for a message id.
    pub async fn find_by_message_id<'e, E>(
        executor: E,
        message_id: &str,
    ) -> Result<Option<Self>, DbError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(
            r"
            SELECT id, message_id, subject_id, processed_at
            FROM processed_events
            WHERE message_id = $1
            ",
        )
        .bind(message_id)
        .fetch_optional(executor)
        .await?;

        Ok(row)
    }

    /// Insert a record.
    ///
    /// Deliberately a plain INSERT: a second row for the same message id
    /// fails with [`DbError::UniqueViolation`] instead of being absorbed.
    pub async fn insert<'e, E>(executor: E, data: CreateProcessedEvent) -> Result<Self, DbError>
    where
        E: PgExecutor<'e>,
    {
        let row = sqlx::query_as::<_, Self>(
            r"
            INSERT INTO processed_events (message_id, subject_id)
            VALUES ($1, $2)
            RETURNING id, message_id, subject_id, processed_at
            ",
        )
        .bind(&data.message_id)
        .bind(&data.subject_id)
        .fetch_one(executor)
        .await?;

        Ok(row)
    }
}
