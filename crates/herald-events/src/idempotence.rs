//! Idempotency store.
//!
//! A durable map from message id to [`ProcessedEvent`]. Lookups and the
//! final insert of one delivery attempt share a single [`StoreTransaction`],
//! and the insert is guarded by a uniqueness constraint so that only one of
//! several racing deliveries can record a given message id.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use herald_db::DbError;
use sqlx::{PgPool, Postgres};
use tracing::{debug, instrument};

use crate::error::StoreError;

pub use herald_db::{CreateProcessedEvent, ProcessedEvent};

/// Source of per-delivery transactions.
#[async_trait]
pub trait IdempotencyStore: Send + Sync + 'static {
    type Transaction: StoreTransaction;

    /// Open the transaction one delivery attempt runs in.
    async fn begin(&self) -> Result<Self::Transaction, StoreError>;
}

/// One delivery attempt's view of the store.
///
/// Dropping a transaction without committing rolls it back.
#[async_trait]
pub trait StoreTransaction: Send {
    /// Look up a previously recorded message.
    async fn find_by_message_id(
        &mut self,
        message_id: &str,
    ) -> Result<Option<ProcessedEvent>, StoreError>;

    /// Record a message. Fails with [`StoreError::DuplicateKey`] if the id is
    /// already recorded or being recorded by another transaction.
    async fn save(&mut self, record: CreateProcessedEvent) -> Result<ProcessedEvent, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;

    async fn rollback(self) -> Result<(), StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

/// Store backed by the `processed_events` table.
#[derive(Debug, Clone)]
pub struct PgIdempotencyStore {
    pool: PgPool,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    type Transaction = PgStoreTransaction;

    async fn begin(&self) -> Result<PgStoreTransaction, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::from_db(DbError::from_sqlx(e), ""))?;
        Ok(PgStoreTransaction { tx })
    }
}

/// A database transaction for one delivery attempt.
pub struct PgStoreTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTransaction for PgStoreTransaction {
    #[instrument(skip(self))]
    async fn find_by_message_id(
        &mut self,
        message_id: &str,
    ) -> Result<Option<ProcessedEvent>, StoreError> {
        let found = ProcessedEvent::find_by_message_id(&mut *self.tx, message_id)
            .await
            .map_err(|e| StoreError::from_db(e, message_id))?;

        debug!(message_id = %message_id, already_processed = found.is_some(), "Idempotence check");

        Ok(found)
    }

    #[instrument(skip(self, record), fields(message_id = %record.message_id))]
    async fn save(&mut self, record: CreateProcessedEvent) -> Result<ProcessedEvent, StoreError> {
        let message_id = record.message_id.clone();
        let saved = ProcessedEvent::insert(&mut *self.tx, record)
            .await
            .map_err(|e| StoreError::from_db(e, &message_id))?;

        debug!(message_id = %message_id, record_id = saved.id, "Idempotence mark");

        Ok(saved)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| StoreError::from_db(DbError::from_sqlx(e), ""))
    }

    async fn rollback(self) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| StoreError::from_db(DbError::from_sqlx(e), ""))
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    records: HashMap<String, ProcessedEvent>,
    /// Ids saved by a transaction that has not finished yet.
    reserved: HashSet<String>,
    next_id: i64,
}

/// Process-local store with the same uniqueness contract as the table.
///
/// A `save` reserves the id until its transaction commits or rolls back; a
/// concurrent `save` of the same id fails as a duplicate rather than
/// blocking the way PostgreSQL would.
#[derive(Debug, Clone, Default)]
pub struct MemoryIdempotencyStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryIdempotencyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed record for `message_id`, if any.
    #[must_use]
    pub fn get(&self, message_id: &str) -> Option<ProcessedEvent> {
        lock(&self.state).records.get(message_id).cloned()
    }

    /// Number of committed records.
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.state).records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    type Transaction = MemoryTransaction;

    async fn begin(&self) -> Result<MemoryTransaction, StoreError> {
        Ok(MemoryTransaction {
            state: Arc::clone(&self.state),
            staged: None,
        })
    }
}

/// Transaction over a [`MemoryIdempotencyStore`].
#[derive(Debug)]
pub struct MemoryTransaction {
    state: Arc<Mutex<MemoryState>>,
    staged: Option<ProcessedEvent>,
}

impl MemoryTransaction {
    fn release(&mut self) {
        if let Some(staged) = self.staged.take() {
            lock(&self.state).reserved.remove(&staged.message_id);
        }
    }
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_by_message_id(
        &mut self,
        message_id: &str,
    ) -> Result<Option<ProcessedEvent>, StoreError> {
        if let Some(staged) = self.staged.as_ref().filter(|s| s.message_id == message_id) {
            return Ok(Some(staged.clone()));
        }
        Ok(lock(&self.state).records.get(message_id).cloned())
    }

    async fn save(&mut self, record: CreateProcessedEvent) -> Result<ProcessedEvent, StoreError> {
        if self.staged.is_some() {
            return Err(StoreError::Query(
                "transaction already holds a staged record".to_string(),
            ));
        }

        let saved = {
            let mut state = lock(&self.state);
            if state.records.contains_key(&record.message_id)
                || state.reserved.contains(&record.message_id)
            {
                return Err(StoreError::DuplicateKey {
                    message_id: record.message_id,
                });
            }
            state.next_id += 1;
            state.reserved.insert(record.message_id.clone());
            ProcessedEvent {
                id: state.next_id,
                message_id: record.message_id,
                subject_id: record.subject_id,
                processed_at: Utc::now(),
            }
        };

        self.staged = Some(saved.clone());
        Ok(saved)
    }

    async fn commit(mut self) -> Result<(), StoreError> {
        if let Some(staged) = self.staged.take() {
            let mut state = lock(&self.state);
            state.reserved.remove(&staged.message_id);
            state.records.insert(staged.message_id.clone(), staged);
        }
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), StoreError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}
