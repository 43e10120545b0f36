//! # herald-db
//!
//! Persistence for the herald notification consumer.
//!
//! Owns the `processed_events` schema and the [`ProcessedEvent`] model. The
//! table carries a unique index on `message_id`; that index, not any
//! application-level check, is what guarantees a message id is recorded at
//! most once across concurrent consumers.

pub mod error;
pub mod migrations;
pub mod models;

pub use error::DbError;
pub use migrations::run_migrations;
pub use models::{CreateProcessedEvent, ProcessedEvent};
