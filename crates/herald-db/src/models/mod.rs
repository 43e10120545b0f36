//! Database models.

pub mod processed_event;

pub use processed_event::{CreateProcessedEvent, ProcessedEvent};
