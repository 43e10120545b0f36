//! Structured pipeline events.
//!
//! The handler and the delivery pipeline report what they do through an
//! injected [`PipelineObserver`] instead of logging directly. The default
//! [`TracingObserver`] forwards every event to `tracing`; tests swap in a
//! recorder and assert on the sequence.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::classify::FailureKind;

/// Something that happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    /// A delivery attempt started.
    Received {
        message_id: String,
        subject_id: String,
        summary: Option<String>,
    },
    /// The message id was already recorded; nothing was dispatched.
    DuplicateSkipped { message_id: String, record_id: i64 },
    /// The dispatcher accepted the notification.
    Dispatched { message_id: String, status: u16 },
    /// The processed-event record was committed.
    Recorded { message_id: String, record_id: i64 },
    /// Dispatch succeeded but another delivery recorded the id first.
    RecordRaceLost { message_id: String },
    /// An attempt failed and was classified.
    Failed {
        key: String,
        kind: FailureKind,
        reason: String,
    },
    /// The message will be redelivered after `backoff`.
    RetryScheduled {
        key: String,
        attempt: u32,
        backoff: Duration,
    },
    /// A dead-letter publish failed and will be tried again.
    DeadLetterPublishFailed {
        key: String,
        topic: String,
        attempt: u32,
        reason: String,
    },
    /// The message was published to the dead-letter topic.
    DeadLettered {
        key: String,
        topic: String,
        attempts: u32,
        kind: FailureKind,
    },
}

/// Sink for [`PipelineEvent`]s.
pub trait PipelineObserver: Send + Sync + 'static {
    fn observe(&self, event: PipelineEvent);
}

/// Observer that logs through `tracing` under the `herald_pipeline` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl PipelineObserver for TracingObserver {
    fn observe(&self, event: PipelineEvent) {
        match event {
            PipelineEvent::Received {
                message_id,
                subject_id,
                summary,
            } => info!(
                target: "herald_pipeline",
                message_id = %message_id,
                subject_id = %subject_id,
                summary = summary.as_deref().unwrap_or(""),
                "Event received"
            ),
            PipelineEvent::DuplicateSkipped {
                message_id,
                record_id,
            } => info!(
                target: "herald_pipeline",
                message_id = %message_id,
                record_id,
                "Event already processed, skipping"
            ),
            PipelineEvent::Dispatched { message_id, status } => debug!(
                target: "herald_pipeline",
                message_id = %message_id,
                status,
                "Notification dispatched"
            ),
            PipelineEvent::Recorded {
                message_id,
                record_id,
            } => info!(
                target: "herald_pipeline",
                message_id = %message_id,
                record_id,
                "Event processed"
            ),
            PipelineEvent::RecordRaceLost { message_id } => warn!(
                target: "herald_pipeline",
                message_id = %message_id,
                "Notification sent but a concurrent delivery recorded the event first"
            ),
            PipelineEvent::Failed { key, kind, reason } => warn!(
                target: "herald_pipeline",
                key = %key,
                kind = %kind,
                reason = %reason,
                "Delivery attempt failed"
            ),
            PipelineEvent::RetryScheduled {
                key,
                attempt,
                backoff,
            } => info!(
                target: "herald_pipeline",
                key = %key,
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                "Redelivery scheduled"
            ),
            PipelineEvent::DeadLetterPublishFailed {
                key,
                topic,
                attempt,
                reason,
            } => warn!(
                target: "herald_pipeline",
                key = %key,
                dead_letter_topic = %topic,
                attempt,
                reason = %reason,
                "Dead-letter publish failed, retrying"
            ),
            PipelineEvent::DeadLettered {
                key,
                topic,
                attempts,
                kind,
            } => error!(
                target: "herald_pipeline",
                key = %key,
                dead_letter_topic = %topic,
                attempts,
                kind = %kind,
                "Event dead-lettered"
            ),
        }
    }
}
