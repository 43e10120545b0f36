//! Dead-letter records.
//!
//! A message that reaches a terminal failure is republished, unchanged, to
//! the dead-letter topic together with a description of why it failed. That
//! topic is the only place a permanently failed message can be recovered
//! from, so nothing of the original is dropped.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::classify::FailureKind;
use crate::error::EventError;
use crate::message::InboundMessage;

/// Header carrying the source topic.
pub const ORIGINAL_TOPIC_HEADER: &str = "dlt-original-topic";
/// Header carrying the source partition.
pub const ORIGINAL_PARTITION_HEADER: &str = "dlt-original-partition";
/// Header carrying the source offset.
pub const ORIGINAL_OFFSET_HEADER: &str = "dlt-original-offset";
/// Header carrying the failure description.
pub const EXCEPTION_MESSAGE_HEADER: &str = "dlt-exception-message";
/// Header carrying the failure classification.
pub const FAILURE_KIND_HEADER: &str = "dlt-failure-kind";
/// Header carrying the number of failed attempts.
pub const ATTEMPTS_HEADER: &str = "dlt-attempts";

/// A failed message plus its failure metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetterRecord {
    pub original: InboundMessage,
    /// `None` when the message had no usable id.
    pub message_id: Option<String>,
    pub reason: String,
    pub kind: FailureKind,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn new(
        original: &InboundMessage,
        error: &dyn std::error::Error,
        kind: FailureKind,
        attempts: u32,
    ) -> Self {
        Self {
            message_id: original.message_id().ok().map(str::to_string),
            original: original.clone(),
            reason: error.to_string(),
            kind,
            attempts,
            failed_at: Utc::now(),
        }
    }

    /// Original headers followed by the failure headers.
    pub fn headers(&self) -> Vec<(String, Vec<u8>)> {
        let mut headers = self.original.headers.clone();
        let failure = [
            (ORIGINAL_TOPIC_HEADER, self.original.topic.clone()),
            (ORIGINAL_PARTITION_HEADER, self.original.partition.to_string()),
            (ORIGINAL_OFFSET_HEADER, self.original.offset.to_string()),
            (EXCEPTION_MESSAGE_HEADER, self.reason.clone()),
            (FAILURE_KIND_HEADER, self.kind.as_str().to_string()),
            (ATTEMPTS_HEADER, self.attempts.to_string()),
        ];
        headers.extend(
            failure
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.into_bytes())),
        );
        headers
    }
}

/// Publishes dead-letter records.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync + 'static {
    /// Publish `record` to `topic`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::PublishFailed` if the record could not be
    /// written. The caller must then leave the source offset uncommitted.
    async fn publish(&self, topic: &str, record: &DeadLetterRecord) -> Result<(), EventError>;
}
