//! Error types for the herald-events crate.
//!
//! Two families live here. [`EventError`] covers configuration and broker
//! plumbing. [`HandlerError`] and the collaborator errors it wraps
//! ([`DispatchError`], [`StoreError`]) are what a single delivery attempt can
//! fail with; those are the inputs of [`crate::classify::classify`].

use herald_db::DbError;
use thiserror::Error;

/// Errors that can occur while configuring or running the consumer.
#[derive(Debug, Error)]
pub enum EventError {
    // Configuration errors (permanent, no retry)
    /// Required configuration variable is missing.
    #[error("Configuration missing: {var}")]
    ConfigMissing { var: String },

    /// Configuration value is invalid.
    #[error("Configuration invalid for {var}: {reason}")]
    ConfigInvalid { var: String, reason: String },

    // Broker errors
    /// Failed to connect to the broker.
    #[error("Connection to broker {broker} failed: {cause}")]
    ConnectionFailed { broker: String, cause: String },

    /// Failed to consume from topic.
    #[error("Failed to consume from topic {topic}: {cause}")]
    ConsumeFailed { topic: String, cause: String },

    /// Failed to publish to a topic (dead-letter publishing included).
    #[error("Failed to publish to topic {topic}: {cause}")]
    PublishFailed { topic: String, cause: String },

    /// Failed to build the dispatcher's HTTP client.
    #[error("Dispatcher setup failed: {0}")]
    DispatcherSetup(String),
}

impl EventError {
    /// Returns true if this is a configuration error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EventError::ConfigMissing { .. } | EventError::ConfigInvalid { .. }
        )
    }
}

/// Failure reported by a notification dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The dispatch target could not be reached.
    #[error("Dispatch target unreachable: {0}")]
    Connect(String),

    /// The dispatch did not complete within its time bound.
    #[error("Dispatch timed out")]
    Timeout,

    /// The dispatch target answered but refused the notification.
    #[error("Dispatch rejected with status {status}")]
    Rejected { status: u16, body: String },

    /// Anything else the dispatcher could not make sense of.
    #[error("Dispatch failed: {0}")]
    Other(String),
}

impl DispatchError {
    /// Connectivity and timeouts are worth another try; a refusal is not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, DispatchError::Connect(_) | DispatchError::Timeout)
    }
}

/// Failure reported by the idempotency store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// A record for this message id already exists.
    ///
    /// Expected when two deliveries of the same message race; the loser sees
    /// this from `save`.
    #[error("Message {message_id} is already recorded")]
    DuplicateKey { message_id: String },

    /// The store could not be reached.
    #[error("Idempotency store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the operation for another reason.
    #[error("Idempotency store query failed: {0}")]
    Query(String),
}

impl StoreError {
    /// Translate a database error, attributing duplicates to `message_id`.
    #[must_use]
    pub fn from_db(err: DbError, message_id: &str) -> Self {
        match err {
            DbError::UniqueViolation { .. } => StoreError::DuplicateKey {
                message_id: message_id.to_string(),
            },
            err if err.is_connection_error() => StoreError::Unavailable(err.to_string()),
            err => StoreError::Query(err.to_string()),
        }
    }

    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// Everything a single delivery attempt can fail with.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The message carries no usable `messageId` header.
    #[error("Message has no messageId header")]
    MissingMessageId,

    /// The payload could not be decoded into the expected event.
    #[error("Malformed {event_type} payload: {reason}")]
    MalformedPayload { event_type: String, reason: String },

    /// The payload declares a type outside the trusted set.
    #[error("Payload type {type_id} is not trusted")]
    UntrustedType { type_id: String },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
