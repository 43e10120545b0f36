//! Failure classification.
//!
//! Every failure a delivery attempt can produce maps to exactly one
//! [`FailureKind`]. Anything unrecognised is `NotRetryable`, so an unknown
//! condition can never keep a message cycling forever.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, HandlerError, StoreError};

/// Whether reprocessing the identical message might succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Transient: connectivity, timeouts, temporary unavailability.
    Retryable,
    /// Permanent: bad input, remote rejection, lost idempotency race.
    NotRetryable,
}

impl FailureKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Retryable => "retryable",
            Self::NotRetryable => "not_retryable",
        }
    }

    #[must_use]
    pub fn is_retryable(&self) -> bool {
        *self == Self::Retryable
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a handler failure.
#[must_use]
pub fn classify(err: &HandlerError) -> FailureKind {
    match err {
        HandlerError::MissingMessageId
        | HandlerError::MalformedPayload { .. }
        | HandlerError::UntrustedType { .. } => FailureKind::NotRetryable,
        HandlerError::Dispatch(e) => classify_dispatch(e),
        HandlerError::Store(e) => classify_store(e),
    }
}

fn classify_dispatch(err: &DispatchError) -> FailureKind {
    if err.is_transient() {
        FailureKind::Retryable
    } else {
        FailureKind::NotRetryable
    }
}

fn classify_store(err: &StoreError) -> FailureKind {
    // DuplicateKey lands here too: another delivery already recorded it.
    if err.is_transient() {
        FailureKind::Retryable
    } else {
        FailureKind::NotRetryable
    }
}

/// Classify an arbitrary error by walking its source chain.
///
/// The first link that is one of this crate's failure types decides. Errors
/// with no such link are `NotRetryable`.
#[must_use]
pub fn classify_dyn(err: &(dyn std::error::Error + 'static)) -> FailureKind {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(handler) = e.downcast_ref::<HandlerError>() {
            return classify(handler);
        }
        if let Some(dispatch) = e.downcast_ref::<DispatchError>() {
            return classify_dispatch(dispatch);
        }
        if let Some(store) = e.downcast_ref::<StoreError>() {
            return classify_store(store);
        }
        current = e.source();
    }
    FailureKind::NotRetryable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_input_is_not_retryable() {
        assert_eq!(
            classify(&HandlerError::MissingMessageId),
            FailureKind::NotRetryable
        );
        assert_eq!(
            classify(&HandlerError::MalformedPayload {
                event_type: "herald.product.created".to_string(),
                reason: "EOF".to_string(),
            }),
            FailureKind::NotRetryable
        );
        assert_eq!(
            classify(&HandlerError::UntrustedType {
                type_id: "x".to_string()
            }),
            FailureKind::NotRetryable
        );
    }

    #[test]
    fn test_dispatch_failures() {
        let cases = [
            (DispatchError::Connect("refused".to_string()), FailureKind::Retryable),
            (DispatchError::Timeout, FailureKind::Retryable),
            (
                DispatchError::Rejected {
                    status: 503,
                    body: String::new(),
                },
                FailureKind::NotRetryable,
            ),
            (
                DispatchError::Rejected {
                    status: 400,
                    body: String::new(),
                },
                FailureKind::NotRetryable,
            ),
            (DispatchError::Other("boom".to_string()), FailureKind::NotRetryable),
        ];

        for (err, expected) in cases {
            assert_eq!(classify(&err.clone().into()), expected, "{err:?}");
        }
    }

    #[test]
    fn test_store_failures() {
        let duplicate = StoreError::DuplicateKey {
            message_id: "m1".to_string(),
        };
        assert_eq!(classify(&duplicate.into()), FailureKind::NotRetryable);
        assert_eq!(
            classify(&StoreError::Unavailable("pool timed out".to_string()).into()),
            FailureKind::Retryable
        );
        assert_eq!(
            classify(&StoreError::Query("syntax".to_string()).into()),
            FailureKind::NotRetryable
        );
    }

    #[derive(Debug, thiserror::Error)]
    #[error("wrapped")]
    struct Wrapper(#[source] DispatchError);

    #[derive(Debug, thiserror::Error)]
    #[error("unknown")]
    struct Unknown;

    #[test]
    fn test_classify_dyn_walks_source_chain() {
        let wrapped = Wrapper(DispatchError::Timeout);
        assert_eq!(classify_dyn(&wrapped), FailureKind::Retryable);
    }

    #[test]
    fn test_classify_dyn_fails_closed() {
        assert_eq!(classify_dyn(&Unknown), FailureKind::NotRetryable);
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "timed out");
        assert_eq!(classify_dyn(&io), FailureKind::NotRetryable);
    }

    #[test]
    fn test_failure_kind_serde() {
        assert_eq!(
            serde_json::to_string(&FailureKind::NotRetryable).unwrap(),
            "\"not_retryable\""
        );
        assert_eq!(FailureKind::Retryable.to_string(), "retryable");
    }
}
