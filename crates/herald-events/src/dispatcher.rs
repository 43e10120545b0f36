//! Notification dispatch.
//!
//! The dispatcher is the side effect the pipeline protects. It is called at
//! most once per delivery attempt, after the idempotency check and before the
//! record is written.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;

use crate::error::{DispatchError, EventError};
use crate::event::Event;

/// Header the HTTP dispatcher forwards the broker message id in.
pub const DISPATCH_MESSAGE_ID_HEADER: &str = "X-Message-Id";

/// Response bodies are truncated to this many characters.
const MAX_RECEIPT_BODY_CHARS: usize = 4096;

/// Acknowledgment returned by a successful dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub status: u16,
    pub body: String,
}

/// Sends the notification for an event.
#[async_trait]
pub trait NotificationDispatcher<E: Event>: Send + Sync + 'static {
    async fn dispatch(&self, message_id: &str, event: &E) -> Result<DispatchReceipt, DispatchError>;
}

/// Dispatches by POSTing the event as JSON to a fixed endpoint.
#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    client: Client,
    endpoint: String,
}

impl HttpDispatcher {
    /// Create a dispatcher with its own HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `EventError::DispatcherSetup` if the HTTP client cannot be built.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, EventError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("herald-notifier/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| EventError::DispatcherSetup(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self::with_client(client, endpoint))
    }

    /// Create a dispatcher around an existing client.
    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl<E: Event> NotificationDispatcher<E> for HttpDispatcher {
    async fn dispatch(&self, message_id: &str, event: &E) -> Result<DispatchReceipt, DispatchError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(DISPATCH_MESSAGE_ID_HEADER, message_id)
            .json(event)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                tracing::debug!(
                    target: "herald_dispatch",
                    message_id = %message_id,
                    status,
                    error = %e,
                    "Failed to read response body"
                );
                String::new()
            }
        };
        let body = body
            .chars()
            .take(MAX_RECEIPT_BODY_CHARS)
            .collect::<String>();

        if (200..300).contains(&status) {
            tracing::debug!(
                target: "herald_dispatch",
                message_id = %message_id,
                status,
                "Notification accepted by remote service"
            );
            Ok(DispatchReceipt { status, body })
        } else {
            tracing::warn!(
                target: "herald_dispatch",
                message_id = %message_id,
                status,
                "Notification rejected by remote service"
            );
            Err(DispatchError::Rejected { status, body })
        }
    }
}

fn map_request_error(err: reqwest::Error) -> DispatchError {
    if err.is_timeout() {
        DispatchError::Timeout
    } else if err.is_connect() {
        DispatchError::Connect(err.to_string())
    } else {
        DispatchError::Other(err.to_string())
    }
}
