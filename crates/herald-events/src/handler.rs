//! Event handler: the idempotent check → dispatch → record unit.
//!
//! One call to [`EventHandler::handle`] is one delivery attempt. The whole
//! attempt runs inside a single [`StoreTransaction`] that is committed when
//! the attempt succeeds and rolled back on every failure path, so a failed
//! dispatch never leaves a record behind.
//!
//! The handler does not retry. It returns a [`HandlerError`] and leaves the
//! retry or dead-letter decision to [`crate::pipeline::DeliveryPipeline`].

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::dispatcher::NotificationDispatcher;
use crate::error::{DispatchError, HandlerError, StoreError};
use crate::event::Event;
use crate::idempotence::{
    CreateProcessedEvent, IdempotencyStore, ProcessedEvent, StoreTransaction,
};
use crate::message::{InboundMessage, TrustedTypes};
use crate::observer::{PipelineEvent, PipelineObserver, TracingObserver};

/// Default bound on a single dispatch call.
pub const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Successful outcome of a delivery attempt. Both variants acknowledge the
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    /// Dispatched and recorded by this attempt.
    Processed(ProcessedEvent),
    /// Recorded earlier; nothing was dispatched.
    Duplicate(ProcessedEvent),
}

impl Ack {
    /// The stored record backing this acknowledgment.
    #[must_use]
    pub fn record(&self) -> &ProcessedEvent {
        match self {
            Ack::Processed(record) | Ack::Duplicate(record) => record,
        }
    }

    #[must_use]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Ack::Duplicate(_))
    }
}

/// Processes messages carrying events of type `E`.
pub struct EventHandler<E, S, D> {
    store: Arc<S>,
    dispatcher: Arc<D>,
    observer: Arc<dyn PipelineObserver>,
    dispatch_timeout: Duration,
    trusted: TrustedTypes,
    _event: PhantomData<fn() -> E>,
}

impl<E, S, D> EventHandler<E, S, D>
where
    E: Event,
    S: IdempotencyStore,
    D: NotificationDispatcher<E>,
{
    /// Create a handler that logs through [`TracingObserver`].
    pub fn new(store: Arc<S>, dispatcher: Arc<D>) -> Self {
        Self {
            store,
            dispatcher,
            observer: Arc::new(TracingObserver),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            trusted: TrustedTypes::default(),
            _event: PhantomData,
        }
    }

    #[must_use]
    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    #[must_use]
    pub fn with_dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_trusted_types(mut self, trusted: TrustedTypes) -> Self {
        self.trusted = trusted;
        self
    }

    pub fn observer(&self) -> &Arc<dyn PipelineObserver> {
        &self.observer
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one delivery attempt for `message`.
    ///
    /// # Errors
    ///
    /// Malformed input fails before the store is touched. Dispatcher and
    /// store failures roll the transaction back and are returned as-is.
    pub async fn handle(&self, message: &InboundMessage) -> Result<Ack, HandlerError> {
        let message_id = message.message_id()?;
        let event: E = message.decode(&self.trusted)?;

        self.observer.observe(PipelineEvent::Received {
            message_id: message_id.to_string(),
            subject_id: event.subject_id(),
            summary: event.summary(),
        });

        let mut tx = self.store.begin().await?;

        match self.check_dispatch_record(&mut tx, message_id, &event).await {
            Ok(ack) => {
                tx.commit().await?;
                if let Ack::Processed(record) = &ack {
                    self.observer.observe(PipelineEvent::Recorded {
                        message_id: record.message_id.clone(),
                        record_id: record.id,
                    });
                }
                Ok(ack)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(
                        message_id = %message_id,
                        error = %rollback_err,
                        "Rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    async fn check_dispatch_record(
        &self,
        tx: &mut S::Transaction,
        message_id: &str,
        event: &E,
    ) -> Result<Ack, HandlerError> {
        if let Some(existing) = tx.find_by_message_id(message_id).await? {
            self.observer.observe(PipelineEvent::DuplicateSkipped {
                message_id: message_id.to_string(),
                record_id: existing.id,
            });
            return Ok(Ack::Duplicate(existing));
        }

        let receipt = tokio::time::timeout(
            self.dispatch_timeout,
            self.dispatcher.dispatch(message_id, event),
        )
        .await
        .map_err(|_| DispatchError::Timeout)??;

        self.observer.observe(PipelineEvent::Dispatched {
            message_id: message_id.to_string(),
            status: receipt.status,
        });

        let record = CreateProcessedEvent {
            message_id: message_id.to_string(),
            subject_id: event.subject_id(),
        };

        match tx.save(record).await {
            Ok(saved) => Ok(Ack::Processed(saved)),
            Err(err @ StoreError::DuplicateKey { .. }) => {
                self.observer.observe(PipelineEvent::RecordRaceLost {
                    message_id: message_id.to_string(),
                });
                Err(err.into())
            }
            Err(err) => Err(err.into()),
        }
    }
}
