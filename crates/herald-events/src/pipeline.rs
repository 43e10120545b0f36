//! Broker-facing delivery loop.
//!
//! [`DeliveryPipeline::deliver`] takes one message from the broker and does
//! not return until that message reached a terminal state: processed,
//! skipped as a duplicate, or published to the dead-letter topic. Retryable
//! failures are redelivered to the handler in place after the policy's
//! backoff. A failed dead-letter publish is retried on the same backoff, up
//! to the same bound.

use std::sync::Arc;

use tracing::instrument;

use crate::classify::{classify, FailureKind};
use crate::config::PipelineConfig;
use crate::dead_letter::{DeadLetterPublisher, DeadLetterRecord};
use crate::dispatcher::NotificationDispatcher;
use crate::error::EventError;
use crate::event::Event;
use crate::handler::{Ack, EventHandler};
use crate::idempotence::IdempotencyStore;
use crate::message::InboundMessage;
use crate::observer::{PipelineEvent, PipelineObserver};
use crate::policy::{Decision, RetryPolicy};

/// Terminal state of a delivered message. Every variant means the offset
/// can be committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Processed,
    Duplicate,
    DeadLettered {
        topic: String,
        attempts: u32,
        kind: FailureKind,
        reason: String,
    },
}

impl Disposition {
    #[must_use]
    pub fn is_dead_lettered(&self) -> bool {
        matches!(self, Disposition::DeadLettered { .. })
    }
}

/// Handler plus retry policy plus dead-letter publisher.
pub struct DeliveryPipeline<E, S, D, P> {
    handler: EventHandler<E, S, D>,
    publisher: Arc<P>,
    policy: RetryPolicy,
    dead_letter_topic: String,
}

impl<E, S, D, P> DeliveryPipeline<E, S, D, P>
where
    E: Event,
    S: IdempotencyStore,
    D: NotificationDispatcher<E>,
    P: DeadLetterPublisher,
{
    pub fn new(
        handler: EventHandler<E, S, D>,
        publisher: Arc<P>,
        policy: RetryPolicy,
        dead_letter_topic: impl Into<String>,
    ) -> Self {
        Self {
            handler,
            publisher,
            policy,
            dead_letter_topic: dead_letter_topic.into(),
        }
    }

    /// Wire a pipeline from its collaborators and configuration.
    pub fn from_config(
        store: Arc<S>,
        dispatcher: Arc<D>,
        publisher: Arc<P>,
        observer: Arc<dyn PipelineObserver>,
        config: &PipelineConfig,
    ) -> Self {
        let handler = EventHandler::new(store, dispatcher)
            .with_observer(observer)
            .with_dispatch_timeout(config.dispatch_timeout)
            .with_trusted_types(config.trusted_types.clone());

        Self::new(
            handler,
            publisher,
            RetryPolicy::new(config.retry_backoff, config.retry_max_attempts),
            config.dead_letter_topic(),
        )
    }

    pub fn handler(&self) -> &EventHandler<E, S, D> {
        &self.handler
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn dead_letter_topic(&self) -> &str {
        &self.dead_letter_topic
    }

    /// Drive `message` to a terminal state.
    ///
    /// # Errors
    ///
    /// Returns an error only when every dead-letter publish attempt failed.
    /// The message has then reached no terminal state and its offset must
    /// not be committed.
    #[instrument(skip(self, message), fields(topic = %message.topic, partition = message.partition, offset = message.offset))]
    pub async fn deliver(&self, message: &InboundMessage) -> Result<Disposition, EventError> {
        let key = message
            .message_id()
            .map_or_else(|_| message.coordinates(), str::to_string);
        let observer = self.handler.observer();
        let mut failures = 0_u32;

        loop {
            let err = match self.handler.handle(message).await {
                Ok(ack) => {
                    return Ok(match ack {
                        Ack::Processed(_) => Disposition::Processed,
                        Ack::Duplicate(_) => Disposition::Duplicate,
                    });
                }
                Err(err) => err,
            };

            let kind = classify(&err);
            observer.observe(PipelineEvent::Failed {
                key: key.clone(),
                kind,
                reason: err.to_string(),
            });

            failures = failures.saturating_add(1);
            match self.policy.decide(failures, kind) {
                Decision::Retry { attempt, backoff } => {
                    observer.observe(PipelineEvent::RetryScheduled {
                        key: key.clone(),
                        attempt,
                        backoff,
                    });
                    tokio::time::sleep(backoff).await;
                }
                Decision::DeadLetter { attempts } => {
                    let record = DeadLetterRecord::new(message, &err, kind, attempts);
                    self.publish_dead_letter(&key, &record).await?;

                    observer.observe(PipelineEvent::DeadLettered {
                        key,
                        topic: self.dead_letter_topic.clone(),
                        attempts,
                        kind,
                    });

                    return Ok(Disposition::DeadLettered {
                        topic: self.dead_letter_topic.clone(),
                        attempts,
                        kind,
                        reason: record.reason,
                    });
                }
            }
        }
    }

    async fn publish_dead_letter(
        &self,
        key: &str,
        record: &DeadLetterRecord,
    ) -> Result<(), EventError> {
        let mut attempt = 0_u32;
        loop {
            match self.publisher.publish(&self.dead_letter_topic, record).await {
                Ok(()) => return Ok(()),
                Err(err) if attempt < self.policy.max_attempts() => {
                    attempt += 1;
                    self.handler
                        .observer()
                        .observe(PipelineEvent::DeadLetterPublishFailed {
                            key: key.to_string(),
                            topic: self.dead_letter_topic.clone(),
                            attempt,
                            reason: err.to_string(),
                        });
                    tokio::time::sleep(self.policy.backoff()).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
