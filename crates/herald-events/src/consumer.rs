//! Kafka consumer driving the delivery pipeline.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

use crate::config::KafkaConfig;
use crate::dead_letter::DeadLetterPublisher;
use crate::dispatcher::NotificationDispatcher;
use crate::error::EventError;
use crate::event::Event;
use crate::idempotence::IdempotencyStore;
use crate::message::InboundMessage;
use crate::offsets::OffsetTracker;
use crate::pipeline::DeliveryPipeline;

/// Consumes one topic and hands each message to a [`DeliveryPipeline`].
///
/// Up to `KafkaConfig::concurrency` messages are processed at once, each in
/// its own task. Offsets are committed manually once a message reached a
/// terminal state, never past a message that is still in flight. A message
/// that cannot even be dead-lettered pauses its partition until restart.
pub struct NotificationConsumer<E, S, D, P> {
    consumer: Arc<StreamConsumer>,
    pipeline: Arc<DeliveryPipeline<E, S, D, P>>,
    tracker: Arc<Mutex<OffsetTracker>>,
    permits: Arc<Semaphore>,
    concurrency: usize,
    topic: String,
    consumer_group: String,
}

impl<E, S, D, P> NotificationConsumer<E, S, D, P>
where
    E: Event,
    S: IdempotencyStore,
    D: NotificationDispatcher<E>,
    P: DeadLetterPublisher,
{
    /// Create a consumer subscribed to `topic`.
    pub fn new(
        config: &KafkaConfig,
        topic: impl Into<String>,
        pipeline: Arc<DeliveryPipeline<E, S, D, P>>,
    ) -> Result<Self, EventError> {
        let topic = topic.into();

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", &config.client_id)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .create()
            .map_err(|e| EventError::ConnectionFailed {
                broker: config.bootstrap_servers.clone(),
                cause: e.to_string(),
            })?;

        consumer
            .subscribe(&[topic.as_str()])
            .map_err(|e| EventError::ConsumeFailed {
                topic: topic.clone(),
                cause: e.to_string(),
            })?;

        info!(
            topic = %topic,
            consumer_group = %config.consumer_group,
            bootstrap_servers = %config.bootstrap_servers,
            concurrency = config.concurrency,
            "Notification consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            pipeline,
            tracker: Arc::new(Mutex::new(OffsetTracker::new())),
            permits: Arc::new(Semaphore::new(config.concurrency)),
            concurrency: config.concurrency,
            topic,
            consumer_group: config.consumer_group.clone(),
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn consumer_group(&self) -> &str {
        &self.consumer_group
    }

    /// Consume until `shutdown` resolves, then wait for in-flight messages.
    #[instrument(skip(self, shutdown), fields(topic = %self.topic, consumer_group = %self.consumer_group))]
    pub async fn run<F>(self, shutdown: F) -> Result<(), EventError>
    where
        F: Future<Output = ()> + Send,
    {
        info!("Starting consumer loop");
        tokio::pin!(shutdown);

        loop {
            let permit = tokio::select! {
                biased;
                () = &mut shutdown => break,
                permit = Arc::clone(&self.permits).acquire_owned() => {
                    permit.map_err(|e| EventError::ConsumeFailed {
                        topic: self.topic.clone(),
                        cause: e.to_string(),
                    })?
                }
            };

            let received = tokio::select! {
                biased;
                () = &mut shutdown => break,
                received = self.consumer.recv() => received,
            };

            let message = match received {
                Ok(message) => to_inbound(&message),
                Err(e) => {
                    error!(error = %e, "Error receiving message");
                    continue;
                }
            };

            debug!(
                partition = message.partition,
                offset = message.offset,
                "Received message"
            );

            // Fetched before the pause took effect; redelivered after restart.
            if !lock(&self.tracker).begin(&message.topic, message.partition, message.offset) {
                debug!(
                    partition = message.partition,
                    offset = message.offset,
                    "Partition stalled, message left for redelivery"
                );
                continue;
            }

            let pipeline = Arc::clone(&self.pipeline);
            let tracker = Arc::clone(&self.tracker);
            let consumer = Arc::clone(&self.consumer);

            tokio::spawn(async move {
                let _permit = permit;

                match pipeline.deliver(&message).await {
                    Ok(disposition) => {
                        debug!(
                            partition = message.partition,
                            offset = message.offset,
                            disposition = ?disposition,
                            "Message settled"
                        );
                        let next = lock(&tracker).complete(
                            &message.topic,
                            message.partition,
                            message.offset,
                        );
                        if let Some(next) = next {
                            if let Err(e) =
                                commit_offset(&consumer, &message.topic, message.partition, next)
                            {
                                error!(error = %e, "Failed to commit offset");
                            }
                        }
                    }
                    Err(e) => {
                        error!(
                            partition = message.partition,
                            offset = message.offset,
                            error = %e,
                            "Message could not be dead-lettered, pausing partition"
                        );
                        lock(&tracker).fail(&message.topic, message.partition, message.offset);
                        if let Err(e) = pause_partition(&consumer, &message.topic, message.partition)
                        {
                            error!(error = %e, "Failed to pause partition");
                        }
                    }
                }
            });
        }

        info!("Shutdown requested, waiting for in-flight messages");
        let all = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        if let Ok(drained) = self.permits.acquire_many(all).await {
            drained.forget();
        }

        info!("Consumer loop ended");
        Ok(())
    }
}

/// Copy a broker message into the broker-neutral model.
fn to_inbound(message: &BorrowedMessage<'_>) -> InboundMessage {
    let mut inbound = InboundMessage::new(
        message.topic(),
        message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
    )
    .at(message.partition(), message.offset());

    if let Some(key) = message.key() {
        inbound = inbound.with_key(String::from_utf8_lossy(key));
    }

    if let Some(headers) = message.headers() {
        for header in headers.iter() {
            inbound = inbound.with_header(header.key, header.value.unwrap_or_default());
        }
    }

    inbound
}

/// Commit `next` (the offset of the next message to read) for a partition.
fn commit_offset(
    consumer: &StreamConsumer,
    topic: &str,
    partition: i32,
    next: i64,
) -> Result<(), EventError> {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition_offset(topic, partition, Offset::Offset(next))
        .map_err(|e| EventError::ConsumeFailed {
            topic: topic.to_string(),
            cause: e.to_string(),
        })?;

    consumer
        .commit(&tpl, CommitMode::Async)
        .map_err(|e| EventError::ConsumeFailed {
            topic: topic.to_string(),
            cause: e.to_string(),
        })?;

    debug!(topic = %topic, partition, offset = next, "Offset committed");
    Ok(())
}

/// Stop fetching a partition whose offset can no longer advance.
fn pause_partition(consumer: &StreamConsumer, topic: &str, partition: i32) -> Result<(), EventError> {
    let mut tpl = TopicPartitionList::new();
    tpl.add_partition(topic, partition);

    consumer.pause(&tpl).map_err(|e| EventError::ConsumeFailed {
        topic: topic.to_string(),
        cause: e.to_string(),
    })?;

    info!(topic = %topic, partition, "Partition paused");
    Ok(())
}

fn lock(tracker: &Mutex<OffsetTracker>) -> MutexGuard<'_, OffsetTracker> {
    tracker.lock().unwrap_or_else(PoisonError::into_inner)
}
