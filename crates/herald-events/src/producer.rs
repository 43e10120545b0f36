//! Kafka dead-letter producer.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::message::{Header, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use tracing::{debug, info, instrument};

use crate::config::KafkaConfig;
use crate::dead_letter::{DeadLetterPublisher, DeadLetterRecord};
use crate::error::EventError;
use crate::health::HealthStatus;

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const METADATA_TIMEOUT: Duration = Duration::from_secs(5);

/// Publishes failed messages to their dead-letter topic.
///
/// The original key and payload are written unchanged; the failure is
/// described in headers appended after the original ones.
pub struct KafkaDeadLetterPublisher {
    producer: FutureProducer,
    bootstrap_servers: String,
    dead_letter_topic: String,
}

impl KafkaDeadLetterPublisher {
    /// Create a producer. `dead_letter_topic` is only used by
    /// [`health_check`](Self::health_check); `publish` takes its topic per call.
    pub fn new(config: &KafkaConfig, dead_letter_topic: impl Into<String>) -> Result<Self, EventError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", format!("{}-dlt", config.client_id))
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(|e| EventError::ConnectionFailed {
                broker: config.bootstrap_servers.clone(),
                cause: e.to_string(),
            })?;

        let dead_letter_topic = dead_letter_topic.into();

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            dead_letter_topic = %dead_letter_topic,
            "Dead-letter producer created"
        );

        Ok(Self {
            producer,
            bootstrap_servers: config.bootstrap_servers.clone(),
            dead_letter_topic,
        })
    }

    /// Check broker reachability and whether the dead-letter topic exists.
    pub async fn health_check(&self) -> Result<HealthStatus, EventError> {
        let metadata = self
            .producer
            .client()
            .fetch_metadata(Some(&self.dead_letter_topic), METADATA_TIMEOUT)
            .map_err(|e| EventError::ConnectionFailed {
                broker: self.bootstrap_servers.clone(),
                cause: e.to_string(),
            })?;

        let dead_letter_topic_exists = metadata
            .topics()
            .iter()
            .any(|t| t.name() == self.dead_letter_topic && t.error().is_none());

        Ok(HealthStatus {
            brokers: metadata.brokers().len(),
            dead_letter_topic: self.dead_letter_topic.clone(),
            dead_letter_topic_exists,
        })
    }
}

#[async_trait]
impl DeadLetterPublisher for KafkaDeadLetterPublisher {
    #[instrument(skip(self, record), fields(
        dead_letter_topic = %topic,
        original_topic = %record.original.topic,
        original_offset = record.original.offset
    ))]
    async fn publish(&self, topic: &str, record: &DeadLetterRecord) -> Result<(), EventError> {
        let headers = record
            .headers()
            .iter()
            .fold(OwnedHeaders::new(), |acc, (key, value)| {
                acc.insert(Header {
                    key: key.as_str(),
                    value: Some(value.as_slice()),
                })
            });

        let mut kafka_record = FutureRecord::<str, Vec<u8>>::to(topic)
            .payload(&record.original.payload)
            .headers(headers);
        if let Some(key) = record.original.key.as_deref() {
            kafka_record = kafka_record.key(key);
        }

        let (partition, offset) = self
            .producer
            .send(kafka_record, SEND_TIMEOUT)
            .await
            .map_err(|(err, _)| EventError::PublishFailed {
                topic: topic.to_string(),
                cause: err.to_string(),
            })?;

        debug!(partition, offset, "Dead-letter record published");

        Ok(())
    }
}
