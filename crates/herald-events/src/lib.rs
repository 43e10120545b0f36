//! # herald-events
//!
//! Idempotent consumer pipeline for herald notifications.
//!
//! Every delivered message runs through the same unit of work: look its
//! `messageId` up in the idempotency store, dispatch the notification if it
//! is new, and record it, all inside one store transaction. Failures are
//! classified as retryable or not; retryable ones are redelivered after a
//! fixed backoff up to a bound, everything else goes to a dead-letter topic.
//!
//! ## Cargo Features
//!
//! - `kafka`: Enable the Kafka consumer and dead-letter producer (requires librdkafka)
//! - `integration`: Enable integration tests against PostgreSQL
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use herald_events::{
//!     DeliveryPipeline, HttpDispatcher, KafkaConfig, KafkaDeadLetterPublisher,
//!     NotificationConsumer, PgIdempotencyStore, PipelineConfig, TracingObserver,
//! };
//!
//! let kafka = KafkaConfig::from_env()?;
//! let config = PipelineConfig::from_env()?;
//! let pipeline = Arc::new(DeliveryPipeline::from_config(
//!     Arc::new(PgIdempotencyStore::new(pool)),
//!     Arc::new(HttpDispatcher::new(endpoint, config.dispatch_timeout)?),
//!     Arc::new(KafkaDeadLetterPublisher::new(&kafka, config.dead_letter_topic())?),
//!     Arc::new(TracingObserver),
//!     &config,
//! ));
//!
//! NotificationConsumer::new(&kafka, &config.topic, pipeline)?
//!     .run(shutdown)
//!     .await?;
//! ```

// Core modules (always available)
pub mod classify;
pub mod config;
pub mod dead_letter;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod events;
pub mod handler;
pub mod health;
pub mod idempotence;
pub mod message;
pub mod observer;
pub mod offsets;
pub mod pipeline;
pub mod policy;

// Kafka-dependent modules (require `kafka` feature)
#[cfg(feature = "kafka")]
pub mod consumer;
#[cfg(feature = "kafka")]
pub mod producer;

// Re-exports for convenience (core types)
pub use classify::{classify, classify_dyn, FailureKind};
pub use config::{KafkaConfig, KafkaConfigBuilder, PipelineConfig};
pub use dead_letter::{DeadLetterPublisher, DeadLetterRecord};
pub use dispatcher::{DispatchReceipt, HttpDispatcher, NotificationDispatcher};
pub use error::{DispatchError, EventError, HandlerError, StoreError};
pub use event::Event;
pub use events::ProductCreated;
pub use handler::{Ack, EventHandler};
pub use health::HealthStatus;
pub use idempotence::{
    IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore, StoreTransaction,
};
pub use message::{InboundMessage, TrustedTypes};
pub use observer::{PipelineEvent, PipelineObserver, TracingObserver};
pub use offsets::OffsetTracker;
pub use pipeline::{DeliveryPipeline, Disposition};
pub use policy::{Decision, RetryPolicy};

// Re-exports for Kafka types (when feature enabled)
#[cfg(feature = "kafka")]
pub use consumer::NotificationConsumer;
#[cfg(feature = "kafka")]
pub use producer::KafkaDeadLetterPublisher;
