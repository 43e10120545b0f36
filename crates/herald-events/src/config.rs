//! Consumer and pipeline configuration.
//!
//! Both structs load from the environment through `from_env`, which reads
//! variables via [`from_lookup`](KafkaConfig::from_lookup) so tests can supply
//! a map instead of mutating the process environment.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::EventError;
use crate::event::Event;
use crate::events::ProductCreated;
use crate::handler::DEFAULT_DISPATCH_TIMEOUT;
use crate::message::TrustedTypes;
use crate::policy::{dead_letter_topic, DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS};

const DEFAULT_CLIENT_ID: &str = "herald-notifier";
const DEFAULT_CONSUMER_GROUP: &str = "product-created-events";
const DEFAULT_CONCURRENCY: usize = 3;

/// Kafka connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    /// Comma-separated list of broker addresses.
    pub bootstrap_servers: String,
    /// Client identifier.
    pub client_id: String,
    /// Consumer group the notifier joins.
    pub consumer_group: String,
    /// Messages processed at the same time.
    pub concurrency: usize,
}

impl KafkaConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `KAFKA_BOOTSTRAP_SERVERS`: Comma-separated broker list
    ///
    /// Optional:
    /// - `KAFKA_CLIENT_ID`: Client identifier (default: "herald-notifier")
    /// - `KAFKA_CONSUMER_GROUP`: Consumer group (default: "product-created-events")
    /// - `KAFKA_CONSUMER_CONCURRENCY`: Parallel messages (default: 3)
    pub fn from_env() -> Result<Self, EventError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EventError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bootstrap_servers = require(&lookup, "KAFKA_BOOTSTRAP_SERVERS")?;
        let client_id =
            lookup("KAFKA_CLIENT_ID").unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string());
        let consumer_group = lookup("KAFKA_CONSUMER_GROUP")
            .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string());
        let concurrency = parse_or(&lookup, "KAFKA_CONSUMER_CONCURRENCY", DEFAULT_CONCURRENCY)?;

        Self::builder()
            .bootstrap_servers(bootstrap_servers)
            .client_id(client_id)
            .consumer_group(consumer_group)
            .concurrency(concurrency)
            .build()
    }

    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> KafkaConfigBuilder {
        KafkaConfigBuilder::new()
    }
}

/// Builder for `KafkaConfig`.
#[derive(Debug, Default)]
pub struct KafkaConfigBuilder {
    bootstrap_servers: Option<String>,
    client_id: Option<String>,
    consumer_group: Option<String>,
    concurrency: Option<usize>,
}

impl KafkaConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set bootstrap servers.
    pub fn bootstrap_servers(mut self, servers: impl Into<String>) -> Self {
        self.bootstrap_servers = Some(servers.into());
        self
    }

    /// Set client ID.
    pub fn client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Set consumer group.
    pub fn consumer_group(mut self, group: impl Into<String>) -> Self {
        self.consumer_group = Some(group.into());
        self
    }

    /// Set the number of messages processed concurrently.
    #[must_use]
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<KafkaConfig, EventError> {
        let bootstrap_servers = self
            .bootstrap_servers
            .filter(|s| !s.trim().is_empty())
            .ok_or(EventError::ConfigMissing {
                var: "bootstrap_servers".to_string(),
            })?;

        let concurrency = self.concurrency.unwrap_or(DEFAULT_CONCURRENCY);
        if concurrency == 0 {
            return Err(EventError::ConfigInvalid {
                var: "concurrency".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(KafkaConfig {
            bootstrap_servers,
            client_id: self
                .client_id
                .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
            consumer_group: self
                .consumer_group
                .unwrap_or_else(|| DEFAULT_CONSUMER_GROUP.to_string()),
            concurrency,
        })
    }
}

/// Retry, dead-letter and dispatch settings of the delivery pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Source topic.
    pub topic: String,
    /// Fixed pause before each redelivery.
    pub retry_backoff: Duration,
    /// Redeliveries allowed before the next failure is dead-lettered.
    pub retry_max_attempts: u32,
    /// Explicit dead-letter topic. `None` means `<topic>-dlt`.
    pub dead_letter_topic: Option<String>,
    /// Payload types the consumer will deserialize.
    pub trusted_types: TrustedTypes,
    /// Bound on a single dispatch call.
    pub dispatch_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            topic: ProductCreated::TOPIC.to_string(),
            retry_backoff: DEFAULT_BACKOFF,
            retry_max_attempts: DEFAULT_MAX_ATTEMPTS,
            dead_letter_topic: None,
            trusted_types: TrustedTypes::default(),
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    ///
    /// All optional:
    /// - `HERALD_TOPIC`: Source topic (default: "products-created-events-topic")
    /// - `HERALD_RETRY_BACKOFF_MS`: Fixed backoff (default: 5000)
    /// - `HERALD_RETRY_MAX_ATTEMPTS`: Redeliveries before dead-lettering (default: 3)
    /// - `HERALD_DEAD_LETTER_TOPIC`: Dead-letter topic (default: `<topic>-dlt`)
    /// - `HERALD_TRUSTED_TYPES`: Comma-separated type patterns (default: "herald.*")
    /// - `HERALD_DISPATCH_TIMEOUT_MS`: Dispatch bound (default: 10000)
    pub fn from_env() -> Result<Self, EventError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, EventError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let trusted_types = match lookup("HERALD_TRUSTED_TYPES") {
            Some(raw) => {
                let trusted = raw
                    .parse::<TrustedTypes>()
                    .unwrap_or_else(|never| match never {});
                if trusted.patterns().is_empty() {
                    return Err(EventError::ConfigInvalid {
                        var: "HERALD_TRUSTED_TYPES".to_string(),
                        reason: "no type patterns given".to_string(),
                    });
                }
                trusted
            }
            None => defaults.trusted_types,
        };

        let dispatch_timeout = parse_or(
            &lookup,
            "HERALD_DISPATCH_TIMEOUT_MS",
            millis(defaults.dispatch_timeout),
        )?;
        if dispatch_timeout == 0 {
            return Err(EventError::ConfigInvalid {
                var: "HERALD_DISPATCH_TIMEOUT_MS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        let dispatch_timeout = Duration::from_millis(dispatch_timeout);

        Ok(Self {
            topic: lookup("HERALD_TOPIC")
                .filter(|t| !t.trim().is_empty())
                .unwrap_or(defaults.topic),
            retry_backoff: Duration::from_millis(parse_or(
                &lookup,
                "HERALD_RETRY_BACKOFF_MS",
                millis(defaults.retry_backoff),
            )?),
            retry_max_attempts: parse_or(
                &lookup,
                "HERALD_RETRY_MAX_ATTEMPTS",
                defaults.retry_max_attempts,
            )?,
            dead_letter_topic: lookup("HERALD_DEAD_LETTER_TOPIC").filter(|t| !t.trim().is_empty()),
            trusted_types,
            dispatch_timeout,
        })
    }

    /// Dead-letter topic in effect: the override, or `<topic>-dlt`.
    #[must_use]
    pub fn dead_letter_topic(&self) -> String {
        self.dead_letter_topic
            .clone()
            .unwrap_or_else(|| dead_letter_topic(&self.topic))
    }
}

fn require<F>(lookup: &F, var: &str) -> Result<String, EventError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(var)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| EventError::ConfigMissing {
            var: var.to_string(),
        })
}

fn parse_or<F, T>(lookup: &F, var: &str, default: T) -> Result<T, EventError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| EventError::ConfigInvalid {
            var: var.to_string(),
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
