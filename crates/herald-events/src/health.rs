//! Broker health report.

use serde::{Deserialize, Serialize};

/// What the dead-letter producer can see of the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Brokers listed in the cluster metadata.
    pub brokers: usize,
    /// The dead-letter topic the producer writes to.
    pub dead_letter_topic: String,
    /// Whether that topic exists on the cluster.
    pub dead_letter_topic_exists: bool,
}

impl HealthStatus {
    /// At least one broker answered.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.brokers > 0
    }

    /// Healthy and the dead-letter topic is there to receive failures.
    ///
    /// Clusters with topic auto-creation report healthy but not ready until
    /// the first record is dead-lettered.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.is_healthy() && self.dead_letter_topic_exists
    }
}
