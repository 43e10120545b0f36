//! Event trait definition for type-safe consuming.

use serde::{de::DeserializeOwned, Serialize};

/// Trait for payload types delivered on a topic.
///
/// # Example
///
/// ```rust
/// use serde::{Serialize, Deserialize};
/// use herald_events::Event;
///
/// #[derive(Debug, Serialize, Deserialize)]
/// pub struct OrderPlaced {
///     pub order_id: String,
/// }
///
/// impl Event for OrderPlaced {
///     const TOPIC: &'static str = "orders-placed-events-topic";
///     const EVENT_TYPE: &'static str = "herald.order.placed";
///
///     fn subject_id(&self) -> String {
///         self.order_id.clone()
///     }
/// }
/// ```
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The topic events of this type are consumed from.
    const TOPIC: &'static str;

    /// Type name producers put in the type header.
    ///
    /// Convention: `herald.<entity>.<action>`
    const EVENT_TYPE: &'static str;

    /// Identifier of the entity this event is about, stored for audit.
    fn subject_id(&self) -> String;

    /// Short human-readable description for logs.
    fn summary(&self) -> Option<String> {
        None
    }
}
