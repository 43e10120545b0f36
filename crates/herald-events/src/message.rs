//! Broker-neutral inbound message.
//!
//! The Kafka adapter copies each record into an [`InboundMessage`] before it
//! reaches the pipeline, so everything downstream is testable without a
//! broker.

use std::fmt;
use std::str::FromStr;

use crate::error::HandlerError;
use crate::event::Event;

/// Header carrying the producer-assigned idempotency key.
pub const MESSAGE_ID_HEADER: &str = "messageId";

/// Header carrying the producer's declared payload type.
pub const TYPE_ID_HEADER: &str = "__TypeId__";

/// One delivered record with its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    /// Partition/routing key, if the producer set one.
    pub key: Option<String>,
    /// Headers in delivery order. A name may repeat.
    pub headers: Vec<(String, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl InboundMessage {
    /// Create a message at partition 0, offset 0 with no key or headers.
    pub fn new(topic: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            partition: 0,
            offset: 0,
            key: None,
            headers: Vec::new(),
            payload: payload.into(),
        }
    }

    /// Set the partition and offset.
    #[must_use]
    pub fn at(mut self, partition: i32, offset: i64) -> Self {
        self.partition = partition;
        self.offset = offset;
        self
    }

    /// Set the routing key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Last value of a header. Later values win, as with Kafka clients.
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .rev()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_slice())
    }

    /// The `messageId` header as text.
    ///
    /// The id is opaque and returned as sent. Absent, blank or non-UTF-8
    /// values are all malformed input; there is no fallback id.
    pub fn message_id(&self) -> Result<&str, HandlerError> {
        self.header(MESSAGE_ID_HEADER)
            .and_then(|raw| std::str::from_utf8(raw).ok())
            .filter(|id| !id.trim().is_empty())
            .ok_or(HandlerError::MissingMessageId)
    }

    /// Where this record sits in the log, e.g. `products-created-events-topic-2@41`.
    pub fn coordinates(&self) -> String {
        format!("{}-{}@{}", self.topic, self.partition, self.offset)
    }

    /// Decode the payload as `E`, honouring the trusted type list.
    ///
    /// A type header is optional. When present it must be trusted and must
    /// name `E`.
    pub fn decode<E: Event>(&self, trusted: &TrustedTypes) -> Result<E, HandlerError> {
        if let Some(raw) = self.header(TYPE_ID_HEADER) {
            let type_id = String::from_utf8_lossy(raw);
            if !trusted.allows(&type_id) {
                return Err(HandlerError::UntrustedType {
                    type_id: type_id.into_owned(),
                });
            }
            if type_id != E::EVENT_TYPE {
                return Err(HandlerError::MalformedPayload {
                    event_type: E::EVENT_TYPE.to_string(),
                    reason: format!("payload declares type {type_id}"),
                });
            }
        }

        serde_json::from_slice(&self.payload).map_err(|e| HandlerError::MalformedPayload {
            event_type: E::EVENT_TYPE.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Payload types the consumer is willing to deserialize.
///
/// Patterns are `*` (anything), an exact type name, or a namespace wildcard
/// such as `herald.*`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedTypes {
    patterns: Vec<String>,
}

impl TrustedTypes {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Trust every type.
    #[must_use]
    pub fn any() -> Self {
        Self::new(["*"])
    }

    #[must_use]
    pub fn allows(&self, type_id: &str) -> bool {
        self.patterns.iter().any(|pattern| {
            if pattern == "*" {
                return true;
            }
            match pattern.strip_suffix('*') {
                Some(prefix) => type_id.starts_with(prefix),
                None => pattern == type_id,
            }
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

impl Default for TrustedTypes {
    fn default() -> Self {
        Self::new(["herald.*"])
    }
}

impl FromStr for TrustedTypes {
    type Err = std::convert::Infallible;

    /// Parse a comma-separated list, ignoring blanks.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(
            s.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string),
        ))
    }
}

impl fmt::Display for TrustedTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.patterns.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ProductCreated;

    fn product_json() -> Vec<u8> {
        br#"{"productId":"p1","title":"Test product","price":10,"quantity":1}"#.to_vec()
    }

    #[test]
    fn test_message_id_from_header() {
        let message = InboundMessage::new("t", product_json()).with_header(MESSAGE_ID_HEADER, "m1");
        assert_eq!(message.message_id().unwrap(), "m1");
    }

    #[test]
    fn test_message_id_is_not_trimmed() {
        let message =
            InboundMessage::new("t", product_json()).with_header(MESSAGE_ID_HEADER, " m1 ");
        assert_eq!(message.message_id().unwrap(), " m1 ");
    }

    #[test]
    fn test_missing_or_blank_message_id_is_rejected() {
        let missing = InboundMessage::new("t", product_json());
        assert_eq!(missing.message_id(), Err(HandlerError::MissingMessageId));

        let blank = InboundMessage::new("t", product_json()).with_header(MESSAGE_ID_HEADER, "  ");
        assert_eq!(blank.message_id(), Err(HandlerError::MissingMessageId));

        let binary = InboundMessage::new("t", product_json())
            .with_header(MESSAGE_ID_HEADER, vec![0xff, 0xfe]);
        assert_eq!(binary.message_id(), Err(HandlerError::MissingMessageId));
    }

    #[test]
    fn test_last_header_value_wins() {
        let message = InboundMessage::new("t", product_json())
            .with_header(MESSAGE_ID_HEADER, "first")
            .with_header(MESSAGE_ID_HEADER, "second");
        assert_eq!(message.message_id().unwrap(), "second");
    }

    #[test]
    fn test_coordinates() {
        let message = InboundMessage::new("products-created-events-topic", product_json()).at(2, 41);
        assert_eq!(message.coordinates(), "products-created-events-topic-2@41");
    }

    #[test]
    fn test_decode_without_type_header() {
        let message = InboundMessage::new("t", product_json());
        let event: ProductCreated = message.decode(&TrustedTypes::default()).unwrap();
        assert_eq!(event.product_id, "p1");
    }

    #[test]
    fn test_decode_rejects_untrusted_type() {
        let message = InboundMessage::new("t", product_json())
            .with_header(TYPE_ID_HEADER, "com.example.Exploit");
        let err = message
            .decode::<ProductCreated>(&TrustedTypes::default())
            .unwrap_err();
        assert_eq!(
            err,
            HandlerError::UntrustedType {
                type_id: "com.example.Exploit".to_string()
            }
        );
    }

    #[test]
    fn test_decode_rejects_trusted_but_different_type() {
        let message = InboundMessage::new("t", product_json())
            .with_header(TYPE_ID_HEADER, "herald.product.deleted");
        let err = message
            .decode::<ProductCreated>(&TrustedTypes::default())
            .unwrap_err();
        assert!(matches!(err, HandlerError::MalformedPayload { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let message = InboundMessage::new("t", b"not json".to_vec());
        let err = message
            .decode::<ProductCreated>(&TrustedTypes::any())
            .unwrap_err();
        assert!(matches!(err, HandlerError::MalformedPayload { .. }));
    }

    #[test]
    fn test_trusted_type_patterns() {
        let trusted: TrustedTypes = "herald.product.created, billing.* ,".parse().unwrap();
        assert_eq!(trusted.patterns().len(), 2);
        assert!(trusted.allows("herald.product.created"));
        assert!(trusted.allows("billing.invoice.issued"));
        assert!(!trusted.allows("herald.product.deleted"));
        assert!(TrustedTypes::any().allows("anything.at.all"));
        assert_eq!(trusted.to_string(), "herald.product.created,billing.*");
    }
}
