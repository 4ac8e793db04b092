//! Change events and bus framing.
//!
//! An [`Event`] is an opaque byte payload. Nothing here interprets it; the
//! record store happens to publish JSON, but subscribers receive exactly the
//! bytes that were published.
//!
//! On the NNG bus every message is framed as `[topic][0x00][payload]`. NNG
//! subscriptions are byte-prefix matches, so subscribing to `topic + 0x00`
//! keeps `deployments` from also matching `deployments.audit`.

use bytes::Bytes;

use crate::error::ChannelError;

/// Topic the record store publishes deployment changes on.
pub const DEFAULT_TOPIC: &str = "deployments.events";

/// Maximum topic length in bytes.
pub const MAX_TOPIC_LEN: usize = 255;

/// Maximum payload size (4 MB).
pub const MAX_PAYLOAD_SIZE: usize = 4 * 1024 * 1024;

/// Separator between topic and payload in a bus frame.
const TOPIC_TERMINATOR: u8 = 0;

/// An opaque change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    payload: Bytes,
}

impl Event {
    /// Create an event from raw bytes.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// The payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// The payload as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        &self.payload
    }

    /// The payload as UTF-8 text, if it is valid UTF-8.
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Vec<u8>> for Event {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<String> for Event {
    fn from(payload: String) -> Self {
        Self::new(payload)
    }
}

impl From<&'static str> for Event {
    fn from(payload: &'static str) -> Self {
        Self::new(Bytes::from_static(payload.as_bytes()))
    }
}

impl From<Bytes> for Event {
    fn from(payload: Bytes) -> Self {
        Self::new(payload)
    }
}

/// Check that a topic can be used on the bus.
pub fn validate_topic(topic: &str) -> Result<(), ChannelError> {
    if topic.is_empty() {
        return Err(ChannelError::InvalidTopic("topic is empty".to_string()));
    }
    if topic.len() > MAX_TOPIC_LEN {
        return Err(ChannelError::InvalidTopic(format!(
            "topic length {} exceeds maximum {}",
            topic.len(),
            MAX_TOPIC_LEN
        )));
    }
    if topic.as_bytes().contains(&TOPIC_TERMINATOR) {
        return Err(ChannelError::InvalidTopic(
            "topic contains a NUL byte".to_string(),
        ));
    }
    Ok(())
}

/// The subscription prefix for a topic.
pub fn topic_prefix(topic: &str) -> Vec<u8> {
    let mut prefix = Vec::with_capacity(topic.len() + 1);
    prefix.extend_from_slice(topic.as_bytes());
    prefix.push(TOPIC_TERMINATOR);
    prefix
}

/// Encode a bus frame for `topic`.
pub fn encode_frame(topic: &str, payload: &[u8]) -> Result<Vec<u8>, ChannelError> {
    validate_topic(topic)?;
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(ChannelError::InvalidFrame(format!(
            "payload size {} exceeds maximum {}",
            payload.len(),
            MAX_PAYLOAD_SIZE
        )));
    }

    let mut frame = topic_prefix(topic);
    frame.reserve(payload.len());
    frame.extend_from_slice(payload);
    Ok(frame)
}

/// Split a bus frame into topic and payload.
pub fn decode_frame(frame: &[u8]) -> Result<(&str, &[u8]), ChannelError> {
    let split = frame
        .iter()
        .position(|&b| b == TOPIC_TERMINATOR)
        .ok_or_else(|| ChannelError::InvalidFrame("missing topic terminator".to_string()))?;

    let topic = std::str::from_utf8(&frame[..split])
        .map_err(|e| ChannelError::InvalidFrame(format!("topic is not UTF-8: {}", e)))?;
    validate_topic(topic)?;

    Ok((topic, &frame[split + 1..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_text() {
        let event = Event::from(r#"{"id":1,"status":"created"}"#);
        assert_eq!(event.as_text(), Some(r#"{"id":1,"status":"created"}"#));
        assert_eq!(event.len(), 27);

        let binary = Event::from(vec![0xff, 0xfe]);
        assert!(binary.as_text().is_none());
    }

    #[test]
    fn test_frame_layout() {
        let frame = encode_frame("deployments.events", b"hello").unwrap();
        assert_eq!(&frame[..18], b"deployments.events");
        assert_eq!(frame[18], 0);
        assert_eq!(&frame[19..], b"hello");

        let (topic, payload) = decode_frame(&frame).unwrap();
        assert_eq!(topic, "deployments.events");
        assert_eq!(payload, b"hello");
    }

    #[test]
    fn test_payload_may_contain_nul() {
        let frame = encode_frame("t", &[1, 0, 2]).unwrap();
        let (topic, payload) = decode_frame(&frame).unwrap();
        assert_eq!(topic, "t");
        assert_eq!(payload, &[1, 0, 2]);
    }

    #[test]
    fn test_invalid_topics() {
        assert!(matches!(validate_topic(""), Err(ChannelError::InvalidTopic(_))));
        assert!(matches!(validate_topic("a\0b"), Err(ChannelError::InvalidTopic(_))));
        let long = "x".repeat(MAX_TOPIC_LEN + 1);
        assert!(matches!(validate_topic(&long), Err(ChannelError::InvalidTopic(_))));
    }

    #[test]
    fn test_decode_without_terminator() {
        assert!(matches!(
            decode_frame(b"no-terminator"),
            Err(ChannelError::InvalidFrame(_))
        ));
    }

    #[test]
    fn test_prefix_does_not_match_longer_topic() {
        let prefix = topic_prefix("deployments");
        let frame = encode_frame("deployments.audit", b"x").unwrap();
        assert!(!frame.starts_with(&prefix));
    }
}
