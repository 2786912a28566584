use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Stream Identity
// ============================================================================

/// Identifies one aggregate's event history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for StreamId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for StreamId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// Domain Event Trait
// ============================================================================

/// Generic Domain Event trait
///
/// Usually implemented by an aggregate's event enum. `event_type` returns the
/// tag of the concrete variant; it is persisted next to the payload and used
/// to route events to projection handlers.
pub trait DomainEvent: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    fn event_type(&self) -> &'static str;

    fn event_version(&self) -> i32 {
        1
    }
}

// ============================================================================
// Event Envelope - Persisted Event + Metadata
// ============================================================================
//
// Envelopes are owned by the event store: sequence numbers are assigned at
// append time, so there is no public constructor.
//
// ============================================================================

/// Generic Event Envelope - wraps any domain event with metadata
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct EventEnvelope<E> {
    // Event Identity
    pub event_id: Uuid,
    pub stream_id: StreamId,
    pub sequence_number: u64,

    // Event Type Information
    pub event_type: String,
    pub event_version: i32,

    // Event Payload
    pub event_data: E,

    // Causation & Correlation
    pub correlation_id: Uuid,
    pub causation_id: Option<Uuid>,

    // Actor Information
    pub user_id: Option<Uuid>,

    pub occurred_at: DateTime<Utc>,

    pub metadata: HashMap<String, String>,
}

/// Payload-erased envelope, the shape every [`EventLog`](crate::event_sourcing::store::EventLog) persists.
pub type RawEnvelope = EventEnvelope<serde_json::Value>;

impl<E: DomainEvent> EventEnvelope<E> {
    pub(crate) fn new(
        stream_id: StreamId,
        sequence_number: u64,
        event_data: E,
        correlation_id: Uuid,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            stream_id,
            sequence_number,
            event_type: event_data.event_type().to_string(),
            event_version: event_data.event_version(),
            event_data,
            correlation_id,
            causation_id: None,
            user_id: None,
            occurred_at,
            metadata: HashMap::new(),
        }
    }

    pub(crate) fn with_metadata(mut self, metadata: &EventMetadata) -> Self {
        self.causation_id = metadata.causation_id;
        self.user_id = metadata.user_id;
        self.metadata = metadata.headers.clone();
        self
    }

    /// Serialize the payload for storage
    pub fn encode(self) -> Result<RawEnvelope, serde_json::Error> {
        self.try_map(|event| serde_json::to_value(&event))
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Deserialize the stored payload back into a domain event
    pub fn decode<E: DomainEvent>(self) -> Result<EventEnvelope<E>, serde_json::Error> {
        self.try_map(serde_json::from_value)
    }
}

impl<E> EventEnvelope<E> {
    pub fn try_map<T, Err>(
        self,
        f: impl FnOnce(E) -> Result<T, Err>,
    ) -> Result<EventEnvelope<T>, Err> {
        Ok(EventEnvelope {
            event_id: self.event_id,
            stream_id: self.stream_id,
            sequence_number: self.sequence_number,
            event_type: self.event_type,
            event_version: self.event_version,
            event_data: f(self.event_data)?,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            user_id: self.user_id,
            occurred_at: self.occurred_at,
            metadata: self.metadata,
        })
    }
}

// ============================================================================
// Append Metadata
// ============================================================================

/// Caller-supplied metadata stamped onto every event of one append.
///
/// When no correlation id is given, the store generates one per append so
/// that all events written together share it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventMetadata {
    pub correlation_id: Option<Uuid>,
    pub causation_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub headers: HashMap<String, String>,
}

impl EventMetadata {
    pub fn with_correlation(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn with_causation(mut self, causation_id: Uuid) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{VenueEvent, VenueOpened};

    fn opened() -> VenueEvent {
        VenueEvent::Opened(VenueOpened {
            name: "Hall".to_string(),
            capacity: 100,
        })
    }

    #[test]
    fn test_event_envelope_creation() {
        let correlation_id = Uuid::new_v4();
        let envelope = EventEnvelope::new(
            StreamId::from("venue-1"),
            1,
            opened(),
            correlation_id,
            Utc::now(),
        );

        assert_eq!(envelope.stream_id.as_str(), "venue-1");
        assert_eq!(envelope.sequence_number, 1);
        assert_eq!(envelope.event_type, "VenueOpened");
        assert_eq!(envelope.event_version, 1);
        assert_eq!(envelope.correlation_id, correlation_id);
        assert!(envelope.causation_id.is_none());
    }

    #[test]
    fn test_metadata_is_stamped_onto_envelope() {
        let user_id = Uuid::new_v4();
        let causation_id = Uuid::new_v4();
        let metadata = EventMetadata::default()
            .with_user(user_id)
            .with_causation(causation_id)
            .with_header("source", "box-office");

        let envelope = EventEnvelope::new(StreamId::from("venue-1"), 1, opened(), Uuid::new_v4(), Utc::now())
            .with_metadata(&metadata);

        assert_eq!(envelope.user_id, Some(user_id));
        assert_eq!(envelope.causation_id, Some(causation_id));
        assert_eq!(envelope.metadata.get("source").map(String::as_str), Some("box-office"));
    }

    #[test]
    fn test_encode_then_decode_keeps_envelope_fields() {
        let envelope = EventEnvelope::new(StreamId::from("venue-1"), 3, opened(), Uuid::new_v4(), Utc::now());
        let event_id = envelope.event_id;

        let raw = envelope.clone().encode().unwrap();
        assert_eq!(raw.event_id, event_id);
        assert_eq!(raw.sequence_number, 3);

        let decoded: EventEnvelope<VenueEvent> = raw.decode().unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_decode_into_wrong_type_fails() {
        let raw = EventEnvelope::new(StreamId::from("venue-1"), 1, opened(), Uuid::new_v4(), Utc::now())
            .encode()
            .unwrap();

        let result = raw.try_map(serde_json::from_value::<u64>);
        assert!(result.is_err());
    }

    #[test]
    fn test_stream_id_conversions() {
        let from_str = StreamId::from("C1");
        let from_string = StreamId::from("C1".to_string());

        assert_eq!(from_str, from_string);
        assert_eq!(from_str.to_string(), "C1");
        assert_eq!(serde_json::to_string(&from_str).unwrap(), "\"C1\"");
    }
}
