use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use crate::Event;

/// Failure to move a typed event in or out of an envelope.
#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("payload serialization failed: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("payload for '{event_type}' could not be decoded: {source}")]
    Deserialize {
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected event type '{expected}', found '{found}'")]
    UnexpectedType { expected: String, found: String },
}

/// Envelope for an event, containing stream metadata.
///
/// This is the unit written to the outbox at commit time and handed to
/// downstream consumers (refund processing, audit).
///
/// Notes:
/// - `event_id` is assigned once, when the envelope is built.
/// - `payload` is the serialized domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    aggregate_id: String,
    aggregate_type: String,

    event_type: String,
    event_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        aggregate_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        event_version: u32,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            event_type: event_type.into(),
            event_version,
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<JsonValue> {
    /// Wrap a typed domain event, capturing the metadata needed to decode it later.
    pub fn from_typed<T>(aggregate_type: impl Into<String>, event: &T) -> Result<Self, EnvelopeError>
    where
        T: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(EnvelopeError::Serialize)?;

        Ok(Self::new(
            Uuid::now_v7(),
            event.aggregate_id(),
            aggregate_type,
            event.event_type(),
            event.version(),
            event.occurred_at(),
            payload,
        ))
    }

    /// Decode the payload back into a typed event, checking the type tag first.
    pub fn decode<T>(&self, expected_type: &str) -> Result<T, EnvelopeError>
    where
        T: DeserializeOwned,
    {
        if self.event_type != expected_type {
            return Err(EnvelopeError::UnexpectedType {
                expected: expected_type.to_string(),
                found: self.event_type.clone(),
            });
        }

        serde_json::from_value(self.payload.clone()).map_err(|source| EnvelopeError::Deserialize {
            event_type: self.event_type.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Pinged {
        id: String,
        amount_cents: i64,
        at: DateTime<Utc>,
    }

    impl Event for Pinged {
        fn event_type(&self) -> &'static str {
            "test.pinged"
        }

        fn version(&self) -> u32 {
            1
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }

        fn aggregate_id(&self) -> &str {
            &self.id
        }
    }

    fn pinged() -> Pinged {
        Pinged {
            id: "agg-1".to_string(),
            amount_cents: 1600,
            at: Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn from_typed_captures_metadata() {
        let event = pinged();
        let envelope = EventEnvelope::from_typed("test.aggregate", &event).unwrap();

        assert_eq!(envelope.aggregate_id(), "agg-1");
        assert_eq!(envelope.aggregate_type(), "test.aggregate");
        assert_eq!(envelope.event_type(), "test.pinged");
        assert_eq!(envelope.event_version(), 1);
        assert_eq!(envelope.occurred_at(), event.at);
        // Money stays an integer in the wire form.
        assert!(envelope.payload()["amount_cents"].is_i64());

        let decoded: Pinged = envelope.decode("test.pinged").unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn decode_rejects_other_event_types() {
        let envelope = EventEnvelope::from_typed("test.aggregate", &pinged()).unwrap();
        let err = envelope.decode::<Pinged>("test.other").unwrap_err();
        assert!(matches!(err, EnvelopeError::UnexpectedType { .. }));
    }
}
