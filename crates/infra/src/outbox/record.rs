use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use clean_events::Event;

/// Lifecycle of one outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutboxState {
    /// Waiting for delivery (`consumed = false`, `failed = false`).
    Pending,
    /// Handed to the broker. Terminal.
    Delivered,
    /// Gave up after `max_attempts` failed publishes. Terminal.
    Failed,
}

/// A row to be inserted; the id is assigned by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOutboxMessage {
    pub topic: String,
    pub kind: String,
    pub payload: Vec<u8>,
}

impl NewOutboxMessage {
    /// Serialize `event` as JSON, keyed by its kind.
    pub fn from_event<E>(topic: impl Into<String>, event: &E) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        Ok(Self {
            topic: topic.into(),
            kind: event.kind().to_string(),
            payload: serde_json::to_vec(event)?,
        })
    }
}

/// A persisted outbox row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: i64,
    pub topic: String,
    pub kind: String,
    pub payload: Vec<u8>,
    pub consumed: bool,
    /// Failed publish attempts so far.
    pub attempts: i32,
    pub failed: bool,
    pub created_at: DateTime<Utc>,
}

impl OutboxRecord {
    pub fn state(&self) -> OutboxState {
        if self.consumed {
            OutboxState::Delivered
        } else if self.failed {
            OutboxState::Failed
        } else {
            OutboxState::Pending
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == OutboxState::Pending
    }

    /// Deserialize the stored payload back into the event type it came from.
    pub fn decode<E: DeserializeOwned>(&self) -> Result<E, serde_json::Error> {
        serde_json::from_slice(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Renamed {
        id: u32,
        name: String,
    }

    impl Event for Renamed {
        fn kind(&self) -> &'static str {
            "Renamed"
        }
    }

    fn record(consumed: bool, failed: bool) -> OutboxRecord {
        OutboxRecord {
            id: 1,
            topic: "t".into(),
            kind: "k".into(),
            payload: b"{}".to_vec(),
            consumed,
            attempts: 0,
            failed,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn stored_payload_decodes_to_the_original_event() {
        let event = Renamed {
            id: 7,
            name: "seven".into(),
        };
        let message = NewOutboxMessage::from_event("people", &event).unwrap();
        assert_eq!(message.topic, "people");
        assert_eq!(message.kind, "Renamed");

        let stored = OutboxRecord {
            payload: message.payload,
            ..record(false, false)
        };
        assert_eq!(stored.decode::<Renamed>().unwrap(), event);
    }

    #[test]
    fn state_follows_flags() {
        assert_eq!(record(false, false).state(), OutboxState::Pending);
        assert_eq!(record(true, false).state(), OutboxState::Delivered);
        assert_eq!(record(false, true).state(), OutboxState::Failed);
        assert!(!record(false, true).is_pending());
    }
}
