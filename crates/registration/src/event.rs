use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clean_core::{Email, RegistrationId};
use clean_events::Event;

pub const REGISTRATION_CREATED: &str = "RegistrationCreated";
pub const REGISTRATION_VERIFIED: &str = "RegistrationVerified";

/// Event: RegistrationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationCreated {
    pub id: RegistrationId,
    pub email: Email,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RegistrationVerified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationVerified {
    pub id: RegistrationId,
    pub email: Email,
    pub occurred_at: DateTime<Utc>,
}

/// Everything a registration can raise. Serialized with an inline `kind` tag
/// so broker consumers can route on the payload alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RegistrationEvent {
    RegistrationCreated(RegistrationCreated),
    RegistrationVerified(RegistrationVerified),
}

impl RegistrationEvent {
    pub fn registration_id(&self) -> RegistrationId {
        match self {
            RegistrationEvent::RegistrationCreated(e) => e.id,
            RegistrationEvent::RegistrationVerified(e) => e.id,
        }
    }
}

impl Event for RegistrationEvent {
    fn kind(&self) -> &'static str {
        match self {
            RegistrationEvent::RegistrationCreated(_) => REGISTRATION_CREATED,
            RegistrationEvent::RegistrationVerified(_) => REGISTRATION_VERIFIED,
        }
    }
}
