use chrono::Utc;

use clean_core::{AggregateRoot, DomainError, DomainResult, Email, Entity, EventBuffer, RegistrationId};

use crate::event::{RegistrationCreated, RegistrationEvent, RegistrationVerified};

/// Aggregate root: Registration.
///
/// A pending sign-up, keyed by e-mail, that becomes verified once the owner
/// confirms it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    id: RegistrationId,
    email: Email,
    verified: bool,
    events: EventBuffer<RegistrationEvent>,
}

impl Registration {
    /// Start a new, unverified registration. Raises `RegistrationCreated`.
    ///
    /// E-mail uniqueness is checked by the caller (see `UniquenessPolicy`).
    pub fn create(email: Email) -> Self {
        let mut registration = Self::hydrate(RegistrationId::new(), email, false);
        registration
            .events
            .record(RegistrationEvent::RegistrationCreated(RegistrationCreated {
                id: registration.id,
                email: registration.email.clone(),
                occurred_at: Utc::now(),
            }));
        registration
    }

    /// Rebuild from storage; raises nothing.
    pub fn hydrate(id: RegistrationId, email: Email, verified: bool) -> Self {
        Self {
            id,
            email,
            verified,
            events: EventBuffer::new(),
        }
    }

    pub fn email(&self) -> &Email {
        &self.email
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    /// Mark as verified. Raises `RegistrationVerified`; fails with
    /// `DomainError::NoChanges` if already verified.
    pub fn verify(&mut self) -> DomainResult<()> {
        if self.verified {
            return Err(DomainError::NoChanges);
        }
        self.verified = true;
        self.events
            .record(RegistrationEvent::RegistrationVerified(RegistrationVerified {
                id: self.id,
                email: self.email.clone(),
                occurred_at: Utc::now(),
            }));
        Ok(())
    }
}

impl Entity for Registration {
    type Id = RegistrationId;

    fn id(&self) -> &RegistrationId {
        &self.id
    }
}

impl AggregateRoot for Registration {
    type Event = RegistrationEvent;

    fn take_events(&mut self) -> Vec<RegistrationEvent> {
        self.events.drain()
    }
}
