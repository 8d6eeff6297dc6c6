use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use clean_core::{DomainError, Email, Entity, RegistrationId};
use clean_infra::db::InMemoryUnitOfWork;

use crate::error::RegistrationError;
use crate::registration::Registration;

use super::RegistrationRepository;

pub const TABLE: &str = "registrations";

/// Stored shape of a registration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistrationDocument {
    id: RegistrationId,
    email: Email,
    verified: bool,
}

impl From<&Registration> for RegistrationDocument {
    fn from(registration: &Registration) -> Self {
        Self {
            id: *registration.id(),
            email: registration.email().clone(),
            verified: registration.is_verified(),
        }
    }
}

fn to_json(registration: &Registration) -> Result<JsonValue, RegistrationError> {
    serde_json::to_value(RegistrationDocument::from(registration)).map_err(|e| {
        RegistrationError::Corrupt {
            id: registration.id().to_string(),
            details: e.to_string(),
        }
    })
}

fn from_json(key: &str, value: JsonValue) -> Result<Registration, RegistrationError> {
    let doc: RegistrationDocument =
        serde_json::from_value(value).map_err(|e| RegistrationError::Corrupt {
            id: key.to_string(),
            details: e.to_string(),
        })?;
    Ok(Registration::hydrate(doc.id, doc.email, doc.verified))
}

/// Registrations stored as JSON documents in [`clean_infra::db::InMemoryDatabase`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryRegistrationRepository;

impl InMemoryRegistrationRepository {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RegistrationRepository<InMemoryUnitOfWork> for InMemoryRegistrationRepository {
    async fn create(
        &self,
        tx: &mut InMemoryUnitOfWork,
        registration: &Registration,
    ) -> Result<(), RegistrationError> {
        let key = registration.id().to_string();
        let email = registration.email().as_str();
        if tx.find(TABLE, |doc| doc["email"] == email)?.is_some() {
            return Err(DomainError::already_exists(format!("registration for {email}")).into());
        }
        if tx.get(TABLE, &key)?.is_some() {
            return Err(DomainError::already_exists(format!("registration {key}")).into());
        }
        tx.put(TABLE, key, to_json(registration)?)?;
        Ok(())
    }

    async fn update(
        &self,
        tx: &mut InMemoryUnitOfWork,
        registration: &Registration,
    ) -> Result<(), RegistrationError> {
        let key = registration.id().to_string();
        if tx.get(TABLE, &key)?.is_none() {
            return Err(DomainError::NotFound.into());
        }
        tx.put(TABLE, key, to_json(registration)?)?;
        Ok(())
    }

    async fn get_by_id(
        &self,
        tx: &mut InMemoryUnitOfWork,
        id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        let key = id.to_string();
        match tx.get(TABLE, &key)? {
            Some(doc) => from_json(&key, doc),
            None => Err(DomainError::NotFound.into()),
        }
    }

    async fn get_by_id_for_update(
        &self,
        tx: &mut InMemoryUnitOfWork,
        id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        tx.lock_row(TABLE, &id.to_string()).await?;
        self.get_by_id(tx, id).await
    }

    async fn get_by_email(
        &self,
        tx: &mut InMemoryUnitOfWork,
        email: &Email,
    ) -> Result<Registration, RegistrationError> {
        match tx.find(TABLE, |doc| doc["email"] == email.as_str())? {
            Some(doc) => from_json(email.as_str(), doc),
            None => Err(DomainError::NotFound.into()),
        }
    }
}
