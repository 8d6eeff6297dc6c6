//! Postgres registration repository.
//!
//! A concurrent insert of the same e-mail trips the `UNIQUE` constraint; that
//! surfaces as `DomainError::AlreadyExists`, same as the policy check.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::instrument;
use uuid::Uuid;

use clean_core::{DomainError, Email, Entity, RegistrationId};
use clean_infra::db::{map_sqlx_error, PgUnitOfWork};

use crate::error::RegistrationError;
use crate::registration::Registration;

use super::RegistrationRepository;

/// Schema for the `registrations` table (idempotent).
pub const REGISTRATION_SCHEMA: &str = include_str!("../../migrations/0001_registrations.sql");

#[derive(Debug, Clone, Copy, Default)]
pub struct PgRegistrationRepository;

impl PgRegistrationRepository {
    pub fn new() -> Self {
        Self
    }
}

fn from_row(row: &PgRow) -> Result<Registration, RegistrationError> {
    let id: Uuid = row
        .try_get("id")
        .map_err(|e| map_sqlx_error("decode_registration", e))?;
    let email: String = row
        .try_get("email")
        .map_err(|e| map_sqlx_error("decode_registration", e))?;
    let verified: bool = row
        .try_get("verified")
        .map_err(|e| map_sqlx_error("decode_registration", e))?;

    let email = Email::parse(&email).map_err(|e| RegistrationError::Corrupt {
        id: id.to_string(),
        details: e.to_string(),
    })?;
    Ok(Registration::hydrate(RegistrationId::from_uuid(id), email, verified))
}

#[async_trait]
impl RegistrationRepository<PgUnitOfWork> for PgRegistrationRepository {
    #[instrument(skip(self, tx, registration), fields(registration_id = %registration.id()), err)]
    async fn create(
        &self,
        tx: &mut PgUnitOfWork,
        registration: &Registration,
    ) -> Result<(), RegistrationError> {
        sqlx::query("INSERT INTO registrations (id, email, verified) VALUES ($1, $2, $3)")
            .bind(registration.id().as_uuid())
            .bind(registration.email().as_str())
            .bind(registration.is_verified())
            .execute(tx.connection())
            .await
            .map_err(|e| match map_sqlx_error("create_registration", e) {
                err if err.is_unique_violation() => RegistrationError::from(DomainError::already_exists(
                    format!("registration for {}", registration.email()),
                )),
                err => err.into(),
            })?;
        Ok(())
    }

    #[instrument(skip(self, tx, registration), fields(registration_id = %registration.id()), err)]
    async fn update(
        &self,
        tx: &mut PgUnitOfWork,
        registration: &Registration,
    ) -> Result<(), RegistrationError> {
        let result = sqlx::query(
            "UPDATE registrations SET email = $2, verified = $3, updated_at = now() WHERE id = $1",
        )
        .bind(registration.id().as_uuid())
        .bind(registration.email().as_str())
        .bind(registration.is_verified())
        .execute(tx.connection())
        .await
        .map_err(|e| map_sqlx_error("update_registration", e))?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound.into());
        }
        Ok(())
    }

    #[instrument(skip(self, tx), fields(registration_id = %id), err)]
    async fn get_by_id(
        &self,
        tx: &mut PgUnitOfWork,
        id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        let row = sqlx::query("SELECT id, email, verified FROM registrations WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(tx.connection())
            .await
            .map_err(|e| map_sqlx_error("get_registration_by_id", e))?;

        match row {
            Some(row) => from_row(&row),
            None => Err(DomainError::NotFound.into()),
        }
    }

    #[instrument(skip(self, tx), fields(registration_id = %id), err)]
    async fn get_by_id_for_update(
        &self,
        tx: &mut PgUnitOfWork,
        id: RegistrationId,
    ) -> Result<Registration, RegistrationError> {
        let row = sqlx::query("SELECT id, email, verified FROM registrations WHERE id = $1 FOR UPDATE")
            .bind(id.as_uuid())
            .fetch_optional(tx.connection())
            .await
            .map_err(|e| map_sqlx_error("lock_registration_by_id", e))?;

        match row {
            Some(row) => from_row(&row),
            None => Err(DomainError::NotFound.into()),
        }
    }

    #[instrument(skip(self, tx, email), err)]
    async fn get_by_email(
        &self,
        tx: &mut PgUnitOfWork,
        email: &Email,
    ) -> Result<Registration, RegistrationError> {
        let row = sqlx::query("SELECT id, email, verified FROM registrations WHERE email = $1")
            .bind(email.as_str())
            .fetch_optional(tx.connection())
            .await
            .map_err(|e| map_sqlx_error("get_registration_by_email", e))?;

        match row {
            Some(row) => from_row(&row),
            None => Err(DomainError::NotFound.into()),
        }
    }
}
