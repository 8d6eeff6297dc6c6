//! Registration persistence, always inside the caller's unit of work.

use async_trait::async_trait;

use clean_core::{Email, RegistrationId};

use crate::error::RegistrationError;
use crate::registration::Registration;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemoryRegistrationRepository;
pub use postgres::{PgRegistrationRepository, REGISTRATION_SCHEMA};

#[async_trait]
pub trait RegistrationRepository<Tx: Send>: Send + Sync {
    /// Insert a new registration. A duplicate e-mail is `DomainError::AlreadyExists`.
    async fn create(&self, tx: &mut Tx, registration: &Registration) -> Result<(), RegistrationError>;

    async fn update(&self, tx: &mut Tx, registration: &Registration) -> Result<(), RegistrationError>;

    /// `DomainError::NotFound` when absent.
    async fn get_by_id(&self, tx: &mut Tx, id: RegistrationId) -> Result<Registration, RegistrationError>;

    /// Like [`get_by_id`](Self::get_by_id), but locks the row until `tx` ends.
    /// Concurrent callers for the same id queue behind each other and each
    /// sees the previous one's committed write.
    async fn get_by_id_for_update(
        &self,
        tx: &mut Tx,
        id: RegistrationId,
    ) -> Result<Registration, RegistrationError>;

    /// `DomainError::NotFound` when absent.
    async fn get_by_email(&self, tx: &mut Tx, email: &Email) -> Result<Registration, RegistrationError>;
}
