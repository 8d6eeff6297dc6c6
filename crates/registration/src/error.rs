use thiserror::Error;

use clean_core::DomainError;
use clean_infra::TransactionError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Database(#[from] TransactionError),

    /// A stored row could not be turned back into a registration.
    #[error("corrupt registration record {id}: {details}")]
    Corrupt { id: String, details: String },
}

impl RegistrationError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Domain(err) if err.is_not_found())
    }
}
