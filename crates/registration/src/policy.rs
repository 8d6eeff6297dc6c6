use std::marker::PhantomData;
use std::sync::Arc;

use clean_core::Email;

use crate::error::RegistrationError;
use crate::repository::RegistrationRepository;

/// An e-mail is unique when no registration uses it yet.
pub struct UniquenessPolicy<Tx, R> {
    repository: Arc<R>,
    _tx: PhantomData<fn(Tx)>,
}

impl<Tx, R> Clone for UniquenessPolicy<Tx, R> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            _tx: PhantomData,
        }
    }
}

impl<Tx: Send, R: RegistrationRepository<Tx>> UniquenessPolicy<Tx, R> {
    pub fn new(repository: Arc<R>) -> Self {
        Self {
            repository,
            _tx: PhantomData,
        }
    }

    pub async fn is_unique(&self, tx: &mut Tx, email: &Email) -> Result<bool, RegistrationError> {
        match self.repository.get_by_email(tx, email).await {
            Ok(_) => Ok(false),
            Err(err) if err.is_not_found() => Ok(true),
            Err(err) => Err(err),
        }
    }
}
