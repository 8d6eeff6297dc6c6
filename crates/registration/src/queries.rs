//! Read side.

use std::sync::Arc;

use async_trait::async_trait;

use clean_core::{Entity, RegistrationId};
use clean_events::{Query, QueryHandler};
use clean_infra::{TransactionManager, UnitOfWork};

use crate::error::RegistrationError;
use crate::repository::RegistrationRepository;

/// Query: FetchRegistration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRegistration {
    pub id: RegistrationId,
}

impl Query for FetchRegistration {
    const TYPE: &'static str = "FetchRegistration";
    type Output = RegistrationView;
    type Error = RegistrationError;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RegistrationView {
    pub id: RegistrationId,
    pub email: String,
    pub verified: bool,
}

pub struct FetchRegistrationHandler<M, R> {
    transactions: M,
    repository: Arc<R>,
}

impl<M, R> FetchRegistrationHandler<M, R> {
    pub fn new(transactions: M, repository: Arc<R>) -> Self {
        Self {
            transactions,
            repository,
        }
    }
}

#[async_trait]
impl<M, R> QueryHandler<FetchRegistration> for FetchRegistrationHandler<M, R>
where
    M: TransactionManager,
    R: RegistrationRepository<M::Tx>,
{
    async fn handle(&self, query: FetchRegistration) -> Result<RegistrationView, RegistrationError> {
        let mut tx = self.transactions.begin().await?;
        let registration = self.repository.get_by_id(&mut tx, query.id).await;
        tx.rollback().await?;

        let registration = registration?;
        Ok(RegistrationView {
            id: *registration.id(),
            email: registration.email().to_string(),
            verified: registration.is_verified(),
        })
    }
}
