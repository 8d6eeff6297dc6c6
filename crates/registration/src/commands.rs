//! Write side: create and confirm registrations.
//!
//! Each handler runs in one unit of work: load or build the aggregate, write
//! it, publish its drained events through the mediator (whose subscribers
//! enqueue them in the outbox on the same unit of work), then commit.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use clean_core::{AggregateRoot, DomainError, Email, Entity, RegistrationId};
use clean_events::{Command, CommandHandler, Mediator};
use clean_infra::{TransactionManager, UnitOfWork};

use crate::error::RegistrationError;
use crate::event::RegistrationEvent;
use crate::policy::UniquenessPolicy;
use crate::registration::Registration;
use crate::repository::RegistrationRepository;

/// Command: CreateRegistration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateRegistration {
    pub email: String,
}

impl Command for CreateRegistration {
    const TYPE: &'static str = "CreateRegistration";
    type Output = RegistrationId;
    type Error = RegistrationError;
}

/// Command: ConfirmRegistration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmRegistration {
    pub id: RegistrationId,
}

impl Command for ConfirmRegistration {
    const TYPE: &'static str = "ConfirmRegistration";
    type Output = ();
    type Error = RegistrationError;
}

pub struct CreateRegistrationHandler<M: TransactionManager, R> {
    transactions: M,
    repository: Arc<R>,
    policy: UniquenessPolicy<M::Tx, R>,
    mediator: Mediator<RegistrationEvent, M::Tx>,
}

impl<M, R> CreateRegistrationHandler<M, R>
where
    M: TransactionManager,
    R: RegistrationRepository<M::Tx>,
{
    pub fn new(transactions: M, repository: Arc<R>, mediator: Mediator<RegistrationEvent, M::Tx>) -> Self {
        Self {
            policy: UniquenessPolicy::new(Arc::clone(&repository)),
            transactions,
            repository,
            mediator,
        }
    }
}

#[async_trait]
impl<M, R> CommandHandler<CreateRegistration> for CreateRegistrationHandler<M, R>
where
    M: TransactionManager,
    R: RegistrationRepository<M::Tx>,
{
    async fn handle(&self, command: CreateRegistration) -> Result<RegistrationId, RegistrationError> {
        let email = Email::parse(&command.email)?;

        let mut tx = self.transactions.begin().await?;
        if !self.policy.is_unique(&mut tx, &email).await? {
            return Err(DomainError::already_exists(format!("registration for {email}")).into());
        }

        let mut registration = Registration::create(email);
        self.repository.create(&mut tx, &registration).await?;
        self.mediator
            .publish(&mut tx, registration.take_events())
            .await;
        tx.commit().await?;

        info!(registration_id = %registration.id(), "registration created");
        Ok(*registration.id())
    }
}

pub struct ConfirmRegistrationHandler<M: TransactionManager, R> {
    transactions: M,
    repository: Arc<R>,
    mediator: Mediator<RegistrationEvent, M::Tx>,
}

impl<M, R> ConfirmRegistrationHandler<M, R>
where
    M: TransactionManager,
    R: RegistrationRepository<M::Tx>,
{
    pub fn new(transactions: M, repository: Arc<R>, mediator: Mediator<RegistrationEvent, M::Tx>) -> Self {
        Self {
            transactions,
            repository,
            mediator,
        }
    }
}

#[async_trait]
impl<M, R> CommandHandler<ConfirmRegistration> for ConfirmRegistrationHandler<M, R>
where
    M: TransactionManager,
    R: RegistrationRepository<M::Tx>,
{
    async fn handle(&self, command: ConfirmRegistration) -> Result<(), RegistrationError> {
        let id = command.id;

        // Locked read: concurrent confirms serialize here, so only the first
        // one sees an unverified registration and raises the event.
        let mut tx = self.transactions.begin().await?;
        let mut registration = self.repository.get_by_id_for_update(&mut tx, id).await?;

        match registration.verify() {
            Ok(()) => {}
            Err(DomainError::NoChanges) => {
                debug!(registration_id = %id, "registration already verified");
                tx.rollback().await?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        self.repository.update(&mut tx, &registration).await?;
        self.mediator
            .publish(&mut tx, registration.take_events())
            .await;
        tx.commit().await?;

        info!(registration_id = %id, "registration verified");
        Ok(())
    }
}
