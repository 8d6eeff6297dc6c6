//! Startup wiring for the registration module.

use std::sync::Arc;

use clean_events::{
    CommandBus, EventHandler, Mediator, MediatorBuilder, QueryBus, RegistryError,
};
use clean_infra::{Isolated, TransactionManager};
use clean_infra::outbox::{OutboxManager, OutboxStore};
use clean_infra::publisher::MessagePublisher;

use crate::commands::{
    ConfirmRegistration, ConfirmRegistrationHandler, CreateRegistration, CreateRegistrationHandler,
};
use crate::event::{RegistrationEvent, REGISTRATION_CREATED, REGISTRATION_VERIFIED};
use crate::queries::{FetchRegistration, FetchRegistrationHandler};
use crate::repository::RegistrationRepository;
use crate::subscribers::OutboxForwarder;

/// Broker topic registration events are published on.
pub const REGISTRATION_TOPIC: &str = "registration";

/// The registration module's dispatch tables, fully populated and immutable.
pub struct RegistrationModule<M: TransactionManager> {
    commands: CommandBus,
    queries: QueryBus,
    mediator: Mediator<RegistrationEvent, M::Tx>,
}

impl<M: TransactionManager> Clone for RegistrationModule<M> {
    fn clone(&self) -> Self {
        Self {
            commands: self.commands.clone(),
            queries: self.queries.clone(),
            mediator: self.mediator.clone(),
        }
    }
}

impl<M: TransactionManager> core::fmt::Debug for RegistrationModule<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegistrationModule")
            .field("commands", &self.commands)
            .field("queries", &self.queries)
            .field("mediator", &self.mediator)
            .finish()
    }
}

impl<M> RegistrationModule<M>
where
    M: TransactionManager + Clone + 'static,
{
    /// Start wiring the module. Both registration event kinds are forwarded to
    /// the outbox on [`REGISTRATION_TOPIC`]; more subscribers can be added
    /// before [`RegistrationModuleBuilder::build`].
    ///
    /// Every subscriber runs behind its own savepoint, so a failing one does
    /// not poison the command's unit of work.
    pub fn builder<R, S, P>(
        transactions: M,
        repository: R,
        outbox: OutboxManager<M, S, P>,
    ) -> RegistrationModuleBuilder<M, R>
    where
        R: RegistrationRepository<M::Tx> + 'static,
        S: OutboxStore<M::Tx> + 'static,
        P: MessagePublisher + 'static,
    {
        let forwarder = Arc::new(OutboxForwarder::new(outbox, REGISTRATION_TOPIC));
        RegistrationModuleBuilder {
            transactions,
            repository: Arc::new(repository),
            mediator: Mediator::<RegistrationEvent, M::Tx>::builder()
                .subscribe(REGISTRATION_CREATED, Isolated::new(Arc::clone(&forwarder)))
                .subscribe(REGISTRATION_VERIFIED, Isolated::new(forwarder)),
        }
    }

    /// Wire the module with the default subscribers only.
    pub fn build<R, S, P>(
        transactions: M,
        repository: R,
        outbox: OutboxManager<M, S, P>,
    ) -> Result<Self, RegistryError>
    where
        R: RegistrationRepository<M::Tx> + 'static,
        S: OutboxStore<M::Tx> + 'static,
        P: MessagePublisher + 'static,
    {
        Self::builder(transactions, repository, outbox).build()
    }

    pub fn commands(&self) -> &CommandBus {
        &self.commands
    }

    pub fn queries(&self) -> &QueryBus {
        &self.queries
    }

    pub fn mediator(&self) -> &Mediator<RegistrationEvent, M::Tx> {
        &self.mediator
    }
}

pub struct RegistrationModuleBuilder<M: TransactionManager, R> {
    transactions: M,
    repository: Arc<R>,
    mediator: MediatorBuilder<RegistrationEvent, M::Tx>,
}

impl<M, R> RegistrationModuleBuilder<M, R>
where
    M: TransactionManager + Clone + 'static,
    R: RegistrationRepository<M::Tx> + 'static,
{
    /// Add a subscriber after the outbox forwarder for `kind`.
    pub fn subscribe<H>(mut self, kind: &'static str, handler: H) -> Self
    where
        H: EventHandler<RegistrationEvent, M::Tx> + 'static,
    {
        self.mediator = self.mediator.subscribe(kind, Isolated::new(handler));
        self
    }

    pub fn build(self) -> Result<RegistrationModule<M>, RegistryError> {
        let Self {
            transactions,
            repository,
            mediator,
        } = self;
        let mediator = mediator.build();

        let commands = CommandBus::builder()
            .register::<CreateRegistration, _>(CreateRegistrationHandler::new(
                transactions.clone(),
                Arc::clone(&repository),
                mediator.clone(),
            ))?
            .register::<ConfirmRegistration, _>(ConfirmRegistrationHandler::new(
                transactions.clone(),
                Arc::clone(&repository),
                mediator.clone(),
            ))?
            .build();

        let queries = QueryBus::builder()
            .register::<FetchRegistration, _>(FetchRegistrationHandler::new(transactions, repository))?
            .build();

        Ok(RegistrationModule {
            commands,
            queries,
            mediator,
        })
    }
}
