//! Registration module: the sign-up flow that drives the event-delivery core
//! end to end.
//!
//! `CreateRegistration` → aggregate raises `RegistrationCreated` → mediator →
//! outbox row in the same unit of work → relay → broker topic `registration`.

pub mod commands;
pub mod error;
pub mod event;
pub mod module;
pub mod policy;
pub mod queries;
pub mod registration;
pub mod repository;
pub mod subscribers;

pub use commands::{ConfirmRegistration, CreateRegistration};
pub use error::RegistrationError;
pub use event::{RegistrationCreated, RegistrationEvent, RegistrationVerified};
pub use module::{RegistrationModule, RegistrationModuleBuilder, REGISTRATION_TOPIC};
pub use queries::{FetchRegistration, RegistrationView};
pub use registration::Registration;
pub use repository::{
    InMemoryRegistrationRepository, PgRegistrationRepository, RegistrationRepository,
    REGISTRATION_SCHEMA,
};
