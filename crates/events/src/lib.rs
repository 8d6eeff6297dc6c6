//! In-process messaging: domain events, the mediator, and typed
//! command/query dispatch tables.
//!
//! All registries here are populated through builders at startup and are
//! immutable afterwards, so they can be shared freely across tasks.

pub mod command;
pub mod error;
pub mod event;
pub mod mediator;
pub mod query;

pub use command::{Command, CommandBus, CommandBusBuilder, CommandHandler};
pub use error::{AskError, DispatchError, RegistryError};
pub use event::Event;
pub use mediator::{EventHandler, Mediator, MediatorBuilder};
pub use query::{Query, QueryBus, QueryBusBuilder, QueryHandler};
