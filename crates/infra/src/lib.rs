//! Infrastructure layer: units of work, the transactional outbox, broker
//! publishers, configuration and shutdown coordination.

pub mod config;
pub mod db;
pub mod lifecycle;
pub mod outbox;
pub mod publisher;
pub mod transaction;

pub use lifecycle::{Shutdown, ShutdownError, ShutdownSignal};
pub use transaction::{Isolated, TransactionError, TransactionManager, UnitOfWork};

mod integration_tests;
