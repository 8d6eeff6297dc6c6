//! Database adapters: the Postgres unit of work and its in-memory stand-in.

pub mod in_memory;
pub mod postgres;

pub use in_memory::{InMemoryDatabase, InMemoryUnitOfWork};
pub use postgres::{apply_schema, connect, map_sqlx_error, PgTransactionManager, PgUnitOfWork};
