//! Transactional outbox.
//!
//! Events are written to the `outbox` table in the same transaction as the
//! business change that raised them, then drained to the broker by a relay
//! loop. Delivery is at-least-once: a crash between the broker call and the
//! commit re-delivers the row on the next cycle.

pub mod in_memory;
pub mod manager;
pub mod postgres;
pub mod record;
pub mod store;

pub use in_memory::InMemoryOutboxStore;
pub use manager::{ConsumeOutcome, ConsumeReport, OutboxManager, OutboxOptions};
pub use postgres::{PgOutboxStore, OUTBOX_SCHEMA};
pub use record::{NewOutboxMessage, OutboxRecord, OutboxState};
pub use store::{OutboxError, OutboxStore};
