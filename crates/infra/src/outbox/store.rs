use async_trait::async_trait;
use thiserror::Error;

use crate::transaction::TransactionError;

use super::record::{NewOutboxMessage, OutboxRecord};

#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] TransactionError),
}

/// Outbox table access inside a caller-owned unit of work `Tx`.
#[async_trait]
pub trait OutboxStore<Tx: Send>: Send + Sync {
    /// Insert a pending row and return its id.
    async fn insert(&self, tx: &mut Tx, message: NewOutboxMessage) -> Result<i64, TransactionError>;

    /// Non-blocking, transaction-scoped advisory lock.
    async fn try_lock(&self, tx: &mut Tx, key: i64) -> Result<bool, TransactionError>;

    /// Up to `limit` pending rows, oldest (lowest id) first.
    async fn fetch_pending(&self, tx: &mut Tx, limit: u32) -> Result<Vec<OutboxRecord>, TransactionError>;

    /// Flip `consumed` on the given ids in one statement; returns rows changed.
    async fn mark_consumed(&self, tx: &mut Tx, ids: &[i64]) -> Result<u64, TransactionError>;

    /// Count one failed attempt on each id. Rows reaching `max_attempts` move
    /// to the failed state; returns how many did.
    async fn record_failures(
        &self,
        tx: &mut Tx,
        ids: &[i64],
        max_attempts: Option<i32>,
    ) -> Result<u64, TransactionError>;
}
