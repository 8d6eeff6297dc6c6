use async_trait::async_trait;

use crate::db::in_memory::InMemoryUnitOfWork;
use crate::transaction::TransactionError;

use super::record::{NewOutboxMessage, OutboxRecord};
use super::store::OutboxStore;

/// Outbox store over [`crate::db::InMemoryDatabase`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryOutboxStore;

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutboxStore<InMemoryUnitOfWork> for InMemoryOutboxStore {
    async fn insert(
        &self,
        tx: &mut InMemoryUnitOfWork,
        message: NewOutboxMessage,
    ) -> Result<i64, TransactionError> {
        tx.insert_outbox(message)
    }

    async fn try_lock(&self, tx: &mut InMemoryUnitOfWork, key: i64) -> Result<bool, TransactionError> {
        tx.try_advisory_lock(key)
    }

    async fn fetch_pending(
        &self,
        tx: &mut InMemoryUnitOfWork,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, TransactionError> {
        tx.pending_outbox(limit as usize)
    }

    async fn mark_consumed(
        &self,
        tx: &mut InMemoryUnitOfWork,
        ids: &[i64],
    ) -> Result<u64, TransactionError> {
        tx.mark_consumed(ids)
    }

    async fn record_failures(
        &self,
        tx: &mut InMemoryUnitOfWork,
        ids: &[i64],
        max_attempts: Option<i32>,
    ) -> Result<u64, TransactionError> {
        tx.record_failures(ids, max_attempts)
    }
}
