//! Postgres outbox table access.
//!
//! Every statement runs on the caller's transaction, so the insert commits or
//! rolls back with the business write, and the advisory lock taken in
//! `try_lock` lives exactly as long as the consume transaction.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use tracing::instrument;

use crate::db::postgres::{map_sqlx_error, PgUnitOfWork};
use crate::transaction::TransactionError;

use super::record::{NewOutboxMessage, OutboxRecord};
use super::store::OutboxStore;

/// Schema for the `outbox` table (idempotent).
pub const OUTBOX_SCHEMA: &str = include_str!("../../migrations/0001_outbox.sql");

#[derive(Debug, Clone, Copy, Default)]
pub struct PgOutboxStore;

impl PgOutboxStore {
    pub fn new() -> Self {
        Self
    }
}

impl<'r> FromRow<'r, PgRow> for OutboxRecord {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            kind: row.try_get("kind")?,
            payload: row.try_get("payload")?,
            consumed: row.try_get("consumed")?,
            attempts: row.try_get("attempts")?,
            failed: row.try_get("failed")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl OutboxStore<PgUnitOfWork> for PgOutboxStore {
    #[instrument(skip(self, tx, message), fields(topic = %message.topic, kind = %message.kind), err)]
    async fn insert(
        &self,
        tx: &mut PgUnitOfWork,
        message: NewOutboxMessage,
    ) -> Result<i64, TransactionError> {
        sqlx::query_scalar::<_, i64>("INSERT INTO outbox (topic, kind, payload) VALUES ($1, $2, $3) RETURNING id")
            .bind(&message.topic)
            .bind(&message.kind)
            .bind(&message.payload)
            .fetch_one(tx.connection())
            .await
            .map_err(|e| map_sqlx_error("insert_outbox", e))
    }

    #[instrument(skip(self, tx), err)]
    async fn try_lock(&self, tx: &mut PgUnitOfWork, key: i64) -> Result<bool, TransactionError> {
        sqlx::query_scalar::<_, bool>("SELECT pg_try_advisory_xact_lock($1)")
            .bind(key)
            .fetch_one(tx.connection())
            .await
            .map_err(|e| map_sqlx_error("try_lock", e))
    }

    #[instrument(skip(self, tx), err)]
    async fn fetch_pending(
        &self,
        tx: &mut PgUnitOfWork,
        limit: u32,
    ) -> Result<Vec<OutboxRecord>, TransactionError> {
        sqlx::query_as::<_, OutboxRecord>(
            r#"
            SELECT id, topic, kind, payload, consumed, attempts, failed, created_at
            FROM outbox
            WHERE consumed = FALSE AND failed = FALSE
            ORDER BY id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(tx.connection())
        .await
        .map_err(|e| map_sqlx_error("fetch_pending", e))
    }

    #[instrument(skip(self, tx), fields(count = ids.len()), err)]
    async fn mark_consumed(&self, tx: &mut PgUnitOfWork, ids: &[i64]) -> Result<u64, TransactionError> {
        let result = sqlx::query("UPDATE outbox SET consumed = TRUE WHERE id = ANY($1) AND consumed = FALSE")
            .bind(ids)
            .execute(tx.connection())
            .await
            .map_err(|e| map_sqlx_error("mark_consumed", e))?;
        Ok(result.rows_affected())
    }

    #[instrument(skip(self, tx), fields(count = ids.len()), err)]
    async fn record_failures(
        &self,
        tx: &mut PgUnitOfWork,
        ids: &[i64],
        max_attempts: Option<i32>,
    ) -> Result<u64, TransactionError> {
        let failed: Vec<bool> = sqlx::query_scalar(
            r#"
            UPDATE outbox
            SET attempts = attempts + 1,
                failed = ($2::INTEGER IS NOT NULL AND attempts + 1 >= $2::INTEGER)
            WHERE id = ANY($1) AND consumed = FALSE AND failed = FALSE
            RETURNING failed
            "#,
        )
        .bind(ids)
        .bind(max_attempts)
        .fetch_all(tx.connection())
        .await
        .map_err(|e| map_sqlx_error("record_failures", e))?;
        Ok(failed.into_iter().filter(|f| *f).count() as u64)
    }
}
