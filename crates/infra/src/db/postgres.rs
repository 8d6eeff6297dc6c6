//! Postgres unit of work over a sqlx pool.
//!
//! ## Error Mapping
//!
//! | SQLx error | Postgres code | `TransactionError` |
//! |---|---|---|
//! | Database (unique violation) | `23505` | `UniqueViolation` |
//! | Database (other) | any | `Database` |
//! | PoolClosed | n/a | `PoolClosed` |
//! | anything else | n/a | `Database` |

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::{debug, instrument};

use crate::config::DatabaseConfig;
use crate::transaction::{TransactionError, TransactionManager, UnitOfWork};

/// Open a connection pool.
#[instrument(skip(config), fields(max_connections = config.max_connections), err)]
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, TransactionError> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(&config.url)
        .await
        .map_err(|e| map_sqlx_error("connect", e))
}

/// Run a (multi-statement, idempotent) schema script.
#[instrument(skip(pool, script), err)]
pub async fn apply_schema(pool: &PgPool, name: &'static str, script: &'static str) -> Result<(), TransactionError> {
    sqlx::raw_sql(script)
        .execute(pool)
        .await
        .map_err(|e| map_sqlx_error("apply_schema", e))?;
    debug!(schema = name, "schema applied");
    Ok(())
}

/// Hands out [`PgUnitOfWork`]s from a pool.
#[derive(Debug, Clone)]
pub struct PgTransactionManager {
    pool: PgPool,
}

impl PgTransactionManager {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl TransactionManager for PgTransactionManager {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, TransactionError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin", e))?;
        Ok(PgUnitOfWork { tx, savepoints: 0 })
    }
}

/// An open Postgres transaction. sqlx rolls it back when dropped uncommitted.
#[derive(Debug)]
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
    savepoints: usize,
}

impl PgUnitOfWork {
    /// Connection to run statements inside this transaction.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    async fn execute(&mut self, operation: &'static str, sql: &str) -> Result<(), TransactionError> {
        let conn: &mut PgConnection = &mut self.tx;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql))
            .await
            .map_err(|e| map_sqlx_error(operation, e))?;
        Ok(())
    }

    fn innermost_savepoint(&self, operation: &'static str) -> Result<String, TransactionError> {
        match self.savepoints {
            0 => Err(TransactionError::database(operation, "no open savepoint")),
            depth => Ok(savepoint_name(depth)),
        }
    }
}

fn savepoint_name(depth: usize) -> String {
    format!("clean_savepoint_{depth}")
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn commit(self) -> Result<(), TransactionError> {
        self.tx.commit().await.map_err(|e| map_sqlx_error("commit", e))
    }

    async fn rollback(self) -> Result<(), TransactionError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }

    async fn savepoint(&mut self) -> Result<(), TransactionError> {
        let name = savepoint_name(self.savepoints + 1);
        self.execute("savepoint", &format!("SAVEPOINT {name}")).await?;
        self.savepoints += 1;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), TransactionError> {
        let name = self.innermost_savepoint("release_savepoint")?;
        self.execute("release_savepoint", &format!("RELEASE SAVEPOINT {name}"))
            .await?;
        self.savepoints -= 1;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), TransactionError> {
        let name = self.innermost_savepoint("rollback_to_savepoint")?;
        // ROLLBACK TO keeps the savepoint open; release it so depth stays in step.
        self.execute("rollback_to_savepoint", &format!("ROLLBACK TO SAVEPOINT {name}"))
            .await?;
        self.execute("rollback_to_savepoint", &format!("RELEASE SAVEPOINT {name}"))
            .await?;
        self.savepoints -= 1;
        Ok(())
    }
}

pub fn map_sqlx_error(operation: &'static str, err: sqlx::Error) -> TransactionError {
    match err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            match db_err.code().as_deref() {
                Some("23505") => TransactionError::UniqueViolation { operation, message },
                _ => TransactionError::Database { operation, message },
            }
        }
        sqlx::Error::PoolClosed => TransactionError::PoolClosed(operation),
        other => TransactionError::database(operation, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_closed_keeps_operation_name() {
        let err = map_sqlx_error("fetch_pending", sqlx::Error::PoolClosed);
        assert_eq!(err, TransactionError::PoolClosed("fetch_pending"));
        assert_eq!(err.operation(), "fetch_pending");
    }

    #[test]
    fn savepoints_are_named_by_depth() {
        assert_eq!(savepoint_name(1), "clean_savepoint_1");
        assert_ne!(savepoint_name(1), savepoint_name(2));
    }

    #[test]
    fn row_not_found_is_a_database_error() {
        let err = map_sqlx_error("get_by_id", sqlx::Error::RowNotFound);
        assert!(matches!(err, TransactionError::Database { operation: "get_by_id", .. }));
        assert!(!err.is_unique_violation());
    }
}
