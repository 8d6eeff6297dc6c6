//! Unit-of-work abstraction.
//!
//! A handler opens one unit of work, passes it by `&mut` to every repository
//! and outbox call that must be atomic with the business write, then commits.
//! Dropping a unit of work without committing rolls it back.
//!
//! A failed statement poisons the whole transaction (Postgres rejects every
//! later statement and turns `COMMIT` into a rollback). Work that may fail
//! without failing the caller, such as mediator subscribers, runs behind a
//! savepoint; see [`Isolated`].

use async_trait::async_trait;
use clean_events::{Event, EventHandler};
use thiserror::Error;
use tracing::debug;

/// Database failure, tagged with the operation that hit it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransactionError {
    #[error("database error in {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
    },

    #[error("unique constraint violated in {operation}: {message}")]
    UniqueViolation {
        operation: &'static str,
        message: String,
    },

    #[error("connection pool closed in {0}")]
    PoolClosed(&'static str),
}

impl TransactionError {
    pub fn database(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Database {
            operation,
            message: message.into(),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            Self::Database { operation, .. } | Self::UniqueViolation { operation, .. } => operation,
            Self::PoolClosed(operation) => operation,
        }
    }

    pub fn is_unique_violation(&self) -> bool {
        matches!(self, Self::UniqueViolation { .. })
    }
}

/// An open database transaction.
#[async_trait]
pub trait UnitOfWork: Send + Sized {
    async fn commit(self) -> Result<(), TransactionError>;
    async fn rollback(self) -> Result<(), TransactionError>;

    /// Push a savepoint. Savepoints nest; the two calls below act on the
    /// innermost one.
    async fn savepoint(&mut self) -> Result<(), TransactionError>;

    /// Drop the innermost savepoint, keeping what was written after it.
    async fn release_savepoint(&mut self) -> Result<(), TransactionError>;

    /// Discard everything written since the innermost savepoint, drop it, and
    /// leave the transaction usable again.
    async fn rollback_to_savepoint(&mut self) -> Result<(), TransactionError>;
}

/// Opens units of work.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    type Tx: UnitOfWork + 'static;

    async fn begin(&self) -> Result<Self::Tx, TransactionError>;
}

#[async_trait]
impl<T: TransactionManager + ?Sized> TransactionManager for std::sync::Arc<T> {
    type Tx = T::Tx;

    async fn begin(&self) -> Result<Self::Tx, TransactionError> {
        (**self).begin().await
    }
}

/// Runs a subscriber behind a savepoint, so its failure only discards its own
/// writes and the surrounding unit of work can still commit.
pub struct Isolated<H> {
    inner: H,
}

impl<H> Isolated<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<E, Tx, H> EventHandler<E, Tx> for Isolated<H>
where
    E: Event,
    Tx: UnitOfWork,
    H: EventHandler<E, Tx>,
{
    async fn handle(&self, tx: &mut Tx, event: &E) -> anyhow::Result<()> {
        tx.savepoint().await?;
        match self.inner.handle(tx, event).await {
            Ok(()) => {
                tx.release_savepoint().await?;
                Ok(())
            }
            Err(err) => {
                tx.rollback_to_savepoint().await?;
                debug!(handler = self.inner.name(), "subscriber writes rolled back");
                Err(err)
            }
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use clean_events::Mediator;
    use serde_json::json;

    use super::*;
    use crate::db::{InMemoryDatabase, InMemoryUnitOfWork};

    #[derive(Debug, Clone)]
    struct Noted(&'static str);

    impl Event for Noted {
        fn kind(&self) -> &'static str {
            "Noted"
        }
    }

    /// Writes a document, then fails when told to.
    struct Writer {
        key: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler<Noted, InMemoryUnitOfWork> for Writer {
        async fn handle(&self, tx: &mut InMemoryUnitOfWork, event: &Noted) -> anyhow::Result<()> {
            tx.put("notes", self.key, json!(event.0))?;
            if self.fail {
                anyhow::bail!("writer {} gave up", self.key);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failed_subscriber_only_loses_its_own_writes() {
        let db = InMemoryDatabase::new();
        let mediator: Mediator<Noted, InMemoryUnitOfWork> = Mediator::builder()
            .subscribe("Noted", Isolated::new(Writer { key: "a", fail: false }))
            .subscribe("Noted", Isolated::new(Writer { key: "b", fail: true }))
            .subscribe("Noted", Isolated::new(Writer { key: "c", fail: false }))
            .build();

        let mut tx = db.begin().await.unwrap();
        tx.put("notes", "before", json!("kept")).unwrap();
        mediator.publish(&mut tx, vec![Noted("hi")]).await;
        tx.commit().await.unwrap();

        let keys: Vec<_> = db.documents("notes").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "before", "c"]);
    }

    #[tokio::test]
    async fn database_error_inside_a_subscriber_leaves_the_unit_committable() {
        let db = InMemoryDatabase::new();
        let mediator: Mediator<Noted, InMemoryUnitOfWork> = Mediator::builder()
            .subscribe("Noted", Isolated::new(Writer { key: "a", fail: false }))
            .build();

        let mut tx = db.begin().await.unwrap();
        tx.put("notes", "before", json!("kept")).unwrap();
        db.fail_next("put");
        mediator.publish(&mut tx, vec![Noted("hi")]).await;
        tx.put("notes", "after", json!("kept")).unwrap();
        tx.commit().await.unwrap();

        let keys: Vec<_> = db.documents("notes").into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["after", "before"]);
    }

    #[tokio::test]
    async fn unisolated_database_error_poisons_the_commit() {
        let db = InMemoryDatabase::new();
        let mediator: Mediator<Noted, InMemoryUnitOfWork> = Mediator::builder()
            .subscribe("Noted", Writer { key: "a", fail: false })
            .build();

        let mut tx = db.begin().await.unwrap();
        tx.put("notes", "before", json!("kept")).unwrap();
        db.fail_next("put");
        mediator.publish(&mut tx, vec![Noted("hi")]).await;

        let err = tx.commit().await.unwrap_err();
        assert_eq!(err.operation(), "commit");
        assert!(db.documents("notes").is_empty());
    }
}
