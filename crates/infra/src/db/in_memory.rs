//! In-memory database with transactional staging.
//!
//! Writes made through an [`InMemoryUnitOfWork`] are staged and become visible
//! to other units of work only on commit; the unit itself reads its own
//! staged writes. Advisory locks are transaction-scoped, like
//! `pg_try_advisory_xact_lock`: they are released on commit, rollback or drop.
//! Row locks ([`InMemoryUnitOfWork::lock_row`]) wait like `SELECT ... FOR
//! UPDATE`.
//!
//! As in Postgres, a failed operation aborts the unit: every later operation
//! fails and commit rolls back, until [`UnitOfWork::rollback_to_savepoint`].
//!
//! Used by tests and local runs; no Postgres needed.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};
use tracing::debug;

use crate::outbox::{NewOutboxMessage, OutboxRecord};
use crate::transaction::{TransactionError, TransactionManager, UnitOfWork};

type Table = BTreeMap<String, JsonValue>;

#[derive(Debug, Default, Clone)]
struct Snapshot {
    outbox: BTreeMap<i64, OutboxRecord>,
    tables: HashMap<String, Table>,
}

#[derive(Debug, Default)]
struct State {
    committed: Snapshot,
    locks: HashSet<i64>,
    row_locks: HashMap<String, Arc<RowLock<()>>>,
    failures: HashSet<&'static str>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    next_outbox_id: AtomicI64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone)]
enum Op {
    InsertOutbox(OutboxRecord),
    MarkConsumed(Vec<i64>),
    RecordFailures {
        ids: Vec<i64>,
        max_attempts: Option<i32>,
    },
    Put {
        table: String,
        key: String,
        value: JsonValue,
    },
}

impl Op {
    fn apply(&self, snapshot: &mut Snapshot) {
        match self {
            Op::InsertOutbox(record) => {
                snapshot.outbox.insert(record.id, record.clone());
            }
            Op::MarkConsumed(ids) => {
                for id in ids {
                    if let Some(row) = snapshot.outbox.get_mut(id) {
                        if !row.consumed {
                            row.consumed = true;
                        }
                    }
                }
            }
            Op::RecordFailures { ids, max_attempts } => {
                for id in ids {
                    if let Some(row) = snapshot.outbox.get_mut(id) {
                        if !row.is_pending() {
                            continue;
                        }
                        row.attempts += 1;
                        if max_attempts.is_some_and(|max| row.attempts >= max) {
                            row.failed = true;
                        }
                    }
                }
            }
            Op::Put { table, key, value } => {
                snapshot
                    .tables
                    .entry(table.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
        }
    }
}

/// Shared in-memory store; clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    inner: Arc<Shared>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed outbox rows in id order.
    pub fn outbox_rows(&self) -> Vec<OutboxRecord> {
        self.inner.lock().committed.outbox.values().cloned().collect()
    }

    /// Committed documents of `table` in key order.
    pub fn documents(&self, table: &str) -> Vec<(String, JsonValue)> {
        self.inner
            .lock()
            .committed
            .tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    /// Make the next call of `operation` (e.g. `"mark_consumed"`) fail with a
    /// database error.
    pub fn fail_next(&self, operation: &'static str) {
        self.inner.lock().failures.insert(operation);
    }

    pub fn is_locked(&self, key: i64) -> bool {
        self.inner.lock().locks.contains(&key)
    }
}

#[async_trait]
impl TransactionManager for InMemoryDatabase {
    type Tx = InMemoryUnitOfWork;

    async fn begin(&self) -> Result<InMemoryUnitOfWork, TransactionError> {
        self.inner.check("begin")?;
        Ok(InMemoryUnitOfWork {
            db: Arc::clone(&self.inner),
            ops: Vec::new(),
            held_locks: Vec::new(),
            row_guards: HashMap::new(),
            savepoints: Vec::new(),
            aborted: AtomicBool::new(false),
        })
    }
}

impl Shared {
    fn check(&self, operation: &'static str) -> Result<(), TransactionError> {
        if self.lock().failures.remove(operation) {
            return Err(TransactionError::database(operation, "injected failure"));
        }
        Ok(())
    }
}

/// Staged writes plus held locks.
#[derive(Debug)]
pub struct InMemoryUnitOfWork {
    db: Arc<Shared>,
    ops: Vec<Op>,
    held_locks: Vec<i64>,
    row_guards: HashMap<String, OwnedMutexGuard<()>>,
    /// Length of `ops` at each open savepoint.
    savepoints: Vec<usize>,
    aborted: AtomicBool,
}

impl InMemoryUnitOfWork {
    fn check(&self, operation: &'static str) -> Result<(), TransactionError> {
        if self.aborted.load(Ordering::SeqCst) {
            return Err(TransactionError::database(
                operation,
                "current transaction is aborted",
            ));
        }
        self.db
            .check(operation)
            .inspect_err(|_| self.aborted.store(true, Ordering::SeqCst))
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// Committed state with this unit's staged writes applied.
    fn view(&self) -> Snapshot {
        let mut snapshot = self.db.lock().committed.clone();
        for op in &self.ops {
            op.apply(&mut snapshot);
        }
        snapshot
    }

    fn release_locks(&mut self) {
        if self.held_locks.is_empty() {
            return;
        }
        let mut state = self.db.lock();
        for key in self.held_locks.drain(..) {
            state.locks.remove(&key);
        }
    }

    pub fn try_advisory_lock(&mut self, key: i64) -> Result<bool, TransactionError> {
        self.check("try_lock")?;
        if self.held_locks.contains(&key) {
            return Ok(true);
        }
        let acquired = self.db.lock().locks.insert(key);
        if acquired {
            self.held_locks.push(key);
        }
        Ok(acquired)
    }

    /// Lock one document until this unit ends, waiting while another unit
    /// holds it. Re-locking a row this unit holds is a no-op.
    pub async fn lock_row(&mut self, table: &str, key: &str) -> Result<(), TransactionError> {
        self.check("lock_row")?;
        let name = format!("{table}/{key}");
        if self.row_guards.contains_key(&name) {
            return Ok(());
        }
        let lock = Arc::clone(self.db.lock().row_locks.entry(name.clone()).or_default());
        let guard = lock.lock_owned().await;
        self.row_guards.insert(name, guard);
        Ok(())
    }

    pub fn insert_outbox(&mut self, message: NewOutboxMessage) -> Result<i64, TransactionError> {
        self.check("insert_outbox")?;
        let id = self.db.next_outbox_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.ops.push(Op::InsertOutbox(OutboxRecord {
            id,
            topic: message.topic,
            kind: message.kind,
            payload: message.payload,
            consumed: false,
            attempts: 0,
            failed: false,
            created_at: Utc::now(),
        }));
        Ok(id)
    }

    pub fn pending_outbox(&self, limit: usize) -> Result<Vec<OutboxRecord>, TransactionError> {
        self.check("fetch_pending")?;
        Ok(self
            .view()
            .outbox
            .into_values()
            .filter(OutboxRecord::is_pending)
            .take(limit)
            .collect())
    }

    pub fn mark_consumed(&mut self, ids: &[i64]) -> Result<u64, TransactionError> {
        self.check("mark_consumed")?;
        let view = self.view();
        let affected = ids
            .iter()
            .filter(|id| view.outbox.get(*id).is_some_and(|row| !row.consumed))
            .count();
        self.ops.push(Op::MarkConsumed(ids.to_vec()));
        Ok(affected as u64)
    }

    /// Bump `attempts` on pending rows; returns how many crossed `max_attempts`.
    pub fn record_failures(
        &mut self,
        ids: &[i64],
        max_attempts: Option<i32>,
    ) -> Result<u64, TransactionError> {
        self.check("record_failures")?;
        let op = Op::RecordFailures {
            ids: ids.to_vec(),
            max_attempts,
        };
        let before = self.view();
        let mut after = before.clone();
        op.apply(&mut after);
        let dead_lettered = ids
            .iter()
            .filter(|id| {
                let was_failed = before.outbox.get(*id).is_some_and(|row| row.failed);
                let is_failed = after.outbox.get(*id).is_some_and(|row| row.failed);
                !was_failed && is_failed
            })
            .count();
        self.ops.push(op);
        Ok(dead_lettered as u64)
    }

    pub fn put(
        &mut self,
        table: &str,
        key: impl Into<String>,
        value: JsonValue,
    ) -> Result<(), TransactionError> {
        self.check("put")?;
        self.ops.push(Op::Put {
            table: table.to_string(),
            key: key.into(),
            value,
        });
        Ok(())
    }

    pub fn get(&self, table: &str, key: &str) -> Result<Option<JsonValue>, TransactionError> {
        self.check("get")?;
        Ok(self
            .view()
            .tables
            .get(table)
            .and_then(|t| t.get(key).cloned()))
    }

    /// First document in `table` (key order) matching `predicate`.
    pub fn find(
        &self,
        table: &str,
        predicate: impl Fn(&JsonValue) -> bool,
    ) -> Result<Option<JsonValue>, TransactionError> {
        self.check("find")?;
        Ok(self
            .view()
            .tables
            .get(table)
            .and_then(|t| t.values().find(|v| predicate(v)).cloned()))
    }
}

#[async_trait]
impl UnitOfWork for InMemoryUnitOfWork {
    async fn commit(mut self) -> Result<(), TransactionError> {
        if self.is_aborted() {
            return Err(TransactionError::database(
                "commit",
                "transaction is aborted, rolled back",
            ));
        }
        self.check("commit")?;
        {
            let mut state = self.db.lock();
            for op in self.ops.drain(..) {
                op.apply(&mut state.committed);
            }
        }
        self.release_locks();
        debug!("in-memory unit of work committed");
        Ok(())
    }

    async fn rollback(mut self) -> Result<(), TransactionError> {
        self.ops.clear();
        self.release_locks();
        Ok(())
    }

    async fn savepoint(&mut self) -> Result<(), TransactionError> {
        self.check("savepoint")?;
        self.savepoints.push(self.ops.len());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), TransactionError> {
        self.check("release_savepoint")?;
        match self.savepoints.pop() {
            Some(_) => Ok(()),
            None => Err(TransactionError::database("release_savepoint", "no open savepoint")),
        }
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), TransactionError> {
        let mark = self.savepoints.pop().ok_or_else(|| {
            TransactionError::database("rollback_to_savepoint", "no open savepoint")
        })?;
        self.ops.truncate(mark);
        self.aborted.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for InMemoryUnitOfWork {
    fn drop(&mut self) {
        self.release_locks();
    }
}
