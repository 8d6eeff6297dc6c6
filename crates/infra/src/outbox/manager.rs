//! The outbox manager: durable enqueue inside the business transaction, and
//! the relay cycle that drains pending rows to the broker.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use clean_events::Event;

use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::publisher::MessagePublisher;
use crate::transaction::{TransactionManager, UnitOfWork};

use super::record::NewOutboxMessage;
use super::store::{OutboxError, OutboxStore};

/// Tuning knobs for the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxOptions {
    /// Interval between consume cycles.
    pub heartbeat: Duration,
    /// Rows fetched per cycle.
    pub page_size: u32,
    /// Advisory lock key shared by every instance draining this outbox.
    pub lock_key: i64,
    /// Failed publishes after which a row is dead-lettered. `None` retries forever.
    pub max_attempts: Option<i32>,
    /// Upper bound on a single broker call.
    pub publish_timeout: Duration,
}

impl Default for OutboxOptions {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(15),
            page_size: 50,
            lock_key: 123,
            max_attempts: None,
            publish_timeout: Duration::from_secs(5),
        }
    }
}

/// Counts for one cycle that got past the lock and found rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeReport {
    pub fetched: usize,
    pub published: usize,
    pub failed: usize,
    pub dead_lettered: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// Another instance holds the lock; nothing was read or written.
    Skipped,
    /// Lock acquired, no pending rows.
    Idle,
    Delivered(ConsumeReport),
}

struct Inner<M, S, P> {
    transactions: M,
    store: S,
    publisher: P,
    options: OutboxOptions,
}

/// Transactional outbox over a transaction manager `M`, a store `S` for its
/// units of work, and a broker publisher `P`. Cheap to clone.
pub struct OutboxManager<M, S, P> {
    inner: Arc<Inner<M, S, P>>,
}

impl<M, S, P> Clone for OutboxManager<M, S, P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M, S, P> core::fmt::Debug for OutboxManager<M, S, P> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutboxManager")
            .field("options", &self.inner.options)
            .finish()
    }
}

impl<M, S, P> OutboxManager<M, S, P>
where
    M: TransactionManager,
    S: OutboxStore<M::Tx>,
    P: MessagePublisher,
{
    pub fn new(transactions: M, store: S, publisher: P, options: OutboxOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                transactions,
                store,
                publisher,
                options,
            }),
        }
    }

    pub fn options(&self) -> &OutboxOptions {
        &self.inner.options
    }

    /// Queue `event` for delivery on `topic`, inside the caller's unit of work.
    ///
    /// Nothing is sent here; the row becomes visible to the relay only when
    /// `tx` commits, and disappears with it on rollback.
    pub async fn publish<E>(&self, tx: &mut M::Tx, topic: &str, event: &E) -> Result<i64, OutboxError>
    where
        E: Event + Serialize,
    {
        let message = NewOutboxMessage::from_event(topic, event)?;
        let id = self.inner.store.insert(tx, message).await?;
        debug!(outbox_id = id, topic, kind = event.kind(), "event queued in outbox");
        Ok(id)
    }

    /// Run one delivery cycle in a single transaction.
    ///
    /// Per-row publish failures are logged and left pending (or dead-lettered
    /// once `max_attempts` is reached). Any database error rolls the whole
    /// cycle back and is returned.
    #[instrument(skip(self), fields(lock_key = self.inner.options.lock_key))]
    pub async fn consume(&self) -> Result<ConsumeOutcome, OutboxError> {
        let Inner {
            transactions,
            store,
            publisher,
            options,
        } = &*self.inner;

        let mut tx = transactions.begin().await?;

        if !store.try_lock(&mut tx, options.lock_key).await? {
            tx.rollback().await?;
            debug!("outbox lock held elsewhere, skipping cycle");
            return Ok(ConsumeOutcome::Skipped);
        }

        let rows = store.fetch_pending(&mut tx, options.page_size).await?;
        if rows.is_empty() {
            tx.commit().await?;
            return Ok(ConsumeOutcome::Idle);
        }

        let mut delivered = Vec::with_capacity(rows.len());
        let mut failed = Vec::new();
        for row in &rows {
            let sent = tokio::time::timeout(
                options.publish_timeout,
                publisher.publish(&row.topic, &row.kind, &row.payload),
            )
            .await;

            match sent {
                Ok(Ok(())) => delivered.push(row.id),
                Ok(Err(err)) => {
                    warn!(
                        outbox_id = row.id,
                        topic = %row.topic,
                        kind = %row.kind,
                        attempts = row.attempts + 1,
                        error = %err,
                        "failed to publish outbox message"
                    );
                    failed.push(row.id);
                }
                Err(_) => {
                    warn!(
                        outbox_id = row.id,
                        topic = %row.topic,
                        kind = %row.kind,
                        attempts = row.attempts + 1,
                        timeout_ms = options.publish_timeout.as_millis() as u64,
                        "publishing outbox message timed out"
                    );
                    failed.push(row.id);
                }
            }
        }

        if !delivered.is_empty() {
            store.mark_consumed(&mut tx, &delivered).await?;
        }
        let dead_lettered = if failed.is_empty() {
            0
        } else {
            store
                .record_failures(&mut tx, &failed, options.max_attempts)
                .await?
        };

        tx.commit().await?;

        let report = ConsumeReport {
            fetched: rows.len(),
            published: delivered.len(),
            failed: failed.len(),
            dead_lettered: dead_lettered as usize,
        };
        if report.dead_lettered > 0 {
            error!(
                dead_lettered = report.dead_lettered,
                max_attempts = options.max_attempts,
                "outbox messages moved to failed state"
            );
        }
        debug!(?report, "outbox cycle finished");
        Ok(ConsumeOutcome::Delivered(report))
    }
}

impl<M, S, P> OutboxManager<M, S, P>
where
    M: TransactionManager + 'static,
    S: OutboxStore<M::Tx> + 'static,
    P: MessagePublisher + 'static,
{
    /// Spawn the relay loop and register it with `shutdown`.
    pub fn start(&self, shutdown: &Shutdown) {
        let relay = self.clone();
        let signal = shutdown.signal();
        shutdown.spawn("outbox-relay", async move { relay.run(signal).await });
    }

    /// Call [`consume`](Self::consume) every `heartbeat` until `signal` fires.
    ///
    /// A cycle in progress when the signal fires runs to completion; cycle
    /// errors are logged and retried on the next tick.
    pub async fn run(&self, mut signal: ShutdownSignal) {
        // `interval_at` panics on a zero period.
        let heartbeat = self.inner.options.heartbeat.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(heartbeat_ms = heartbeat.as_millis() as u64, "outbox relay started");

        loop {
            tokio::select! {
                biased;
                _ = signal.wait() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.consume().await {
                        error!(error = %err, "outbox consume cycle failed");
                    }
                }
            }
        }

        info!("outbox relay stopped");
    }
}
