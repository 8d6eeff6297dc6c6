//! Outbox pipeline tests over the in-memory database.
//!
//! Flow: business unit of work → outbox insert → commit → consume → publisher.
//!
//! Verifies:
//! - Rows are delivered oldest first, at most one page per cycle
//! - A failing row does not block the rest of its batch
//! - Only one concurrent cycle gets past the advisory lock
//! - Database errors roll the whole cycle back

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};
    use tokio::sync::Notify;

    use clean_events::Event;

    use crate::db::InMemoryDatabase;
    use crate::lifecycle::Shutdown;
    use crate::outbox::{
        ConsumeOutcome, ConsumeReport, InMemoryOutboxStore, OutboxError, OutboxManager,
        OutboxOptions, OutboxState, OutboxStore,
    };
    use crate::publisher::{InMemoryPublisher, MessagePublisher, PublishError};
    use crate::transaction::{TransactionManager, UnitOfWork};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Noted {
        n: u32,
    }

    impl Event for Noted {
        fn kind(&self) -> &'static str {
            "Noted"
        }
    }

    type Manager<P> = OutboxManager<InMemoryDatabase, InMemoryOutboxStore, P>;

    fn manager<P: MessagePublisher>(db: &InMemoryDatabase, publisher: P, options: OutboxOptions) -> Manager<P> {
        OutboxManager::new(db.clone(), InMemoryOutboxStore::new(), publisher, options)
    }

    async fn enqueue<P: MessagePublisher>(db: &InMemoryDatabase, outbox: &Manager<P>, ns: impl IntoIterator<Item = u32>) -> Vec<i64> {
        let mut tx = db.begin().await.unwrap();
        let mut ids = Vec::new();
        for n in ns {
            ids.push(outbox.publish(&mut tx, "notes", &Noted { n }).await.unwrap());
        }
        tx.commit().await.unwrap();
        ids
    }

    fn published_ns(publisher: &InMemoryPublisher) -> Vec<u32> {
        publisher
            .published()
            .iter()
            .map(|m| serde_json::from_slice::<Noted>(&m.payload).unwrap().n)
            .collect()
    }

    #[tokio::test]
    async fn delivers_committed_rows_then_goes_idle() {
        let db = InMemoryDatabase::new();
        let publisher = InMemoryPublisher::new();
        let outbox = manager(&db, publisher.clone(), OutboxOptions::default());

        enqueue(&db, &outbox, [1, 2, 3]).await;

        let outcome = outbox.consume().await.unwrap();
        assert_eq!(
            outcome,
            ConsumeOutcome::Delivered(ConsumeReport {
                fetched: 3,
                published: 3,
                failed: 0,
                dead_lettered: 0,
            })
        );
        assert_eq!(published_ns(&publisher), vec![1, 2, 3]);
        assert!(publisher.published().iter().all(|m| m.topic == "notes" && m.kind == "Noted"));
        assert!(db.outbox_rows().iter().all(|r| r.state() == OutboxState::Delivered));

        assert_eq!(outbox.consume().await.unwrap(), ConsumeOutcome::Idle);
        assert_eq!(publisher.published().len(), 3);
    }

    #[tokio::test]
    async fn stored_payload_round_trips() {
        let db = InMemoryDatabase::new();
        let outbox = manager(&db, InMemoryPublisher::new(), OutboxOptions::default());

        enqueue(&db, &outbox, [42]).await;

        let row = &db.outbox_rows()[0];
        assert_eq!(row.kind, "Noted");
        assert_eq!(row.decode::<Noted>().unwrap(), Noted { n: 42 });
    }

    #[tokio::test]
    async fn rolled_back_unit_of_work_leaves_no_row() {
        let db = InMemoryDatabase::new();
        let outbox = manager(&db, InMemoryPublisher::new(), OutboxOptions::default());

        let mut tx = db.begin().await.unwrap();
        outbox.publish(&mut tx, "notes", &Noted { n: 1 }).await.unwrap();
        tx.rollback().await.unwrap();

        assert!(db.outbox_rows().is_empty());
        assert_eq!(outbox.consume().await.unwrap(), ConsumeOutcome::Idle);
    }

    #[tokio::test]
    async fn serialization_failure_is_returned_and_nothing_is_queued() {
        #[derive(Debug, Clone)]
        struct Unserializable;

        impl Event for Unserializable {
            fn kind(&self) -> &'static str {
                "Unserializable"
            }
        }

        impl Serialize for Unserializable {
            fn serialize<S: serde::Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("refusing to serialize"))
            }
        }

        let db = InMemoryDatabase::new();
        let outbox = manager(&db, InMemoryPublisher::new(), OutboxOptions::default());

        let mut tx = db.begin().await.unwrap();
        let err = outbox.publish(&mut tx, "notes", &Unserializable).await.unwrap_err();
        assert!(matches!(err, OutboxError::Serialization(_)));
        tx.commit().await.unwrap();

        assert!(db.outbox_rows().is_empty());
    }

    #[tokio::test]
    async fn failing_row_stays_pending_while_the_rest_are_consumed() {
        let db = InMemoryDatabase::new();
        let publisher = InMemoryPublisher::failing_when(|m| m.payload == br#"{"n":2}"#);
        let outbox = manager(&db, publisher.clone(), OutboxOptions::default());

        let ids = enqueue(&db, &outbox, [1, 2, 3]).await;

        let outcome = outbox.consume().await.unwrap();
        assert_eq!(
            outcome,
            ConsumeOutcome::Delivered(ConsumeReport {
                fetched: 3,
                published: 2,
                failed: 1,
                dead_lettered: 0,
            })
        );
        assert_eq!(published_ns(&publisher), vec![1, 3]);

        let rows = db.outbox_rows();
        let states: Vec<_> = rows.iter().map(|r| (r.id, r.state())).collect();
        assert_eq!(
            states,
            vec![
                (ids[0], OutboxState::Delivered),
                (ids[1], OutboxState::Pending),
                (ids[2], OutboxState::Delivered),
            ]
        );
        assert_eq!(rows[1].attempts, 1);

        // Unbounded retries: the row keeps coming back.
        for _ in 0..3 {
            let outcome = outbox.consume().await.unwrap();
            assert!(matches!(outcome, ConsumeOutcome::Delivered(r) if r.failed == 1));
        }
        assert_eq!(db.outbox_rows()[1].attempts, 4);
        assert!(db.outbox_rows()[1].is_pending());
    }

    #[tokio::test]
    async fn row_is_dead_lettered_after_max_attempts() {
        let db = InMemoryDatabase::new();
        let publisher = InMemoryPublisher::failing_when(|_| true);
        let outbox = manager(
            &db,
            publisher,
            OutboxOptions {
                max_attempts: Some(2),
                ..OutboxOptions::default()
            },
        );

        enqueue(&db, &outbox, [1]).await;

        let first = outbox.consume().await.unwrap();
        assert!(matches!(first, ConsumeOutcome::Delivered(r) if r.failed == 1 && r.dead_lettered == 0));
        let second = outbox.consume().await.unwrap();
        assert!(matches!(second, ConsumeOutcome::Delivered(r) if r.dead_lettered == 1));

        assert_eq!(db.outbox_rows()[0].state(), OutboxState::Failed);
        assert_eq!(outbox.consume().await.unwrap(), ConsumeOutcome::Idle);
    }

    #[tokio::test]
    async fn held_lock_makes_consume_a_no_op() {
        let db = InMemoryDatabase::new();
        let publisher = InMemoryPublisher::new();
        let options = OutboxOptions::default();
        let outbox = manager(&db, publisher.clone(), options.clone());

        enqueue(&db, &outbox, [1, 2]).await;

        let mut other_instance = db.begin().await.unwrap();
        assert!(
            InMemoryOutboxStore::new()
                .try_lock(&mut other_instance, options.lock_key)
                .await
                .unwrap()
        );

        assert_eq!(outbox.consume().await.unwrap(), ConsumeOutcome::Skipped);
        assert!(publisher.published().is_empty());
        assert!(db.outbox_rows().iter().all(|r| r.is_pending()));

        drop(other_instance);
        assert!(matches!(
            outbox.consume().await.unwrap(),
            ConsumeOutcome::Delivered(r) if r.published == 2
        ));
    }

    /// Blocks inside `publish` until released, so a cycle can be held open.
    #[derive(Default)]
    struct GatedPublisher {
        entered: Notify,
        release: Notify,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MessagePublisher for GatedPublisher {
        async fn publish(&self, _topic: &str, _kind: &str, _payload: &[u8]) -> Result<(), PublishError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_cycles_only_one_gets_past_the_lock() {
        let db = InMemoryDatabase::new();
        let publisher = Arc::new(GatedPublisher::default());
        let outbox = manager(&db, publisher.clone(), OutboxOptions::default());

        enqueue(&db, &outbox, [1]).await;

        let first = tokio::spawn({
            let outbox = outbox.clone();
            async move { outbox.consume().await }
        });
        publisher.entered.notified().await;

        assert_eq!(outbox.consume().await.unwrap(), ConsumeOutcome::Skipped);

        publisher.release.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Delivered(r) if r.published == 1));
        assert_eq!(publisher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn database_error_rolls_back_the_cycle() {
        let db = InMemoryDatabase::new();
        let publisher = InMemoryPublisher::new();
        let outbox = manager(&db, publisher.clone(), OutboxOptions::default());

        enqueue(&db, &outbox, [1, 2]).await;
        db.fail_next("mark_consumed");

        let err = outbox.consume().await.unwrap_err();
        assert!(matches!(err, OutboxError::Database(e) if e.operation() == "mark_consumed"));
        assert!(db.outbox_rows().iter().all(|r| r.is_pending()));
        assert!(!db.is_locked(OutboxOptions::default().lock_key));

        // Already handed to the broker once; the next cycle sends them again.
        outbox.consume().await.unwrap();
        assert_eq!(published_ns(&publisher), vec![1, 2, 1, 2]);
        assert!(db.outbox_rows().iter().all(|r| !r.is_pending()));
    }

    struct StalledPublisher;

    #[async_trait]
    impl MessagePublisher for StalledPublisher {
        async fn publish(&self, _topic: &str, _kind: &str, _payload: &[u8]) -> Result<(), PublishError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn publish_timeout_counts_as_a_failed_attempt() {
        let db = InMemoryDatabase::new();
        let outbox = manager(
            &db,
            StalledPublisher,
            OutboxOptions {
                publish_timeout: Duration::from_millis(100),
                ..OutboxOptions::default()
            },
        );

        enqueue(&db, &outbox, [1]).await;

        let outcome = outbox.consume().await.unwrap();
        assert!(matches!(outcome, ConsumeOutcome::Delivered(r) if r.failed == 1 && r.published == 0));
        assert_eq!(db.outbox_rows()[0].attempts, 1);
    }

    #[tokio::test]
    async fn relay_loop_delivers_and_stops_on_shutdown() {
        let db = InMemoryDatabase::new();
        let publisher = InMemoryPublisher::new();
        let outbox = manager(
            &db,
            publisher.clone(),
            OutboxOptions {
                heartbeat: Duration::from_millis(10),
                ..OutboxOptions::default()
            },
        );
        let shutdown = Shutdown::new();
        outbox.start(&shutdown);

        enqueue(&db, &outbox, [7]).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while publisher.published().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        shutdown.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(published_ns(&publisher), vec![7]);
        assert!(!db.outbox_rows()[0].is_pending());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn one_cycle_consumes_min_of_pending_and_page_size(pending in 0u32..40, page_size in 1u32..20) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            rt.block_on(async {
                let db = InMemoryDatabase::new();
                let publisher = InMemoryPublisher::new();
                let outbox = manager(
                    &db,
                    publisher.clone(),
                    OutboxOptions { page_size, ..OutboxOptions::default() },
                );
                let ids = enqueue(&db, &outbox, 0..pending).await;

                outbox.consume().await.unwrap();

                let expected = pending.min(page_size) as usize;
                let rows = db.outbox_rows();
                let consumed: Vec<i64> = rows.iter().filter(|r| r.consumed).map(|r| r.id).collect();
                prop_assert_eq!(&consumed, &ids[..expected].to_vec());
                prop_assert_eq!(rows.iter().filter(|r| r.is_pending()).count(), pending as usize - expected);
                prop_assert_eq!(published_ns(&publisher), (0..pending.min(page_size)).collect::<Vec<_>>());
                Ok(())
            })?;
        }
    }
}
