//! In-process event fan-out.
//!
//! The mediator only guarantees that every subscriber was *offered* an event.
//! A subscriber error is logged and swallowed: it does not stop the remaining
//! subscribers and it does not fail the caller's unit of work. Durable delivery
//! belongs to the outbox.
//!
//! Subscribers receive the caller's context (`Cx`, usually the open unit of
//! work) by mutable reference, so anything they write lands in the same
//! transaction as the business change that raised the event.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error};

use crate::event::Event;

/// A subscriber for one or more event kinds.
#[async_trait]
pub trait EventHandler<E: Event, Cx: Send>: Send + Sync {
    async fn handle(&self, cx: &mut Cx, event: &E) -> anyhow::Result<()>;

    /// Name used in log lines when this handler fails.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

#[async_trait]
impl<E, Cx, H> EventHandler<E, Cx> for Arc<H>
where
    E: Event,
    Cx: Send,
    H: EventHandler<E, Cx> + ?Sized,
{
    async fn handle(&self, cx: &mut Cx, event: &E) -> anyhow::Result<()> {
        (**self).handle(cx, event).await
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

type Subscribers<E, Cx> = HashMap<&'static str, Vec<Arc<dyn EventHandler<E, Cx>>>>;

pub struct MediatorBuilder<E: Event, Cx: Send + 'static> {
    subscribers: Subscribers<E, Cx>,
}

impl<E: Event, Cx: Send + 'static> Default for MediatorBuilder<E, Cx> {
    fn default() -> Self {
        Self {
            subscribers: HashMap::new(),
        }
    }
}

impl<E: Event, Cx: Send + 'static> MediatorBuilder<E, Cx> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the subscriber list for `kind`.
    pub fn subscribe<H>(mut self, kind: &'static str, handler: H) -> Self
    where
        H: EventHandler<E, Cx> + 'static,
    {
        self.subscribers
            .entry(kind)
            .or_default()
            .push(Arc::new(handler));
        self
    }

    pub fn build(self) -> Mediator<E, Cx> {
        Mediator {
            subscribers: Arc::new(self.subscribers),
        }
    }
}

/// Immutable event-kind → subscribers table.
pub struct Mediator<E: Event, Cx: Send + 'static> {
    subscribers: Arc<Subscribers<E, Cx>>,
}

impl<E: Event, Cx: Send + 'static> Clone for Mediator<E, Cx> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Arc::clone(&self.subscribers),
        }
    }
}

impl<E: Event, Cx: Send + 'static> core::fmt::Debug for Mediator<E, Cx> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut kinds: Vec<_> = self
            .subscribers
            .iter()
            .map(|(kind, handlers)| (*kind, handlers.len()))
            .collect();
        kinds.sort();
        f.debug_struct("Mediator").field("kinds", &kinds).finish()
    }
}

impl<E: Event, Cx: Send + 'static> Mediator<E, Cx> {
    pub fn builder() -> MediatorBuilder<E, Cx> {
        MediatorBuilder::new()
    }

    pub fn subscriber_count(&self, kind: &str) -> usize {
        self.subscribers.get(kind).map_or(0, Vec::len)
    }

    /// Offer each event, in order, to the subscribers of its kind, in
    /// subscription order.
    pub async fn publish(&self, cx: &mut Cx, events: Vec<E>) {
        for event in events {
            let kind = event.kind();
            let Some(handlers) = self.subscribers.get(kind) else {
                debug!(event_kind = kind, "no subscribers for event");
                continue;
            };

            for handler in handlers {
                if let Err(err) = handler.handle(cx, &event).await {
                    error!(
                        event_kind = kind,
                        handler = handler.name(),
                        error = %err,
                        "event handler failed"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use anyhow::bail;

    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        X(u32),
        Y,
    }

    impl Event for Ping {
        fn kind(&self) -> &'static str {
            match self {
                Ping::X(_) => "X",
                Ping::Y => "Y",
            }
        }
    }

    /// Appends `label` to the shared log in the context, optionally failing afterwards.
    struct Recorder {
        label: &'static str,
        fail: bool,
    }

    #[async_trait]
    impl EventHandler<Ping, Vec<String>> for Recorder {
        async fn handle(&self, cx: &mut Vec<String>, event: &Ping) -> anyhow::Result<()> {
            cx.push(format!("{}:{:?}", self.label, event));
            if self.fail {
                bail!("{} refused", self.label);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn failing_subscriber_does_not_stop_the_next_one() {
        let mediator: Mediator<Ping, Vec<String>> = Mediator::builder()
            .subscribe(
                "X",
                Recorder {
                    label: "first",
                    fail: true,
                },
            )
            .subscribe(
                "X",
                Recorder {
                    label: "second",
                    fail: false,
                },
            )
            .build();

        let mut log: Vec<String> = Vec::new();
        mediator.publish(&mut log, vec![Ping::X(1)]).await;

        assert_eq!(log, vec!["first:X(1)", "second:X(1)"]);
    }

    #[tokio::test]
    async fn events_are_routed_by_kind_in_order() {
        let mediator: Mediator<Ping, Vec<String>> = Mediator::builder()
            .subscribe(
                "X",
                Recorder {
                    label: "x",
                    fail: false,
                },
            )
            .subscribe(
                "Y",
                Recorder {
                    label: "y",
                    fail: false,
                },
            )
            .build();

        let mut log: Vec<String> = Vec::new();
        mediator
            .publish(&mut log, vec![Ping::Y, Ping::X(7), Ping::X(8)])
            .await;

        assert_eq!(log, vec!["y:Y", "x:X(7)", "x:X(8)"]);
    }

    #[tokio::test]
    async fn events_without_subscribers_are_ignored() {
        let mediator: Mediator<Ping, Vec<String>> = Mediator::builder()
            .subscribe(
                "X",
                Recorder {
                    label: "x",
                    fail: false,
                },
            )
            .build();

        let mut log: Vec<String> = Vec::new();
        mediator.publish(&mut log, vec![Ping::Y]).await;

        assert!(log.is_empty());
        assert_eq!(mediator.subscriber_count("X"), 1);
        assert_eq!(mediator.subscriber_count("Y"), 0);
    }

    #[tokio::test]
    async fn shared_handler_can_serve_several_kinds() {
        struct Counter(Mutex<u32>);

        #[async_trait]
        impl EventHandler<Ping, ()> for Counter {
            async fn handle(&self, _cx: &mut (), _event: &Ping) -> anyhow::Result<()> {
                *self.0.lock().unwrap() += 1;
                Ok(())
            }
        }

        let counter = Arc::new(Counter(Mutex::new(0)));
        let mediator: Mediator<Ping, ()> = Mediator::builder()
            .subscribe("X", counter.clone())
            .subscribe("Y", counter.clone())
            .build();

        mediator
            .publish(&mut (), vec![Ping::X(1), Ping::Y, Ping::X(2)])
            .await;

        assert_eq!(*counter.0.lock().unwrap(), 3);
    }
}
