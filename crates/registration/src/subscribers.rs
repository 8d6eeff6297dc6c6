use async_trait::async_trait;
use tracing::debug;

use clean_events::{Event, EventHandler};
use clean_infra::TransactionManager;
use clean_infra::outbox::{OutboxManager, OutboxStore};
use clean_infra::publisher::MessagePublisher;

use crate::event::RegistrationEvent;

/// Queues registration events in the outbox, inside the unit of work that
/// raised them.
pub struct OutboxForwarder<M, S, P> {
    outbox: OutboxManager<M, S, P>,
    topic: &'static str,
}

impl<M, S, P> OutboxForwarder<M, S, P> {
    pub fn new(outbox: OutboxManager<M, S, P>, topic: &'static str) -> Self {
        Self { outbox, topic }
    }
}

#[async_trait]
impl<M, S, P> EventHandler<RegistrationEvent, M::Tx> for OutboxForwarder<M, S, P>
where
    M: TransactionManager + 'static,
    S: OutboxStore<M::Tx> + 'static,
    P: MessagePublisher + 'static,
{
    async fn handle(&self, tx: &mut M::Tx, event: &RegistrationEvent) -> anyhow::Result<()> {
        let outbox_id = self.outbox.publish(tx, self.topic, event).await?;
        debug!(
            outbox_id,
            topic = self.topic,
            kind = event.kind(),
            registration_id = %event.registration_id(),
            "registration event forwarded to outbox"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "outbox-forwarder"
    }
}
