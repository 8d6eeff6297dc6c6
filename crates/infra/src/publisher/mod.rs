//! Broker-facing publishers used by the outbox relay.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::{InMemoryPublisher, PublishedMessage};
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsPublisher;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("broker connection error: {0}")]
    Connection(String),

    #[error("broker rejected message: {0}")]
    Rejected(String),
}

/// Hands one serialized event to the broker.
///
/// The event kind travels with the message (header, key or field, depending on
/// the broker) so consumers can route without decoding the payload.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, topic: &str, kind: &str, payload: &[u8]) -> Result<(), PublishError>;
}

#[async_trait]
impl<P: MessagePublisher + ?Sized> MessagePublisher for Arc<P> {
    async fn publish(&self, topic: &str, kind: &str, payload: &[u8]) -> Result<(), PublishError> {
        (**self).publish(topic, kind, payload).await
    }
}
