use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{MessagePublisher, PublishError};

/// A message as the broker would have received it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub kind: String,
    pub payload: Vec<u8>,
}

type FailWhen = dyn Fn(&PublishedMessage) -> bool + Send + Sync;

/// Records every published message. Optionally rejects the messages a
/// predicate selects, to simulate a broker that refuses them.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<Mutex<Vec<PublishedMessage>>>,
    fail_when: Option<Arc<FailWhen>>,
}

impl core::fmt::Debug for InMemoryPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryPublisher")
            .field("published", &self.lock().len())
            .field("fails", &self.fail_when.is_some())
            .finish()
    }
}

impl InMemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_when<F>(predicate: F) -> Self
    where
        F: Fn(&PublishedMessage) -> bool + Send + Sync + 'static,
    {
        Self {
            published: Arc::default(),
            fail_when: Some(Arc::new(predicate)),
        }
    }

    /// Messages accepted so far, in publish order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<PublishedMessage>> {
        self.published.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessagePublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, kind: &str, payload: &[u8]) -> Result<(), PublishError> {
        let message = PublishedMessage {
            topic: topic.to_string(),
            kind: kind.to_string(),
            payload: payload.to_vec(),
        };
        if self.fail_when.as_ref().is_some_and(|fail| fail(&message)) {
            return Err(PublishError::Rejected(format!("{topic}/{kind}")));
        }
        debug!(topic, kind, bytes = payload.len(), "message published");
        self.lock().push(message);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_accepted_messages_only() {
        let publisher = InMemoryPublisher::failing_when(|m| m.payload == b"bad");

        publisher.publish("t", "A", b"good").await.unwrap();
        let err = publisher.publish("t", "B", b"bad").await.unwrap_err();

        assert_eq!(err, PublishError::Rejected("t/B".to_string()));
        let published = publisher.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].kind, "A");
    }
}
