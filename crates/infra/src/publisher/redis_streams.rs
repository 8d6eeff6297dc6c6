//! Redis Streams publisher.
//!
//! Each outbox row becomes one stream entry: `XADD <prefix><topic> * kind <kind> payload <bytes>`.
//! The stream key is the topic, so consumers of a topic read one stream and
//! route on the `kind` field.

use redis::aio::MultiplexedConnection;
use tracing::instrument;

use async_trait::async_trait;

use super::{MessagePublisher, PublishError};

#[derive(Clone)]
pub struct RedisStreamsPublisher {
    connection: MultiplexedConnection,
    key_prefix: String,
}

impl core::fmt::Debug for RedisStreamsPublisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsPublisher")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisStreamsPublisher {
    /// Connect to `redis_url` (e.g. "redis://localhost:6379").
    ///
    /// `key_prefix` is prepended to every topic to form the stream key.
    pub async fn connect(
        redis_url: impl AsRef<str>,
        key_prefix: impl Into<String>,
    ) -> Result<Self, PublishError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| PublishError::Connection(e.to_string()))?;
        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PublishError::Connection(e.to_string()))?;

        Ok(Self {
            connection,
            key_prefix: key_prefix.into(),
        })
    }

    fn stream_key(&self, topic: &str) -> String {
        format!("{}{}", self.key_prefix, topic)
    }
}

#[async_trait]
impl MessagePublisher for RedisStreamsPublisher {
    #[instrument(skip(self, payload), fields(bytes = payload.len()), err)]
    async fn publish(&self, topic: &str, kind: &str, payload: &[u8]) -> Result<(), PublishError> {
        let mut conn = self.connection.clone();

        let _: String = redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg("kind")
            .arg(kind)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| match e.kind() {
                redis::ErrorKind::IoError => PublishError::Connection(e.to_string()),
                _ => PublishError::Rejected(format!("XADD failed: {e}")),
            })?;

        Ok(())
    }
}
