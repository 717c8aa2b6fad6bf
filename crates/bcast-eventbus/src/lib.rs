// bcast-eventbus: typed publish/consume over a partitioned event log.
//
// Two implementations share the `EventBus` trait: `KafkaEventBus` for
// production (idempotent producer, manual-commit consumer, DLQ routing
// after a bounded retry count) and `InMemoryEventBus` for single-pod
// development and the test harness.

pub mod error;
pub mod kafka;
pub mod memory;

pub use error::EventBusError;
pub use kafka::{KafkaConfig, KafkaEventBus};
pub use memory::InMemoryEventBus;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

/// A single consumed record, opaque to the caller beyond what is needed to
/// ack it or route it to the dead-letter topic on un-retryable failure.
#[derive(Debug, Clone)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl ConsumedRecord {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, EventBusError> {
        serde_json::from_slice(&self.payload).map_err(EventBusError::Decode)
    }
}

/// What a consumer handler decided to do with one record.
pub enum HandleOutcome {
    /// Side effects applied; commit the offset.
    Commit,
    /// Transient failure; retry later without committing the offset.
    Retry,
    /// Un-retryable failure; send to the DLQ topic for this origin and commit.
    DeadLetter { reason: String },
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish `payload` to `topic`, partitioned by `key`.
    async fn publish<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<(), EventBusError>
    where
        T: 'async_trait;

    /// Run a consume loop against `topic` under `group_id` until `handler`
    /// returns an outcome other than `Commit` more than `max_retries` times
    /// for the same record, or the bus is shut down. Implementations commit
    /// offsets only after `handler` resolves to `Commit` or `DeadLetter`.
    async fn consume<F, Fut>(
        &self,
        topic: &str,
        group_id: &str,
        max_retries: u32,
        handler: F,
    ) -> Result<(), EventBusError>
    where
        F: Fn(ConsumedRecord) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = HandleOutcome> + Send;

    /// Publish a tombstone (null value, same key) so compacted DLQ topics
    /// drop a purged entry.
    async fn tombstone(&self, topic: &str, key: &str) -> Result<(), EventBusError>;
}

pub fn worker_topic(pod_id: &str) -> String {
    format!("worker-{pod_id}")
}

pub fn dlq_topic(origin: &str) -> String {
    format!("dlq-{origin}")
}

pub const ORCHESTRATION_TOPIC: &str = "orchestration";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_follow_the_naming_convention() {
        assert_eq!(worker_topic("pod-a"), "worker-pod-a");
        assert_eq!(dlq_topic("worker-pod-a"), "dlq-worker-pod-a");
    }
}
