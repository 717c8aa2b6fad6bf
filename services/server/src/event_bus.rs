use async_trait::async_trait;
use bcast_eventbus::{ConsumedRecord, EventBus, EventBusError, HandleOutcome, InMemoryEventBus, KafkaEventBus};
use serde::Serialize;

/// Runtime-selected event bus implementation. `EventBus`'s `publish` method
/// is generic, which rules out a `dyn EventBus` trait object; this enum
/// gives `AppState` a single concrete, `Clone`-able type instead, the same
/// way the connection registry and targeting service are erased behind
/// `Arc<dyn ...>` but here via a closed match instead (both traits live in
/// `bcast-eventbus`/`bcast-registry`/`bcast-targeting` and only the bus
/// needs this treatment).
#[derive(Clone)]
pub enum AnyEventBus {
    Kafka(std::sync::Arc<KafkaEventBus>),
    Memory(std::sync::Arc<InMemoryEventBus>),
}

#[async_trait]
impl EventBus for AnyEventBus {
    async fn publish<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<(), EventBusError>
    where
        T: 'async_trait,
    {
        match self {
            Self::Kafka(bus) => bus.publish(topic, key, payload).await,
            Self::Memory(bus) => bus.publish(topic, key, payload).await,
        }
    }

    async fn consume<F, Fut>(
        &self,
        topic: &str,
        group_id: &str,
        max_retries: u32,
        handler: F,
    ) -> Result<(), EventBusError>
    where
        F: Fn(ConsumedRecord) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = HandleOutcome> + Send,
    {
        match self {
            Self::Kafka(bus) => bus.consume(topic, group_id, max_retries, handler).await,
            Self::Memory(bus) => bus.consume(topic, group_id, max_retries, handler).await,
        }
    }

    async fn tombstone(&self, topic: &str, key: &str) -> Result<(), EventBusError> {
        match self {
            Self::Kafka(bus) => bus.tombstone(topic, key).await,
            Self::Memory(bus) => bus.tombstone(topic, key).await,
        }
    }
}
