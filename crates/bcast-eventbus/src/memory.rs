use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, Mutex};

use crate::{ConsumedRecord, EventBus, EventBusError, HandleOutcome};

struct Topic {
    tx: mpsc::UnboundedSender<ConsumedRecord>,
    rx: Option<mpsc::UnboundedReceiver<ConsumedRecord>>,
    next_offset: AtomicI64,
}

/// Single-pod, in-process stand-in for the Kafka-backed bus. Used by the
/// test harness (`bcast-testkit`) and by single-pod development deployments
/// where `REGISTRY_BACKEND=memory`.
#[derive(Clone)]
pub struct InMemoryEventBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    tombstones: Arc<Mutex<Vec<(String, String)>>>,
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            tombstones: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn ensure_topic<'a>(
        topics: &'a mut HashMap<String, Topic>,
        name: &str,
    ) -> &'a mut Topic {
        topics.entry(name.to_owned()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            Topic {
                tx,
                rx: Some(rx),
                next_offset: AtomicI64::new(0),
            }
        })
    }

    /// Test helper: how many tombstones have been published, total.
    pub async fn tombstone_count(&self) -> usize {
        self.tombstones.lock().await.len()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish<T: Serialize + Sync>(
        &self,
        topic: &str,
        key: &str,
        payload: &T,
    ) -> Result<(), EventBusError>
    where
        T: 'async_trait,
    {
        let body = serde_json::to_vec(payload).map_err(EventBusError::Encode)?;
        let mut topics = self.topics.lock().await;
        let t = Self::ensure_topic(&mut topics, topic).await;
        let offset = t.next_offset.fetch_add(1, Ordering::SeqCst);
        let record = ConsumedRecord {
            topic: topic.to_owned(),
            partition: 0,
            offset,
            key: Some(key.to_owned()),
            payload: body,
        };
        t.tx
            .send(record)
            .map_err(|_| EventBusError::Transport("topic receiver dropped".to_owned()))
    }

    async fn consume<F, Fut>(
        &self,
        topic: &str,
        _group_id: &str,
        max_retries: u32,
        handler: F,
    ) -> Result<(), EventBusError>
    where
        F: Fn(ConsumedRecord) -> Fut + Send + Sync,
        Fut: std::future::Future<Output = HandleOutcome> + Send,
    {
        let mut rx = {
            let mut topics = self.topics.lock().await;
            let t = Self::ensure_topic(&mut topics, topic).await;
            t.rx
                .take()
                .ok_or_else(|| EventBusError::Transport("topic already has a consumer".to_owned()))?
        };

        let mut retries: HashMap<i64, u32> = HashMap::new();
        while let Some(record) = rx.recv().await {
            loop {
                match handler(record.clone()).await {
                    HandleOutcome::Commit => {
                        retries.remove(&record.offset);
                        break;
                    }
                    HandleOutcome::DeadLetter { .. } => {
                        retries.remove(&record.offset);
                        let dlq = crate::dlq_topic(topic);
                        self.tombstone(&dlq, record.key.as_deref().unwrap_or_default())
                            .await
                            .ok();
                        break;
                    }
                    HandleOutcome::Retry => {
                        let count = retries.entry(record.offset).or_insert(0);
                        *count += 1;
                        if *count > max_retries {
                            retries.remove(&record.offset);
                            let dlq = crate::dlq_topic(topic);
                            self.tombstone(&dlq, record.key.as_deref().unwrap_or_default())
                                .await
                                .ok();
                            break;
                        }
                        continue;
                    }
                }
            }
        }
        Ok(())
    }

    async fn tombstone(&self, topic: &str, key: &str) -> Result<(), EventBusError> {
        self.tombstones
            .lock()
            .await
            .push((topic.to_owned(), key.to_owned()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Payload {
        value: u32,
    }

    #[tokio::test]
    async fn publish_then_consume_delivers_payload() {
        let bus = InMemoryEventBus::new();
        bus.publish("t1", "k1", &Payload { value: 7 })
            .await
            .unwrap();

        let received = Arc::new(Mutex::new(None));
        let received2 = received.clone();
        let bus2 = bus.clone();
        let handle = tokio::spawn(async move {
            bus2.consume("t1", "g1", 2, move |record| {
                let received = received2.clone();
                async move {
                    let payload: Payload = record.decode().unwrap();
                    *received.lock().await = Some(payload);
                    HandleOutcome::Commit
                }
            })
            .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(*received.lock().await, Some(Payload { value: 7 }));
    }

    #[tokio::test]
    async fn retry_exhaustion_dead_letters_and_records_tombstone() {
        let bus = InMemoryEventBus::new();
        bus.publish("t2", "k1", &Payload { value: 1 })
            .await
            .unwrap();

        let bus2 = bus.clone();
        let handle = tokio::spawn(async move {
            bus2.consume("t2", "g1", 1, |_record| async { HandleOutcome::Retry })
                .await
        });

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        handle.abort();

        assert_eq!(bus.tombstone_count().await, 1);
    }
}
