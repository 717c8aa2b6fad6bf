use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::{Header, Headers, Message, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use serde::Serialize;
use tracing::{info, warn};

use crate::{ConsumedRecord, EventBusError, EventBus, HandleOutcome};

/// Configuration for the Kafka-backed event bus, read from the environment
/// the way the rest of this service reads its configuration (see
/// `services/server/src/main.rs`).
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub bootstrap_servers: String,
    pub timeout_ms: u64,
    pub security_protocol: String,
}

impl KafkaConfig {
    pub fn from_env() -> Self {
        Self {
            bootstrap_servers: std::env::var("KAFKA_BOOTSTRAP_SERVERS")
                .unwrap_or_else(|_| "localhost:9092".to_owned()),
            timeout_ms: std::env::var("KAFKA_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),
            security_protocol: std::env::var("KAFKA_SECURITY_PROTOCOL")
                .unwrap_or_else(|_| "PLAINTEXT".to_owned()),
        }
    }
}

pub struct KafkaEventBus {
    producer: FutureProducer,
    config: KafkaConfig,
}

impl KafkaEventBus {
    pub fn new(config: KafkaConfig) -> Result<Self, EventBusError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("security.protocol", &config.security_protocol)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .set("retries", "10")
            .set("retry.backoff.ms", "1000")
            .set("max.in.flight.requests.per.connection", "5")
            .create()
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        Ok(Self { producer, config })
    }

    fn consumer(&self, group_id: &str) -> Result<StreamConsumer, EventBusError> {
        ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .set("security.protocol", &self.config.security_protocol)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(|e| EventBusError::Transport(e.to_string()))
    }

    /// Declares a topic if it does not already exist. Best-effort: used at
    /// startup so a fresh broker doesn't reject the first publish.
    pub async fn ensure_topic(&self, topic: &str, partitions: i32) -> Result<(), EventBusError> {
        let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
            .set("bootstrap.servers", &self.config.bootstrap_servers)
            .create()
            .map_err(|e| EventBusError::Transport(e.to_string()))?;
        let new_topic = NewTopic::new(topic, partitions, TopicReplication::Fixed(1));
        let opts = AdminOptions::new().operation_timeout(Some(Duration::from_millis(
            self.config.timeout_ms,
        )));
        match admin.create_topics(&[new_topic], &opts).await {
            Ok(_) => Ok(()),
            Err(e) => {
                warn!(error = %e, topic, "topic creation request failed, assuming it already exists");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl EventBus for KafkaEventBus {
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
        let record = FutureRecord::to(topic).key(key).payload(&body);
        self.producer
            .send(record, Duration::from_millis(self.config.timeout_ms))
            .await
            .map_err(|(e, _)| EventBusError::Transport(e.to_string()))?;
        Ok(())
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
        let consumer = self.consumer(group_id)?;
        consumer
            .subscribe(&[topic])
            .map_err(|e| EventBusError::Transport(e.to_string()))?;

        let mut attempts: std::collections::HashMap<(i32, i64), u32> = std::collections::HashMap::new();

        loop {
            let msg = match consumer.recv().await {
                Ok(msg) => msg,
                Err(e) => {
                    warn!(error = %e, topic, "consumer recv error, retrying");
                    continue;
                }
            };
            let record = ConsumedRecord {
                topic: topic.to_owned(),
                partition: msg.partition(),
                offset: msg.offset(),
                key: msg.key().map(|k| String::from_utf8_lossy(k).into_owned()),
                payload: msg.payload().unwrap_or_default().to_vec(),
            };
            let record_key = (record.partition, record.offset);

            match handler(record.clone()).await {
                HandleOutcome::Commit => {
                    attempts.remove(&record_key);
                    if let Err(e) = consumer.store_offset_from_message(&msg) {
                        warn!(error = %e, "failed to store offset");
                    }
                }
                HandleOutcome::DeadLetter { reason } => {
                    attempts.remove(&record_key);
                    info!(reason, "record dead-lettered");
                    let dlq = crate::dlq_topic(topic);
                    let headers = OwnedHeaders::new().insert(Header {
                        key: "dlq-reason",
                        value: Some(reason.as_str()),
                    });
                    let payload = record.payload.clone();
                    let key = record.key.clone().unwrap_or_default();
                    let send_record = FutureRecord::to(&dlq)
                        .key(&key)
                        .payload(&payload)
                        .headers(headers);
                    if let Err((e, _)) = self
                        .producer
                        .send(send_record, Duration::from_millis(self.config.timeout_ms))
                        .await
                    {
                        warn!(error = %e, "failed to publish to dlq");
                    }
                    if let Err(e) = consumer.store_offset_from_message(&msg) {
                        warn!(error = %e, "failed to store offset after dead-lettering");
                    }
                }
                HandleOutcome::Retry => {
                    let count = attempts.entry(record_key).or_insert(0);
                    *count += 1;
                    if *count > max_retries {
                        warn!(partition = record.partition, offset = record.offset, "retry budget exhausted, dead-lettering");
                        attempts.remove(&record_key);
                        let dlq = crate::dlq_topic(topic);
                        let payload = record.payload.clone();
                        let key = record.key.clone().unwrap_or_default();
                        let send_record = FutureRecord::to(&dlq).key(&key).payload(&payload);
                        if let Err((e, _)) = self
                            .producer
                            .send(send_record, Duration::from_millis(self.config.timeout_ms))
                            .await
                        {
                            warn!(error = %e, "failed to publish to dlq after retry exhaustion");
                        }
                        if let Err(e) = consumer.store_offset_from_message(&msg) {
                            warn!(error = %e, "failed to store offset after retry exhaustion");
                        }
                    }
                }
            }
        }
    }

    async fn tombstone(&self, topic: &str, key: &str) -> Result<(), EventBusError> {
        let record: FutureRecord<'_, str, [u8]> = FutureRecord::to(topic).key(key);
        self.producer
            .send(record, Duration::from_millis(self.config.timeout_ms))
            .await
            .map_err(|(e, _)| EventBusError::Transport(e.to_string()))?;
        Ok(())
    }
}
