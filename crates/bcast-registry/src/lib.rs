// bcast-registry: cluster-wide map of user -> connection -> pod, with
// heartbeat-based liveness and a bounded per-user pending-event buffer.
//
// Ships two implementations behind the same trait, selected at startup from
// `REGISTRY_BACKEND` (mirrors the in-memory/Redis pluggable topic backend
// pattern used elsewhere in this corpus): `InMemoryConnectionRegistry` for
// single-pod deployments and the test harness, `RedisConnectionRegistry` for
// a real cluster.

pub mod error;
pub mod memory;
pub mod redis_backend;

pub use error::RegistryError;
pub use memory::InMemoryConnectionRegistry;
pub use redis_backend::RedisConnectionRegistry;

use async_trait::async_trait;
use bcast_protocol::{Connection, PendingEvent};
use chrono::{DateTime, Utc};

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Register a newly-opened connection, refreshing its TTL.
    async fn register(
        &self,
        user_id: &str,
        connection_id: &str,
        pod_id: &str,
        cluster_id: &str,
    ) -> Result<(), RegistryError>;

    /// Refresh the heartbeat score for a batch of connections owned by `pod_id`.
    async fn heartbeat(&self, pod_id: &str, connection_ids: &[String]) -> Result<(), RegistryError>;

    /// All connections whose last heartbeat is older than `threshold`.
    async fn stale_before(&self, threshold: DateTime<Utc>) -> Result<Vec<String>, RegistryError>;

    /// Remove connections from every index. Idempotent.
    async fn remove(&self, connection_ids: &[String]) -> Result<(), RegistryError>;

    /// Every live connection currently owned by `user_id`.
    async fn locate(&self, user_id: &str) -> Result<Vec<Connection>, RegistryError>;

    /// Every connection id currently owned by `pod_id`.
    async fn pod_connections(&self, pod_id: &str) -> Result<Vec<String>, RegistryError>;

    /// Buffer `event` for an offline user. Deduplicated by
    /// `(user_id, broadcast_id)`; bounded per user (oldest dropped first).
    async fn enqueue_pending(&self, user_id: &str, event: PendingEvent) -> Result<(), RegistryError>;

    /// Drain and return the full pending buffer for `user_id`, oldest first.
    async fn drain_pending(&self, user_id: &str) -> Result<Vec<PendingEvent>, RegistryError>;

    /// Remove a single pending entry by broadcast id without draining the
    /// rest of the buffer (used for read-before-reconnect acks).
    async fn ack_pending(&self, user_id: &str, broadcast_id: i64) -> Result<(), RegistryError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trait_object_is_dyn_compatible() {
        let reg: Box<dyn ConnectionRegistry> = Box::new(InMemoryConnectionRegistry::new(100));
        reg.register("u1", "c1", "pod-a", "cluster-1").await.unwrap();
        let conns = reg.locate("u1").await.unwrap();
        assert_eq!(conns.len(), 1);
    }
}
