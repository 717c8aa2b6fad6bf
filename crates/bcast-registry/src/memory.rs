use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use bcast_protocol::{Connection, PendingEvent};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{ConnectionRegistry, RegistryError};

#[derive(Default)]
struct Indexes {
    conns: HashMap<String, Connection>,
    by_user: HashMap<String, HashSet<String>>,
    by_pod: HashMap<String, HashSet<String>>,
    // (heartbeat epoch seconds, connection_id) -> () — sorted-by-score stand-in
    // for a Redis zset, scanned from the front for `stale_before`.
    heartbeat_order: BTreeMap<(i64, String), ()>,
    pending: HashMap<String, VecDeque<PendingEvent>>,
    pending_seen: HashMap<String, HashSet<i64>>,
}

/// Single-pod connection registry backed by `Arc<RwLock<..>>` maps, in the
/// manner of `AppState::broadcast_registry` in the teacher's dashboard
/// server, generalized from one shared per-stream channel to four mutually
/// consistent index families (connections, per-user, per-pod, heartbeat
/// order) plus the bounded pending buffer.
pub struct InMemoryConnectionRegistry {
    indexes: Arc<RwLock<Indexes>>,
    pending_capacity: usize,
}

impl InMemoryConnectionRegistry {
    pub fn new(pending_capacity: usize) -> Self {
        Self {
            indexes: Arc::new(RwLock::new(Indexes::default())),
            pending_capacity,
        }
    }
}

#[async_trait]
impl ConnectionRegistry for InMemoryConnectionRegistry {
    async fn register(
        &self,
        user_id: &str,
        connection_id: &str,
        pod_id: &str,
        cluster_id: &str,
    ) -> Result<(), RegistryError> {
        let now = Utc::now();
        let mut idx = self.indexes.write().await;
        if let Some(existing) = idx.conns.get(connection_id) {
            idx.heartbeat_order
                .remove(&(existing.last_heartbeat_at.timestamp(), connection_id.to_owned()));
        }
        let conn = Connection {
            connection_id: connection_id.to_owned(),
            user_id: user_id.to_owned(),
            pod_id: pod_id.to_owned(),
            cluster_id: cluster_id.to_owned(),
            connected_at: now,
            last_heartbeat_at: now,
        };
        idx.heartbeat_order
            .insert((now.timestamp(), connection_id.to_owned()), ());
        idx.by_user
            .entry(user_id.to_owned())
            .or_default()
            .insert(connection_id.to_owned());
        idx.by_pod
            .entry(pod_id.to_owned())
            .or_default()
            .insert(connection_id.to_owned());
        idx.conns.insert(connection_id.to_owned(), conn);
        Ok(())
    }

    async fn heartbeat(&self, pod_id: &str, connection_ids: &[String]) -> Result<(), RegistryError> {
        let now = Utc::now();
        let mut idx = self.indexes.write().await;
        for connection_id in connection_ids {
            if let Some(conn) = idx.conns.get_mut(connection_id) {
                if conn.pod_id != pod_id {
                    continue;
                }
                idx.heartbeat_order
                    .remove(&(conn.last_heartbeat_at.timestamp(), connection_id.clone()));
                conn.last_heartbeat_at = now;
                idx.heartbeat_order
                    .insert((now.timestamp(), connection_id.clone()), ());
            }
        }
        Ok(())
    }

    async fn stale_before(&self, threshold: DateTime<Utc>) -> Result<Vec<String>, RegistryError> {
        let idx = self.indexes.read().await;
        let cutoff = threshold.timestamp();
        Ok(idx
            .heartbeat_order
            .range(..(cutoff + 1, String::new()))
            .map(|((_, id), ())| id.clone())
            .collect())
    }

    async fn remove(&self, connection_ids: &[String]) -> Result<(), RegistryError> {
        let mut idx = self.indexes.write().await;
        for connection_id in connection_ids {
            if let Some(conn) = idx.conns.remove(connection_id) {
                idx.heartbeat_order
                    .remove(&(conn.last_heartbeat_at.timestamp(), connection_id.clone()));
                if let Some(set) = idx.by_user.get_mut(&conn.user_id) {
                    set.remove(connection_id);
                    if set.is_empty() {
                        idx.by_user.remove(&conn.user_id);
                    }
                }
                if let Some(set) = idx.by_pod.get_mut(&conn.pod_id) {
                    set.remove(connection_id);
                    if set.is_empty() {
                        idx.by_pod.remove(&conn.pod_id);
                    }
                }
            }
        }
        Ok(())
    }

    async fn locate(&self, user_id: &str) -> Result<Vec<Connection>, RegistryError> {
        let idx = self.indexes.read().await;
        Ok(idx
            .by_user
            .get(user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| idx.conns.get(id).cloned())
            .collect())
    }

    async fn pod_connections(&self, pod_id: &str) -> Result<Vec<String>, RegistryError> {
        let idx = self.indexes.read().await;
        Ok(idx
            .by_pod
            .get(pod_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn enqueue_pending(&self, user_id: &str, event: PendingEvent) -> Result<(), RegistryError> {
        let mut idx = self.indexes.write().await;
        let seen = idx.pending_seen.entry(user_id.to_owned()).or_default();
        if !seen.insert(event.broadcast_id) {
            // Already buffered for this user; replace in place (covers the
            // MESSAGE_REMOVED-while-still-pending resolution in DESIGN.md).
            if let Some(queue) = idx.pending.get_mut(user_id) {
                if let Some(slot) = queue
                    .iter_mut()
                    .find(|e| e.broadcast_id == event.broadcast_id)
                {
                    *slot = event;
                }
            }
            return Ok(());
        }
        let queue = idx.pending.entry(user_id.to_owned()).or_default();
        queue.push_back(event);
        while queue.len() > self.pending_capacity {
            if let Some(dropped) = queue.pop_front() {
                idx.pending_seen
                    .get_mut(user_id)
                    .map(|s| s.remove(&dropped.broadcast_id));
            }
        }
        Ok(())
    }

    async fn drain_pending(&self, user_id: &str) -> Result<Vec<PendingEvent>, RegistryError> {
        let mut idx = self.indexes.write().await;
        idx.pending_seen.remove(user_id);
        Ok(idx
            .pending
            .remove(user_id)
            .map(|queue| queue.into_iter().collect())
            .unwrap_or_default())
    }

    async fn ack_pending(&self, user_id: &str, broadcast_id: i64) -> Result<(), RegistryError> {
        let mut idx = self.indexes.write().await;
        if let Some(queue) = idx.pending.get_mut(user_id) {
            queue.retain(|e| e.broadcast_id != broadcast_id);
        }
        if let Some(seen) = idx.pending_seen.get_mut(user_id) {
            seen.remove(&broadcast_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_protocol::{Broadcast, BroadcastStatus, DeliveryEventType, MessageDeliveryEvent, Priority, TargetKind, TargetSpec};
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    fn sample_broadcast(id: i64) -> Broadcast {
        Broadcast {
            id,
            sender_id: "admin-1".to_owned(),
            sender_name: "Admin".to_owned(),
            content: "hello".to_owned(),
            target: TargetSpec {
                kind: TargetKind::Selected,
                ids: vec!["u1".to_owned()],
            },
            priority: Priority::Normal,
            category: "General".to_owned(),
            scheduled_at: None,
            expires_at: None,
            fire_and_forget: false,
            status: BroadcastStatus::Active,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn sample_pending(user_id: &str, broadcast_id: i64) -> PendingEvent {
        PendingEvent {
            user_id: user_id.to_owned(),
            broadcast_id,
            event: MessageDeliveryEvent {
                event_id: Uuid::new_v4(),
                broadcast_id,
                user_id: user_id.to_owned(),
                event_type: DeliveryEventType::Created,
                pod_id: "pod-a".to_owned(),
                timestamp: Utc::now(),
                message: sample_broadcast(broadcast_id),
            },
            enqueued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn register_then_locate_round_trips() {
        let reg = InMemoryConnectionRegistry::new(10);
        reg.register("u1", "c1", "pod-a", "cluster-1").await.unwrap();
        let conns = reg.locate("u1").await.unwrap();
        assert_eq!(conns.len(), 1);
        assert_eq!(conns[0].pod_id, "pod-a");
    }

    #[tokio::test]
    async fn remove_clears_all_indexes() {
        let reg = InMemoryConnectionRegistry::new(10);
        reg.register("u1", "c1", "pod-a", "cluster-1").await.unwrap();
        reg.remove(&["c1".to_owned()]).await.unwrap();
        assert!(reg.locate("u1").await.unwrap().is_empty());
        assert!(reg.pod_connections("pod-a").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_before_finds_old_heartbeats_only() {
        let reg = InMemoryConnectionRegistry::new(10);
        reg.register("u1", "c1", "pod-a", "cluster-1").await.unwrap();
        let future = Utc::now() + ChronoDuration::seconds(120);
        let stale = reg.stale_before(future).await.unwrap();
        assert_eq!(stale, vec!["c1".to_owned()]);

        let past = Utc::now() - ChronoDuration::seconds(120);
        assert!(reg.stale_before(past).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn pending_buffer_dedups_by_broadcast_id_and_bounds_length() {
        let reg = InMemoryConnectionRegistry::new(2);
        reg.enqueue_pending("u1", sample_pending("u1", 1)).await.unwrap();
        reg.enqueue_pending("u1", sample_pending("u1", 1)).await.unwrap();
        reg.enqueue_pending("u1", sample_pending("u1", 2)).await.unwrap();
        reg.enqueue_pending("u1", sample_pending("u1", 3)).await.unwrap();

        let drained = reg.drain_pending("u1").await.unwrap();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].broadcast_id, 2);
        assert_eq!(drained[1].broadcast_id, 3);
    }

    #[tokio::test]
    async fn drain_pending_is_fifo_by_enqueue_order() {
        let reg = InMemoryConnectionRegistry::new(10);
        reg.enqueue_pending("u1", sample_pending("u1", 1)).await.unwrap();
        reg.enqueue_pending("u1", sample_pending("u1", 2)).await.unwrap();
        reg.enqueue_pending("u1", sample_pending("u1", 3)).await.unwrap();

        let drained = reg.drain_pending("u1").await.unwrap();
        let ids: Vec<i64> = drained.iter().map(|e| e.broadcast_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(reg.drain_pending("u1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn ack_pending_removes_single_entry() {
        let reg = InMemoryConnectionRegistry::new(10);
        reg.enqueue_pending("u1", sample_pending("u1", 1)).await.unwrap();
        reg.enqueue_pending("u1", sample_pending("u1", 2)).await.unwrap();
        reg.ack_pending("u1", 1).await.unwrap();

        let drained = reg.drain_pending("u1").await.unwrap();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].broadcast_id, 2);
    }
}
