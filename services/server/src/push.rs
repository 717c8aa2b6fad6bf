use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bcast_protocol::{MessageDeliveryEvent, PushEventKind};
use serde_json::json;
use tokio::sync::{Mutex, Notify};
use tracing::warn;

/// Default bound on a single connection's outbound channel.
pub const CHANNEL_CAPACITY: usize = 256;

struct Shared {
    queue: Mutex<VecDeque<PushFrame>>,
    notify: Notify,
    capacity: usize,
    senders: AtomicUsize,
}

/// The writer-task half of a connection's push channel. A bounded
/// deque rather than a plain `mpsc::Sender` so non-urgent backpressure can
/// evict the oldest queued frame instead of refusing the newest one.
pub struct PushSender {
    shared: Arc<Shared>,
}

impl Clone for PushSender {
    fn clone(&self) -> Self {
        self.shared.senders.fetch_add(1, Ordering::SeqCst);
        Self { shared: self.shared.clone() }
    }
}

impl Drop for PushSender {
    fn drop(&mut self) {
        if self.shared.senders.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.notify.notify_one();
        }
    }
}

/// The SSE stream's read half. Single-consumer: one receiver per connection.
pub struct PushReceiver {
    shared: Arc<Shared>,
}

/// A bounded, drop-oldest channel: `capacity` is the per-connection outbound
/// buffer size from SPEC_FULL §4.7.
pub fn channel(capacity: usize) -> (PushSender, PushReceiver) {
    let shared = Arc::new(Shared {
        queue: Mutex::new(VecDeque::with_capacity(capacity)),
        notify: Notify::new(),
        capacity,
        senders: AtomicUsize::new(1),
    });
    (PushSender { shared: shared.clone() }, PushReceiver { shared })
}

impl PushSender {
    /// Non-urgent insert: if the queue is already at capacity, evicts the
    /// oldest queued frame to make room rather than refusing this one.
    /// Returns `false` when an eviction happened, so the caller can log it.
    async fn push_drop_oldest(&self, frame: PushFrame) -> bool {
        let mut queue = self.shared.queue.lock().await;
        let evicted = queue.len() >= self.shared.capacity;
        if evicted {
            queue.pop_front();
        }
        queue.push_back(frame);
        drop(queue);
        self.shared.notify.notify_one();
        !evicted
    }

    /// Urgent insert: waits up to `timeout` for room to open up rather than
    /// evicting anything. Gives up (without enqueuing) if the deadline passes.
    async fn push_urgent(&self, frame: PushFrame, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut queue = self.shared.queue.lock().await;
                if queue.len() < self.shared.capacity {
                    queue.push_back(frame);
                    drop(queue);
                    self.shared.notify.notify_one();
                    return true;
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

impl PushReceiver {
    /// Returns `None` once every `PushSender` for this connection has been
    /// dropped and the queue is drained, ending the SSE stream.
    pub async fn recv(&mut self) -> Option<PushFrame> {
        loop {
            {
                let mut queue = self.shared.queue.lock().await;
                if let Some(frame) = queue.pop_front() {
                    return Some(frame);
                }
            }
            if self.shared.senders.load(Ordering::SeqCst) == 0 {
                return None;
            }
            self.shared.notify.notified().await;
        }
    }
}

/// A single frame the push stream manager hands to the per-connection
/// writer task, which serializes it as one SSE `event: .. / data: ..` pair.
/// Grounded on `http/sse.rs::dashboard_sse`'s event-type dispatch, adapted
/// from a shared per-stream broadcast channel to a dedicated bounded
/// drop-oldest channel per connection (see DESIGN.md for why a shared
/// channel doesn't fit here: each user connection needs its own
/// backpressure and drop policy).
#[derive(Debug, Clone)]
pub enum PushFrame {
    Connected { connection_id: String },
    Message(Box<MessageDeliveryEvent>),
    ReadReceipt { broadcast_id: i64 },
    MessageRemoved { broadcast_id: i64 },
    Heartbeat,
    ConnectionLimitReached,
}

impl PushFrame {
    pub fn heartbeat() -> Self {
        Self::Heartbeat
    }

    pub fn kind(&self) -> PushEventKind {
        match self {
            Self::Connected { .. } => PushEventKind::Connected,
            Self::Message(_) => PushEventKind::Message,
            Self::ReadReceipt { .. } => PushEventKind::ReadReceipt,
            Self::MessageRemoved { .. } => PushEventKind::MessageRemoved,
            Self::Heartbeat => PushEventKind::Heartbeat,
            Self::ConnectionLimitReached => PushEventKind::ConnectionLimitReached,
        }
    }

    /// True for events that must never be silently dropped on backpressure.
    pub fn is_urgent(&self) -> bool {
        matches!(self, Self::Message(event) if event.message.priority == bcast_protocol::Priority::Urgent)
    }

    pub fn payload_json(&self) -> serde_json::Value {
        match self {
            Self::Connected { connection_id } => json!({ "connectionId": connection_id }),
            Self::Message(event) => serde_json::to_value(event.as_ref()).unwrap_or(json!({})),
            Self::ReadReceipt { broadcast_id } => json!({ "broadcastId": broadcast_id }),
            Self::MessageRemoved { broadcast_id } => json!({ "broadcastId": broadcast_id }),
            Self::Heartbeat => json!({}),
            Self::ConnectionLimitReached => json!({}),
        }
    }
}

/// Send `frame` to `tx`, respecting the backpressure policy from
/// SPEC_FULL.md §4.7: a full channel drops its oldest queued non-urgent
/// frame to make room for the new one; urgent frames get a short blocking
/// grace period before giving up (the caller is expected to close the
/// connection when this returns `false`, since the pending buffer will
/// redeliver on reconnect).
pub async fn enqueue(tx: &PushSender, frame: PushFrame) -> bool {
    if frame.is_urgent() {
        let delivered = tx.push_urgent(frame, Duration::from_secs(1)).await;
        if !delivered {
            warn!("urgent push frame could not be delivered within grace period");
        }
        delivered
    } else {
        let evicted_nothing = tx.push_drop_oldest(frame).await;
        if !evicted_nothing {
            warn!("push channel full, dropped oldest queued frame");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcast_protocol::{Broadcast, BroadcastStatus, DeliveryEventType, Priority, TargetKind, TargetSpec};
    use chrono::Utc;
    use uuid::Uuid;

    fn sample_event(priority: Priority) -> MessageDeliveryEvent {
        MessageDeliveryEvent {
            event_id: Uuid::new_v4(),
            broadcast_id: 1,
            user_id: "u1".to_owned(),
            event_type: DeliveryEventType::Created,
            pod_id: "pod-a".to_owned(),
            timestamp: Utc::now(),
            message: Broadcast {
                id: 1,
                sender_id: "admin".to_owned(),
                sender_name: "Admin".to_owned(),
                content: "hi".to_owned(),
                target: TargetSpec {
                    kind: TargetKind::Selected,
                    ids: vec!["u1".to_owned()],
                },
                priority,
                category: "General".to_owned(),
                scheduled_at: None,
                expires_at: None,
                fire_and_forget: false,
                status: BroadcastStatus::Active,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }

    #[test]
    fn only_urgent_messages_are_marked_urgent() {
        let normal = PushFrame::Message(Box::new(sample_event(Priority::Normal)));
        let urgent = PushFrame::Message(Box::new(sample_event(Priority::Urgent)));
        assert!(!normal.is_urgent());
        assert!(urgent.is_urgent());
        assert!(!PushFrame::Heartbeat.is_urgent());
    }

    #[tokio::test]
    async fn non_urgent_frame_evicts_the_oldest_queued_frame_when_full() {
        let (tx, mut rx) = channel(1);
        assert!(enqueue(&tx, PushFrame::ReadReceipt { broadcast_id: 1 }).await);
        // queue is now at capacity; this enqueue must still succeed by evicting
        // the read receipt above rather than refusing the new heartbeat.
        assert!(enqueue(&tx, PushFrame::Heartbeat).await);
        assert!(matches!(rx.recv().await.unwrap(), PushFrame::Heartbeat));
    }

    #[tokio::test]
    async fn frame_is_delivered_when_channel_has_capacity() {
        let (tx, mut rx) = channel(4);
        assert!(enqueue(&tx, PushFrame::Heartbeat).await);
        assert!(matches!(rx.recv().await.unwrap(), PushFrame::Heartbeat));
    }
}
