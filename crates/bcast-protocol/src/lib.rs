// bcast-protocol: wire types shared by every component of the broadcast
// messaging platform.
//
// Event payloads use a top-level `eventType` field for discriminated
// deserialization. Decoders must ignore unknown fields so new event types
// can roll out without breaking older consumers mid-deploy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Broadcast domain types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BroadcastStatus {
    Scheduled,
    Ready,
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetKind {
    All,
    Selected,
    Role,
    Product,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetSpec {
    pub kind: TargetKind,
    #[serde(default)]
    pub ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Failed,
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ReadStatus {
    Unread,
    Read,
}

/// A single broadcast, as created by an admin caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub id: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub target: TargetSpec,
    pub priority: Priority,
    pub category: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub fire_and_forget: bool,
    pub status: BroadcastStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reserved category that, on delivery, forces a client disconnect.
pub const FORCE_LOGOFF_CATEGORY: &str = "Force Logoff";

/// Per-recipient delivery state for one broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBroadcastRow {
    pub broadcast_id: i64,
    pub user_id: String,
    pub delivery_status: DeliveryStatus,
    pub read_status: ReadStatus,
    pub delivered_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastStats {
    pub broadcast_id: i64,
    pub total_targeted: i64,
    pub total_delivered: i64,
    pub total_read: i64,
}

impl BroadcastStats {
    pub fn delivery_rate(&self) -> f64 {
        if self.total_targeted == 0 {
            0.0
        } else {
            self.total_delivered as f64 / self.total_targeted as f64
        }
    }

    pub fn read_rate(&self) -> f64 {
        if self.total_targeted == 0 {
            0.0
        } else {
            self.total_read as f64 / self.total_targeted as f64
        }
    }
}

/// A `Broadcast` with its denormalized delivery stats attached, returned by
/// the list endpoint so an admin console doesn't need a follow-up call per row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastSummary {
    #[serde(flatten)]
    pub broadcast: Broadcast,
    pub stats: Option<BroadcastStats>,
}

// ---------------------------------------------------------------------------
// Event-bus payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryEventType {
    Created,
    Cancelled,
    Expired,
    Read,
}

/// The unit of work carried on the per-pod `worker-<pod_id>` topics and
/// buffered in the connection registry's pending list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDeliveryEvent {
    pub event_id: Uuid,
    pub broadcast_id: i64,
    pub user_id: String,
    pub event_type: DeliveryEventType,
    pub pod_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: Broadcast,
}

/// A control-plane event on the single-partition `orchestration` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OrchestrationEvent {
    Activate { broadcast_id: i64 },
    Expire { broadcast_id: i64 },
    Cancel { broadcast_id: i64 },
    RedriveRequested { dlt_id: Uuid },
}

/// Server-to-client push frame types, carried over SSE as the `event:` name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PushEventKind {
    Connected,
    Message,
    ReadReceipt,
    MessageRemoved,
    Heartbeat,
    ConnectionLimitReached,
}

/// Durable staging row describing an event not yet published to the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxRow {
    pub id: Uuid,
    pub aggregate_id: String,
    pub event_type: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Connection registry types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub connection_id: String,
    pub user_id: String,
    pub pod_id: String,
    pub cluster_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEvent {
    pub user_id: String,
    pub broadcast_id: i64,
    pub event: MessageDeliveryEvent,
    pub enqueued_at: DateTime<Utc>,
}

/// Default bound on a single user's pending buffer (oldest dropped beyond this).
pub const DEFAULT_PENDING_BUFFER_CAPACITY: usize = 100;

// ---------------------------------------------------------------------------
// DLQ
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DltEntry {
    pub id: Uuid,
    pub original_topic: String,
    pub original_partition: i32,
    pub original_offset: i64,
    pub original_key: Option<String>,
    pub payload: serde_json::Value,
    pub failure_summary: String,
    pub failure_detail: Option<String>,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedriveFailure {
    pub id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedriveAllResult {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub failures: Vec<RedriveFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeAllResult {
    pub purged: u64,
}

// ---------------------------------------------------------------------------
// HTTP API types
// ---------------------------------------------------------------------------

/// Frozen HTTP error envelope used by all non-2xx responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBroadcastRequest {
    pub sender_id: String,
    pub sender_name: String,
    pub content: String,
    pub target_type: TargetKind,
    #[serde(default)]
    pub target_ids: Vec<String>,
    pub priority: Priority,
    pub category: String,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fire_and_forget: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: String,
    pub broadcast_id: i64,
}

/// Frozen v1 error codes used on the push stream's `Error` control frame.
pub mod error_codes {
    pub const INVALID_TOKEN: &str = "INVALID_TOKEN";
    pub const CONNECTION_LIMIT_REACHED: &str = "CONNECTION_LIMIT_REACHED";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_rates_are_zero_with_no_targets() {
        let stats = BroadcastStats {
            broadcast_id: 1,
            total_targeted: 0,
            total_delivered: 0,
            total_read: 0,
        };
        assert_eq!(stats.delivery_rate(), 0.0);
        assert_eq!(stats.read_rate(), 0.0);
    }

    #[test]
    fn stats_rates_divide_correctly() {
        let stats = BroadcastStats {
            broadcast_id: 1,
            total_targeted: 4,
            total_delivered: 2,
            total_read: 1,
        };
        assert_eq!(stats.delivery_rate(), 0.5);
        assert_eq!(stats.read_rate(), 0.25);
    }

    #[test]
    fn orchestration_event_round_trips_through_json() {
        let event = OrchestrationEvent::Activate { broadcast_id: 42 };
        let json = serde_json::to_string(&event).unwrap();
        let back: OrchestrationEvent = serde_json::from_str(&json).unwrap();
        match back {
            OrchestrationEvent::Activate { broadcast_id } => assert_eq!(broadcast_id, 42),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
