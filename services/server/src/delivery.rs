use bcast_eventbus::{worker_topic, ConsumedRecord, EventBus, HandleOutcome};
use bcast_protocol::{DeliveryEventType, MessageDeliveryEvent, PendingEvent, FORCE_LOGOFF_CATEGORY};
use chrono::Utc;
use tracing::{info, warn};

use crate::push::PushFrame;
use crate::repo;
use crate::state::AppState;

const MAX_RETRIES: u32 = 2;

/// Consumes `worker-<this pod>` and hands each event to the push manager for
/// whichever of this pod's connections own the target user, marking the
/// per-user row delivered only after the push channel accepted the frame.
pub async fn run(state: AppState) {
    let topic = worker_topic(&state.pod_id);
    let group_id = format!("delivery-worker-{}", state.pod_id);
    let result = state
        .event_bus
        .consume(&topic, &group_id, MAX_RETRIES, move |record| {
            let state = state.clone();
            async move { handle_record(&state, record).await }
        })
        .await;
    if let Err(err) = result {
        warn!(pod_id = %state.pod_id, error = %err, "delivery worker consume loop exited");
    }
}

async fn handle_record(state: &AppState, record: ConsumedRecord) -> HandleOutcome {
    let event: MessageDeliveryEvent = match record.decode() {
        Ok(event) => event,
        Err(err) => return HandleOutcome::DeadLetter { reason: err.to_string() },
    };

    let connections = match state.registry.locate(&event.user_id).await {
        Ok(connections) => connections,
        Err(err) => {
            warn!(user_id = %event.user_id, error = %err, "registry lookup failed");
            return HandleOutcome::Retry;
        }
    };

    let local: Vec<_> = connections.iter().filter(|c| c.pod_id == state.pod_id).collect();
    if local.is_empty() {
        return reroute_or_buffer(state, &event, &connections).await;
    }

    let frame = push_frame_for(&event);
    let mut any_delivered = false;
    for conn in &local {
        if state.send_to_connection(&conn.connection_id, frame.clone()).await {
            any_delivered = true;
            if event.event_type == DeliveryEventType::Created && event.message.category == FORCE_LOGOFF_CATEGORY {
                state.unregister_push_channel(&conn.connection_id).await;
                info!(connection_id = %conn.connection_id, "force logoff broadcast delivered, connection closed");
            }
        }
    }

    if !any_delivered {
        return buffer_pending(state, &event).await;
    }

    if event.event_type == DeliveryEventType::Created {
        if let Err(err) = repo::user_broadcasts::mark_delivered(&state.pool, event.broadcast_id, &event.user_id).await {
            warn!(broadcast_id = event.broadcast_id, user_id = %event.user_id, error = %err, "failed to mark delivered");
            return HandleOutcome::Retry;
        }
        if let Err(err) = repo::user_broadcasts::recompute_statistics(&state.pool, event.broadcast_id).await {
            warn!(broadcast_id = event.broadcast_id, error = %err, "failed to recompute statistics");
            return HandleOutcome::Retry;
        }
    }

    HandleOutcome::Commit
}

pub(crate) fn push_frame_for(event: &MessageDeliveryEvent) -> PushFrame {
    match event.event_type {
        DeliveryEventType::Created => PushFrame::Message(Box::new(event.clone())),
        DeliveryEventType::Cancelled | DeliveryEventType::Expired => {
            PushFrame::MessageRemoved { broadcast_id: event.broadcast_id }
        }
        DeliveryEventType::Read => PushFrame::ReadReceipt { broadcast_id: event.broadcast_id },
    }
}

/// The registry said this user has no connection on our pod by the time we
/// got here (cross-pod rebalance race). Re-route to wherever they actually
/// are now, or buffer if they're fully offline.
async fn reroute_or_buffer(
    state: &AppState,
    event: &MessageDeliveryEvent,
    connections: &[bcast_protocol::Connection],
) -> HandleOutcome {
    if connections.is_empty() {
        return buffer_pending(state, event).await;
    }
    for conn in connections {
        let topic = worker_topic(&conn.pod_id);
        let mut rerouted = event.clone();
        rerouted.pod_id = conn.pod_id.clone();
        if let Err(err) = state.event_bus.publish(&topic, &event.user_id, &rerouted).await {
            warn!(user_id = %event.user_id, pod_id = %conn.pod_id, error = %err, "failed to reroute delivery event");
            return HandleOutcome::Retry;
        }
    }
    HandleOutcome::Commit
}

async fn buffer_pending(state: &AppState, event: &MessageDeliveryEvent) -> HandleOutcome {
    let pending = PendingEvent {
        user_id: event.user_id.clone(),
        broadcast_id: event.broadcast_id,
        event: event.clone(),
        enqueued_at: Utc::now(),
    };
    match state.registry.enqueue_pending(&event.user_id, pending).await {
        Ok(()) => HandleOutcome::Commit,
        Err(err) => {
            warn!(user_id = %event.user_id, error = %err, "failed to buffer pending event");
            HandleOutcome::Retry
        }
    }
}
