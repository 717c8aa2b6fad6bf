use bcast_eventbus::{worker_topic, ConsumedRecord, EventBus, HandleOutcome, ORCHESTRATION_TOPIC};
use bcast_protocol::{DeliveryEventType, MessageDeliveryEvent, OrchestrationEvent, PendingEvent};
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::repo;
use crate::state::AppState;

const GROUP_ID: &str = "fanout-orchestrator";
const MAX_RETRIES: u32 = 2;

/// Consumes the single-partition `orchestration` topic and drives each
/// broadcast's activation / expiry / cancellation fan-out. The topic's
/// single partition plus a shared consumer group id is what gives this
/// "elected leader" behaviour without a separate lock: only one pod's
/// consumer ever holds the partition at a time.
pub async fn run(state: AppState) {
    let result = state
        .event_bus
        .consume(ORCHESTRATION_TOPIC, GROUP_ID, MAX_RETRIES, move |record| {
            let state = state.clone();
            async move { handle_record(&state, record).await }
        })
        .await;
    if let Err(err) = result {
        error!(error = %err, "fan-out orchestrator consume loop exited");
    }
}

async fn handle_record(state: &AppState, record: ConsumedRecord) -> HandleOutcome {
    let event: OrchestrationEvent = match record.decode() {
        Ok(event) => event,
        Err(err) => return HandleOutcome::DeadLetter { reason: err.to_string() },
    };

    match event {
        OrchestrationEvent::Activate { broadcast_id } => handle_activate(state, broadcast_id).await,
        OrchestrationEvent::Expire { broadcast_id } => {
            notify_removed(state, broadcast_id, DeliveryEventType::Expired).await
        }
        OrchestrationEvent::Cancel { broadcast_id } => {
            notify_removed(state, broadcast_id, DeliveryEventType::Cancelled).await
        }
        OrchestrationEvent::RedriveRequested { .. } => {
            // Redrive is performed synchronously by the admin handler that
            // emitted this event; the orchestrator has nothing further to do.
            HandleOutcome::Commit
        }
    }
}

async fn handle_activate(state: &AppState, broadcast_id: i64) -> HandleOutcome {
    let activated = match repo::broadcasts::activate(&state.pool, broadcast_id).await {
        Ok(activated) => activated,
        Err(err) => {
            warn!(broadcast_id, error = %err, "failed to activate broadcast");
            return HandleOutcome::Retry;
        }
    };
    if !activated {
        info!(broadcast_id, "activation no-op, broadcast already past READY/SCHEDULED");
        return HandleOutcome::Commit;
    }

    let broadcast = match repo::broadcasts::get_broadcast(&state.pool, broadcast_id).await {
        Ok(Some(broadcast)) => broadcast,
        Ok(None) => return HandleOutcome::DeadLetter { reason: "broadcast disappeared after activate".to_owned() },
        Err(err) => {
            warn!(broadcast_id, error = %err, "failed to load activated broadcast");
            return HandleOutcome::Retry;
        }
    };

    let expansion = match state.targeting.expand(&broadcast.target).await {
        Ok(expansion) => expansion,
        Err(err) => {
            warn!(broadcast_id, error = %err, "target expansion failed, will retry");
            return HandleOutcome::Retry;
        }
    };
    if expansion.degraded {
        warn!(broadcast_id, "target expansion served from stale cache (directory degraded)");
    }

    if let Err(err) = repo::user_broadcasts::insert_targets(&state.pool, broadcast_id, &expansion.user_ids).await {
        warn!(broadcast_id, error = %err, "failed to insert per-user rows");
        return HandleOutcome::Retry;
    }
    if let Err(err) = repo::broadcasts::upsert_statistics(&state.pool, broadcast_id, expansion.user_ids.len() as i64).await {
        warn!(broadcast_id, error = %err, "failed to record target statistics");
        return HandleOutcome::Retry;
    }

    for user_id in &expansion.user_ids {
        if let Err(err) = deliver_to_user(state, &broadcast, user_id, DeliveryEventType::Created).await {
            warn!(broadcast_id, user_id, error = %err, "failed to route delivery event");
            return HandleOutcome::Retry;
        }
    }

    HandleOutcome::Commit
}

async fn deliver_to_user(
    state: &AppState,
    broadcast: &bcast_protocol::Broadcast,
    user_id: &str,
    event_type: DeliveryEventType,
) -> Result<(), bcast_registry::RegistryError> {
    let connections = state.registry.locate(user_id).await?;

    if connections.is_empty() {
        let event = build_event(broadcast, user_id, event_type, &state.pod_id);
        state
            .registry
            .enqueue_pending(
                user_id,
                PendingEvent {
                    user_id: user_id.to_owned(),
                    broadcast_id: broadcast.id,
                    event,
                    enqueued_at: Utc::now(),
                },
            )
            .await?;
        return Ok(());
    }

    for conn in connections {
        let event = build_event(broadcast, user_id, event_type, &conn.pod_id);
        let topic = worker_topic(&conn.pod_id);
        if let Err(err) = state.event_bus.publish(&topic, user_id, &event).await {
            warn!(user_id, pod_id = %conn.pod_id, error = %err, "failed to publish delivery event, buffering as pending");
            state
                .registry
                .enqueue_pending(
                    user_id,
                    PendingEvent {
                        user_id: user_id.to_owned(),
                        broadcast_id: broadcast.id,
                        event,
                        enqueued_at: Utc::now(),
                    },
                )
                .await?;
        }
    }
    Ok(())
}

fn build_event(
    broadcast: &bcast_protocol::Broadcast,
    user_id: &str,
    event_type: DeliveryEventType,
    pod_id: &str,
) -> MessageDeliveryEvent {
    MessageDeliveryEvent {
        event_id: Uuid::new_v4(),
        broadcast_id: broadcast.id,
        user_id: user_id.to_owned(),
        event_type,
        pod_id: pod_id.to_owned(),
        timestamp: Utc::now(),
        message: broadcast.clone(),
    }
}

/// Expiry/cancellation: the lifecycle scheduler (or the admin cancel
/// handler) has already transitioned the broadcast and superseded pending
/// rows; this only needs to notify whoever is currently connected so their
/// client drops the message from view.
async fn notify_removed(state: &AppState, broadcast_id: i64, event_type: DeliveryEventType) -> HandleOutcome {
    let broadcast = match repo::broadcasts::get_broadcast(&state.pool, broadcast_id).await {
        Ok(Some(broadcast)) => broadcast,
        Ok(None) => return HandleOutcome::Commit,
        Err(err) => {
            warn!(broadcast_id, error = %err, "failed to load broadcast for removal notice");
            return HandleOutcome::Retry;
        }
    };

    let user_ids = match repo::user_broadcasts::list_users_for_broadcast(&state.pool, broadcast_id).await {
        Ok(user_ids) => user_ids,
        Err(err) => {
            warn!(broadcast_id, error = %err, "failed to list targeted users for removal notice");
            return HandleOutcome::Retry;
        }
    };

    for user_id in user_ids {
        if let Err(err) = deliver_to_user(state, &broadcast, &user_id, event_type).await {
            warn!(broadcast_id, user_id, error = %err, "failed to route removal notice");
            return HandleOutcome::Retry;
        }
    }
    HandleOutcome::Commit
}
