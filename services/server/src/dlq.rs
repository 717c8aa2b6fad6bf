use bcast_eventbus::{dlq_topic, worker_topic, ConsumedRecord, EventBus, HandleOutcome, ORCHESTRATION_TOPIC};
use bcast_protocol::{BroadcastStatus, PurgeAllResult, RedriveAllResult, RedriveFailure};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::repo;
use crate::state::AppState;

const MAX_RETRIES: u32 = 2;

/// Consumes this pod's own DLQ topics (the orchestration DLQ, shared across
/// pods via the consumer group, and this pod's own worker DLQ) and persists
/// a `DltEntry` for each dead-lettered record.
pub async fn run(state: AppState) {
    let orchestration_dlq = dlq_topic(ORCHESTRATION_TOPIC);
    let worker_dlq = dlq_topic(&worker_topic(&state.pod_id));

    let a = consume_dlq(state.clone(), orchestration_dlq);
    let b = consume_dlq(state.clone(), worker_dlq);
    tokio::join!(a, b);
}

async fn consume_dlq(state: AppState, topic: String) {
    let group_id = format!("dlq-handler-{}", state.pod_id);
    let result = state
        .event_bus
        .consume(&topic, &group_id, MAX_RETRIES, move |record| {
            let state = state.clone();
            let topic = topic.clone();
            async move { handle_record(&state, &topic, record).await }
        })
        .await;
    if let Err(err) = result {
        error!(error = %err, "dlq consumer exited");
    }
}

async fn handle_record(state: &AppState, origin_topic: &str, record: ConsumedRecord) -> HandleOutcome {
    let decoded = record.decode::<bcast_protocol::MessageDeliveryEvent>().ok();
    let summary = summarize(&record, decoded.as_ref());
    let entry = repo::dlt::NewDltEntry {
        original_topic: origin_topic.to_owned(),
        original_partition: record.partition,
        original_offset: record.offset,
        original_key: record.key.clone(),
        payload: serde_json::from_slice(&record.payload).unwrap_or(serde_json::Value::Null),
        failure_summary: summary,
        failure_detail: None,
    };

    match repo::dlt::insert(&state.pool, entry).await {
        Ok(id) => {
            info!(dlt_id = %id, origin_topic, "persisted dead-lettered record");
            if let Some(event) = &decoded {
                if let Err(err) = repo::user_broadcasts::mark_failed(&state.pool, event.broadcast_id, &event.user_id).await {
                    warn!(error = %err, broadcast_id = event.broadcast_id, user_id = %event.user_id, "failed to mark user broadcast row FAILED");
                }
            }
            HandleOutcome::Commit
        }
        Err(err) => {
            warn!(error = %err, "failed to persist dlt entry, will retry");
            HandleOutcome::Retry
        }
    }
}

fn summarize(record: &ConsumedRecord, decoded: Option<&bcast_protocol::MessageDeliveryEvent>) -> String {
    match decoded {
        Some(event) => format!(
            "event {:?} for user {} (broadcast: {})",
            event.event_type, event.user_id, event.broadcast_id
        ),
        None => match record.key.as_deref() {
            Some(key) => format!("undecodable record, key={key}"),
            None => "undecodable record".to_owned(),
        },
    }
}

/// Re-publish the original payload to its original topic and remove the
/// `DltEntry`. Refuses if the parent broadcast is no longer active.
pub async fn redrive(state: &AppState, id: Uuid) -> Result<(), RedriveError> {
    let entry = repo::dlt::get(&state.pool, id).await?.ok_or(RedriveError::NotFound)?;

    let broadcast_id = entry.payload.get("broadcast_id").and_then(serde_json::Value::as_i64);
    let user_id = entry.payload.get("user_id").and_then(serde_json::Value::as_str);

    if let Some(broadcast_id) = broadcast_id {
        let broadcast = repo::broadcasts::get_broadcast(&state.pool, broadcast_id).await?;
        match broadcast {
            Some(b) if b.status == BroadcastStatus::Active => {}
            _ => return Err(RedriveError::ParentNotActive),
        }
    }

    if let (Some(broadcast_id), Some(user_id)) = (broadcast_id, user_id) {
        repo::user_broadcasts::reset_to_pending(&state.pool, broadcast_id, user_id).await?;
    }

    let key = entry.original_key.clone().unwrap_or_default();
    state
        .event_bus
        .publish(&entry.original_topic, &key, &entry.payload)
        .await
        .map_err(RedriveError::Bus)?;
    repo::dlt::purge(&state.pool, id).await?;
    Ok(())
}

pub async fn purge(state: &AppState, id: Uuid) -> Result<bool, sqlx::Error> {
    let entry = repo::dlt::get(&state.pool, id).await?;
    let Some(entry) = entry else { return Ok(false) };
    let key = entry.original_key.clone().unwrap_or_default();
    let _ = state.event_bus.tombstone(&dlq_topic(&entry.original_topic), &key).await;
    repo::dlt::purge(&state.pool, id).await
}

/// Tombstones every entry's origin DLQ key before the bulk delete, mirroring
/// the per-entry cleanup `purge` does for a single entry.
pub async fn purge_all(state: &AppState) -> Result<PurgeAllResult, sqlx::Error> {
    let entries = repo::dlt::list(&state.pool, None).await?;
    for entry in &entries {
        let key = entry.original_key.clone().unwrap_or_default();
        let _ = state.event_bus.tombstone(&dlq_topic(&entry.original_topic), &key).await;
    }
    let purged = repo::dlt::purge_all(&state.pool).await?;
    Ok(PurgeAllResult { purged })
}

pub async fn redrive_all(state: &AppState) -> Result<RedriveAllResult, sqlx::Error> {
    let entries = repo::dlt::list(&state.pool, None).await?;
    let total = entries.len();
    let mut success = 0;
    let mut failures = Vec::new();

    for entry in entries {
        match redrive(state, entry.id).await {
            Ok(()) => success += 1,
            Err(err) => failures.push(RedriveFailure { id: entry.id, reason: err.to_string() }),
        }
    }

    Ok(RedriveAllResult { total, success, failure: failures.len(), failures })
}

#[derive(Debug, thiserror::Error)]
pub enum RedriveError {
    #[error("dlt entry not found")]
    NotFound,
    #[error("parent broadcast is not ACTIVE")]
    ParentNotActive,
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("event bus error: {0}")]
    Bus(bcast_eventbus::EventBusError),
}
