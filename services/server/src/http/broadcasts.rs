use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bcast_eventbus::ORCHESTRATION_TOPIC;
use bcast_protocol::{
    Broadcast, BroadcastStats, BroadcastStatus, BroadcastSummary, CreateBroadcastRequest, OrchestrationEvent, TargetSpec,
    UserBroadcastRow,
};
use chrono::Utc;
use serde::Deserialize;

use crate::http::response::{bad_request, internal_error, not_found, HttpResult};
use crate::repo;
use crate::state::AppState;

/// Validates and stores a new broadcast, publishing its activation event in
/// the same transaction as the row insert (or skipping it entirely if the
/// broadcast already expires in the past — see `create`'s doc comment).
pub async fn create(State(state): State<AppState>, Json(body): Json<CreateBroadcastRequest>) -> HttpResult<(StatusCode, Json<Broadcast>)> {
    if body.content.trim().is_empty() {
        return Err(bad_request("content must not be empty"));
    }
    if body.category.trim().is_empty() {
        return Err(bad_request("category must not be empty"));
    }
    if let (Some(scheduled_at), Some(expires_at)) = (body.scheduled_at, body.expires_at) {
        if expires_at <= scheduled_at {
            return Err(bad_request("expiresAt must be after scheduledAt"));
        }
    }

    let new = repo::broadcasts::NewBroadcast {
        sender_id: body.sender_id,
        sender_name: body.sender_name,
        content: body.content,
        target: TargetSpec { kind: body.target_type, ids: body.target_ids },
        priority: body.priority,
        category: body.category,
        scheduled_at: body.scheduled_at,
        expires_at: body.expires_at,
        fire_and_forget: body.fire_and_forget,
    };

    let broadcast = repo::broadcasts::create_broadcast(&state.pool, new).await.map_err(internal_error)?;

    // A broadcast created with an expiry already in the past is recorded for
    // the audit trail but never fanned out; everything else that lands READY
    // (no scheduled_at, or scheduled_at already due) gets its activation
    // event published immediately rather than waiting for the next
    // scheduler tick.
    if matches!(broadcast.expires_at, Some(at) if at <= Utc::now()) {
        if repo::broadcasts::expire_immediately(&state.pool, broadcast.id).await.map_err(internal_error)? {
            return Ok((StatusCode::CREATED, Json(Broadcast { status: BroadcastStatus::Expired, ..broadcast })));
        }
    } else if broadcast.status == BroadcastStatus::Ready {
        publish_activate(&state, broadcast.id).await.map_err(internal_error)?;
    }

    Ok((StatusCode::CREATED, Json(broadcast)))
}

async fn publish_activate(state: &AppState, broadcast_id: i64) -> Result<(), sqlx::Error> {
    let mut tx = state.pool.begin().await?;
    let payload = serde_json::to_value(OrchestrationEvent::Activate { broadcast_id }).unwrap();
    repo::outbox::insert(&mut tx, &broadcast_id.to_string(), "Activate", ORCHESTRATION_TOPIC, &payload).await?;
    tx.commit().await
}

#[derive(Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

const DEFAULT_LIST_LIMIT: i64 = 50;

/// `filter=all` (or omitted) lists every broadcast; `filter=active` /
/// `filter=scheduled` restrict to that status. Each row carries its
/// denormalized delivery stats so the admin console doesn't need a
/// per-broadcast follow-up call.
pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> HttpResult<Json<Vec<BroadcastSummary>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let status = match query.filter.as_deref() {
        None | Some("all") | Some("") => None,
        Some("active") => Some(BroadcastStatus::Active),
        Some("scheduled") => Some(BroadcastStatus::Scheduled),
        Some(other) => return Err(bad_request(format!("unknown filter: {other}"))),
    };
    let broadcasts = repo::broadcasts::list_broadcast_summaries(&state.pool, status, limit, offset)
        .await
        .map_err(internal_error)?;
    Ok(Json(broadcasts))
}

pub async fn stats(State(state): State<AppState>, Path(broadcast_id): Path<i64>) -> HttpResult<Json<BroadcastStats>> {
    let stats = repo::broadcasts::get_statistics(&state.pool, broadcast_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("no statistics recorded for this broadcast yet"))?;
    Ok(Json(stats))
}

pub async fn deliveries(State(state): State<AppState>, Path(broadcast_id): Path<i64>) -> HttpResult<Json<Vec<UserBroadcastRow>>> {
    repo::broadcasts::get_broadcast(&state.pool, broadcast_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| not_found("broadcast not found"))?;
    let deliveries = repo::user_broadcasts::list_for_broadcast(&state.pool, broadcast_id).await.map_err(internal_error)?;
    Ok(Json(deliveries))
}

/// Cancels a broadcast. Mirrors the lifecycle scheduler's expire path:
/// transition, supersede still-pending per-user rows, then publish the
/// orchestration event in its own transaction with the outbox insert.
pub async fn cancel(State(state): State<AppState>, Path(broadcast_id): Path<i64>) -> HttpResult<StatusCode> {
    let cancelled = repo::broadcasts::cancel(&state.pool, broadcast_id).await.map_err(internal_error)?;
    if !cancelled {
        return Err(not_found("broadcast not found or already in a terminal state"));
    }
    repo::user_broadcasts::supersede_pending(&state.pool, broadcast_id).await.map_err(internal_error)?;

    let mut tx = state.pool.begin().await.map_err(internal_error)?;
    let payload = serde_json::to_value(OrchestrationEvent::Cancel { broadcast_id }).unwrap();
    repo::outbox::insert(&mut tx, &broadcast_id.to_string(), "Cancel", ORCHESTRATION_TOPIC, &payload)
        .await
        .map_err(internal_error)?;
    tx.commit().await.map_err(internal_error)?;

    Ok(StatusCode::NO_CONTENT)
}
