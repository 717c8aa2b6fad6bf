use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use bcast_eventbus::{worker_topic, EventBus};
use bcast_protocol::{DeliveryEventType, MarkReadRequest, MessageDeliveryEvent};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::require_user;
use crate::http::response::{internal_error, not_found, HttpResult};
use crate::repo;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UserMessage {
    pub broadcast_id: i64,
    pub sender_name: String,
    pub content: String,
    pub category: String,
    pub priority: bcast_protocol::Priority,
    pub read_status: bcast_protocol::ReadStatus,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Deserialize)]
pub struct ListMessagesQuery {
    pub user_id: String,
    /// Opt-in: include already-`READ` rows. Omitted (the bare `?userId` call)
    /// returns only non-`READ` messages.
    #[serde(default)]
    pub include_read: bool,
}

/// Every non-read broadcast still on record for this user, most recent
/// first, unless `includeRead=true` asks for the full history.
pub async fn list_for_user(
    State(state): State<AppState>,
    Query(query): Query<ListMessagesQuery>,
    headers: HeaderMap,
) -> HttpResult<Json<Vec<UserMessage>>> {
    require_user(&state.pool, &headers, &query.user_id).await?;

    let rows = repo::user_broadcasts::list_for_user(&state.pool, &query.user_id, query.include_read)
        .await
        .map_err(internal_error)?;

    let mut messages = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(broadcast) = repo::broadcasts::get_broadcast(&state.pool, row.broadcast_id)
            .await
            .map_err(internal_error)?
        else {
            continue;
        };
        messages.push(UserMessage {
            broadcast_id: broadcast.id,
            sender_name: broadcast.sender_name,
            content: broadcast.content,
            category: broadcast.category,
            priority: broadcast.priority,
            read_status: row.read_status,
            created_at: row.created_at,
        });
    }
    Ok(Json(messages))
}

/// Marks one broadcast read for one user and fans a `Read` delivery event
/// back out so the same user's other signed-in devices drop the unread
/// badge without polling.
pub async fn mark_read(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<MarkReadRequest>) -> HttpResult<StatusCode> {
    require_user(&state.pool, &headers, &body.user_id).await?;

    let marked = repo::user_broadcasts::mark_read(&state.pool, body.broadcast_id, &body.user_id)
        .await
        .map_err(internal_error)?;
    if !marked {
        return Err(not_found("message not found or already read"));
    }
    repo::user_broadcasts::recompute_statistics(&state.pool, body.broadcast_id)
        .await
        .map_err(internal_error)?;

    let Some(broadcast) = repo::broadcasts::get_broadcast(&state.pool, body.broadcast_id)
        .await
        .map_err(internal_error)?
    else {
        return Ok(StatusCode::NO_CONTENT);
    };

    let connections = state.registry.locate(&body.user_id).await.map_err(internal_error)?;
    for conn in connections {
        let event = MessageDeliveryEvent {
            event_id: Uuid::new_v4(),
            broadcast_id: body.broadcast_id,
            user_id: body.user_id.clone(),
            event_type: DeliveryEventType::Read,
            pod_id: conn.pod_id.clone(),
            timestamp: Utc::now(),
            message: broadcast.clone(),
        };
        let _ = state.event_bus.publish(&worker_topic(&conn.pod_id), &body.user_id, &event).await;
    }

    Ok(StatusCode::NO_CONTENT)
}
