use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tracing::info;

use crate::auth::require_user;
use crate::delivery::push_frame_for;
use crate::http::response::{bad_request, HttpResult};
use crate::push::{self, PushFrame};
use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Deserialize)]
pub struct ConnectQuery {
    pub user_id: String,
    pub connection_id: String,
}

/// Opens a long-lived SSE stream for one connection. Buffered pending events
/// are flushed to the client before the live channel takes over, so a
/// reconnecting client never loses a broadcast it missed while offline.
pub async fn connect(
    State(state): State<AppState>,
    Query(query): Query<ConnectQuery>,
    headers: HeaderMap,
) -> HttpResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if query.user_id.trim().is_empty() || query.connection_id.trim().is_empty() {
        return Err(bad_request("userId and connectionId are required"));
    }

    require_user(&state.pool, &headers, &query.user_id).await?;

    state
        .registry
        .register(&query.user_id, &query.connection_id, &state.pod_id, &state.cluster_id)
        .await
        .map_err(crate::http::response::internal_error)?;

    let pending = state
        .registry
        .drain_pending(&query.user_id)
        .await
        .map_err(crate::http::response::internal_error)?;

    let (tx, rx) = push::channel(push::CHANNEL_CAPACITY);
    state.register_push_channel(&query.connection_id, tx.clone()).await;

    for entry in pending {
        let frame = push_frame_for(&entry.event);
        let _ = push::enqueue(&tx, frame).await;
    }
    let _ = push::enqueue(&tx, PushFrame::Connected { connection_id: query.connection_id.clone() }).await;

    info!(user_id = %query.user_id, connection_id = %query.connection_id, "sse connected");

    let stream = stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|frame| (frame, rx)) }).map(|frame| {
        let data = serde_json::to_string(&frame.payload_json()).unwrap_or_else(|_| "{}".to_owned());
        Ok(Event::default().event(frame_event_name(&frame)).data(data))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL).text("heartbeat")))
}

fn frame_event_name(frame: &PushFrame) -> &'static str {
    match frame.kind() {
        bcast_protocol::PushEventKind::Connected => "CONNECTED",
        bcast_protocol::PushEventKind::Message => "MESSAGE",
        bcast_protocol::PushEventKind::ReadReceipt => "READ_RECEIPT",
        bcast_protocol::PushEventKind::MessageRemoved => "MESSAGE_REMOVED",
        bcast_protocol::PushEventKind::Heartbeat => "HEARTBEAT",
        bcast_protocol::PushEventKind::ConnectionLimitReached => "CONNECTION_LIMIT_REACHED",
    }
}

#[derive(Deserialize)]
pub struct DisconnectQuery {
    pub user_id: String,
    pub connection_id: String,
}

/// Beacon-friendly disconnect: best-effort, always 204 so a `navigator.sendBeacon`
/// call from an unloading tab never surfaces an error.
pub async fn disconnect(State(state): State<AppState>, Query(query): Query<DisconnectQuery>) -> axum::http::StatusCode {
    state.unregister_push_channel(&query.connection_id).await;
    let _ = state.registry.remove(&[query.connection_id.clone()]).await;
    info!(user_id = %query.user_id, connection_id = %query.connection_id, "sse disconnected");
    axum::http::StatusCode::NO_CONTENT
}
