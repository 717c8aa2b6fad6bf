use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use bcast_protocol::{DltEntry, PurgeAllResult, RedriveAllResult};
use serde::Deserialize;
use uuid::Uuid;

use crate::dlq;
use crate::http::response::{internal_error, not_found, HttpResult};
use crate::repo;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub origin_topic: Option<String>,
}

pub async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> HttpResult<Json<Vec<DltEntry>>> {
    let entries = repo::dlt::list(&state.pool, query.origin_topic.as_deref()).await.map_err(internal_error)?;
    Ok(Json(entries))
}

pub async fn redrive(State(state): State<AppState>, Path(id): Path<Uuid>) -> HttpResult<StatusCode> {
    dlq::redrive(&state, id).await.map_err(map_redrive_error)?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn redrive_all(State(state): State<AppState>) -> HttpResult<Json<RedriveAllResult>> {
    let result = dlq::redrive_all(&state).await.map_err(internal_error)?;
    Ok(Json(result))
}

pub async fn purge(State(state): State<AppState>, Path(id): Path<Uuid>) -> HttpResult<StatusCode> {
    let purged = dlq::purge(&state, id).await.map_err(internal_error)?;
    if !purged {
        return Err(not_found("dlt entry not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

pub async fn purge_all(State(state): State<AppState>) -> HttpResult<Json<PurgeAllResult>> {
    let result = dlq::purge_all(&state).await.map_err(internal_error)?;
    Ok(Json(result))
}

fn map_redrive_error(err: dlq::RedriveError) -> axum::response::Response {
    match err {
        dlq::RedriveError::NotFound => not_found(err.to_string()),
        dlq::RedriveError::ParentNotActive => crate::http::response::conflict(err.to_string()),
        dlq::RedriveError::Db(_) | dlq::RedriveError::Bus(_) => internal_error(err),
    }
}
