use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::http::response::{bad_request, internal_error, not_found, HttpResult};
use crate::repo;
use crate::state::AppState;

#[derive(Serialize)]
pub struct TokenView {
    pub token_id: Uuid,
    pub principal_type: String,
    pub principal_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub revoked: bool,
}

pub async fn list(State(state): State<AppState>) -> HttpResult<Json<Vec<TokenView>>> {
    let rows = repo::tokens::list(&state.pool).await.map_err(internal_error)?;
    Ok(Json(
        rows.into_iter()
            .map(|r| TokenView {
                token_id: r.token_id,
                principal_type: r.principal_type,
                principal_id: r.principal_id,
                created_at: r.created_at,
                revoked: r.revoked,
            })
            .collect(),
    ))
}

#[derive(Deserialize)]
pub struct CreateTokenRequest {
    pub principal_type: String,
    pub principal_id: String,
}

#[derive(Serialize)]
pub struct CreateTokenResponse {
    pub token_id: Uuid,
    pub principal_type: String,
    pub principal_id: String,
    pub token: String,
}

/// Mints a new bearer token for a principal (an admin console operator or an
/// end user) and returns the raw value exactly once; only its SHA-256 digest
/// is stored.
pub async fn create(State(state): State<AppState>, Json(body): Json<CreateTokenRequest>) -> HttpResult<(StatusCode, Json<CreateTokenResponse>)> {
    let principal_type = body.principal_type.trim();
    if principal_type != "admin" && principal_type != "user" {
        return Err(bad_request("principal_type must be \"admin\" or \"user\""));
    }
    let principal_id = body.principal_id.trim();
    if principal_id.is_empty() {
        return Err(bad_request("principal_id must not be empty"));
    }

    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let raw_token = URL_SAFE_NO_PAD.encode(bytes);
    let hash = Sha256::digest(raw_token.as_bytes());

    let token_id = repo::tokens::insert(&state.pool, hash.as_slice(), principal_type, principal_id)
        .await
        .map_err(internal_error)?;

    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token_id,
            principal_type: principal_type.to_owned(),
            principal_id: principal_id.to_owned(),
            token: raw_token,
        }),
    ))
}

pub async fn revoke(State(state): State<AppState>, Path(token_id): Path<Uuid>) -> HttpResult<StatusCode> {
    let revoked = repo::tokens::revoke(&state.pool, token_id).await.map_err(internal_error)?;
    if !revoked {
        return Err(not_found("token not found or already revoked"));
    }
    Ok(StatusCode::NO_CONTENT)
}
