use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::http::response::{forbidden, json_error, unauthorized, HttpResult};
use crate::state::AppState;

pub struct TokenClaims {
    pub principal_id: String,
    pub principal_type: String,
}

pub async fn validate_token(pool: &PgPool, raw_token: &str) -> Option<TokenClaims> {
    let hash = Sha256::digest(raw_token.as_bytes());
    let hash_bytes = hash.as_slice().to_vec();
    let row = sqlx::query!(
        r#"SELECT principal_id, principal_type
           FROM device_tokens
           WHERE token_hash = $1
             AND revoked_at IS NULL"#,
        hash_bytes.as_slice()
    )
    .fetch_optional(pool)
    .await
    .ok()??;
    Some(TokenClaims {
        principal_id: row.principal_id,
        principal_type: row.principal_type,
    })
}

pub fn extract_bearer(authorization: &str) -> Option<&str> {
    authorization.strip_prefix("Bearer ")
}

/// Rejects any request whose `Authorization` header doesn't carry a live
/// `admin` token. Applied only to the admin surface; the user-facing message
/// and SSE routes authenticate per-request against a `user` token instead,
/// the same split the teacher draws between forwarder and receiver tokens.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> axum::response::Response {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer);

    let token = match token {
        Some(t) => t,
        None => return json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "missing Authorization header"),
    };

    match validate_token(&state.pool, token).await {
        Some(claims) if claims.principal_type == "admin" => next.run(request).await,
        Some(_) => json_error(StatusCode::FORBIDDEN, "FORBIDDEN", "token is not an admin token"),
        None => json_error(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "unknown or revoked token"),
    }
}

/// Requires a live `user` token whose `principal_id` matches `user_id`. Used
/// by the message and SSE handlers, which take the target user as a query
/// parameter rather than a path segment reachable by `require_admin`.
pub async fn require_user(pool: &PgPool, headers: &HeaderMap, user_id: &str) -> HttpResult<()> {
    let token = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(extract_bearer)
        .ok_or_else(|| unauthorized("missing Authorization header"))?;

    let claims = validate_token(pool, token)
        .await
        .ok_or_else(|| unauthorized("unknown or revoked token"))?;

    if claims.principal_type != "user" || claims.principal_id != user_id {
        return Err(forbidden("token does not authorize this user"));
    }
    Ok(())
}
