pub mod auth;
pub mod config;
pub mod db;
pub mod delivery;
pub mod dlq;
pub mod event_bus;
pub mod fanout;
pub mod http;
pub mod outbox;
pub mod push;
pub mod repo;
pub mod scheduler;
pub mod state;

pub use state::AppState;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Router,
};

pub fn build_router(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/api/v1/broadcasts",
            get(http::broadcasts::list).post(http::broadcasts::create),
        )
        .route("/api/v1/broadcasts/:broadcast_id", delete(http::broadcasts::cancel))
        .route("/api/v1/broadcasts/:broadcast_id/stats", get(http::broadcasts::stats))
        .route(
            "/api/v1/broadcasts/:broadcast_id/deliveries",
            get(http::broadcasts::deliveries),
        )
        .route("/api/v1/dlt/messages", get(http::dlt::list))
        .route("/api/v1/dlt/redrive-all", post(http::dlt::redrive_all))
        .route("/api/v1/dlt/purge-all", delete(http::dlt::purge_all))
        .route("/api/v1/dlt/:id/redrive", post(http::dlt::redrive))
        .route("/api/v1/dlt/:id", delete(http::dlt::purge))
        .route(
            "/api/v1/admin/tokens",
            get(http::tokens::list).post(http::tokens::create),
        )
        .route("/api/v1/admin/tokens/:token_id/revoke", post(http::tokens::revoke))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .route("/sse/connect", get(http::sse::connect))
        .route("/sse/disconnect", post(http::sse::disconnect))
        .route("/api/v1/messages", get(http::messages::list_for_user))
        .route("/api/v1/messages/read", post(http::messages::mark_read))
        .merge(admin_routes)
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .fallback(fallback_404)
        .with_state(state)
}

async fn fallback_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not found")
}

mod health {
    use axum::{extract::State, response::IntoResponse};

    use crate::state::AppState;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    /// Ready only once the database is actually reachable, so a rolling
    /// deploy doesn't route traffic to a pod whose pool hasn't connected yet.
    pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
        match sqlx::query("SELECT 1").execute(&state.pool).await {
            Ok(_) => (axum::http::StatusCode::OK, "ok"),
            Err(_) => (axum::http::StatusCode::SERVICE_UNAVAILABLE, "db unreachable"),
        }
    }
}
