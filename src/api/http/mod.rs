// src/api/http/mod.rs
// HTTP surface: retrieval, context/compaction, checkpoints and health probes.

pub mod checkpoints;
pub mod context;
pub mod health;
pub mod search;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/search", post(search::search))
        .route("/search/parallel", post(search::parallel_search))
        .route("/expand", post(search::expand))
        .route("/context-window/:conversation_id", get(context::get_status))
        .route(
            "/context-window/:conversation_id/messages",
            post(context::add_message),
        )
        .route("/context-window/:conversation_id/compact", post(context::compact))
        .route("/checkpoints/:conversation_id", get(checkpoints::list_checkpoints))
        .route(
            "/checkpoints/:conversation_id/restore/:checkpoint_id",
            post(checkpoints::restore_checkpoint),
        )
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/live", get(health::liveness_check))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
