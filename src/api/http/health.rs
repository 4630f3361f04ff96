// src/api/http/health.rs
// Health, readiness and liveness probes for load balancers and orchestrators.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    database: &'static str,
    redis: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    migrations: &'static str,
}

/// GET /health — 200 if Postgres and Redis are both reachable, 503 otherwise.
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let db_ok = sqlx::query("SELECT 1").fetch_one(&state.pg_pool).await.is_ok();
    let redis_ok = state.tiered_cache.l1_health().await.connected;

    let response = HealthResponse {
        status: if db_ok && redis_ok { "healthy" } else { "unhealthy" },
        database: if db_ok { "ok" } else { "error" },
        redis: if redis_ok { "ok" } else { "error" },
    };

    if db_ok && redis_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /ready — 200 once migrations have created the core tables.
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let migrations_ok = sqlx::query("SELECT 1 FROM cache_entries LIMIT 1")
        .fetch_optional(&state.pg_pool)
        .await
        .is_ok();

    let response = ReadyResponse {
        status: if migrations_ok { "ready" } else { "not_ready" },
        migrations: if migrations_ok { "applied" } else { "pending" },
    };

    if migrations_ok {
        (StatusCode::OK, Json(response))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response))
    }
}

/// GET /live — plain process liveness ping.
pub async fn liveness_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "alive"})))
}
