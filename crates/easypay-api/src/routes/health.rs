//! Health and readiness probes

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use crate::state::AppState;

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "easypay",
        "version": easypay_core::VERSION,
        "queue": {
            "in_flight": state.request_queue.stats().in_flight,
            "queued": state.request_queue.stats().queued,
        },
    }))
}

async fn live() -> Json<serde_json::Value> {
    Json(json!({"status": "alive"}))
}

/// Readiness requires the database; the cache degrades gracefully and
/// only reports its state
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = state.db.health_check().await.is_ok();
    let cache_state = if !state.cache.is_enabled() {
        "disabled"
    } else if state.cache.health_check().await {
        "ok"
    } else {
        // Probe failed; report what the pool last saw
        state
            .cache
            .link_state()
            .await
            .map(|link| link.as_str())
            .unwrap_or("unreachable")
    };

    let status = if db_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if db_ok { "ready" } else { "not_ready" },
            "checks": {
                "database": if db_ok { "ok" } else { "unreachable" },
                "cache": cache_state,
            },
        })),
    )
}

/// Router for health routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
}
