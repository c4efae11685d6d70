//! Prometheus metrics endpoint

use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use easypay_core::cache::LinkState;
use easypay_core::metrics::names;
use easypay_core::models::WebhookStatus;
use easypay_core::repository::WebhookRepository;

use crate::state::AppState;

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.request_queue.stats();
    state
        .metrics
        .set_gauge(names::QUEUE_IN_FLIGHT, stats.in_flight as i64);
    state.metrics.set_gauge(names::QUEUE_DEPTH, stats.queued as i64);

    let cache = state.cache.stats().await;
    state.metrics.set_counter(names::CACHE_HITS, cache.hits);
    state.metrics.set_counter(names::CACHE_MISSES, cache.misses);
    state.metrics.set_gauge(
        names::CACHE_ONLINE,
        matches!(cache.link, Some(LinkState::Online)) as i64,
    );

    // Webhook backlog from the store; failures leave the gauges stale
    if let Ok(pending) = state.webhooks.count_by_status(WebhookStatus::Pending).await {
        state.metrics.set_gauge("easypay_webhooks_pending", pending);
    }
    if let Ok(retrying) = state.webhooks.count_by_status(WebhookStatus::Retrying).await {
        state.metrics.set_gauge("easypay_webhooks_retrying", retrying);
    }

    let body = state.metrics.render_prometheus();
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// Router for the metrics route
pub fn router() -> Router<AppState> {
    Router::new().route("/metrics", get(metrics))
}
