//! Admission control middleware
//!
//! Evaluated in order for every request:
//! 1. Bypass paths (health, metrics) skip the queue entirely
//! 2. Open circuit breaker answers 503 without queuing
//! 3. Rate limiter rejection answers 429 with `retry_after`
//! 4/5. Queue admission: direct service, queued wait, or 503/504

use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use easypay_core::metrics::names;
use easypay_core::resilience::{
    client_identity, is_bypass_path, QueueRejection, RequestPriority,
};
use easypay_core::Error;

use crate::error::ApiError;
use crate::middleware::request_id::RequestMeta;
use crate::state::AppState;

pub async fn admission_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().as_str().to_string();
    let request_id = request
        .extensions()
        .get::<RequestMeta>()
        .map(|meta| meta.request_id.clone());

    state.metrics.incr(names::REQUESTS_TOTAL);

    if is_bypass_path(&path) {
        return next.run(request).await;
    }

    if state.request_queue.is_shutting_down() {
        return ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            "shutting_down",
            "Service is shutting down",
        )
        .with_request_id(request_id.unwrap_or_default())
        .into_response();
    }

    // An open breaker means money movement cannot succeed; shed early
    if state.breaker.is_open().await {
        state.metrics.incr(names::REQUESTS_SHED_CIRCUIT_OPEN);
        return ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "service_unavailable",
            "service_unavailable",
            "Upstream processor temporarily unavailable",
        )
        .with_request_id(request_id.unwrap_or_default())
        .into_response();
    }

    if state.config.rate_limit.enabled {
        let api_key = request
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        let client_ip = request
            .extensions()
            .get::<RequestMeta>()
            .and_then(|meta| meta.client_ip.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let identity = client_identity(api_key, &client_ip);

        if let Err(retry_after) = state.rate_limiter.check(&identity).await {
            state.metrics.incr(names::REQUESTS_REJECTED_RATE_LIMIT);
            return ApiError::from_core(Error::RateLimit { retry_after }, request_id)
                .into_response();
        }
    }

    let priority = RequestPriority::classify(&method, &path);
    let permit = match state.request_queue.acquire(priority).await {
        Ok(permit) => permit,
        Err(QueueRejection::QueueFull) => {
            state.metrics.incr(names::REQUESTS_REJECTED_QUEUE_FULL);
            return ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "queue_full",
                "Request queue is full",
            )
            .with_request_id(request_id.unwrap_or_default())
            .into_response();
        }
        Err(QueueRejection::Timeout) => {
            state.metrics.incr(names::REQUESTS_TIMED_OUT);
            return ApiError::new(
                StatusCode::GATEWAY_TIMEOUT,
                "timeout",
                "timeout",
                "Timed out waiting for a worker",
            )
            .with_request_id(request_id.unwrap_or_default())
            .into_response();
        }
        Err(QueueRejection::ShuttingDown) => {
            return ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "shutting_down",
                "Service is shutting down",
            )
            .with_request_id(request_id.unwrap_or_default())
            .into_response();
        }
    };

    let stats = state.request_queue.stats();
    state
        .metrics
        .set_gauge(names::QUEUE_IN_FLIGHT, stats.in_flight as i64);
    state.metrics.set_gauge(names::QUEUE_DEPTH, stats.queued as i64);

    let response = next.run(request).await;
    drop(permit);
    response
}
