//! Inbound processor webhooks
//!
//! Authorize.net notifies asynchronously about settlement and transaction
//! events. Payloads are authenticated with an HMAC signature over the raw
//! body before anything is parsed.

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use easypay_core::models::{
    AuditAction, NewAuditLog, Pagination, Webhook, WebhookEventType, WebhookStatus,
};
use easypay_core::repository::{WebhookFilter, WebhookRepository};
use easypay_core::webhook::signature;
use easypay_core::Error;

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestMeta;
use crate::state::AppState;

const INBOUND_SIGNATURE_HEADER: &str = "X-ANET-Signature";

#[derive(Debug, Deserialize)]
struct InboundEvent {
    #[serde(rename = "eventType")]
    event_type: String,
    #[serde(default)]
    payload: InboundPayload,
}

#[derive(Debug, Default, Deserialize)]
struct InboundPayload {
    #[serde(default)]
    id: Option<String>,
}

async fn authorize_net_webhook(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let provided = headers
        .get(INBOUND_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let secret = &state.config.webhooks.inbound_secret;
    if secret.is_empty() || !signature::verify_bytes(secret, &body, provided) {
        warn!("Inbound webhook rejected: bad signature");
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "authentication",
            "invalid_signature",
            "Webhook signature verification failed",
        )
        .with_request_id(meta.request_id.clone()));
    }

    let event: InboundEvent = serde_json::from_slice(&body).map_err(|e| {
        ApiError::new(
            StatusCode::BAD_REQUEST,
            "validation",
            "invalid_payload",
            format!("Malformed webhook payload: {}", e),
        )
        .with_request_id(meta.request_id.clone())
    })?;

    info!("Inbound processor webhook: event_type={}", event.event_type);

    let record = NewAuditLog {
        action: AuditAction::WebhookReceived,
        level: easypay_core::models::AuditLevel::Info,
        message: format!("Processor webhook received: {}", event.event_type),
        entity_type: "processor_webhook".to_string(),
        entity_id: event
            .payload
            .id
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        payment_id: None,
        user_id: None,
        api_key_id: None,
        ip_address: meta.client_ip.clone(),
        user_agent: meta.user_agent.clone(),
        request_id: Some(meta.request_id.clone()),
        correlation_id: Some(meta.correlation_id.clone()),
        metadata: None,
        old_values: None,
        new_values: None,
    };
    if let Err(e) = state.audit.record(record).await {
        warn!("Failed to record inbound webhook audit entry: {}", e);
    }

    // Settlement events drive captured -> settled
    if event.event_type.contains("settlement") {
        if let Some(transaction_id) = &event.payload.id {
            match state
                .engine
                .mark_settled(transaction_id, meta.context())
                .await
            {
                Ok(Some(payment)) => {
                    info!(
                        "Settlement applied: payment_id={}, status={}",
                        payment.id, payment.status
                    );
                }
                Ok(None) => {
                    warn!(
                        "Settlement for unknown processor transaction: {}",
                        transaction_id
                    );
                }
                Err(e) => {
                    return Err(ApiError::from_core(e, Some(meta.request_id.clone())));
                }
            }
        }
    }

    Ok((StatusCode::OK, Json(json!({"received": true}))))
}

#[derive(Debug, Deserialize)]
pub struct WebhookListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub status: Option<WebhookStatus>,
    pub event_type: Option<WebhookEventType>,
    pub payment_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct WebhookListResponse {
    pub webhooks: Vec<Webhook>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

fn core_err(meta: &RequestMeta, error: Error) -> ApiError {
    ApiError::from_core(error, Some(meta.request_id.clone()))
}

async fn list_webhooks(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<WebhookListQuery>,
) -> ApiResult<Json<WebhookListResponse>> {
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }
    .clamped();
    let filter = WebhookFilter {
        status: query.status,
        event_type: query.event_type,
        payment_id: query.payment_id,
    };

    let webhooks = state
        .webhooks
        .list(&filter, &pagination)
        .await
        .map_err(|e| core_err(&meta, e))?;
    let total = state
        .webhooks
        .count(&filter)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(WebhookListResponse {
        webhooks,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

async fn get_webhook(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Webhook>> {
    let webhook = state
        .webhooks
        .find_by_id(id)
        .await
        .map_err(|e| core_err(&meta, e))?
        .ok_or_else(|| core_err(&meta, Error::not_found(format!("Webhook {} not found", id))))?;

    Ok(Json(webhook))
}

/// Re-arm a failed or expired delivery and attempt it immediately
async fn retry_webhook(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Webhook>> {
    let webhook = state
        .dispatcher
        .retry_webhook(id)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(webhook))
}

/// Router for webhook routes (inbound receiver plus delivery admin)
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/authorize-net", post(authorize_net_webhook))
        .route("/webhooks", get(list_webhooks))
        .route("/webhooks/:id", get(get_webhook))
        .route("/webhooks/:id/retry", post(retry_webhook))
}
