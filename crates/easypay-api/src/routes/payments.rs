//! Payment API routes

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use easypay_core::models::{
    CancelPaymentRequest, CapturePaymentRequest, CreatePaymentRequest, Pagination, Payment,
    PaymentFilter, PaymentStats, PaymentStatus, RefundPaymentRequest, UpdatePaymentRequest,
};
use easypay_core::payment::StatusChange;
use easypay_core::repository::WebhookRepository;
use easypay_core::Error;

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestMeta;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub customer_id: Option<String>,
    pub status: Option<PaymentStatus>,
}

impl ListQuery {
    fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page.unwrap_or(1),
            per_page: self.per_page.unwrap_or(20),
        }
        .clamped()
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub payments: Vec<Payment>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub payment_id: Uuid,
    pub history: Vec<StatusChange>,
}

fn core_err(meta: &RequestMeta, error: Error) -> ApiError {
    ApiError::from_core(error, Some(meta.request_id.clone()))
}

async fn create_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Json(request): Json<CreatePaymentRequest>,
) -> ApiResult<(StatusCode, Json<Payment>)> {
    let payment = state
        .engine
        .create_payment(request, meta.context())
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok((StatusCode::CREATED, Json(payment)))
}

async fn get_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id_or_external): Path<String>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .engine
        .get_payment(&id_or_external)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payment))
}

async fn update_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdatePaymentRequest>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .engine
        .update_payment(id, request, meta.context())
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payment))
}

/// Capture a payment: a pending payment is charged (auth+capture in one
/// step), a previously authorized one is captured upstream
async fn capture_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
    body: Option<Json<CapturePaymentRequest>>,
) -> ApiResult<Json<Payment>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let current = state
        .engine
        .get_payment(&id.to_string())
        .await
        .map_err(|e| core_err(&meta, e))?;

    // The engine revalidates under the row lock; this only picks the verb
    let payment = match current.status {
        PaymentStatus::Pending => state.engine.charge_payment(id, meta.context()).await,
        _ => state.engine.capture_payment(id, request, meta.context()).await,
    }
    .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payment))
}

/// Authorize without capturing; capture follows as a separate call
async fn authorize_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Payment>> {
    let payment = state
        .engine
        .authorize_payment(id, meta.context())
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payment))
}

async fn refund_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
    body: Option<Json<RefundPaymentRequest>>,
) -> ApiResult<Json<Payment>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let payment = state
        .engine
        .refund_payment(id, request, meta.context())
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payment))
}

async fn cancel_payment(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
    body: Option<Json<CancelPaymentRequest>>,
) -> ApiResult<Json<Payment>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let payment = state
        .engine
        .cancel_payment(id, request, meta.context())
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payment))
}

async fn list_payments(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<ListResponse>> {
    let pagination = query.pagination();
    let filter = PaymentFilter {
        customer_id: query.customer_id,
        status: query.status,
        ..Default::default()
    };

    let (payments, total) = state
        .engine
        .list_payments(&filter, &pagination)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(ListResponse {
        payments,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

async fn search_payments(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<Vec<Payment>>> {
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }
    .clamped();
    let payments = state
        .engine
        .search_payments(&query.q, &pagination)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(payments))
}

async fn payment_stats(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<PaymentStats>> {
    let filter = PaymentFilter {
        customer_id: query.customer_id,
        status: query.status,
        ..Default::default()
    };

    let stats = state
        .engine
        .payment_stats(&filter)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(stats))
}

async fn payment_history(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<HistoryResponse> {
    let history = state.engine.status_history(id).await;
    Json(HistoryResponse {
        payment_id: id,
        history,
    })
}

/// Outbound webhooks emitted for one payment, newest first
async fn payment_webhooks(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<easypay_core::models::Webhook>>> {
    let webhooks = state
        .webhooks
        .list_by_payment(id, &query.pagination())
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(webhooks))
}

/// Router for payment routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment).get(list_payments))
        .route("/payments/search", get(search_payments))
        .route("/payments/stats", get(payment_stats))
        .route("/payments/:id", get(get_payment).put(update_payment))
        .route("/payments/:id/authorize", post(authorize_payment))
        .route("/payments/:id/capture", post(capture_payment))
        .route("/payments/:id/refund", post(refund_payment))
        .route("/payments/:id/cancel", post(cancel_payment))
        .route("/payments/:id/history", get(payment_history))
        .route("/payments/:id/webhooks", get(payment_webhooks))
}
