//! Audit log query routes
//!
//! Read-only: the trail is append-only and records are immutable inside
//! the retention window.

use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use easypay_core::models::{AuditAction, AuditLevel, AuditLog, AuditLogFilter, Pagination};
use easypay_core::Error;

use crate::error::{ApiError, ApiResult};
use crate::middleware::RequestMeta;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuditListQuery {
    pub page: Option<i64>,
    pub per_page: Option<i64>,
    pub action: Option<AuditAction>,
    pub level: Option<AuditLevel>,
    pub payment_id: Option<Uuid>,
    pub correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuditListResponse {
    pub audit_logs: Vec<AuditLog>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

fn core_err(meta: &RequestMeta, error: Error) -> ApiError {
    ApiError::from_core(error, Some(meta.request_id.clone()))
}

async fn list_audit_logs(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Query(query): Query<AuditListQuery>,
) -> ApiResult<Json<AuditListResponse>> {
    let pagination = Pagination {
        page: query.page.unwrap_or(1),
        per_page: query.per_page.unwrap_or(20),
    }
    .clamped();
    let filter = AuditLogFilter {
        action: query.action,
        level: query.level,
        payment_id: query.payment_id,
        correlation_id: query.correlation_id,
        ..Default::default()
    };

    let audit_logs = state
        .audit
        .list(&filter, &pagination)
        .await
        .map_err(|e| core_err(&meta, e))?;
    let total = state
        .audit
        .count(&filter)
        .await
        .map_err(|e| core_err(&meta, e))?;

    Ok(Json(AuditListResponse {
        audit_logs,
        page: pagination.page,
        per_page: pagination.per_page,
        total,
    }))
}

async fn get_audit_log(
    State(state): State<AppState>,
    Extension(meta): Extension<RequestMeta>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AuditLog>> {
    let record = state
        .audit
        .find_by_id(id)
        .await
        .map_err(|e| core_err(&meta, e))?
        .ok_or_else(|| {
            core_err(&meta, Error::not_found(format!("Audit record {} not found", id)))
        })?;

    Ok(Json(record))
}

/// Router for audit log routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/audit-logs", get(list_audit_logs))
        .route("/audit-logs/:id", get(get_audit_log))
}
