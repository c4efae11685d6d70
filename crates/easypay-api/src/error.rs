//! API error envelope
//!
//! Every error leaves the service as
//! `{"error": {"type", "code", "message", "request_id"}, "timestamp"}`
//! with the HTTP status taken from the core error taxonomy.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use easypay_core::Error;

/// API handler result alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Wire-level error carrying the envelope fields
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: String,
    pub code: String,
    pub message: String,
    pub request_id: Option<String>,
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, kind: &str, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: kind.to_string(),
            code: code.to_string(),
            message: message.into(),
            request_id: None,
            retry_after: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn from_core(error: Error, request_id: Option<String>) -> Self {
        let status =
            StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let kind = error.category().to_string();

        let (code, retry_after) = match &error {
            Error::RateLimit { retry_after } => ("rate_limited".to_string(), Some(*retry_after)),
            Error::Unavailable(_) => ("service_unavailable".to_string(), None),
            other => (other.category().to_string(), None),
        };

        // Internal details stay in the logs, not on the wire
        let message = match &error {
            Error::Database(_) | Error::Cache(_) | Error::Io(_) | Error::Serialization(_) => {
                tracing::error!("Internal error surfaced to API: {}", error);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        Self {
            status,
            kind,
            code,
            message,
            request_id,
            retry_after,
        }
    }

    pub fn not_implemented(request_id: Option<String>) -> Self {
        Self {
            status: StatusCode::NOT_IMPLEMENTED,
            kind: "not_implemented".to_string(),
            code: "not_implemented".to_string(),
            message: "Subscriptions are not implemented".to_string(),
            request_id,
            retry_after: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut error = json!({
            "type": self.kind,
            "code": self.code,
            "message": self.message,
            "request_id": self.request_id,
        });
        if let Some(retry_after) = self.retry_after {
            error["retry_after"] = json!(retry_after);
        }

        let body = json!({
            "error": error,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        let mut response = (self.status, Json(body)).into_response();
        if let Some(retry_after) = self.retry_after {
            if let Ok(value) = retry_after.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}
