//! Subscription routes (reserved surface)
//!
//! Recurring billing is out of scope; the routes exist so clients get a
//! stable 501 envelope rather than a 404.

use axum::{Extension, Router};

use crate::error::ApiError;
use crate::middleware::RequestMeta;
use crate::state::AppState;

async fn not_implemented(Extension(meta): Extension<RequestMeta>) -> ApiError {
    ApiError::not_implemented(Some(meta.request_id.clone()))
}

/// Router for subscription routes
pub fn router() -> Router<AppState> {
    Router::new().nest(
        "/subscriptions",
        Router::new().fallback(not_implemented),
    )
}
