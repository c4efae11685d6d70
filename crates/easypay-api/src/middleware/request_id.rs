//! Request and correlation identifiers
//!
//! Every request gets a `req_…` id plus a correlation id (inherited from
//! `X-Correlation-Id` when the caller supplies one). Both ride in request
//! extensions and echo back as response headers; downstream audit records
//! and webhooks carry the correlation id end to end.

use axum::extract::Request;
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use uuid::Uuid;

use easypay_core::common;
use easypay_core::payment::RequestContext;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-Id";

/// Per-request identity available to handlers via `Extension`
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub request_id: String,
    pub correlation_id: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestMeta {
    /// Build the engine-facing context
    pub fn context(&self) -> RequestContext {
        RequestContext {
            correlation_id: Some(self.correlation_id.clone()),
            request_id: Some(self.request_id.clone()),
            ip_address: self.client_ip.clone(),
            user_agent: self.user_agent.clone(),
        }
    }
}

fn generate_request_id() -> String {
    let mut hex = Uuid::new_v4().simple().to_string();
    hex.truncate(12);
    format!("req_{}", hex)
}

pub async fn request_id_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(common::generate_correlation_id);

    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let client_ip = request
        .extensions()
        .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
        .map(|info| info.0.ip().to_string());

    let meta = RequestMeta {
        request_id: generate_request_id(),
        correlation_id,
        client_ip,
        user_agent,
    };

    let request_id = meta.request_id.clone();
    let correlation_id = meta.correlation_id.clone();
    request.extensions_mut().insert(meta);

    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }

    response
}
