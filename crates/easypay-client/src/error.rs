//! Client error types and error-envelope parsing

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::ClientResult;

/// Errors surfaced by the EasyPay client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
    /// Request was rejected as invalid
    #[error("Validation error: {0}")]
    Validation(String),

    /// Missing or rejected credentials
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The operation conflicts with current entity state
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many requests; wait `retry_after` seconds
    #[error("Rate limited, retry after {retry_after:?}s")]
    RateLimited {
        retry_after: Option<u64>,
        message: String,
    },

    /// Any other API-level failure
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: Option<String>,
    },

    /// Transport-level failure before a response envelope existed
    #[error("Network error: {0}")]
    Network(String),

    /// The response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::RateLimited { .. } => true,
            ClientError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    request_id: Option<String>,
    #[serde(default)]
    retry_after: Option<u64>,
}

/// Decode a success body or map the error envelope onto `ClientError`
pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: reqwest::Response,
) -> ClientResult<T> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ClientError::Network(format!("Reading response failed: {}", e)))?;

    if status.is_success() {
        return serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Decode(format!("Unexpected response body: {}", e)));
    }

    let envelope: Option<ErrorEnvelope> = serde_json::from_slice(&bytes).ok();
    let body = envelope.map(|e| e.error).unwrap_or_else(|| ErrorBody {
        kind: String::new(),
        code: String::new(),
        message: format!("HTTP {}", status),
        request_id: None,
        retry_after: None,
    });

    Err(match status.as_u16() {
        400 if body.kind == "validation" || body.kind == "payment" => {
            ClientError::Validation(body.message)
        }
        401 | 403 => ClientError::Authentication(body.message),
        404 => ClientError::NotFound(body.message),
        409 => ClientError::Conflict(body.message),
        429 => ClientError::RateLimited {
            retry_after: body.retry_after,
            message: body.message,
        },
        status => ClientError::Api {
            status,
            code: body.code,
            message: body.message,
            request_id: body.request_id,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::Network("refused".to_string()).is_retryable());
        assert!(ClientError::RateLimited {
            retry_after: Some(30),
            message: "slow down".to_string()
        }
        .is_retryable());
        assert!(!ClientError::Validation("bad amount".to_string()).is_retryable());
        assert!(!ClientError::Conflict("already captured".to_string()).is_retryable());
    }
}
