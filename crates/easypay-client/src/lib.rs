//! Typed client for the EasyPay REST API
//!
//! ```no_run
//! use easypay_client::EasyPayClient;
//!
//! # async fn example() -> Result<(), easypay_client::ClientError> {
//! let client = EasyPayClient::new("https://api.easypay.dev")?
//!     .with_api_key("sk_test_abc123");
//!
//! let payment = client
//!     .payments()
//!     .create(serde_json::json!({
//!         "amount": "10.00",
//!         "currency": "USD",
//!         "payment_method": "credit_card",
//!         "card_token": "tok_visa_4242",
//!         "is_test": true,
//!     }))
//!     .await?;
//!
//! client.payments().capture(payment.id, None).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod health;
pub mod payments;
pub mod webhooks;

pub use error::ClientError;
pub use health::HealthClient;
pub use payments::{PaymentList, PaymentsClient};
pub use webhooks::{WebhookList, WebhooksClient};

use reqwest::Method;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Client result type alias
pub type ClientResult<T> = Result<T, ClientError>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Entry point holding the connection settings
///
/// Endpoint groups are exposed through `payments()`, `webhooks()` and
/// `health()`.
#[derive(Clone)]
pub struct EasyPayClient {
    base_url: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl EasyPayClient {
    /// Build a client against a base URL like `https://api.easypay.dev`
    pub fn new(base_url: impl Into<String>) -> ClientResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .user_agent("easypay-client-rust/0.1")
            .build()
            .map_err(|e| ClientError::Network(format!("Client build failed: {}", e)))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: None,
            http,
        })
    }

    /// Attach the API key sent as `X-API-Key`
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn payments(&self) -> PaymentsClient<'_> {
        PaymentsClient::new(self)
    }

    pub fn webhooks(&self) -> WebhooksClient<'_> {
        WebhooksClient::new(self)
    }

    pub fn health(&self) -> HealthClient<'_> {
        HealthClient::new(self)
    }

    pub(crate) async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> ClientResult<T> {
        let url = format!("{}{}", self.base_url, path);
        debug!("EasyPay API request: {} {}", method, url);

        let mut request = self.http.request(method, &url).query(query);
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-Key", api_key);
        }
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ClientError::Network(format!("Request failed: {}", e)))?;

        error::handle_response(response).await
    }
}
