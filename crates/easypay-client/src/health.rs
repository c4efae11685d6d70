//! Health endpoint group

use reqwest::Method;

use crate::{ClientResult, EasyPayClient};

/// `/health` operations
pub struct HealthClient<'a> {
    client: &'a EasyPayClient,
}

impl<'a> HealthClient<'a> {
    pub(crate) fn new(client: &'a EasyPayClient) -> Self {
        Self { client }
    }

    /// Basic service summary
    pub async fn check(&self) -> ClientResult<serde_json::Value> {
        self.client.request(Method::GET, "/health", &[], None).await
    }

    /// Readiness probe; errors with the envelope when dependencies fail
    pub async fn readiness(&self) -> ClientResult<serde_json::Value> {
        self.client
            .request(Method::GET, "/health/ready", &[], None)
            .await
    }

    /// Liveness probe
    pub async fn liveness(&self) -> ClientResult<serde_json::Value> {
        self.client
            .request(Method::GET, "/health/live", &[], None)
            .await
    }
}
