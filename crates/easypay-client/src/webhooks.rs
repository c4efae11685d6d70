//! Webhook delivery endpoint group

use reqwest::Method;
use serde::Deserialize;
use uuid::Uuid;

use easypay_core::models::Webhook;

use crate::{ClientResult, EasyPayClient};

/// Paged webhook listing
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookList {
    pub webhooks: Vec<Webhook>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

/// `/api/v1/webhooks` operations (outbound delivery admin)
pub struct WebhooksClient<'a> {
    client: &'a EasyPayClient,
}

impl<'a> WebhooksClient<'a> {
    pub(crate) fn new(client: &'a EasyPayClient) -> Self {
        Self { client }
    }

    /// List outbound webhooks, optionally by status or payment
    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
        status: Option<&str>,
        payment_id: Option<Uuid>,
    ) -> ClientResult<WebhookList> {
        let mut query = vec![
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ];
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }
        if let Some(payment_id) = payment_id {
            query.push(("payment_id", payment_id.to_string()));
        }

        self.client
            .request(Method::GET, "/api/v1/webhooks", &query, None)
            .await
    }

    /// Fetch one delivery record
    pub async fn get(&self, id: Uuid) -> ClientResult<Webhook> {
        self.client
            .request(Method::GET, &format!("/api/v1/webhooks/{}", id), &[], None)
            .await
    }

    /// Re-arm a failed or expired delivery
    pub async fn retry(&self, id: Uuid) -> ClientResult<Webhook> {
        self.client
            .request(
                Method::POST,
                &format!("/api/v1/webhooks/{}/retry", id),
                &[],
                Some(serde_json::json!({})),
            )
            .await
    }
}
