//! Payment endpoint group

use reqwest::Method;
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use easypay_core::models::{Payment, PaymentStats};

use crate::{ClientResult, EasyPayClient};

/// Paged payment listing
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentList {
    pub payments: Vec<Payment>,
    pub page: i64,
    pub per_page: i64,
    pub total: i64,
}

/// `/api/v1/payments` operations
pub struct PaymentsClient<'a> {
    client: &'a EasyPayClient,
}

impl<'a> PaymentsClient<'a> {
    pub(crate) fn new(client: &'a EasyPayClient) -> Self {
        Self { client }
    }

    /// Create a payment in `pending`
    pub async fn create(&self, payment: serde_json::Value) -> ClientResult<Payment> {
        self.client
            .request(Method::POST, "/api/v1/payments", &[], Some(payment))
            .await
    }

    /// Fetch by internal UUID or merchant-facing external id
    pub async fn get(&self, id_or_external: &str) -> ClientResult<Payment> {
        self.client
            .request(
                Method::GET,
                &format!("/api/v1/payments/{}", id_or_external),
                &[],
                None,
            )
            .await
    }

    /// Update description/metadata
    pub async fn update(&self, id: Uuid, update: serde_json::Value) -> ClientResult<Payment> {
        self.client
            .request(
                Method::PUT,
                &format!("/api/v1/payments/{}", id),
                &[],
                Some(update),
            )
            .await
    }

    /// Authorize without capturing
    pub async fn authorize(&self, id: Uuid) -> ClientResult<Payment> {
        self.client
            .request(
                Method::POST,
                &format!("/api/v1/payments/{}/authorize", id),
                &[],
                Some(serde_json::json!({})),
            )
            .await
    }

    /// Charge a pending payment or capture an authorized one
    pub async fn capture(&self, id: Uuid, amount: Option<Decimal>) -> ClientResult<Payment> {
        let body = match amount {
            Some(amount) => serde_json::json!({"amount": amount}),
            None => serde_json::json!({}),
        };
        self.client
            .request(
                Method::POST,
                &format!("/api/v1/payments/{}/capture", id),
                &[],
                Some(body),
            )
            .await
    }

    /// Refund; omitting the amount refunds everything remaining
    pub async fn refund(
        &self,
        id: Uuid,
        amount: Option<Decimal>,
        reason: Option<&str>,
    ) -> ClientResult<Payment> {
        let mut body = serde_json::Map::new();
        if let Some(amount) = amount {
            body.insert("amount".to_string(), serde_json::json!(amount));
        }
        if let Some(reason) = reason {
            body.insert("reason".to_string(), serde_json::json!(reason));
        }
        self.client
            .request(
                Method::POST,
                &format!("/api/v1/payments/{}/refund", id),
                &[],
                Some(serde_json::Value::Object(body)),
            )
            .await
    }

    /// Void a pending or authorized payment
    pub async fn cancel(&self, id: Uuid, reason: Option<&str>) -> ClientResult<Payment> {
        let body = match reason {
            Some(reason) => serde_json::json!({"reason": reason}),
            None => serde_json::json!({}),
        };
        self.client
            .request(
                Method::POST,
                &format!("/api/v1/payments/{}/cancel", id),
                &[],
                Some(body),
            )
            .await
    }

    /// List with optional customer/status filters
    pub async fn list(
        &self,
        page: i64,
        per_page: i64,
        customer_id: Option<&str>,
        status: Option<&str>,
    ) -> ClientResult<PaymentList> {
        let mut query = vec![
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ];
        if let Some(customer_id) = customer_id {
            query.push(("customer_id", customer_id.to_string()));
        }
        if let Some(status) = status {
            query.push(("status", status.to_string()));
        }

        self.client
            .request(Method::GET, "/api/v1/payments", &query, None)
            .await
    }

    /// Free-text search over ids, customer fields and descriptions
    pub async fn search(&self, term: &str, page: i64, per_page: i64) -> ClientResult<Vec<Payment>> {
        let query = vec![
            ("q", term.to_string()),
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ];
        self.client
            .request(Method::GET, "/api/v1/payments/search", &query, None)
            .await
    }

    /// Aggregate statistics
    pub async fn stats(&self, customer_id: Option<&str>) -> ClientResult<PaymentStats> {
        let mut query = Vec::new();
        if let Some(customer_id) = customer_id {
            query.push(("customer_id", customer_id.to_string()));
        }
        self.client
            .request(Method::GET, "/api/v1/payments/stats", &query, None)
            .await
    }
}
