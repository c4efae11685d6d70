//! Outbound webhook entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One outbound delivery lineage
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Webhook {
    pub id: Uuid,
    /// Stable unique id per logical event, e.g. `evt_1f2e3d4c5b6a7988`
    pub event_id: String,
    pub event_type: WebhookEventType,
    /// Weak reference: deleting the payment does not cascade here
    pub payment_id: Option<Uuid>,
    pub url: String,
    pub payload: serde_json::Value,
    pub signature: String,
    pub headers: serde_json::Value,
    pub status: WebhookStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub response_status: Option<i32>,
    pub response_body: Option<String>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub correlation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Webhook {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Delivery state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WebhookStatus {
    Pending,
    Delivered,
    Failed,
    Retrying,
    Expired,
}

impl WebhookStatus {
    /// Delivered and expired records never change again; failed is the
    /// permanent destination-rejected state
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WebhookStatus::Delivered | WebhookStatus::Expired | WebhookStatus::Failed
        )
    }
}

impl fmt::Display for WebhookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WebhookStatus::Pending => "pending",
            WebhookStatus::Delivered => "delivered",
            WebhookStatus::Failed => "failed",
            WebhookStatus::Retrying => "retrying",
            WebhookStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

/// Logical event kinds emitted by the payment engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "webhook_event_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    PaymentCreated,
    PaymentAuthorized,
    PaymentCaptured,
    PaymentSettled,
    PaymentFailed,
    PaymentRefunded,
    PaymentVoided,
}

impl WebhookEventType {
    /// Dotted wire name carried in the webhook body
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::PaymentCreated => "payment.created",
            WebhookEventType::PaymentAuthorized => "payment.authorized",
            WebhookEventType::PaymentCaptured => "payment.captured",
            WebhookEventType::PaymentSettled => "payment.settled",
            WebhookEventType::PaymentFailed => "payment.failed",
            WebhookEventType::PaymentRefunded => "payment.refunded",
            WebhookEventType::PaymentVoided => "payment.voided",
        }
    }
}

impl fmt::Display for WebhookEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Insert payload for a new outbound webhook (outbox row)
#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub event_id: String,
    pub event_type: WebhookEventType,
    pub payment_id: Option<Uuid>,
    pub url: String,
    pub payload: serde_json::Value,
    pub signature: String,
    pub headers: serde_json::Value,
    pub max_retries: i32,
    pub correlation_id: Option<String>,
}
