//! Append-only audit trail entity

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One immutable audit record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AuditLog {
    pub id: Uuid,
    pub action: AuditAction,
    pub level: AuditLevel,
    pub message: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payment_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub api_key_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Recorded action kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PaymentCreated,
    PaymentUpdated,
    PaymentAuthorized,
    PaymentCaptured,
    PaymentSettled,
    PaymentDeclined,
    PaymentFailed,
    PaymentRefunded,
    PaymentVoided,
    PaymentReconciliationRequired,
    WebhookDelivered,
    WebhookFailed,
    WebhookExpired,
    WebhookReceived,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PaymentCreated => "payment.created",
            AuditAction::PaymentUpdated => "payment.updated",
            AuditAction::PaymentAuthorized => "payment.authorized",
            AuditAction::PaymentCaptured => "payment.captured",
            AuditAction::PaymentSettled => "payment.settled",
            AuditAction::PaymentDeclined => "payment.declined",
            AuditAction::PaymentFailed => "payment.failed",
            AuditAction::PaymentRefunded => "payment.refunded",
            AuditAction::PaymentVoided => "payment.voided",
            AuditAction::PaymentReconciliationRequired => "payment.reconciliation_required",
            AuditAction::WebhookDelivered => "webhook.delivered",
            AuditAction::WebhookFailed => "webhook.failed",
            AuditAction::WebhookExpired => "webhook.expired",
            AuditAction::WebhookReceived => "webhook.received",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Severity of an audit record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "audit_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AuditLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuditLevel::Info => "info",
            AuditLevel::Warning => "warning",
            AuditLevel::Error => "error",
            AuditLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

/// Insert payload for a new audit record
#[derive(Debug, Clone)]
pub struct NewAuditLog {
    pub action: AuditAction,
    pub level: AuditLevel,
    pub message: String,
    pub entity_type: String,
    pub entity_id: String,
    pub payment_id: Option<Uuid>,
    pub user_id: Option<String>,
    pub api_key_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub old_values: Option<serde_json::Value>,
    pub new_values: Option<serde_json::Value>,
}

impl NewAuditLog {
    /// Start a payment-scoped record at info level
    pub fn payment(action: AuditAction, payment_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            action,
            level: AuditLevel::Info,
            message: message.into(),
            entity_type: "payment".to_string(),
            entity_id: payment_id.to_string(),
            payment_id: Some(payment_id),
            user_id: None,
            api_key_id: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            correlation_id: None,
            metadata: None,
            old_values: None,
            new_values: None,
        }
    }

    /// Start a webhook-scoped record at info level
    pub fn webhook(action: AuditAction, webhook_id: Uuid, message: impl Into<String>) -> Self {
        Self {
            action,
            level: AuditLevel::Info,
            message: message.into(),
            entity_type: "webhook".to_string(),
            entity_id: webhook_id.to_string(),
            payment_id: None,
            user_id: None,
            api_key_id: None,
            ip_address: None,
            user_agent: None,
            request_id: None,
            correlation_id: None,
            metadata: None,
            old_values: None,
            new_values: None,
        }
    }

    pub fn with_level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_transition(
        mut self,
        old_values: serde_json::Value,
        new_values: serde_json::Value,
    ) -> Self {
        self.old_values = Some(old_values);
        self.new_values = Some(new_values);
        self
    }
}

/// Filter parameters for audit queries
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditLogFilter {
    pub action: Option<AuditAction>,
    pub level: Option<AuditLevel>,
    pub payment_id: Option<Uuid>,
    pub correlation_id: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl AuditLogFilter {
    /// Stable fingerprint used in audit list cache keys
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(
            self.action
                .map(|a| a.as_str().to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
        hasher.update(
            self.level
                .map(|l| l.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
        hasher.update(
            self.payment_id
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
        hasher.update(self.correlation_id.as_deref().unwrap_or("-"));
        hasher.update(
            self.created_after
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
        hasher.update(
            self.created_before
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string()),
        );
        let digest = hasher.finalize();
        hex::encode(&digest[..8])
    }
}
