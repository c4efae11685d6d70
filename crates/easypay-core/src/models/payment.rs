//! Payment entity and request types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Serialized metadata is capped at 16 KiB
pub const MAX_METADATA_BYTES: usize = 16 * 1024;

/// One attempted money movement
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub external_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub card_token: Option<String>,
    pub card_last_four: Option<String>,
    pub card_brand: Option<String>,
    pub card_exp_month: Option<String>,
    pub card_exp_year: Option<String>,
    pub authorize_net_transaction_id: Option<String>,
    pub processor_response_code: Option<String>,
    pub processor_response_message: Option<String>,
    pub refunded_amount: Decimal,
    pub refund_count: i32,
    pub description: Option<String>,
    pub metadata: serde_json::Value,
    pub is_test: bool,
    pub is_live: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// Amount still available for refunds
    pub fn remaining_refund_amount(&self) -> Decimal {
        self.amount - self.refunded_amount
    }

    pub fn is_refundable(&self) -> bool {
        matches!(
            self.status,
            PaymentStatus::Captured | PaymentStatus::Settled | PaymentStatus::PartiallyRefunded
        )
    }

    pub fn is_voidable(&self) -> bool {
        matches!(self.status, PaymentStatus::Pending | PaymentStatus::Authorized)
    }
}

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Authorized,
    Captured,
    Settled,
    Refunded,
    PartiallyRefunded,
    Voided,
    Failed,
    Declined,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Authorized => "authorized",
            PaymentStatus::Captured => "captured",
            PaymentStatus::Settled => "settled",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::PartiallyRefunded => "partially_refunded",
            PaymentStatus::Voided => "voided",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Declined => "declined",
        };
        write!(f, "{}", s)
    }
}

impl PaymentStatus {
    /// Whether the status can never change again
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Refunded
                | PaymentStatus::Voided
                | PaymentStatus::Failed
                | PaymentStatus::Declined
        )
    }

    /// Legal edges of the lifecycle graph
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        match (self, target) {
            (Pending, Authorized)
            | (Pending, Captured)
            | (Pending, Declined)
            | (Pending, Failed)
            | (Pending, Voided) => true,
            (Authorized, Captured) | (Authorized, Voided) | (Authorized, Failed) => true,
            (Captured, Settled)
            | (Captured, Refunded)
            | (Captured, PartiallyRefunded) => true,
            (Settled, Refunded) | (Settled, PartiallyRefunded) => true,
            (PartiallyRefunded, Refunded) | (PartiallyRefunded, PartiallyRefunded) => true,
            _ => false,
        }
    }
}

/// Payment instrument type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payment_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentMethod::CreditCard => write!(f, "credit_card"),
            PaymentMethod::DebitCard => write!(f, "debit_card"),
        }
    }
}

/// Create payment request
#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: PaymentMethod,
    /// Optional client-supplied idempotency key; generated when absent
    pub external_id: Option<String>,
    pub customer_id: Option<String>,
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub card_token: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub is_test: bool,
}

/// Update payment request: description and metadata only
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdatePaymentRequest {
    pub description: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Capture request for a previously authorized payment
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CapturePaymentRequest {
    pub amount: Option<Decimal>,
}

/// Refund request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefundPaymentRequest {
    /// Defaults to the full remaining amount
    pub amount: Option<Decimal>,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Cancel (void) request
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelPaymentRequest {
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Filter parameters for listing payments
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaymentFilter {
    pub customer_id: Option<String>,
    pub status: Option<PaymentStatus>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

impl PaymentFilter {
    /// Stable fingerprint used in list/stats cache keys
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(self.customer_id.as_deref().unwrap_or("-"));
        hasher.update(
            self.status
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string()),
        );
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

/// Aggregate payment statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentStats {
    pub total_count: i64,
    pub total_amount: Decimal,
    pub refunded_amount: Decimal,
    pub captured_count: i64,
    pub refunded_count: i64,
    pub failed_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn payment(status: PaymentStatus, amount: Decimal, refunded: Decimal) -> Payment {
        Payment {
            id: Uuid::new_v4(),
            external_id: "pay_0123456789ab".to_string(),
            amount,
            currency: "USD".to_string(),
            status,
            payment_method: PaymentMethod::CreditCard,
            customer_id: None,
            customer_email: None,
            customer_name: None,
            card_token: Some("tok_visa_4242".to_string()),
            card_last_four: None,
            card_brand: None,
            card_exp_month: None,
            card_exp_year: None,
            authorize_net_transaction_id: None,
            processor_response_code: None,
            processor_response_message: None,
            refunded_amount: refunded,
            refund_count: 0,
            description: None,
            metadata: serde_json::json!({}),
            is_test: true,
            is_live: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: None,
            settled_at: None,
        }
    }

    #[test]
    fn test_lifecycle_graph() {
        use PaymentStatus::*;

        assert!(Pending.can_transition_to(Captured));
        assert!(Pending.can_transition_to(Declined));
        assert!(Pending.can_transition_to(Voided));
        assert!(Authorized.can_transition_to(Captured));
        assert!(Authorized.can_transition_to(Voided));
        assert!(Captured.can_transition_to(Settled));
        assert!(Captured.can_transition_to(PartiallyRefunded));
        assert!(Settled.can_transition_to(Refunded));
        assert!(PartiallyRefunded.can_transition_to(Refunded));

        // illegal edges
        assert!(!Captured.can_transition_to(Voided));
        assert!(!Pending.can_transition_to(Refunded));
        assert!(!Refunded.can_transition_to(Captured));
        assert!(!Declined.can_transition_to(Pending));
        assert!(!Voided.can_transition_to(Captured));
        assert!(!Settled.can_transition_to(Voided));
    }

    #[test]
    fn test_every_edge_outside_the_allowlist_is_rejected() {
        use PaymentStatus::*;

        const ALL: [PaymentStatus; 9] = [
            Pending,
            Authorized,
            Captured,
            Settled,
            Refunded,
            PartiallyRefunded,
            Voided,
            Failed,
            Declined,
        ];

        let allowed: &[(PaymentStatus, PaymentStatus)] = &[
            (Pending, Authorized),
            (Pending, Captured),
            (Pending, Declined),
            (Pending, Failed),
            (Pending, Voided),
            (Authorized, Captured),
            (Authorized, Voided),
            (Authorized, Failed),
            (Captured, Settled),
            (Captured, Refunded),
            (Captured, PartiallyRefunded),
            (Settled, Refunded),
            (Settled, PartiallyRefunded),
            (PartiallyRefunded, Refunded),
            (PartiallyRefunded, PartiallyRefunded),
        ];

        for from in ALL {
            for to in ALL {
                let expected = allowed.contains(&(from, to));
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "transition {} -> {} should be {}",
                    from,
                    to,
                    if expected { "legal" } else { "rejected" }
                );
            }
        }

        // Terminal states have no outgoing edges at all
        for terminal in [Refunded, Voided, Failed, Declined] {
            assert!(ALL.iter().all(|to| !terminal.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(PaymentStatus::Voided.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Declined.is_terminal());
        assert!(!PaymentStatus::Captured.is_terminal());
        assert!(!PaymentStatus::PartiallyRefunded.is_terminal());
    }

    #[test]
    fn test_remaining_refund_amount() {
        let p = payment(PaymentStatus::Captured, dec!(100.00), dec!(30.00));
        assert_eq!(p.remaining_refund_amount(), dec!(70.00));
        assert!(p.is_refundable());
        assert!(!p.is_voidable());
    }

    #[test]
    fn test_voidable_statuses() {
        assert!(payment(PaymentStatus::Pending, dec!(10.00), dec!(0)).is_voidable());
        assert!(payment(PaymentStatus::Authorized, dec!(10.00), dec!(0)).is_voidable());
        assert!(!payment(PaymentStatus::Captured, dec!(10.00), dec!(0)).is_voidable());
    }

    #[test]
    fn test_filter_fingerprint_is_stable() {
        let filter = PaymentFilter {
            customer_id: Some("cust_1".to_string()),
            status: Some(PaymentStatus::Captured),
            ..Default::default()
        };
        assert_eq!(filter.fingerprint(), filter.clone().fingerprint());

        let other = PaymentFilter::default();
        assert_ne!(filter.fingerprint(), other.fingerprint());
    }

    #[test]
    fn test_status_serde_names() {
        let s = serde_json::to_string(&PaymentStatus::PartiallyRefunded).unwrap();
        assert_eq!(s, "\"partially_refunded\"");
        let m = serde_json::to_string(&PaymentMethod::CreditCard).unwrap();
        assert_eq!(m, "\"credit_card\"");
    }
}
