//! Upstream card processor integration (Authorize.net)
//!
//! Request construction, two-level response parsing, and error-class
//! mapping for the transaction API. The engine consumes the
//! `ProcessorClient` trait; `AuthorizeNetClient` is the wire
//! implementation.

pub mod client;
pub mod models;

pub use client::AuthorizeNetClient;
pub use models::{
    format_amount, luhn_check, BillingAddress, CreditCard, OrderInfo, ProcessorResponse,
    TransactionStatus, TransactionType,
};

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Processor result type alias
pub type ProcessorResult<T> = Result<T, ProcessorError>;

/// Error classes of the upstream processor
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProcessorError {
    /// Credentials rejected; fatal until configuration changes
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Request rejected before it was sent (card, address, amount)
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The processor answered with a definitive failure; never retried
    #[error("Transaction failed: {message}")]
    Transaction {
        message: String,
        response_code: Option<String>,
        transaction_id: Option<String>,
    },

    /// Connect/read/TLS/decode failure; retryable by callers
    #[error("Network error: {0}")]
    Network(String),
}

impl ProcessorError {
    /// Only network and authentication failures count against the
    /// circuit breaker; declines and user errors do not.
    pub fn trips_breaker(&self) -> bool {
        matches!(
            self,
            ProcessorError::Network(_) | ProcessorError::Authentication(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ProcessorError::Network(_))
    }
}

impl From<ProcessorError> for crate::Error {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::Validation(msg) => crate::Error::Validation(msg),
            other => crate::Error::External(other.to_string()),
        }
    }
}

/// Upstream processor operations used by the payment engine
#[async_trait]
pub trait ProcessorClient: Send + Sync {
    /// Verify credentials against the upstream
    async fn authenticate(&self) -> ProcessorResult<bool>;

    /// Authorize and capture in one step
    async fn charge_card(
        &self,
        amount: Decimal,
        card: &CreditCard,
        billing: &BillingAddress,
        order: Option<OrderInfo>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse>;

    /// Authorize without capturing funds
    async fn authorize_only(
        &self,
        amount: Decimal,
        card: &CreditCard,
        billing: &BillingAddress,
        order: Option<OrderInfo>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse>;

    /// Capture previously authorized funds
    async fn capture(
        &self,
        transaction_id: &str,
        amount: Option<Decimal>,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse>;

    /// Refund a settled transaction
    async fn refund(
        &self,
        transaction_id: &str,
        amount: Decimal,
        card: &CreditCard,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse>;

    /// Void a transaction before settlement
    async fn void(
        &self,
        transaction_id: &str,
        ref_id: Option<&str>,
    ) -> ProcessorResult<ProcessorResponse>;
}
