//! Outbound webhook delivery
//!
//! Events are written as outbox rows in the same transaction as the
//! payment mutation that produced them; the dispatcher delivers committed
//! rows with at-least-once semantics, HMAC-SHA256 signatures and
//! exponential-backoff retries.

pub mod dispatcher;
pub mod signature;

pub use dispatcher::{
    backoff_delay, build_event_payload, classify_response, DeliveryOutcome, WebhookDispatcher,
};
pub use signature::{sign_bytes, sign_payload, verify_bytes, verify_payload, SIGNATURE_HEADER};
