//! Resilience layer around the upstream processor and the HTTP surface
//!
//! - `CircuitBreaker`: Closed/Open/HalfOpen tracker over processor calls
//! - `SlidingWindowRateLimiter`: per-client minute/hour windows
//! - `RequestQueue`: priority admission with a bounded worker pool
//!
//! All three are process-local; multi-instance deployments need external
//! coordination (documented limitation).

pub mod circuit_breaker;
pub mod rate_limiter;
pub mod request_queue;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitOpenError, CircuitState};
pub use rate_limiter::{client_identity, SlidingWindowRateLimiter};
pub use request_queue::{
    is_bypass_path, QueueRejection, QueueStats, RequestPermit, RequestPriority, RequestQueue,
};
