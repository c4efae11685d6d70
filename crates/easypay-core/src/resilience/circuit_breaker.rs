//! Circuit breaker over upstream processor calls

use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,

    /// Consecutive half-open successes before the circuit closes
    pub success_threshold: u32,

    /// How long the circuit stays open before probing
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls flow, failures are counted
    Closed,

    /// Calls are rejected until the recovery timeout elapses
    Open,

    /// One probe at a time decides whether to close or reopen
    HalfOpen,
}

/// Distinguished rejection returned while the circuit is open
#[derive(Debug, Clone, Copy)]
pub struct CircuitOpenError;

impl fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Circuit breaker is open")
    }
}

impl std::error::Error for CircuitOpenError {}

impl From<CircuitOpenError> for crate::Error {
    fn from(_: CircuitOpenError) -> Self {
        crate::Error::Unavailable("Upstream processor temporarily unavailable".to_string())
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Closed/Open/HalfOpen tracker
///
/// Callers bracket each upstream call with `try_acquire` and exactly one of
/// `record_success` / `record_failure`. Declines and user errors must be
/// reported as successes: only transport-level trouble trips the breaker.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Gate one upstream call
    pub async fn try_acquire(&self) -> Result<(), CircuitOpenError> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                if elapsed >= self.config.recovery_timeout {
                    info!("Circuit breaker entering half-open state");
                    inner.state = CircuitState::HalfOpen;
                    inner.consecutive_successes = 0;
                    inner.probe_in_flight = true;
                    Ok(())
                } else {
                    Err(CircuitOpenError)
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(CircuitOpenError)
                } else {
                    inner.probe_in_flight = true;
                    Ok(())
                }
            }
        }
    }

    /// Report a successful (or non-tripping) outcome
    pub async fn record_success(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.probe_in_flight = false;
                inner.consecutive_successes += 1;
                if inner.consecutive_successes >= self.config.success_threshold {
                    info!("Circuit breaker closed after successful probes");
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes = 0;
                    inner.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Report a tripping failure
    pub async fn record_failure(&self) {
        let mut inner = self.inner.lock().await;

        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    warn!(
                        "Circuit breaker opened after {} consecutive failures",
                        inner.consecutive_failures
                    );
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                }
            }
            CircuitState::HalfOpen => {
                warn!("Circuit breaker reopened after failed probe");
                inner.probe_in_flight = false;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
            }
            CircuitState::Open => {}
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// Read-only admission check: open and not yet due for a probe
    pub async fn is_open(&self) -> bool {
        let inner = self.inner.lock().await;
        match inner.state {
            CircuitState::Open => {
                let elapsed = inner
                    .opened_at
                    .map(|t| t.elapsed())
                    .unwrap_or(Duration::ZERO);
                elapsed < self.config.recovery_timeout
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_breaker() -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 5,
            success_threshold: 3,
            recovery_timeout: Duration::from_millis(50),
        })
    }

    #[tokio::test]
    async fn test_trips_after_threshold_failures() {
        let breaker = fast_breaker();

        for _ in 0..4 {
            breaker.try_acquire().await.unwrap();
            breaker.record_failure().await;
            assert_eq!(breaker.state().await, CircuitState::Closed);
        }

        breaker.try_acquire().await.unwrap();
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(breaker.is_open().await);
        assert!(breaker.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_success_resets_failure_count() {
        let breaker = fast_breaker();

        for _ in 0..4 {
            breaker.record_failure().await;
        }
        breaker.record_success().await;
        for _ in 0..4 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_recovery_allows_single_probe() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;

        // First acquire becomes the probe, second is rejected
        breaker.try_acquire().await.unwrap();
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
        assert!(breaker.try_acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_three_probe_successes_close_the_circuit() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        for i in 0..3 {
            breaker.try_acquire().await.unwrap();
            breaker.record_success().await;
            if i < 2 {
                assert_eq!(breaker.state().await, CircuitState::HalfOpen);
            }
        }

        assert_eq!(breaker.state().await, CircuitState::Closed);
        breaker.try_acquire().await.unwrap();
    }

    #[tokio::test]
    async fn test_probe_failure_reopens() {
        let breaker = fast_breaker();
        for _ in 0..5 {
            breaker.record_failure().await;
        }
        tokio::time::sleep(Duration::from_millis(60)).await;

        breaker.try_acquire().await.unwrap();
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(breaker.try_acquire().await.is_err());
    }
}
