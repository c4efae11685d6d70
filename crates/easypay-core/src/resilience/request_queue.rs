//! Priority request queue with admission control and a bounded worker pool
//!
//! Requests acquire a `RequestPermit` before their handler runs. Up to
//! `max_workers` permits are out at once; excess requests wait in one of
//! four bounded priority queues and are granted highest-level-first as
//! permits return. A queued request that outlives its deadline is answered
//! with a timeout rejection.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::QueueSettings;

/// Priority levels, highest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RequestPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl RequestPriority {
    /// Classify a request by method and path
    ///
    /// Payment-mutating POSTs are critical, payment reads high, the rest
    /// of the versioned API normal, everything else low.
    pub fn classify(method: &str, path: &str) -> Self {
        let mutating = matches!(method, "POST" | "PUT" | "DELETE");
        if path.starts_with("/api/v1/payments") && mutating {
            RequestPriority::Critical
        } else if path.starts_with("/api/v1/payments") {
            RequestPriority::High
        } else if path.starts_with("/api/v1/") {
            RequestPriority::Normal
        } else {
            RequestPriority::Low
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Paths that skip the queue entirely
pub fn is_bypass_path(path: &str) -> bool {
    matches!(path, "/health" | "/health/ready" | "/health/live" | "/metrics")
}

/// Why a request was not admitted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueRejection {
    /// The target priority queue is at capacity
    QueueFull,

    /// Deadline expired while waiting for a worker slot
    Timeout,

    /// Admission stopped for graceful shutdown
    ShuttingDown,
}

struct Waiter {
    tx: oneshot::Sender<()>,
}

struct QueueState {
    queues: [VecDeque<Waiter>; 4],
    in_flight: usize,
}

impl std::fmt::Debug for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueState")
            .field("queued", &self.queued())
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

impl QueueState {
    fn queued(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    config: QueueSettings,
    shutting_down: AtomicBool,
}

/// Admission queue shared across request handlers
#[derive(Clone)]
pub struct RequestQueue {
    shared: Arc<Shared>,
}

/// A held worker slot; dropping it hands the slot to the next waiter
#[derive(Debug)]
pub struct RequestPermit {
    shared: Arc<Shared>,
}

impl Drop for RequestPermit {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap();
        state.in_flight -= 1;

        // Grant the slot to the highest-priority live waiter; waiters whose
        // receiver timed out are skipped.
        for level in (0..4).rev() {
            while let Some(waiter) = state.queues[level].pop_front() {
                if waiter.tx.send(()).is_ok() {
                    state.in_flight += 1;
                    return;
                }
            }
        }
    }
}

/// Point-in-time queue occupancy
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub in_flight: usize,
    pub queued: usize,
    pub capacity: usize,
}

impl RequestQueue {
    pub fn new(config: QueueSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState {
                    queues: [
                        VecDeque::new(),
                        VecDeque::new(),
                        VecDeque::new(),
                        VecDeque::new(),
                    ],
                    in_flight: 0,
                }),
                config,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Stop admitting new requests
    pub fn begin_shutdown(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock().unwrap();
        QueueStats {
            in_flight: state.in_flight,
            queued: state.queued(),
            capacity: self.shared.config.max_queue_size,
        }
    }

    /// Admit one request, waiting in the priority queue when the worker
    /// pool is saturated
    pub async fn acquire(
        &self,
        priority: RequestPriority,
    ) -> Result<RequestPermit, QueueRejection> {
        if self.is_shutting_down() {
            return Err(QueueRejection::ShuttingDown);
        }

        let config = &self.shared.config;
        let rx = {
            let mut state = self.shared.state.lock().unwrap();

            // A free worker and no backlog: serve immediately
            if state.in_flight < config.max_workers && state.queued() == 0 {
                state.in_flight += 1;
                return Ok(RequestPermit {
                    shared: self.shared.clone(),
                });
            }

            // Near capacity, critical requests skip the queue entirely
            let load = state.in_flight + state.queued();
            if priority == RequestPriority::Critical
                && load * 10 >= config.max_queue_size * 9
            {
                debug!("Critical request served directly at high load: load={}", load);
                state.in_flight += 1;
                return Ok(RequestPermit {
                    shared: self.shared.clone(),
                });
            }

            let per_level_capacity = (config.max_queue_size / 4).max(1);
            if state.queues[priority.index()].len() >= per_level_capacity
                || state.queued() >= config.max_queue_size
            {
                return Err(QueueRejection::QueueFull);
            }

            let (tx, rx) = oneshot::channel();
            state.queues[priority.index()].push_back(Waiter { tx });
            rx
        };

        let deadline = Duration::from_secs(config.request_timeout_secs);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(())) => Ok(RequestPermit {
                shared: self.shared.clone(),
            }),
            // Granter side dropped (shutdown) or deadline expired; the
            // dropped receiver makes the stale waiter skippable.
            Ok(Err(_)) => Err(QueueRejection::ShuttingDown),
            Err(_) => Err(QueueRejection::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue(max_workers: usize, max_queue_size: usize, timeout_secs: u64) -> RequestQueue {
        RequestQueue::new(QueueSettings {
            max_queue_size,
            max_workers,
            request_timeout_secs: timeout_secs,
            task_workers: 1,
        })
    }

    #[test]
    fn test_priority_classification() {
        assert_eq!(
            RequestPriority::classify("POST", "/api/v1/payments"),
            RequestPriority::Critical
        );
        assert_eq!(
            RequestPriority::classify("POST", "/api/v1/payments/abc/refund"),
            RequestPriority::Critical
        );
        assert_eq!(
            RequestPriority::classify("GET", "/api/v1/payments/abc"),
            RequestPriority::High
        );
        assert_eq!(
            RequestPriority::classify("GET", "/api/v1/webhooks"),
            RequestPriority::Normal
        );
        assert_eq!(
            RequestPriority::classify("GET", "/docs"),
            RequestPriority::Low
        );
    }

    #[test]
    fn test_bypass_paths() {
        assert!(is_bypass_path("/health"));
        assert!(is_bypass_path("/health/live"));
        assert!(is_bypass_path("/metrics"));
        assert!(!is_bypass_path("/api/v1/payments"));
    }

    #[tokio::test]
    async fn test_immediate_admission_under_capacity() {
        let q = queue(2, 100, 1);
        let a = q.acquire(RequestPriority::Normal).await.unwrap();
        let b = q.acquire(RequestPriority::Low).await.unwrap();
        assert_eq!(q.stats().in_flight, 2);
        drop(a);
        drop(b);
        assert_eq!(q.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_highest_priority_waiter_granted_first() {
        let q = queue(1, 100, 5);
        let held = q.acquire(RequestPriority::Normal).await.unwrap();

        let q_low = q.clone();
        let low = tokio::spawn(async move { q_low.acquire(RequestPriority::Low).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let q_critical = q.clone();
        let critical =
            tokio::spawn(async move { q_critical.acquire(RequestPriority::Critical).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(q.stats().queued, 2);
        drop(held);

        // Critical wins the freed slot even though low queued first
        let critical_permit = critical.await.unwrap().unwrap();
        assert_eq!(q.stats().queued, 1);
        drop(critical_permit);

        low.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_queue_full_rejection() {
        // Per-level capacity is max(4/4, 1) = 1
        let q = queue(1, 4, 5);
        let _held = q.acquire(RequestPriority::Normal).await.unwrap();

        let q2 = q.clone();
        let _waiting = tokio::spawn(async move { q2.acquire(RequestPriority::Normal).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let result = q.acquire(RequestPriority::Normal).await;
        assert_eq!(result.unwrap_err(), QueueRejection::QueueFull);
    }

    #[tokio::test]
    async fn test_critical_bypass_at_high_load() {
        // Per-level capacity is 1; one queued waiter saturates Normal
        let q = queue(1, 1, 5);
        let _held = q.acquire(RequestPriority::Normal).await.unwrap();

        let q2 = q.clone();
        let _waiting = tokio::spawn(async move { q2.acquire(RequestPriority::Normal).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        // Normal traffic is full, critical still gets served directly
        assert_eq!(
            q.acquire(RequestPriority::Normal).await.unwrap_err(),
            QueueRejection::QueueFull
        );
        let permit = q.acquire(RequestPriority::Critical).await.unwrap();
        assert_eq!(q.stats().in_flight, 2);
        drop(permit);
    }

    #[tokio::test]
    async fn test_queued_request_times_out() {
        let q = queue(1, 100, 1);
        let _held = q.acquire(RequestPriority::Normal).await.unwrap();

        let start = std::time::Instant::now();
        let result = q.acquire(RequestPriority::Normal).await;
        assert_eq!(result.unwrap_err(), QueueRejection::Timeout);
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_requests() {
        let q = queue(2, 100, 1);
        q.begin_shutdown();
        assert_eq!(
            q.acquire(RequestPriority::Critical).await.unwrap_err(),
            QueueRejection::ShuttingDown
        );
    }

    #[tokio::test]
    async fn test_timed_out_waiter_is_skipped_on_grant() {
        let q = queue(1, 100, 1);
        let held = q.acquire(RequestPriority::Normal).await.unwrap();

        // This waiter times out and leaves a dead entry in the queue
        let _ = q.acquire(RequestPriority::Normal).await.unwrap_err();

        let q2 = q.clone();
        let live = tokio::spawn(async move { q2.acquire(RequestPriority::Normal).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(held);
        live.await.unwrap().unwrap();
    }
}
