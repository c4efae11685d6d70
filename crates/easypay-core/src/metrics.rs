//! Process-local metrics registry
//!
//! Counters and gauges collected across the request path, the processor
//! client and the dispatcher, rendered in Prometheus text exposition
//! format by the `/metrics` endpoint.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Lock-free counter/gauge registry
#[derive(Default)]
pub struct MetricsRegistry {
    counters: DashMap<String, AtomicU64>,
    gauges: DashMap<String, AtomicI64>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment a counter by one
    pub fn incr(&self, name: &str) {
        self.incr_by(name, 1);
    }

    pub fn incr_by(&self, name: &str, delta: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    /// Overwrite a counter with an externally accumulated total
    pub fn set_counter(&self, name: &str, value: u64) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .store(value, Ordering::Relaxed);
    }

    /// Set a gauge to an absolute value
    pub fn set_gauge(&self, name: &str, value: i64) {
        self.gauges
            .entry(name.to_string())
            .or_insert_with(|| AtomicI64::new(0))
            .store(value, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn gauge(&self, name: &str) -> i64 {
        self.gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render everything in Prometheus text exposition format
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        let mut counters: Vec<(String, u64)> = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, value) in counters {
            out.push_str(&format!("# TYPE {} counter\n{} {}\n", name, name, value));
        }

        let mut gauges: Vec<(String, i64)> = self
            .gauges
            .iter()
            .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(&b.0));

        for (name, value) in gauges {
            out.push_str(&format!("# TYPE {} gauge\n{} {}\n", name, name, value));
        }

        out
    }
}

/// Metric names used across the service
pub mod names {
    pub const REQUESTS_TOTAL: &str = "easypay_requests_total";
    pub const REQUESTS_REJECTED_RATE_LIMIT: &str = "easypay_requests_rejected_rate_limit_total";
    pub const REQUESTS_REJECTED_QUEUE_FULL: &str = "easypay_requests_rejected_queue_full_total";
    pub const REQUESTS_TIMED_OUT: &str = "easypay_requests_timed_out_total";
    pub const REQUESTS_SHED_CIRCUIT_OPEN: &str = "easypay_requests_shed_circuit_open_total";
    pub const QUEUE_IN_FLIGHT: &str = "easypay_request_queue_in_flight";
    pub const QUEUE_DEPTH: &str = "easypay_request_queue_depth";
    pub const CACHE_HITS: &str = "easypay_cache_hits_total";
    pub const CACHE_MISSES: &str = "easypay_cache_misses_total";
    pub const CACHE_ONLINE: &str = "easypay_cache_online";
}
