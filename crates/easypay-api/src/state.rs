use std::sync::Arc;

use easypay_core::audit::AuditRecorder;
use easypay_core::cache::CacheManager;
use easypay_core::config::Config;
use easypay_core::metrics::MetricsRegistry;
use easypay_core::resilience::{CircuitBreaker, RequestQueue, SlidingWindowRateLimiter};
use easypay_core::{CachedWebhookRepository, Database, PaymentEngine, WebhookDispatcher};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PaymentEngine>,
    pub dispatcher: WebhookDispatcher,
    pub webhooks: CachedWebhookRepository,
    pub audit: AuditRecorder,
    pub db: Database,
    pub cache: CacheManager,
    pub rate_limiter: SlidingWindowRateLimiter,
    pub breaker: Arc<CircuitBreaker>,
    pub request_queue: RequestQueue,
    pub metrics: Arc<MetricsRegistry>,
    pub config: Arc<Config>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: Arc<PaymentEngine>,
        dispatcher: WebhookDispatcher,
        webhooks: CachedWebhookRepository,
        audit: AuditRecorder,
        db: Database,
        cache: CacheManager,
        rate_limiter: SlidingWindowRateLimiter,
        breaker: Arc<CircuitBreaker>,
        request_queue: RequestQueue,
        metrics: Arc<MetricsRegistry>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine,
            dispatcher,
            webhooks,
            audit,
            db,
            cache,
            rate_limiter,
            breaker,
            request_queue,
            metrics,
            config,
        }
    }
}
