//! Server wiring and lifecycle

use axum::middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use easypay_core::audit::AuditRecorder;
use easypay_core::cache::{CacheManager, RedisConfig, RedisPool};
use easypay_core::config::Config;
use easypay_core::jobs::{TaskHandler, TaskQueue, TaskRunner};
use easypay_core::metrics::MetricsRegistry;
use easypay_core::processor::ProcessorClient;
use easypay_core::repository::{
    CachedAuditLogRepository, CachedPaymentRepository, CachedWebhookRepository,
    PgAuditLogRepository, PgPaymentRepository, PgWebhookRepository,
};
use easypay_core::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RequestQueue, SlidingWindowRateLimiter,
};
use easypay_core::{
    auto_migrate, create_pool, AuthorizeNetClient, Database, Error, PaymentEngine,
    PaymentObservability, Result, SystemClock, WebhookDispatcher,
};

use crate::middleware::{admission_middleware, request_id_middleware};
use crate::routes;
use crate::state::AppState;

/// Start the HTTP server and the background task runner
pub async fn run(config: Config) -> Result<()> {
    let addr = SocketAddr::from((
        config
            .server
            .host
            .parse::<std::net::IpAddr>()
            .map_err(|e| Error::Config(format!("Invalid host: {}", e)))?,
        config.server.port,
    ));

    let (state, task_runner) = build_state(config.clone()).await?;
    let app = build_router(state.clone());

    info!("EasyPay API server listening on http://{}", addr);
    log_routes();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Network(e.to_string()))?;

    let queue = state.request_queue.clone();
    let shutdown = async move {
        wait_for_signal().await;
        info!("Shutdown signal received, refusing new requests");
        queue.begin_shutdown();
    };

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
    .map_err(|e| Error::Network(e.to_string()))?;

    // In-flight processor calls already ran to completion with the
    // request drain; now drain the background pool.
    task_runner
        .shutdown(Duration::from_secs(
            state.config.server.graceful_shutdown_timeout_secs,
        ))
        .await;

    info!("Server stopped");
    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Build application state and start the task runner
pub async fn build_state(config: Config) -> Result<(AppState, TaskRunner)> {
    info!("Connecting to PostgreSQL...");
    let pool = create_pool(&config.database).await?;
    auto_migrate(&pool).await?;
    let db = Database::new(pool);

    let cache = init_cache(&config).await;
    let clock = Arc::new(SystemClock);

    // Background queue doubles as the deferred-invalidation sink
    let task_queue = Arc::new(TaskQueue::new(10_000));

    let pg_payments = Arc::new(PgPaymentRepository::new(db.clone()));
    let payments = CachedPaymentRepository::new(
        pg_payments.clone(),
        cache.clone(),
        Duration::from_secs(config.cache.entity_ttl_secs),
        Duration::from_secs(config.cache.list_ttl_secs),
    )
    .with_invalidation_sink(task_queue.clone());

    let webhooks = CachedWebhookRepository::new(
        Arc::new(PgWebhookRepository::new(db.clone())),
        cache.clone(),
        Duration::from_secs(config.cache.entity_ttl_secs),
    );
    let webhooks_for_state = webhooks.clone();

    let audit = AuditRecorder::new(
        CachedAuditLogRepository::new(
            Arc::new(PgAuditLogRepository::new(db.clone())),
            cache.clone(),
            Duration::from_secs(config.cache.list_ttl_secs),
        )
        .with_invalidation_sink(task_queue.clone()),
    );

    let dispatcher = WebhookDispatcher::new(
        db.clone(),
        webhooks,
        config.webhooks.clone(),
        clock.clone(),
    )?;

    let processor: Arc<dyn ProcessorClient> =
        Arc::new(AuthorizeNetClient::new(config.processor.clone())?);
    if !config.processor.is_configured() {
        warn!("Authorize.net credentials are not configured; charges will fail upstream");
    }

    let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default()));
    let observability = PaymentObservability::new(cache.clone(), clock.clone());

    let engine = Arc::new(
        PaymentEngine::new(
            db.clone(),
            payments,
            processor,
            breaker.clone(),
            dispatcher.clone(),
            observability,
            config.currencies.clone(),
            config.webhooks.target_url.clone(),
            clock,
        )
        .with_reconcile_sink(task_queue.clone()),
    );

    let handler = TaskHandler::new(dispatcher.clone(), cache.clone(), pg_payments, audit.clone());
    let task_runner = TaskRunner::start(
        task_queue,
        config.queue.task_workers,
        Arc::new(handler),
        Duration::from_secs(config.webhooks.poll_interval_secs),
    );

    let rate_limiter = SlidingWindowRateLimiter::from_settings(&config.rate_limit);
    let request_queue = RequestQueue::new(config.queue.clone());
    let metrics = Arc::new(MetricsRegistry::new());

    let state = AppState::new(
        engine,
        dispatcher,
        webhooks_for_state,
        audit,
        db,
        cache,
        rate_limiter,
        breaker,
        request_queue,
        metrics,
        Arc::new(config),
    );

    Ok((state, task_runner))
}

/// Initialize Redis; the service runs degraded without it
async fn init_cache(config: &Config) -> CacheManager {
    let Some(redis_config) = RedisConfig::from_settings(&config.cache) else {
        info!("Redis not configured, running without cache");
        return CacheManager::disabled();
    };

    let entity_ttl = redis_config.default_ttl();
    match RedisPool::new(redis_config).await {
        Ok(pool) => {
            info!("Redis connected");
            CacheManager::new(pool, entity_ttl)
        }
        Err(e) => {
            warn!("Failed to connect to Redis: {}. Continuing without cache.", e);
            CacheManager::disabled()
        }
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> axum::Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api = axum::Router::new()
        .merge(routes::payments::router())
        .merge(routes::webhooks::router())
        .merge(routes::audit::router())
        .merge(routes::subscriptions::router());

    axum::Router::new()
        .merge(routes::health::router())
        .merge(routes::metrics::router())
        .nest("/api/v1", api)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admission_middleware,
        ))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn log_routes() {
    info!("Available routes:");
    info!("  GET  /health                          - Health summary");
    info!("  GET  /health/live                     - Liveness probe");
    info!("  GET  /health/ready                    - Readiness probe");
    info!("  GET  /metrics                         - Prometheus metrics");
    info!("  POST /api/v1/payments                 - Create payment");
    info!("  GET  /api/v1/payments                 - List payments");
    info!("  GET  /api/v1/payments/:id             - Get payment");
    info!("  PUT  /api/v1/payments/:id             - Update payment");
    info!("  POST /api/v1/payments/:id/authorize   - Authorize only");
    info!("  POST /api/v1/payments/:id/capture     - Charge or capture");
    info!("  POST /api/v1/payments/:id/refund      - Refund payment");
    info!("  POST /api/v1/payments/:id/cancel      - Void payment");
    info!("  GET  /api/v1/payments/:id/history     - Status history");
    info!("  GET  /api/v1/payments/search          - Search payments");
    info!("  GET  /api/v1/payments/stats           - Payment statistics");
    info!("  POST /api/v1/webhooks/authorize-net   - Inbound processor webhook");
    info!("  GET  /api/v1/webhooks                 - List outbound webhooks");
    info!("  GET  /api/v1/webhooks/:id             - Get outbound webhook");
    info!("  POST /api/v1/webhooks/:id/retry       - Re-arm failed delivery");
    info!("  GET  /api/v1/audit-logs               - List audit records");
    info!("  GET  /api/v1/audit-logs/:id           - Get audit record");
    info!("  *    /api/v1/subscriptions/*          - Reserved (501)");
}
