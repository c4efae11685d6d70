//! Webhook dispatcher integration tests
//!
//! Exercise the outbox claim/deliver/retry cycle against a real database
//! and wiremock destinations. Skipped unless `EASYPAY_TEST_DATABASE_URL`
//! (or `DATABASE_URL`) points at a reachable database.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use easypay_core::cache::CacheManager;
use easypay_core::config::{DatabaseConfig, WebhookConfig};
use easypay_core::models::{Webhook, WebhookEventType, WebhookStatus};
use easypay_core::repository::{webhook_repository, PgWebhookRepository};
use easypay_core::webhook::{signature, WebhookDispatcher};
use easypay_core::{
    auto_migrate, CachedWebhookRepository, Database, SystemClock,
};

async fn test_database() -> Option<Database> {
    let url = std::env::var("EASYPAY_TEST_DATABASE_URL")
        .or_else(|_| std::env::var("DATABASE_URL"))
        .ok()?;

    let config = DatabaseConfig {
        url,
        pool_size: 5,
        max_overflow: 5,
    };

    let pool = match easypay_core::create_pool(&config).await {
        Ok(pool) => pool,
        Err(_) => {
            eprintln!("skipping: database not reachable");
            return None;
        }
    };
    auto_migrate(&pool).await.ok()?;
    Some(Database::new(pool))
}

fn dispatcher(db: Database) -> WebhookDispatcher {
    let cache = CacheManager::disabled();
    let repo = CachedWebhookRepository::new(
        Arc::new(PgWebhookRepository::new(db.clone())),
        cache,
        Duration::from_secs(300),
    );

    WebhookDispatcher::new(
        db,
        repo,
        WebhookConfig {
            signing_secret: "test_signing_secret".to_string(),
            max_retries: 3,
            retry_interval_secs: 60,
            timeout_secs: 5,
            ..Default::default()
        },
        Arc::new(SystemClock),
    )
    .unwrap()
}

/// Insert one outbox row pointed at the given destination
async fn enqueue(db: &Database, dispatcher: &WebhookDispatcher, url: &str) -> Webhook {
    let row = dispatcher.build_outbox_row(
        WebhookEventType::PaymentCaptured,
        None,
        serde_json::json!({"amount": "10.00", "currency": "USD"}),
        url,
        Some("corr_testdispatch".to_string()),
    );

    let mut tx = db.begin().await.unwrap();
    let webhook = webhook_repository::insert_outbox(&mut tx, &row).await.unwrap();
    tx.commit().await.unwrap();
    webhook
}

async fn reload(db: &Database, id: uuid::Uuid) -> Webhook {
    sqlx::query_as::<_, Webhook>("SELECT * FROM webhooks WHERE id = $1")
        .bind(id)
        .fetch_one(db.pool())
        .await
        .unwrap()
}

#[tokio::test]
async fn test_successful_delivery() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hooks"))
        .and(header_exists("X-Webhook-Signature"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &format!("{}/hooks", server.uri())).await;

    assert_eq!(webhook.status, WebhookStatus::Pending);
    assert!(webhook.event_id.starts_with("evt_"));
    assert!(signature::verify_payload(
        "test_signing_secret",
        &webhook.payload,
        &webhook.signature
    ));

    dispatcher.dispatch_now(webhook.id).await.unwrap();

    let delivered = reload(&db, webhook.id).await;
    assert_eq!(delivered.status, WebhookStatus::Delivered);
    assert_eq!(delivered.retry_count, 0);
    assert_eq!(delivered.response_status, Some(200));
    assert!(delivered.delivered_at.is_some());
}

#[tokio::test]
async fn test_retryable_failure_schedules_backoff() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &server.uri()).await;

    dispatcher.dispatch_now(webhook.id).await.unwrap();

    let retrying = reload(&db, webhook.id).await;
    assert_eq!(retrying.status, WebhookStatus::Retrying);
    assert_eq!(retrying.retry_count, 1);
    assert_eq!(retrying.response_status, Some(503));

    // First retry lands at base 60s with at most 10% jitter
    let delay = (retrying.next_retry_at.unwrap() - Utc::now()).num_seconds();
    assert!((50..=70).contains(&delay), "unexpected retry delay {}s", delay);
}

#[tokio::test]
async fn test_permanent_rejection_is_terminal() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(410).set_body_string("gone"))
        .expect(1)
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &server.uri()).await;

    dispatcher.dispatch_now(webhook.id).await.unwrap();

    let failed = reload(&db, webhook.id).await;
    assert_eq!(failed.status, WebhookStatus::Failed);
    assert!(failed.failed_at.is_some());

    // A sweep must not pick the terminal row up again
    let processed = dispatcher.deliver_due_now().await.unwrap();
    let untouched = reload(&db, webhook.id).await;
    assert_eq!(untouched.status, WebhookStatus::Failed);
    assert_eq!(untouched.retry_count, failed.retry_count);
    let _ = processed;
}

#[tokio::test]
async fn test_retry_budget_exhaustion_expires() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &server.uri()).await;

    // Budget already spent; the next retryable failure retires the row
    sqlx::query(
        "UPDATE webhooks SET status = 'retrying', retry_count = max_retries, next_retry_at = NOW() WHERE id = $1",
    )
    .bind(webhook.id)
    .execute(db.pool())
    .await
    .unwrap();

    dispatcher.deliver_due_now().await.unwrap();

    let expired = reload(&db, webhook.id).await;
    assert_eq!(expired.status, WebhookStatus::Expired);
    assert_eq!(expired.retry_count, expired.max_retries);
}

#[tokio::test]
async fn test_sweep_skips_rows_that_are_not_due() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &server.uri()).await;

    sqlx::query(
        "UPDATE webhooks SET status = 'retrying', retry_count = 1, next_retry_at = NOW() + INTERVAL '1 hour' WHERE id = $1",
    )
    .bind(webhook.id)
    .execute(db.pool())
    .await
    .unwrap();

    dispatcher.deliver_due_now().await.unwrap();

    let parked = reload(&db, webhook.id).await;
    assert_eq!(parked.status, WebhookStatus::Retrying);
    assert_eq!(parked.retry_count, 1);
}

#[tokio::test]
async fn test_rearm_failed_delivery() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    // First attempt is rejected outright, the re-armed one succeeds
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &server.uri()).await;

    dispatcher.dispatch_now(webhook.id).await.unwrap();
    assert_eq!(reload(&db, webhook.id).await.status, WebhookStatus::Failed);

    let redelivered = dispatcher.retry_webhook(webhook.id).await.unwrap();
    assert_eq!(redelivered.status, WebhookStatus::Delivered);
}

#[tokio::test]
async fn test_rearm_rejects_delivered_webhook() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dispatcher = dispatcher(db.clone());
    let webhook = enqueue(&db, &dispatcher, &server.uri()).await;
    dispatcher.dispatch_now(webhook.id).await.unwrap();

    let err = dispatcher.retry_webhook(webhook.id).await.unwrap_err();
    assert_eq!(err.category(), "conflict");
}
