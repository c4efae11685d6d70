//! Payment engine integration tests
//!
//! These exercise the full engine against a real Postgres database with a
//! stubbed processor. They are skipped unless `EASYPAY_TEST_DATABASE_URL`
//! (or `DATABASE_URL`) points at a reachable database.

use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use easypay_core::cache::CacheManager;
use easypay_core::config::{CurrencyConfig, DatabaseConfig, ProcessorConfig, WebhookConfig};
use easypay_core::models::{
    CreatePaymentRequest, PaymentMethod, PaymentStatus, RefundPaymentRequest,
};
use easypay_core::payment::RequestContext;
use easypay_core::repository::{PgPaymentRepository, PgWebhookRepository};
use easypay_core::resilience::CircuitBreakerConfig;
use easypay_core::{
    auto_migrate, AuthorizeNetClient, CachedPaymentRepository, CachedWebhookRepository,
    CircuitBreaker, Database, PaymentEngine, PaymentObservability, SystemClock, WebhookDispatcher,
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

async fn test_engine(db: Database, processor_uri: String) -> PaymentEngine {
    let cache = CacheManager::disabled();
    let clock = Arc::new(SystemClock);

    let payments = CachedPaymentRepository::new(
        Arc::new(PgPaymentRepository::new(db.clone())),
        cache.clone(),
        Duration::from_secs(300),
        Duration::from_secs(600),
    );
    let webhooks = CachedWebhookRepository::new(
        Arc::new(PgWebhookRepository::new(db.clone())),
        cache.clone(),
        Duration::from_secs(300),
    );

    let webhook_config = WebhookConfig {
        signing_secret: "test_signing_secret".to_string(),
        // Unroutable on purpose: rows are enqueued, delivery fails fast
        target_url: Some("http://127.0.0.1:9/webhooks".to_string()),
        ..Default::default()
    };
    let dispatcher = WebhookDispatcher::new(
        db.clone(),
        webhooks,
        webhook_config.clone(),
        clock.clone(),
    )
    .unwrap();

    let processor = Arc::new(
        AuthorizeNetClient::new(ProcessorConfig {
            api_login_id: "login".to_string(),
            transaction_key: "key".to_string(),
            sandbox: true,
            api_url: Some(processor_uri),
            timeout_secs: 5,
        })
        .unwrap(),
    );

    PaymentEngine::new(
        db,
        payments,
        processor,
        Arc::new(CircuitBreaker::new(CircuitBreakerConfig::default())),
        dispatcher,
        PaymentObservability::new(cache, clock.clone()),
        CurrencyConfig::default(),
        webhook_config.target_url.clone(),
        clock,
    )
}

fn create_request(amount: rust_decimal::Decimal) -> CreatePaymentRequest {
    CreatePaymentRequest {
        amount,
        currency: "USD".to_string(),
        payment_method: PaymentMethod::CreditCard,
        external_id: None,
        customer_id: Some("cust_test".to_string()),
        customer_email: Some("jane@example.com".to_string()),
        customer_name: Some("Jane Doe".to_string()),
        card_token: Some("tok_visa_4242".to_string()),
        description: Some("integration test".to_string()),
        metadata: serde_json::Map::new(),
        is_test: true,
    }
}

fn approved_body(trans_id: &str) -> serde_json::Value {
    json!({
        "messages": {"resultCode": "Ok", "message": [{"code": "I00001", "text": "Successful."}]},
        "transactionResponse": {
            "transId": trans_id,
            "responseCode": "1",
            "responseText": "This transaction has been approved.",
            "authCode": "ABC123",
            "amount": "10.00"
        }
    })
}

fn declined_body() -> serde_json::Value {
    json!({
        "messages": {"resultCode": "Ok", "message": [{"code": "I00001", "text": "Successful."}]},
        "transactionResponse": {
            "transId": "70000001",
            "responseCode": "2",
            "responseText": "This transaction has been declined."
        }
    })
}

async fn approving_server(trans_id: &str) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(approved_body(trans_id)))
        .mount(&server)
        .await;
    server
}

#[tokio::test]
async fn test_happy_path_charge() {
    let Some(db) = test_database().await else { return };
    let server = approving_server("60000001").await;
    let engine = test_engine(db.clone(), server.uri()).await;

    let payment = engine
        .create_payment(create_request(dec!(10.00)), RequestContext::default())
        .await
        .unwrap();

    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(payment.external_id.starts_with("pay_"));
    assert_eq!(payment.external_id.len(), 16);
    assert!(payment.external_id[4..].chars().all(|c| c.is_ascii_hexdigit()));

    let charged = engine
        .charge_payment(payment.id, RequestContext::default())
        .await
        .unwrap();

    assert_eq!(charged.status, PaymentStatus::Captured);
    assert_eq!(charged.authorize_net_transaction_id.as_deref(), Some("60000001"));
    assert!(charged.processed_at.is_some());
    assert_eq!(charged.card_last_four.as_deref(), Some("4242"));
    assert_eq!(charged.card_brand.as_deref(), Some("visa"));

    let actions: Vec<String> = sqlx::query_scalar(
        "SELECT action::text FROM audit_logs WHERE payment_id = $1 ORDER BY created_at",
    )
    .bind(payment.id)
    .fetch_all(db.pool())
    .await
    .unwrap();

    assert_eq!(actions[0], "payment_created");
    assert!(actions.contains(&"payment_captured".to_string()));
}

#[tokio::test]
async fn test_decline_emits_failed_webhook() {
    let Some(db) = test_database().await else { return };
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(declined_body()))
        .mount(&server)
        .await;
    let engine = test_engine(db.clone(), server.uri()).await;

    let payment = engine
        .create_payment(create_request(dec!(10.00)), RequestContext::default())
        .await
        .unwrap();
    let declined = engine
        .charge_payment(payment.id, RequestContext::default())
        .await
        .unwrap();

    assert_eq!(declined.status, PaymentStatus::Declined);
    assert_eq!(declined.processor_response_code.as_deref(), Some("2"));

    let event_types: Vec<String> = sqlx::query_scalar(
        "SELECT event_type::text FROM webhooks WHERE payment_id = $1",
    )
    .bind(payment.id)
    .fetch_all(db.pool())
    .await
    .unwrap();

    assert!(event_types.contains(&"payment_failed".to_string()));
}

#[tokio::test]
async fn test_partial_then_full_refund() {
    let Some(db) = test_database().await else { return };
    let server = approving_server("60000002").await;
    let engine = test_engine(db.clone(), server.uri()).await;

    let payment = engine
        .create_payment(create_request(dec!(100.00)), RequestContext::default())
        .await
        .unwrap();
    engine
        .charge_payment(payment.id, RequestContext::default())
        .await
        .unwrap();

    let partial = engine
        .refund_payment(
            payment.id,
            RefundPaymentRequest {
                amount: Some(dec!(30.00)),
                reason: Some("partial".to_string()),
                metadata: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(partial.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(partial.refunded_amount, dec!(30.00));
    assert_eq!(partial.refund_count, 1);

    let full = engine
        .refund_payment(
            payment.id,
            RefundPaymentRequest {
                amount: Some(dec!(70.00)),
                reason: None,
                metadata: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(full.status, PaymentStatus::Refunded);
    assert_eq!(full.refunded_amount, dec!(100.00));
    assert_eq!(full.refund_count, 2);

    let err = engine
        .refund_payment(
            payment.id,
            RefundPaymentRequest {
                amount: Some(dec!(0.01)),
                reason: None,
                metadata: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap_err();

    assert_eq!(err.category(), "payment");
    assert_eq!(err.status_code(), 400);
}

#[tokio::test]
async fn test_double_refund_race() {
    let Some(db) = test_database().await else { return };
    let server = approving_server("60000003").await;
    let engine = Arc::new(test_engine(db.clone(), server.uri()).await);

    let payment = engine
        .create_payment(create_request(dec!(50.00)), RequestContext::default())
        .await
        .unwrap();
    engine
        .charge_payment(payment.id, RequestContext::default())
        .await
        .unwrap();

    let refund = |engine: Arc<PaymentEngine>, id: Uuid| async move {
        engine
            .refund_payment(
                id,
                RefundPaymentRequest {
                    amount: Some(dec!(40.00)),
                    reason: None,
                    metadata: None,
                },
                RequestContext::default(),
            )
            .await
    };

    let (first, second) = tokio::join!(
        tokio::spawn(refund(engine.clone(), payment.id)),
        tokio::spawn(refund(engine.clone(), payment.id)),
    );
    let results = [first.unwrap(), second.unwrap()];

    let ok_count = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(ok_count, 1, "exactly one concurrent refund must win");

    let loser = results.iter().find(|r| r.is_err()).unwrap();
    let err = loser.as_ref().unwrap_err();
    assert_eq!(err.category(), "payment");
    assert!(err.to_string().contains("exceeds remaining"));

    let settled = engine.get_payment(&payment.id.to_string()).await.unwrap();
    assert_eq!(settled.status, PaymentStatus::PartiallyRefunded);
    assert_eq!(settled.refunded_amount, dec!(40.00));
    assert_eq!(settled.refund_count, 1);
}

#[tokio::test]
async fn test_duplicate_external_id_conflicts() {
    let Some(db) = test_database().await else { return };
    let server = approving_server("60000004").await;
    let engine = test_engine(db, server.uri()).await;

    let external_id = format!("order-{}", Uuid::new_v4().simple());
    let mut request = create_request(dec!(10.00));
    request.external_id = Some(external_id.clone());

    engine
        .create_payment(request.clone(), RequestContext::default())
        .await
        .unwrap();

    let err = engine
        .create_payment(request, RequestContext::default())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "conflict");
    assert_eq!(err.status_code(), 409);
}

#[tokio::test]
async fn test_charge_twice_conflicts() {
    let Some(db) = test_database().await else { return };
    let server = approving_server("60000005").await;
    let engine = test_engine(db, server.uri()).await;

    let payment = engine
        .create_payment(create_request(dec!(10.00)), RequestContext::default())
        .await
        .unwrap();
    engine
        .charge_payment(payment.id, RequestContext::default())
        .await
        .unwrap();

    let err = engine
        .charge_payment(payment.id, RequestContext::default())
        .await
        .unwrap_err();

    assert_eq!(err.category(), "conflict");
}

#[tokio::test]
async fn test_authorize_then_capture() {
    let Some(db) = test_database().await else { return };
    let server = approving_server("60000006").await;
    let engine = test_engine(db, server.uri()).await;

    let payment = engine
        .create_payment(create_request(dec!(30.00)), RequestContext::default())
        .await
        .unwrap();

    let authorized = engine
        .authorize_payment(payment.id, RequestContext::default())
        .await
        .unwrap();
    assert_eq!(authorized.status, PaymentStatus::Authorized);
    assert_eq!(
        authorized.authorize_net_transaction_id.as_deref(),
        Some("60000006")
    );

    let captured = engine
        .capture_payment(
            payment.id,
            easypay_core::models::CapturePaymentRequest { amount: None },
            RequestContext::default(),
        )
        .await
        .unwrap();
    assert_eq!(captured.status, PaymentStatus::Captured);

    // Over-capture is rejected before the processor is involved
    let payment2 = engine
        .create_payment(create_request(dec!(30.00)), RequestContext::default())
        .await
        .unwrap();
    engine
        .authorize_payment(payment2.id, RequestContext::default())
        .await
        .unwrap();
    let err = engine
        .capture_payment(
            payment2.id,
            easypay_core::models::CapturePaymentRequest {
                amount: Some(dec!(31.00)),
            },
            RequestContext::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.category(), "payment");
}

#[tokio::test]
async fn test_void_pending_payment_without_processor_call() {
    let Some(db) = test_database().await else { return };
    // No mock mounted: a processor call would fail the test
    let server = MockServer::start().await;
    let engine = test_engine(db, server.uri()).await;

    let payment = engine
        .create_payment(create_request(dec!(10.00)), RequestContext::default())
        .await
        .unwrap();

    let voided = engine
        .cancel_payment(
            payment.id,
            easypay_core::models::CancelPaymentRequest {
                reason: Some("customer asked".to_string()),
                metadata: None,
            },
            RequestContext::default(),
        )
        .await
        .unwrap();

    assert_eq!(voided.status, PaymentStatus::Voided);
}
