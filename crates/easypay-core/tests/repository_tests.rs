//! Repository integration tests
//!
//! Direct store behavior: unique external ids, write-once processor ids,
//! refund accounting deltas, database-level invariants, filters and the
//! audit retention purge. Skipped unless `EASYPAY_TEST_DATABASE_URL`
//! (or `DATABASE_URL`) points at a reachable database.

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use uuid::Uuid;

use easypay_core::config::DatabaseConfig;
use easypay_core::models::{
    AuditAction, AuditLevel, AuditLogFilter, NewAuditLog, Pagination, PaymentFilter,
    PaymentMethod, PaymentStatus, SortDirection,
};
use easypay_core::repository::{
    audit_log_repository, is_unique_violation, payment_repository, AuditLogRepository, NewPayment,
    PaymentRepository, PaymentTransition, PgAuditLogRepository, PgPaymentRepository,
};
use easypay_core::{auto_migrate, Database};

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

fn new_payment(customer_id: &str) -> NewPayment {
    NewPayment {
        external_id: format!("pay_{}", &Uuid::new_v4().simple().to_string()[..12]),
        amount: dec!(100.00),
        currency: "USD".to_string(),
        status: PaymentStatus::Pending,
        payment_method: PaymentMethod::CreditCard,
        customer_id: Some(customer_id.to_string()),
        customer_email: Some("jane@example.com".to_string()),
        customer_name: Some("Jane Doe".to_string()),
        card_token: Some("tok_visa_4242".to_string()),
        description: Some("repository test".to_string()),
        metadata: serde_json::json!({"suite": "repository"}),
        is_test: true,
    }
}

#[tokio::test]
async fn test_migrator_status_reports_schema_and_counts() {
    let Some(db) = test_database().await else { return };

    let status = easypay_core::Migrator::new(db.pool().clone())
        .status()
        .await
        .unwrap();

    assert!(status.is_up_to_date());
    assert!(status.applied_migrations >= 1);
    assert_eq!(status.pending_migrations, 0);
    assert!(status.payment_count.is_some());
    assert!(status.webhook_count.is_some());
    assert!(status.audit_log_count.is_some());
}

#[tokio::test]
async fn test_create_and_lookups() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());

    let new = new_payment("cust_lookup");
    let created = repo.create(new.clone()).await.unwrap();

    assert_eq!(created.status, PaymentStatus::Pending);
    assert_eq!(created.amount, dec!(100.00));
    assert_eq!(created.refunded_amount, dec!(0.00));
    assert!(created.is_test);
    assert!(!created.is_live);

    let by_id = repo.find_by_id(created.id).await.unwrap().unwrap();
    assert_eq!(by_id.external_id, created.external_id);

    let by_external = repo
        .find_by_external_id(&created.external_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_external.id, created.id);

    assert!(repo.find_by_id(Uuid::new_v4()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_external_id_uniqueness() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());

    let new = new_payment("cust_unique");
    repo.create(new.clone()).await.unwrap();

    let err = repo.create(new).await.unwrap_err();
    assert!(is_unique_violation(&err));
}

#[tokio::test]
async fn test_processor_transaction_id_is_write_once() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());
    let created = repo.create(new_payment("cust_writeonce")).await.unwrap();

    let mut conn = db.pool().acquire().await.unwrap();

    let first = PaymentTransition {
        status: Some(PaymentStatus::Captured),
        authorize_net_transaction_id: Some("61111111".to_string()),
        processed_at: Some(Utc::now()),
        ..Default::default()
    };
    let updated = payment_repository::apply_transition(&mut conn, created.id, &first)
        .await
        .unwrap();
    assert_eq!(updated.authorize_net_transaction_id.as_deref(), Some("61111111"));
    assert!(updated.processed_at.is_some());

    // A later transition cannot overwrite the recorded id
    let second = PaymentTransition {
        status: Some(PaymentStatus::Settled),
        authorize_net_transaction_id: Some("69999999".to_string()),
        settled_at: Some(Utc::now()),
        ..Default::default()
    };
    let settled = payment_repository::apply_transition(&mut conn, created.id, &second)
        .await
        .unwrap();
    assert_eq!(settled.authorize_net_transaction_id.as_deref(), Some("61111111"));
    assert_eq!(settled.status, PaymentStatus::Settled);
}

#[tokio::test]
async fn test_refund_deltas_accumulate() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());
    let created = repo.create(new_payment("cust_deltas")).await.unwrap();

    let mut conn = db.pool().acquire().await.unwrap();

    let charge = PaymentTransition {
        status: Some(PaymentStatus::Captured),
        authorize_net_transaction_id: Some("62222222".to_string()),
        ..Default::default()
    };
    payment_repository::apply_transition(&mut conn, created.id, &charge)
        .await
        .unwrap();

    let refund = PaymentTransition {
        status: Some(PaymentStatus::PartiallyRefunded),
        refund_amount_delta: dec!(30.00),
        refund_count_delta: 1,
        ..Default::default()
    };
    let partial = payment_repository::apply_transition(&mut conn, created.id, &refund)
        .await
        .unwrap();
    assert_eq!(partial.refunded_amount, dec!(30.00));
    assert_eq!(partial.refund_count, 1);

    let rest = PaymentTransition {
        status: Some(PaymentStatus::Refunded),
        refund_amount_delta: dec!(70.00),
        refund_count_delta: 1,
        ..Default::default()
    };
    let full = payment_repository::apply_transition(&mut conn, created.id, &rest)
        .await
        .unwrap();
    assert_eq!(full.refunded_amount, dec!(100.00));
    assert_eq!(full.refund_count, 2);
    assert_eq!(full.remaining_refund_amount(), dec!(0.00));
}

#[tokio::test]
async fn test_database_rejects_over_refund() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());
    let created = repo.create(new_payment("cust_overrefund")).await.unwrap();

    let mut conn = db.pool().acquire().await.unwrap();

    // Even without engine validation the schema holds the invariant
    let over = PaymentTransition {
        refund_amount_delta: dec!(100.01),
        refund_count_delta: 1,
        ..Default::default()
    };
    let result = payment_repository::apply_transition(&mut conn, created.id, &over).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_list_filters_and_pagination() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());

    let customer = format!("cust_list_{}", &Uuid::new_v4().simple().to_string()[..8]);
    for _ in 0..3 {
        repo.create(new_payment(&customer)).await.unwrap();
    }

    let filter = PaymentFilter {
        customer_id: Some(customer.clone()),
        ..Default::default()
    };
    let page = Pagination { page: 1, per_page: 2 };

    let listed = repo
        .list(&filter, &page, SortDirection::Desc)
        .await
        .unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|p| p.customer_id.as_deref() == Some(customer.as_str())));
    assert!(listed[0].created_at >= listed[1].created_at);

    let total = repo.count(&filter).await.unwrap();
    assert_eq!(total, 3);

    let second_page = Pagination { page: 2, per_page: 2 };
    let rest = repo
        .list(&filter, &second_page, SortDirection::Desc)
        .await
        .unwrap();
    assert_eq!(rest.len(), 1);

    let pending_only = PaymentFilter {
        customer_id: Some(customer.clone()),
        status: Some(PaymentStatus::Pending),
        ..Default::default()
    };
    assert_eq!(repo.count(&pending_only).await.unwrap(), 3);

    let captured_only = PaymentFilter {
        customer_id: Some(customer),
        status: Some(PaymentStatus::Captured),
        ..Default::default()
    };
    assert_eq!(repo.count(&captured_only).await.unwrap(), 0);
}

#[tokio::test]
async fn test_search_matches_customer_fields() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());

    let marker = format!("searchable-{}", &Uuid::new_v4().simple().to_string()[..8]);
    let mut new = new_payment("cust_search");
    new.description = Some(format!("order {}", marker));
    let created = repo.create(new).await.unwrap();

    let found = repo
        .search(&marker, &Pagination::default())
        .await
        .unwrap();
    assert!(found.iter().any(|p| p.id == created.id));

    let by_external = repo
        .search(&created.external_id, &Pagination::default())
        .await
        .unwrap();
    assert!(by_external.iter().any(|p| p.id == created.id));
}

#[tokio::test]
async fn test_stats_aggregation() {
    let Some(db) = test_database().await else { return };
    let repo = PgPaymentRepository::new(db.clone());

    let customer = format!("cust_stats_{}", &Uuid::new_v4().simple().to_string()[..8]);
    let a = repo.create(new_payment(&customer)).await.unwrap();
    let _b = repo.create(new_payment(&customer)).await.unwrap();

    let mut conn = db.pool().acquire().await.unwrap();
    payment_repository::apply_transition(
        &mut conn,
        a.id,
        &PaymentTransition {
            status: Some(PaymentStatus::Captured),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let filter = PaymentFilter {
        customer_id: Some(customer),
        ..Default::default()
    };
    let stats = repo.stats(&filter).await.unwrap();

    assert_eq!(stats.total_count, 2);
    assert_eq!(stats.total_amount, dec!(200.00));
    assert_eq!(stats.captured_count, 1);
    assert_eq!(stats.failed_count, 0);
}

#[tokio::test]
async fn test_audit_append_list_and_purge() {
    let Some(db) = test_database().await else { return };
    let repo = PgAuditLogRepository::new(db.clone());

    let payment_id = Uuid::new_v4();
    let correlation = format!("corr_{}", &Uuid::new_v4().simple().to_string()[..12]);

    let record = NewAuditLog::payment(AuditAction::PaymentCreated, payment_id, "created")
        .with_correlation_id(Some(correlation.clone()));
    let first = repo.append(record).await.unwrap();
    assert_eq!(first.action, AuditAction::PaymentCreated);
    assert_eq!(first.level, AuditLevel::Info);

    let second = NewAuditLog::payment(AuditAction::PaymentCaptured, payment_id, "captured")
        .with_correlation_id(Some(correlation.clone()));
    repo.append(second).await.unwrap();

    let filter = AuditLogFilter {
        payment_id: Some(payment_id),
        ..Default::default()
    };
    let listed = repo.list(&filter, &Pagination::default()).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(repo.count(&filter).await.unwrap(), 2);

    let by_correlation = AuditLogFilter {
        correlation_id: Some(correlation),
        ..Default::default()
    };
    assert_eq!(repo.count(&by_correlation).await.unwrap(), 2);

    // A future cutoff removes everything for this payment; appends inside
    // the retention window survive a past cutoff
    let past_cutoff = Utc::now() - ChronoDuration::days(30);
    repo.purge_before(past_cutoff).await.unwrap();
    assert_eq!(repo.count(&filter).await.unwrap(), 2);
}

#[tokio::test]
async fn test_tx_scoped_audit_append_rolls_back_with_transaction() {
    let Some(db) = test_database().await else { return };
    let repo = PgAuditLogRepository::new(db.clone());

    let payment_id = Uuid::new_v4();
    let filter = AuditLogFilter {
        payment_id: Some(payment_id),
        ..Default::default()
    };

    let mut tx = db.begin().await.unwrap();
    audit_log_repository::append(
        &mut tx,
        &NewAuditLog::payment(AuditAction::PaymentCreated, payment_id, "never committed"),
    )
    .await
    .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(repo.count(&filter).await.unwrap(), 0);

    let mut tx = db.begin().await.unwrap();
    audit_log_repository::append(
        &mut tx,
        &NewAuditLog::payment(AuditAction::PaymentCreated, payment_id, "committed"),
    )
    .await
    .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(repo.count(&filter).await.unwrap(), 1);
}
