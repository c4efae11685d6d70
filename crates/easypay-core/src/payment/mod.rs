//! Payment lifecycle engine
//!
//! State machine over persisted payment records. Every mutating operation
//! runs in one transaction that takes a row-level exclusive lock on the
//! payment and holds it across the upstream processor call, so concurrent
//! operations on the same payment are strictly serialized. Audit records
//! and outbound webhook rows (outbox pattern) commit atomically with the
//! payment mutation; webhook delivery starts only after commit.

pub mod observability;
pub mod tokens;
pub mod validation;

pub use observability::{PaymentObservability, StatusChange};

use rust_decimal::Decimal;
use serde_json::json;
use sqlx::{PgConnection, Postgres, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::common::{self, Clock};
use crate::config::CurrencyConfig;
use crate::db::Database;
use crate::models::{
    AuditAction, AuditLevel, CancelPaymentRequest, CapturePaymentRequest, CreatePaymentRequest,
    NewAuditLog, Pagination, Payment, PaymentFilter, PaymentStats, PaymentStatus,
    RefundPaymentRequest, SortDirection, UpdatePaymentRequest, Webhook, WebhookEventType,
};
use crate::processor::{CreditCard, OrderInfo, ProcessorClient, ProcessorError, TransactionStatus};
use crate::repository::cached_payment_repository::CachedPaymentRepository;
use crate::repository::payment_repository::{
    self, is_unique_violation, NewPayment, PaymentRepository, PaymentTransition,
};
use crate::repository::webhook_repository;
use crate::webhook::WebhookDispatcher;
use crate::{audit, Error, Result};

const COMMIT_RETRY_DELAYS_MS: [u64; 3] = [50, 100, 200];

/// Request-scoped context threaded into audit records and webhooks
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub correlation_id: Option<String>,
    pub request_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum CaptureMode {
    Charge,
    AuthorizeOnly,
}

/// Lifecycle engine; sole owner of payment mutation
pub struct PaymentEngine {
    db: Database,
    payments: CachedPaymentRepository,
    processor: Arc<dyn ProcessorClient>,
    breaker: Arc<crate::resilience::CircuitBreaker>,
    dispatcher: WebhookDispatcher,
    observability: PaymentObservability,
    currencies: CurrencyConfig,
    webhook_target: Option<String>,
    clock: Arc<dyn Clock>,
    reconcile_sink: Option<Arc<dyn crate::jobs::JobSink>>,
}

impl PaymentEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        payments: CachedPaymentRepository,
        processor: Arc<dyn ProcessorClient>,
        breaker: Arc<crate::resilience::CircuitBreaker>,
        dispatcher: WebhookDispatcher,
        observability: PaymentObservability,
        currencies: CurrencyConfig,
        webhook_target: Option<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            db,
            payments,
            processor,
            breaker,
            dispatcher,
            observability,
            currencies,
            webhook_target,
            clock,
            reconcile_sink: None,
        }
    }

    /// Attach the background queue so failed persists schedule a
    /// reconciliation job
    pub fn with_reconcile_sink(mut self, sink: Arc<dyn crate::jobs::JobSink>) -> Self {
        self.reconcile_sink = Some(sink);
        self
    }

    fn correlation_id(&self, ctx: &RequestContext) -> String {
        ctx.correlation_id
            .clone()
            .unwrap_or_else(|| self.observability.generate_correlation_id())
    }

    fn audit_with_ctx(
        &self,
        mut record: NewAuditLog,
        ctx: &RequestContext,
        correlation_id: &str,
    ) -> NewAuditLog {
        record.request_id = ctx.request_id.clone();
        record.ip_address = ctx.ip_address.clone();
        record.user_agent = ctx.user_agent.clone();
        record.correlation_id = Some(correlation_id.to_string());
        record
    }

    /// Build the outbox row for a committed-state event, if a delivery
    /// target is configured
    fn outbox_for(
        &self,
        event_type: WebhookEventType,
        payment: &Payment,
        correlation_id: &str,
    ) -> Option<crate::models::NewWebhook> {
        let target = self.webhook_target.as_deref()?;
        let data = serde_json::to_value(payment).ok()?;
        Some(self.dispatcher.build_outbox_row(
            event_type,
            Some(payment.id),
            data,
            target,
            Some(correlation_id.to_string()),
        ))
    }

    // -----------------------------------------------------------------
    // Create / read / update
    // -----------------------------------------------------------------

    /// Create a payment in `pending`; does not touch the processor
    ///
    /// A duplicate generated `external_id` gets one regeneration; a
    /// client-supplied one conflicts immediately.
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
        ctx: RequestContext,
    ) -> Result<Payment> {
        validation::validate_create(&request, &self.currencies)?;

        let correlation_id = self.correlation_id(&ctx);
        let client_supplied = request.external_id.is_some();
        let mut external_id = request
            .external_id
            .clone()
            .unwrap_or_else(common::generate_external_id);

        info!(
            "Creating payment: amount={}, currency={}, correlation_id={}",
            request.amount, request.currency, correlation_id
        );

        for attempt in 0..2 {
            let new = NewPayment {
                external_id: external_id.clone(),
                amount: request.amount,
                currency: request.currency.to_uppercase(),
                status: PaymentStatus::Pending,
                payment_method: request.payment_method,
                customer_id: request.customer_id.clone(),
                customer_email: request.customer_email.clone(),
                customer_name: request.customer_name.clone(),
                card_token: request.card_token.clone(),
                description: request.description.clone(),
                metadata: serde_json::Value::Object(request.metadata.clone()),
                is_test: request.is_test,
            };

            let mut tx = self.db.begin().await?;
            match payment_repository::insert(&mut tx, &new).await {
                Ok(payment) => {
                    let record = self.audit_with_ctx(
                        NewAuditLog::payment(
                            AuditAction::PaymentCreated,
                            payment.id,
                            format!(
                                "Payment created for {} {}",
                                payment.amount, payment.currency
                            ),
                        )
                        .with_transition(json!({"status": "none"}), json!({"status": "pending"})),
                        &ctx,
                        &correlation_id,
                    );
                    audit::append(&mut tx, &record).await?;
                    tx.commit().await.map_err(Error::Database)?;

                    self.observability
                        .track_status_change(payment.id, "none", "pending", "Payment created")
                        .await;
                    self.payments.invalidate_after_write(&payment).await;

                    info!(
                        "Payment created: id={}, external_id={}, correlation_id={}",
                        payment.id, payment.external_id, correlation_id
                    );
                    return Ok(payment);
                }
                Err(e) if is_unique_violation(&e) => {
                    drop(tx);
                    if client_supplied || attempt == 1 {
                        return Err(Error::conflict(format!(
                            "Payment with external_id {} already exists",
                            external_id
                        )));
                    }
                    warn!(
                        "Generated external_id collided, regenerating: {}",
                        external_id
                    );
                    external_id = common::generate_external_id();
                }
                Err(e) => {
                    drop(tx);
                    return Err(e);
                }
            }
        }

        Err(Error::conflict("Could not allocate a unique external_id"))
    }

    /// Fetch by internal UUID or merchant-facing external id
    pub async fn get_payment(&self, id_or_external: &str) -> Result<Payment> {
        let payment = match Uuid::parse_str(id_or_external) {
            Ok(id) => self.payments.find_by_id(id).await?,
            Err(_) => self.payments.find_by_external_id(id_or_external).await?,
        };

        payment.ok_or_else(|| Error::not_found(format!("Payment {} not found", id_or_external)))
    }

    /// Mutate description/metadata only; money fields and status never
    /// change here
    pub async fn update_payment(
        &self,
        id: Uuid,
        request: UpdatePaymentRequest,
        ctx: RequestContext,
    ) -> Result<Payment> {
        if request.description.is_none() && request.metadata.is_none() {
            return Err(Error::validation(
                "At least one field must be provided for update",
            ));
        }

        let correlation_id = self.correlation_id(&ctx);

        let mut tx = self.db.begin().await?;
        let payment = payment_repository::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))?;

        let merged_metadata = match &request.metadata {
            Some(update) => Some(
                self.observability
                    .merge_metadata(&payment.metadata, update)?,
            ),
            None => None,
        };

        let updated = payment_repository::update_details(
            &mut tx,
            id,
            request.description.clone(),
            merged_metadata.clone(),
        )
        .await?;

        let record = self.audit_with_ctx(
            NewAuditLog::payment(AuditAction::PaymentUpdated, id, "Payment details updated")
                .with_transition(
                    json!({
                        "description": payment.description,
                        "metadata": payment.metadata,
                    }),
                    json!({
                        "description": updated.description,
                        "metadata": updated.metadata,
                    }),
                ),
            &ctx,
            &correlation_id,
        );
        audit::append(&mut tx, &record).await?;
        tx.commit().await.map_err(Error::Database)?;

        self.payments.invalidate_after_write(&updated).await;
        Ok(updated)
    }

    pub async fn list_payments(
        &self,
        filter: &PaymentFilter,
        pagination: &Pagination,
    ) -> Result<(Vec<Payment>, i64)> {
        let payments = self
            .payments
            .list(filter, pagination, SortDirection::Desc)
            .await?;
        let total = self.payments.count(filter).await?;
        Ok((payments, total))
    }

    pub async fn search_payments(
        &self,
        term: &str,
        pagination: &Pagination,
    ) -> Result<Vec<Payment>> {
        self.payments.search(term, pagination).await
    }

    pub async fn payment_stats(&self, filter: &PaymentFilter) -> Result<PaymentStats> {
        self.payments.stats(filter).await
    }

    pub async fn status_history(&self, payment_id: Uuid) -> Vec<StatusChange> {
        self.observability.status_history(payment_id).await
    }

    // -----------------------------------------------------------------
    // Money movement
    // -----------------------------------------------------------------

    /// Authorize and capture a pending payment in one step
    pub async fn charge_payment(&self, id: Uuid, ctx: RequestContext) -> Result<Payment> {
        self.process_card_payment(id, ctx, CaptureMode::Charge).await
    }

    /// Authorize a pending payment; capture is deferred
    pub async fn authorize_payment(&self, id: Uuid, ctx: RequestContext) -> Result<Payment> {
        self.process_card_payment(id, ctx, CaptureMode::AuthorizeOnly)
            .await
    }

    async fn process_card_payment(
        &self,
        id: Uuid,
        ctx: RequestContext,
        mode: CaptureMode,
    ) -> Result<Payment> {
        let correlation_id = self.correlation_id(&ctx);

        let mut tx = self.db.begin().await?;
        let payment = payment_repository::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))?;

        if payment.status != PaymentStatus::Pending {
            return Err(Error::conflict(format!(
                "Payment is {}, expected pending",
                payment.status
            )));
        }

        let token = payment
            .card_token
            .clone()
            .ok_or_else(|| Error::validation("Payment has no card token"))?;
        let (card, billing) = tokens::resolve_card_token(&token)?;

        // Row lock stays held across the upstream call
        self.breaker.try_acquire().await?;
        let order = OrderInfo {
            invoice_number: payment.external_id.clone(),
            description: payment.description.clone(),
        };
        let result = match mode {
            CaptureMode::Charge => {
                self.processor
                    .charge_card(
                        payment.amount,
                        &card,
                        &billing,
                        Some(order),
                        Some(&payment.external_id),
                    )
                    .await
            }
            CaptureMode::AuthorizeOnly => {
                self.processor
                    .authorize_only(
                        payment.amount,
                        &card,
                        &billing,
                        Some(order),
                        Some(&payment.external_id),
                    )
                    .await
            }
        };
        self.report_breaker(&result).await;

        let (change, record, event, note) = match result {
            Ok(response) => match response.status {
                TransactionStatus::Captured => {
                    let target = match mode {
                        CaptureMode::Charge => PaymentStatus::Captured,
                        CaptureMode::AuthorizeOnly => PaymentStatus::Authorized,
                    };
                    let action = match mode {
                        CaptureMode::Charge => AuditAction::PaymentCaptured,
                        CaptureMode::AuthorizeOnly => AuditAction::PaymentAuthorized,
                    };
                    let event = match mode {
                        CaptureMode::Charge => WebhookEventType::PaymentCaptured,
                        CaptureMode::AuthorizeOnly => WebhookEventType::PaymentAuthorized,
                    };
                    let change = PaymentTransition {
                        status: Some(target),
                        authorize_net_transaction_id: response.transaction_id.clone(),
                        processor_response_code: Some(response.response_code.clone()),
                        processor_response_message: Some(response.response_text.clone()),
                        card_last_four: Some(card.last_four()),
                        card_brand: Some(card.brand().to_string()),
                        card_exp_month: Some(card.exp_month()),
                        card_exp_year: Some(card.exp_year()),
                        processed_at: Some(self.clock.now()),
                        ..Default::default()
                    };
                    let record = NewAuditLog::payment(
                        action,
                        id,
                        format!(
                            "Payment {} by processor (transaction {})",
                            target,
                            response.transaction_id.as_deref().unwrap_or("unknown")
                        ),
                    )
                    .with_transition(
                        json!({"status": "pending"}),
                        json!({"status": target.to_string()}),
                    );
                    (change, record, Some(event), format!("Processor approved ({})", target))
                }
                TransactionStatus::Declined | TransactionStatus::Error => {
                    let change = PaymentTransition {
                        status: Some(PaymentStatus::Declined),
                        authorize_net_transaction_id: response.transaction_id.clone(),
                        processor_response_code: Some(response.response_code.clone()),
                        processor_response_message: Some(response.response_text.clone()),
                        ..Default::default()
                    };
                    let record = NewAuditLog::payment(
                        AuditAction::PaymentDeclined,
                        id,
                        format!(
                            "Payment declined by processor (code {})",
                            response.response_code
                        ),
                    )
                    .with_level(AuditLevel::Warning)
                    .with_transition(
                        json!({"status": "pending"}),
                        json!({"status": "declined"}),
                    );
                    (
                        change,
                        record,
                        Some(WebhookEventType::PaymentFailed),
                        "Processor declined".to_string(),
                    )
                }
            },
            Err(ProcessorError::Transaction {
                message,
                response_code,
                transaction_id,
            }) => {
                let change = PaymentTransition {
                    status: Some(PaymentStatus::Failed),
                    authorize_net_transaction_id: transaction_id,
                    processor_response_code: response_code,
                    processor_response_message: Some(message.clone()),
                    ..Default::default()
                };
                let record = NewAuditLog::payment(
                    AuditAction::PaymentFailed,
                    id,
                    format!("Payment failed at processor: {}", message),
                )
                .with_level(AuditLevel::Error)
                .with_transition(json!({"status": "pending"}), json!({"status": "failed"}));
                (
                    change,
                    record,
                    Some(WebhookEventType::PaymentFailed),
                    "Processor error".to_string(),
                )
            }
            // Network and authentication trouble leaves the payment in
            // pending; the caller may retry
            Err(e) => return Err(e.into()),
        };

        let record = self.audit_with_ctx(record, &ctx, &correlation_id);
        let (payment, webhook) = self
            .finalize(tx, id, &change, &record, event, &correlation_id)
            .await?;
        self.post_commit(&payment, "pending", &note, webhook).await;
        Ok(payment)
    }

    /// Capture a previously authorized payment
    pub async fn capture_payment(
        &self,
        id: Uuid,
        request: CapturePaymentRequest,
        ctx: RequestContext,
    ) -> Result<Payment> {
        let correlation_id = self.correlation_id(&ctx);

        let mut tx = self.db.begin().await?;
        let payment = payment_repository::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))?;

        if payment.status != PaymentStatus::Authorized {
            return Err(Error::conflict(format!(
                "Payment is {}, expected authorized",
                payment.status
            )));
        }

        if let Some(amount) = request.amount {
            if amount <= Decimal::ZERO || amount > payment.amount {
                return Err(Error::payment(format!(
                    "Capture amount must be positive and at most the authorized {}",
                    payment.amount
                )));
            }
        }

        let transaction_id = payment
            .authorize_net_transaction_id
            .clone()
            .ok_or_else(|| Error::payment("Payment has no processor transaction to capture"))?;

        self.breaker.try_acquire().await?;
        let ref_id = format!("{}:capture", payment.external_id);
        let result = self
            .processor
            .capture(&transaction_id, request.amount, Some(&ref_id))
            .await;
        self.report_breaker(&result).await;

        let (change, record, event, note) = match result {
            Ok(response) if response.status == TransactionStatus::Captured => {
                let change = PaymentTransition {
                    status: Some(PaymentStatus::Captured),
                    processor_response_code: Some(response.response_code.clone()),
                    processor_response_message: Some(response.response_text.clone()),
                    ..Default::default()
                };
                let record = NewAuditLog::payment(
                    AuditAction::PaymentCaptured,
                    id,
                    format!("Authorized funds captured (transaction {})", transaction_id),
                )
                .with_transition(
                    json!({"status": "authorized"}),
                    json!({"status": "captured"}),
                );
                (
                    change,
                    record,
                    Some(WebhookEventType::PaymentCaptured),
                    "Capture approved".to_string(),
                )
            }
            Ok(response) => {
                let change = PaymentTransition {
                    status: Some(PaymentStatus::Failed),
                    processor_response_code: Some(response.response_code.clone()),
                    processor_response_message: Some(response.response_text.clone()),
                    ..Default::default()
                };
                let record = NewAuditLog::payment(
                    AuditAction::PaymentFailed,
                    id,
                    format!("Capture declined (code {})", response.response_code),
                )
                .with_level(AuditLevel::Error)
                .with_transition(
                    json!({"status": "authorized"}),
                    json!({"status": "failed"}),
                );
                (
                    change,
                    record,
                    Some(WebhookEventType::PaymentFailed),
                    "Capture declined".to_string(),
                )
            }
            Err(ProcessorError::Transaction {
                message,
                response_code,
                ..
            }) => {
                let change = PaymentTransition {
                    status: Some(PaymentStatus::Failed),
                    processor_response_code: response_code,
                    processor_response_message: Some(message.clone()),
                    ..Default::default()
                };
                let record = NewAuditLog::payment(
                    AuditAction::PaymentFailed,
                    id,
                    format!("Capture failed at processor: {}", message),
                )
                .with_level(AuditLevel::Error)
                .with_transition(
                    json!({"status": "authorized"}),
                    json!({"status": "failed"}),
                );
                (
                    change,
                    record,
                    Some(WebhookEventType::PaymentFailed),
                    "Capture failed".to_string(),
                )
            }
            Err(e) => return Err(e.into()),
        };

        let record = self.audit_with_ctx(record, &ctx, &correlation_id);
        let (payment, webhook) = self
            .finalize(tx, id, &change, &record, event, &correlation_id)
            .await?;
        self.post_commit(&payment, "authorized", &note, webhook).await;
        Ok(payment)
    }

    /// Refund a captured or settled payment, fully or partially
    pub async fn refund_payment(
        &self,
        id: Uuid,
        request: RefundPaymentRequest,
        ctx: RequestContext,
    ) -> Result<Payment> {
        let correlation_id = self.correlation_id(&ctx);

        let mut tx = self.db.begin().await?;
        let payment = payment_repository::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))?;

        if !payment.is_refundable() {
            return Err(Error::payment(format!(
                "Payment cannot be refunded in status {}",
                payment.status
            )));
        }

        let remaining = payment.remaining_refund_amount();
        let amount = request.amount.unwrap_or(remaining);
        validation::validate_refund_amount(amount, remaining)?;

        let transaction_id = payment
            .authorize_net_transaction_id
            .clone()
            .ok_or_else(|| Error::payment("Payment has no processor transaction to refund"))?;

        let card = refund_card(&payment)?;
        let ref_id = format!("{}:refund:{}", payment.external_id, payment.refund_count + 1);

        self.breaker.try_acquire().await?;
        let result = self
            .processor
            .refund(&transaction_id, amount, &card, Some(&ref_id))
            .await;
        self.report_breaker(&result).await;

        let response = match result {
            Ok(response) if response.status == TransactionStatus::Captured => response,
            Ok(response) => {
                return Err(Error::external(format!(
                    "Refund declined by processor (code {})",
                    response.response_code
                )));
            }
            Err(e) => return Err(e.into()),
        };

        let new_refunded = payment.refunded_amount + amount;
        let target = if new_refunded == payment.amount {
            PaymentStatus::Refunded
        } else {
            PaymentStatus::PartiallyRefunded
        };

        let change = PaymentTransition {
            status: Some(target),
            processor_response_code: Some(response.response_code.clone()),
            processor_response_message: Some(response.response_text.clone()),
            refund_amount_delta: amount,
            refund_count_delta: 1,
            ..Default::default()
        };
        let record = self.audit_with_ctx(
            NewAuditLog::payment(
                AuditAction::PaymentRefunded,
                id,
                format!("Refunded {} of {} {}", amount, payment.amount, payment.currency),
            )
            .with_metadata(json!({
                "refund_amount": amount.to_string(),
                "reason": request.reason,
                "refund_sequence": payment.refund_count + 1,
            }))
            .with_transition(
                json!({"status": payment.status.to_string(), "refunded_amount": payment.refunded_amount}),
                json!({"status": target.to_string(), "refunded_amount": new_refunded}),
            ),
            &ctx,
            &correlation_id,
        );

        let previous_status = payment.status.to_string();
        let (payment, webhook) = self
            .finalize(
                tx,
                id,
                &change,
                &record,
                Some(WebhookEventType::PaymentRefunded),
                &correlation_id,
            )
            .await?;
        self.post_commit(&payment, &previous_status, "Refund processed", webhook)
            .await;
        Ok(payment)
    }

    /// Void (cancel) a pending or authorized payment
    pub async fn cancel_payment(
        &self,
        id: Uuid,
        request: CancelPaymentRequest,
        ctx: RequestContext,
    ) -> Result<Payment> {
        let correlation_id = self.correlation_id(&ctx);

        let mut tx = self.db.begin().await?;
        let payment = payment_repository::find_for_update(&mut tx, id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Payment {} not found", id)))?;

        if !payment.is_voidable() {
            return Err(Error::conflict(format!(
                "Payment cannot be cancelled in status {}",
                payment.status
            )));
        }

        // A payment that never reached the processor voids locally
        let mut change = PaymentTransition {
            status: Some(PaymentStatus::Voided),
            ..Default::default()
        };

        if let Some(transaction_id) = payment.authorize_net_transaction_id.clone() {
            self.breaker.try_acquire().await?;
            let ref_id = format!("{}:void", payment.external_id);
            let result = self.processor.void(&transaction_id, Some(&ref_id)).await;
            self.report_breaker(&result).await;

            match result {
                Ok(response) if response.status == TransactionStatus::Captured => {
                    change.processor_response_code = Some(response.response_code.clone());
                    change.processor_response_message = Some(response.response_text.clone());
                }
                Ok(response) => {
                    return Err(Error::external(format!(
                        "Void rejected by processor (code {})",
                        response.response_code
                    )));
                }
                Err(e) => return Err(e.into()),
            }
        }

        let reason = request.reason.clone().unwrap_or_else(|| "No reason provided".to_string());
        let record = self.audit_with_ctx(
            NewAuditLog::payment(
                AuditAction::PaymentVoided,
                id,
                format!("Payment cancelled: {}", reason),
            )
            .with_metadata(json!({"reason": request.reason}))
            .with_transition(
                json!({"status": payment.status.to_string()}),
                json!({"status": "voided"}),
            ),
            &ctx,
            &correlation_id,
        );

        let previous_status = payment.status.to_string();
        let (payment, webhook) = self
            .finalize(
                tx,
                id,
                &change,
                &record,
                Some(WebhookEventType::PaymentVoided),
                &correlation_id,
            )
            .await?;
        self.post_commit(&payment, &previous_status, "Payment voided", webhook)
            .await;
        Ok(payment)
    }

    /// Settlement observed from the processor's inbound webhook
    pub async fn mark_settled(
        &self,
        processor_transaction_id: &str,
        ctx: RequestContext,
    ) -> Result<Option<Payment>> {
        let Some(payment) = self
            .payments
            .find_by_processor_transaction_id(processor_transaction_id)
            .await?
        else {
            return Ok(None);
        };

        let correlation_id = self.correlation_id(&ctx);

        let mut tx = self.db.begin().await?;
        let Some(locked) = payment_repository::find_for_update(&mut tx, payment.id).await? else {
            return Ok(None);
        };

        // Settlement notifications may arrive more than once
        if locked.status != PaymentStatus::Captured {
            return Ok(Some(locked));
        }

        let change = PaymentTransition {
            status: Some(PaymentStatus::Settled),
            settled_at: Some(self.clock.now()),
            ..Default::default()
        };
        let record = self.audit_with_ctx(
            NewAuditLog::payment(
                AuditAction::PaymentSettled,
                locked.id,
                format!(
                    "Settlement observed for processor transaction {}",
                    processor_transaction_id
                ),
            )
            .with_transition(json!({"status": "captured"}), json!({"status": "settled"})),
            &ctx,
            &correlation_id,
        );

        let (payment, webhook) = self
            .finalize(
                tx,
                locked.id,
                &change,
                &record,
                Some(WebhookEventType::PaymentSettled),
                &correlation_id,
            )
            .await?;
        self.post_commit(&payment, "captured", "Settlement observed", webhook)
            .await;
        Ok(Some(payment))
    }

    // -----------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------

    async fn report_breaker<T>(&self, result: &std::result::Result<T, ProcessorError>) {
        match result {
            Err(e) if e.trips_breaker() => self.breaker.record_failure().await,
            _ => self.breaker.record_success().await,
        }
    }

    async fn persist_step(
        &self,
        conn: &mut PgConnection,
        payment_id: Uuid,
        change: &PaymentTransition,
        record: &NewAuditLog,
        event: Option<WebhookEventType>,
        correlation_id: &str,
    ) -> Result<(Payment, Option<Webhook>)> {
        let payment = payment_repository::apply_transition(conn, payment_id, change).await?;
        audit::append(conn, record).await?;

        let webhook = match event {
            Some(event_type) => match self.outbox_for(event_type, &payment, correlation_id) {
                Some(row) => Some(webhook_repository::insert_outbox(conn, &row).await?),
                None => None,
            },
            None => None,
        };

        Ok((payment, webhook))
    }

    /// Commit the transition, retrying after processor success
    ///
    /// The first attempt runs in the lock-holding transaction. If it
    /// cannot commit, the money already moved upstream, so the persist is
    /// retried in fresh transactions before surfacing the failure with a
    /// critical reconciliation audit record.
    async fn finalize(
        &self,
        mut tx: Transaction<'static, Postgres>,
        payment_id: Uuid,
        change: &PaymentTransition,
        record: &NewAuditLog,
        event: Option<WebhookEventType>,
        correlation_id: &str,
    ) -> Result<(Payment, Option<Webhook>)> {
        let first = self
            .persist_step(&mut tx, payment_id, change, record, event, correlation_id)
            .await;

        let mut last_error = match first {
            Ok(result) => match tx.commit().await {
                Ok(()) => return Ok(result),
                Err(e) => Error::Database(e),
            },
            Err(e) => {
                drop(tx);
                e
            }
        };

        warn!(
            "Persisting payment transition failed, retrying: payment_id={}, error={}",
            payment_id, last_error
        );

        for delay_ms in COMMIT_RETRY_DELAYS_MS {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;

            match self
                .retry_persist(payment_id, change, record, event, correlation_id)
                .await
            {
                Ok(result) => return Ok(result),
                Err(e) => {
                    warn!(
                        "Persist retry failed: payment_id={}, error={}",
                        payment_id, e
                    );
                    last_error = e;
                }
            }
        }

        // The processor state is known but ours is not; leave a breadcrumb
        // carrying the processor transaction id for manual reconciliation.
        let reconcile = NewAuditLog::payment(
            AuditAction::PaymentReconciliationRequired,
            payment_id,
            format!(
                "Processor call succeeded but persisting the transition failed: {}",
                last_error
            ),
        )
        .with_level(AuditLevel::Critical)
        .with_correlation_id(Some(correlation_id.to_string()))
        .with_metadata(json!({
            "processor_transaction_id": change.authorize_net_transaction_id,
            "intended_status": change.status.map(|s| s.to_string()),
        }));

        match self.db.pool().acquire().await {
            Ok(mut conn) => {
                if let Err(e) = audit::append(&mut conn, &reconcile).await {
                    error!("Failed to write reconciliation audit record: {}", e);
                }
            }
            Err(e) => error!("Failed to write reconciliation audit record: {}", e),
        }

        if let Some(sink) = &self.reconcile_sink {
            sink.submit(crate::jobs::JobKind::PaymentReconcile { payment_id });
        }

        error!(
            "Payment requires reconciliation: payment_id={}, correlation_id={}",
            payment_id, correlation_id
        );
        Err(last_error)
    }

    async fn retry_persist(
        &self,
        payment_id: Uuid,
        change: &PaymentTransition,
        record: &NewAuditLog,
        event: Option<WebhookEventType>,
        correlation_id: &str,
    ) -> Result<(Payment, Option<Webhook>)> {
        let mut tx = self.db.begin().await?;
        payment_repository::find_for_update(&mut tx, payment_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Payment {} not found", payment_id)))?;

        let result = self
            .persist_step(&mut tx, payment_id, change, record, event, correlation_id)
            .await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(result)
    }

    async fn post_commit(
        &self,
        payment: &Payment,
        previous_status: &str,
        note: &str,
        webhook: Option<Webhook>,
    ) {
        self.observability
            .track_status_change(
                payment.id,
                previous_status,
                &payment.status.to_string(),
                note,
            )
            .await;
        self.payments.invalidate_after_write(payment).await;

        if let Some(webhook) = webhook {
            let dispatcher = self.dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = dispatcher.dispatch_now(webhook.id).await {
                    warn!(
                        "Immediate webhook dispatch failed, sweep will retry: webhook_id={}, error={}",
                        webhook.id, e
                    );
                }
            });
        }
    }
}

/// Card reference for refunds, rebuilt from the persisted non-PAN fields
fn refund_card(payment: &Payment) -> Result<CreditCard> {
    match (&payment.card_last_four, &payment.card_exp_month, &payment.card_exp_year) {
        (Some(last_four), Some(month), Some(year)) if year.len() == 4 => Ok(CreditCard::new(
            format!("XXXX{}", last_four),
            format!("{}{}", month, &year[2..]),
            String::new(),
        )),
        _ => match &payment.card_token {
            Some(token) => {
                let (card, _) = tokens::resolve_card_token(token)?;
                Ok(card)
            }
            None => Err(Error::payment(
                "Payment carries no card reference for refund",
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn payment_with_card() -> Payment {
        Payment {
            id: Uuid::new_v4(),
            external_id: "pay_0123456789ab".to_string(),
            amount: dec!(100.00),
            currency: "USD".to_string(),
            status: PaymentStatus::Captured,
            payment_method: crate::models::PaymentMethod::CreditCard,
            customer_id: None,
            customer_email: None,
            customer_name: None,
            card_token: Some("tok_visa_4242".to_string()),
            card_last_four: Some("4242".to_string()),
            card_brand: Some("visa".to_string()),
            card_exp_month: Some("12".to_string()),
            card_exp_year: Some("2030".to_string()),
            authorize_net_transaction_id: Some("60123".to_string()),
            processor_response_code: Some("1".to_string()),
            processor_response_message: None,
            refunded_amount: dec!(0.00),
            refund_count: 0,
            description: None,
            metadata: serde_json::json!({}),
            is_test: true,
            is_live: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            processed_at: Some(Utc::now()),
            settled_at: None,
        }
    }

    #[test]
    fn test_refund_card_uses_persisted_reference() {
        let payment = payment_with_card();
        let card = refund_card(&payment).unwrap();
        assert_eq!(card.card_number, "XXXX4242");
        assert_eq!(card.expiration_date, "1230");
    }

    #[test]
    fn test_refund_card_falls_back_to_token() {
        let mut payment = payment_with_card();
        payment.card_last_four = None;
        let card = refund_card(&payment).unwrap();
        assert_eq!(card.last_four(), "4242");
    }

    #[test]
    fn test_refund_card_requires_some_reference() {
        let mut payment = payment_with_card();
        payment.card_last_four = None;
        payment.card_token = None;
        assert!(refund_card(&payment).is_err());
    }
}
