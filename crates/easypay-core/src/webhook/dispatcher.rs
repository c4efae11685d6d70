//! Outbound webhook dispatcher
//!
//! At-least-once delivery with HMAC signing and a durable retry queue.
//! Rows are claimed one at a time under `FOR UPDATE SKIP LOCKED`; each
//! delivery attempt runs in its own transaction, and the claimed row stays
//! locked for the duration of the HTTP call so an event never has two
//! winning attempts.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit;
use crate::common::{self, Clock};
use crate::config::WebhookConfig;
use crate::db::Database;
use crate::models::{
    AuditAction, AuditLevel, NewAuditLog, NewWebhook, Webhook, WebhookEventType,
};
use crate::repository::cached_webhook_repository::CachedWebhookRepository;
use crate::repository::webhook_repository as webhook_repo;
use crate::repository::webhook_repository::WebhookRepository;
use crate::webhook::signature;
use crate::{Error, Result};

/// How a delivery response is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// 2xx: terminal success
    Delivered,

    /// 4xx other than 408/425/429: the destination rejected the event
    PermanentFailure,

    /// 408/425/429, 5xx, network error, timeout
    RetryableFailure,
}

/// Classify a delivery response status (`None` = network error/timeout)
pub fn classify_response(status: Option<u16>) -> DeliveryOutcome {
    match status {
        Some(code) if (200..300).contains(&code) => DeliveryOutcome::Delivered,
        Some(408) | Some(425) | Some(429) => DeliveryOutcome::RetryableFailure,
        Some(code) if (400..500).contains(&code) => DeliveryOutcome::PermanentFailure,
        _ => DeliveryOutcome::RetryableFailure,
    }
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped, with symmetric
/// jitter
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration, jitter: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let raw = base.as_secs_f64() * 2f64.powi(exponent as i32);
    let capped = raw.min(cap.as_secs_f64());

    let jittered = if jitter > 0.0 {
        use rand::Rng;
        let spread = capped * jitter;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        (capped + offset).max(0.0)
    } else {
        capped
    };

    Duration::from_secs_f64(jittered)
}

/// Assemble the signed webhook body
pub fn build_event_payload(
    event_id: &str,
    event_type: WebhookEventType,
    created_at: DateTime<Utc>,
    data: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "event_id": event_id,
        "event_type": event_type.as_str(),
        "created_at": created_at.to_rfc3339(),
        "data": data,
    })
}

struct SendResult {
    status: Option<u16>,
    body: Option<String>,
}

/// Dispatcher over the durable webhook outbox
#[derive(Clone)]
pub struct WebhookDispatcher {
    db: Database,
    cached_repo: CachedWebhookRepository,
    config: WebhookConfig,
    client: reqwest::Client,
    clock: Arc<dyn Clock>,
}

impl WebhookDispatcher {
    pub fn new(
        db: Database,
        cached_repo: CachedWebhookRepository,
        config: WebhookConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("EasyPay-Webhooks/1.0")
            .build()
            .map_err(|e| Error::Config(format!("HTTP client build failed: {}", e)))?;

        Ok(Self {
            db,
            cached_repo,
            config,
            client,
            clock,
        })
    }

    /// Build the outbox row for one event
    ///
    /// The signature covers the canonical payload and is fixed at enqueue
    /// time; retries always send identical bytes.
    pub fn build_outbox_row(
        &self,
        event_type: WebhookEventType,
        payment_id: Option<Uuid>,
        data: serde_json::Value,
        target_url: &str,
        correlation_id: Option<String>,
    ) -> NewWebhook {
        let event_id = common::generate_event_id();
        let payload = build_event_payload(&event_id, event_type, self.clock.now(), data);
        let sig = signature::sign_payload(&self.config.signing_secret, &payload);

        let headers = serde_json::json!({
            "Content-Type": "application/json",
            signature::SIGNATURE_HEADER: sig,
        });

        NewWebhook {
            event_id,
            event_type,
            payment_id,
            url: target_url.to_string(),
            payload,
            signature: sig,
            headers,
            max_retries: self.config.max_retries,
            correlation_id,
        }
    }

    /// Attempt immediate delivery of one freshly committed outbox row
    pub async fn dispatch_now(&self, webhook_id: Uuid) -> Result<()> {
        let mut tx = self.db.begin().await?;

        let Some(webhook) = webhook_repo::claim_by_id(&mut tx, webhook_id).await? else {
            // Already taken by a sweep or already terminal
            return Ok(());
        };

        let updated = self.attempt(&mut tx, webhook).await?;
        tx.commit().await.map_err(Error::Database)?;
        self.cached_repo.invalidate(&updated).await;

        Ok(())
    }

    /// Re-arm a failed or expired webhook and attempt delivery at once
    pub async fn retry_webhook(&self, webhook_id: Uuid) -> Result<Webhook> {
        let mut tx = self.db.begin().await?;

        let Some(reset) =
            webhook_repo::reset_for_retry(&mut tx, webhook_id, self.clock.now()).await?
        else {
            // Either unknown or not in a re-armable state
            let existing = self.cached_repo.find_by_id(webhook_id).await?;
            return match existing {
                Some(webhook) => Err(Error::conflict(format!(
                    "Webhook is {}, only failed or expired deliveries can be retried",
                    webhook.status
                ))),
                None => Err(Error::not_found(format!("Webhook {} not found", webhook_id))),
            };
        };

        tx.commit().await.map_err(Error::Database)?;
        self.cached_repo.invalidate(&reset).await;

        info!("Webhook re-armed for delivery: event_id={}", reset.event_id);
        self.dispatch_now(webhook_id).await?;

        self.cached_repo
            .find_by_id(webhook_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Webhook {} not found", webhook_id)))
    }

    /// Deliver everything that is due, one claimed row per transaction
    ///
    /// Invoked by the recurring background job; safe to run from several
    /// processes at once thanks to `SKIP LOCKED` claiming.
    pub async fn deliver_due_now(&self) -> Result<u32> {
        let mut delivered = 0u32;

        // Batch cap keeps one sweep bounded; the next tick picks up the rest
        while delivered < 50 {
            let mut tx = self.db.begin().await?;

            let Some(webhook) = webhook_repo::claim_due(&mut tx, self.clock.now()).await? else {
                tx.rollback().await.ok();
                break;
            };

            let updated = self.attempt(&mut tx, webhook).await?;
            tx.commit().await.map_err(Error::Database)?;
            self.cached_repo.invalidate(&updated).await;

            delivered += 1;
        }

        if delivered > 0 {
            debug!("Webhook sweep processed {} deliveries", delivered);
        }

        Ok(delivered)
    }

    /// One delivery attempt against a claimed row
    async fn attempt(
        &self,
        conn: &mut sqlx::PgConnection,
        webhook: Webhook,
    ) -> Result<Webhook> {
        let result = self.send(&webhook).await;
        let now = self.clock.now();

        match classify_response(result.status) {
            DeliveryOutcome::Delivered => {
                info!(
                    "Webhook delivered: event_id={}, attempts={}",
                    webhook.event_id,
                    webhook.retry_count + 1
                );
                let updated = webhook_repo::mark_delivered(
                    conn,
                    webhook.id,
                    result.status.unwrap_or(200) as i32,
                    result.body,
                    now,
                )
                .await?;
                audit::append(
                    conn,
                    &NewAuditLog::webhook(
                        AuditAction::WebhookDelivered,
                        webhook.id,
                        format!("Webhook {} delivered", webhook.event_id),
                    )
                    .with_correlation_id(webhook.correlation_id.clone()),
                )
                .await?;
                Ok(updated)
            }
            DeliveryOutcome::PermanentFailure => {
                warn!(
                    "Webhook permanently rejected: event_id={}, status={:?}",
                    webhook.event_id, result.status
                );
                let updated = webhook_repo::mark_failed(
                    conn,
                    webhook.id,
                    result.status.map(|s| s as i32),
                    result.body,
                    now,
                )
                .await?;
                audit::append(
                    conn,
                    &NewAuditLog::webhook(
                        AuditAction::WebhookFailed,
                        webhook.id,
                        format!(
                            "Webhook {} rejected by destination ({:?})",
                            webhook.event_id, result.status
                        ),
                    )
                    .with_level(AuditLevel::Warning)
                    .with_correlation_id(webhook.correlation_id.clone()),
                )
                .await?;
                Ok(updated)
            }
            DeliveryOutcome::RetryableFailure => {
                if webhook.retry_count < webhook.max_retries {
                    let attempt = (webhook.retry_count + 1) as u32;
                    let delay = backoff_delay(
                        Duration::from_secs(self.config.retry_interval_secs),
                        attempt,
                        Duration::from_secs(3600),
                        0.1,
                    );
                    let next_retry_at = now
                        + ChronoDuration::from_std(delay)
                            .unwrap_or_else(|_| ChronoDuration::seconds(3600));

                    debug!(
                        "Webhook retry scheduled: event_id={}, attempt={}, delay={:?}",
                        webhook.event_id, attempt, delay
                    );
                    webhook_repo::schedule_retry(
                        conn,
                        webhook.id,
                        next_retry_at,
                        result.status.map(|s| s as i32),
                        result.body,
                    )
                    .await
                } else {
                    warn!(
                        "Webhook retry budget exhausted: event_id={}, retries={}",
                        webhook.event_id, webhook.retry_count
                    );
                    let updated = webhook_repo::mark_expired(conn, webhook.id, now).await?;
                    audit::append(
                        conn,
                        &NewAuditLog::webhook(
                            AuditAction::WebhookExpired,
                            webhook.id,
                            format!(
                                "Webhook {} expired after {} retries",
                                webhook.event_id, webhook.retry_count
                            ),
                        )
                        .with_level(AuditLevel::Warning)
                        .with_correlation_id(webhook.correlation_id.clone()),
                    )
                    .await?;
                    Ok(updated)
                }
            }
        }
    }

    /// POST the stored payload; `None` status means transport failure
    async fn send(&self, webhook: &Webhook) -> SendResult {
        let mut request = self.client.post(&webhook.url).json(&webhook.payload);

        if let Some(headers) = webhook.headers.as_object() {
            for (name, value) in headers {
                if let Some(value) = value.as_str() {
                    request = request.header(name.as_str(), value);
                }
            }
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.ok().map(|b| truncate(b, 2048));
                SendResult {
                    status: Some(status),
                    body,
                }
            }
            Err(e) => {
                warn!("Webhook delivery transport error: url={}, error={}", webhook.url, e);
                SendResult {
                    status: None,
                    body: Some(truncate(e.to_string(), 2048)),
                }
            }
        }
    }
}

fn truncate(mut s: String, max: usize) -> String {
    if s.len() > max {
        s.truncate(max);
    }
    s
}
