//! Worker implementation for job processing

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::AuditRecorder;
use crate::cache::CacheManager;
use crate::jobs::{ExponentialBackoff, Job, JobError, JobKind, JobProcessingResult, TaskQueue};
use crate::models::{AuditAction, AuditLevel, NewAuditLog, PaymentStatus};
use crate::repository::payment_repository::PaymentRepository;
use crate::webhook::WebhookDispatcher;

const JOB_TIMEOUT: Duration = Duration::from_secs(60);
const IDLE_POLL: Duration = Duration::from_millis(250);

/// Executes one job kind; the worker owns retries and timeouts
#[async_trait]
pub trait JobExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> JobProcessingResult<()>;
}

/// Production executor wired to the dispatcher, cache and store
pub struct TaskHandler {
    dispatcher: WebhookDispatcher,
    cache: CacheManager,
    payments: Arc<dyn PaymentRepository>,
    audit: AuditRecorder,
}

impl TaskHandler {
    pub fn new(
        dispatcher: WebhookDispatcher,
        cache: CacheManager,
        payments: Arc<dyn PaymentRepository>,
        audit: AuditRecorder,
    ) -> Self {
        Self {
            dispatcher,
            cache,
            payments,
            audit,
        }
    }

    async fn reconcile_payment(&self, payment_id: Uuid) -> JobProcessingResult<()> {
        let payment = self
            .payments
            .find_by_id(payment_id)
            .await?
            .ok_or_else(|| JobError::Execution(format!("Payment {} not found", payment_id)))?;

        // Pending with a recorded processor transaction means the commit
        // path died between the upstream call and the store
        if payment.status == PaymentStatus::Pending
            && payment.authorize_net_transaction_id.is_some()
        {
            warn!(
                "Payment needs manual reconciliation: id={}, processor_txn={:?}",
                payment.id, payment.authorize_net_transaction_id
            );
            self.audit
                .record(
                    NewAuditLog::payment(
                        AuditAction::PaymentReconciliationRequired,
                        payment.id,
                        "Payment is pending but carries a processor transaction id".to_string(),
                    )
                    .with_level(AuditLevel::Critical)
                    .with_metadata(serde_json::json!({
                        "processor_transaction_id": payment.authorize_net_transaction_id,
                    })),
                )
                .await?;
        } else {
            debug!("Payment {} is consistent, nothing to reconcile", payment_id);
        }

        Ok(())
    }
}

#[async_trait]
impl JobExecutor for TaskHandler {
    async fn execute(&self, job: &Job) -> JobProcessingResult<()> {
        match &job.kind {
            JobKind::WebhookDeliver => {
                let delivered = self.dispatcher.deliver_due_now().await?;
                if delivered > 0 {
                    debug!("Webhook sweep delivered {} events", delivered);
                }
                Ok(())
            }
            JobKind::CacheInvalidate { prefix } => {
                let removed = self.cache.invalidate_prefix(prefix).await?;
                debug!(
                    "Deferred invalidation completed: prefix={}, removed={}",
                    prefix, removed
                );
                Ok(())
            }
            JobKind::PaymentReconcile { payment_id } => self.reconcile_payment(*payment_id).await,
        }
    }
}

/// One worker of the task pool
pub struct TaskWorker {
    name: String,
    queue: Arc<TaskQueue>,
    executor: Arc<dyn JobExecutor>,
    backoff: ExponentialBackoff,
    token: CancellationToken,
}

impl TaskWorker {
    pub fn new(
        name: impl Into<String>,
        queue: Arc<TaskQueue>,
        executor: Arc<dyn JobExecutor>,
        token: CancellationToken,
    ) -> Self {
        Self {
            name: name.into(),
            queue,
            executor,
            backoff: ExponentialBackoff::default(),
            token,
        }
    }

    /// Start the worker loop on its own task
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!("Worker {} running", self.name);

        loop {
            if self.token.is_cancelled() {
                break;
            }

            match self.queue.dequeue() {
                Some(job) => self.process(job).await,
                None => {
                    // Wake on enqueue, cancellation, or the idle poll that
                    // promotes delayed jobs
                    tokio::select! {
                        _ = self.queue.wait_for_work() => {}
                        _ = self.token.cancelled() => break,
                        _ = tokio::time::sleep(IDLE_POLL) => {}
                    }
                }
            }
        }

        info!("Worker {} stopped", self.name);
    }

    async fn process(&self, mut job: Job) {
        job.attempt += 1;
        debug!(
            "Worker {} processing job: kind={}, attempt={}/{}",
            self.name, job.kind, job.attempt, job.max_attempts
        );

        let outcome = tokio::time::timeout(JOB_TIMEOUT, self.executor.execute(&job)).await;

        let error = match outcome {
            Ok(Ok(())) => {
                debug!("Worker {} completed job: kind={}", self.name, job.kind);
                return;
            }
            Ok(Err(e)) => e,
            Err(_) => JobError::Timeout(JOB_TIMEOUT),
        };

        if job.is_last_attempt() {
            error!(
                "Job permanently failed: kind={}, attempts={}, error={}",
                job.kind, job.attempt, error
            );
            return;
        }

        let delay = self.backoff.calculate_delay(job.attempt);
        warn!(
            "Job failed, retrying in {:?}: kind={}, attempt={}/{}, error={}",
            delay, job.kind, job.attempt, job.max_attempts, error
        );

        let retry = job.scheduled_at(Instant::now() + delay);
        if !self.queue.try_enqueue(retry) {
            error!("Retry dropped, task queue full");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingExecutor {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        async fn execute(&self, _job: &Job) -> JobProcessingResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.fail_first {
                Err(JobError::Execution("transient".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_worker_processes_jobs() {
        let queue = Arc::new(TaskQueue::new(100));
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        let token = CancellationToken::new();

        let worker = TaskWorker::new("w0", queue.clone(), executor.clone(), token.clone());
        let handle = worker.spawn();

        queue.try_enqueue(Job::new(JobKind::WebhookDeliver));
        queue.try_enqueue(Job::new(JobKind::WebhookDeliver));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_job_is_rescheduled() {
        let queue = Arc::new(TaskQueue::new(100));
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            fail_first: 1,
        });
        let token = CancellationToken::new();

        let mut worker = TaskWorker::new("w0", queue.clone(), executor.clone(), token.clone());
        // Tight backoff so the retry lands inside the test window
        worker.backoff = ExponentialBackoff {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
            jitter: 0.0,
        };
        let handle = worker.spawn();

        queue.try_enqueue(Job::new(JobKind::WebhookDeliver));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());

        token.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_attempt_budget_exhaustion_drops_job() {
        let queue = Arc::new(TaskQueue::new(100));
        let executor = Arc::new(CountingExecutor {
            calls: AtomicU32::new(0),
            fail_first: u32::MAX,
        });
        let token = CancellationToken::new();

        let mut worker = TaskWorker::new("w0", queue.clone(), executor.clone(), token.clone());
        worker.backoff = ExponentialBackoff {
            initial_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
            jitter: 0.0,
        };
        let handle = worker.spawn();

        queue.try_enqueue(Job::new(JobKind::WebhookDeliver).with_max_attempts(2));

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert!(queue.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
