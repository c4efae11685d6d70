//! Background task runner
//!
//! One runner covers every deferred concern of the core:
//! - `webhook.deliver`: recurring sweep of due webhook deliveries
//! - `cache.invalidate`: deferred prefix invalidations that failed inline
//! - `payment.reconcile`: re-check of payments left in limbo
//!
//! Jobs live in an in-memory priority queue drained by a small worker
//! pool; failures retry with exponential backoff until the attempt budget
//! runs out.

pub mod job;
pub mod queue;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use job::{Job, JobId, JobKind, JobPriority, JobStatus};
pub use queue::{QueueStats, TaskQueue};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use scheduler::TaskScheduler;
pub use worker::{JobExecutor, TaskHandler, TaskWorker};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Job processing result type
pub type JobProcessingResult<T> = Result<T, JobError>;

/// Hands work to the background queue from components that must not block
pub trait JobSink: Send + Sync {
    fn submit(&self, kind: JobKind);
}

impl JobSink for TaskQueue {
    fn submit(&self, kind: JobKind) {
        let name = kind.name();
        if !self.try_enqueue(Job::new(kind)) {
            warn!("Task queue full, dropping {} job", name);
        }
    }
}

/// Error types for job processing
#[derive(Debug, Clone, thiserror::Error)]
pub enum JobError {
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Job execution failed: {0}")]
    Execution(String),

    #[error("Job timeout after {0:?}")]
    Timeout(Duration),
}

impl From<crate::Error> for JobError {
    fn from(err: crate::Error) -> Self {
        JobError::Execution(err.to_string())
    }
}

impl From<crate::cache::CacheError> for JobError {
    fn from(err: crate::cache::CacheError) -> Self {
        JobError::Execution(err.to_string())
    }
}

/// Owner of the queue, workers and scheduler
pub struct TaskRunner {
    queue: Arc<TaskQueue>,
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    /// Spawn the worker pool and the recurring scheduler
    ///
    /// The queue is built by the caller so it can double as the deferred
    /// invalidation sink of the cached repositories.
    pub fn start(
        queue: Arc<TaskQueue>,
        workers: usize,
        executor: Arc<dyn JobExecutor>,
        webhook_poll_interval: Duration,
    ) -> Self {
        let token = CancellationToken::new();
        let mut handles = Vec::new();

        for i in 0..workers.max(1) {
            let worker = TaskWorker::new(
                format!("task-worker-{}", i),
                queue.clone(),
                executor.clone(),
                token.clone(),
            );
            handles.push(worker.spawn());
        }

        let scheduler = TaskScheduler::new(queue.clone(), webhook_poll_interval, token.clone());
        handles.push(scheduler.spawn());

        info!("Task runner started: workers={}", workers.max(1));

        Self {
            queue,
            token,
            handles,
        }
    }

    pub fn queue(&self) -> Arc<TaskQueue> {
        self.queue.clone()
    }

    /// Fire-and-forget enqueue
    pub fn enqueue(&self, kind: JobKind) {
        if !self.queue.try_enqueue(Job::new(kind)) {
            warn!("Task queue full, dropping job");
        }
    }

    /// Stop accepting work and drain the pool within the grace period
    pub async fn shutdown(self, grace: Duration) {
        self.token.cancel();
        let drain = futures::future::join_all(self.handles);
        if tokio::time::timeout(grace, drain).await.is_err() {
            warn!("Task runner drain exceeded {:?}, abandoning remaining tasks", grace);
        } else {
            info!("Task runner stopped");
        }
    }
}
