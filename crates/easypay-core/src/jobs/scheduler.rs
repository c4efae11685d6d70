//! Recurring job scheduler

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::jobs::{Job, JobKind, TaskQueue};

/// Enqueues the recurring webhook delivery sweep
///
/// One tick, one sweep job; a tick is skipped while the previous sweep is
/// still queued so a slow destination cannot pile up duplicates.
pub struct TaskScheduler {
    queue: Arc<TaskQueue>,
    webhook_poll_interval: Duration,
    token: CancellationToken,
}

impl TaskScheduler {
    pub fn new(
        queue: Arc<TaskQueue>,
        webhook_poll_interval: Duration,
        token: CancellationToken,
    ) -> Self {
        Self {
            queue,
            webhook_poll_interval,
            token,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(&self) {
        info!(
            "Task scheduler running: webhook_poll_interval={:?}",
            self.webhook_poll_interval
        );

        let mut tick = tokio::time::interval(self.webhook_poll_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tick.tick() => {
                    if self.queue.contains_kind(&JobKind::WebhookDeliver) {
                        debug!("Webhook sweep still queued, skipping tick");
                        continue;
                    }
                    self.queue.try_enqueue(Job::new(JobKind::WebhookDeliver));
                }
                _ = self.token.cancelled() => break,
            }
        }

        info!("Task scheduler stopped");
    }
}
