//! In-memory priority queue for background jobs

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Instant;
use tokio::sync::Notify;
use tracing::debug;

use crate::jobs::{Job, JobKind, JobPriority};
use crate::repository::InvalidationSink;

/// Bounded three-level priority queue with a delayed-job parking lot
///
/// Enqueue is synchronous (callers include `Drop` paths and sync sinks);
/// consumers park on the notifier between jobs.
pub struct TaskQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    max_size: usize,
}

struct QueueInner {
    levels: [VecDeque<Job>; 3],
    delayed: Vec<Job>,
}

impl QueueInner {
    fn len(&self) -> usize {
        self.levels.iter().map(|q| q.len()).sum::<usize>() + self.delayed.len()
    }

    /// Move due delayed jobs into their priority level
    fn promote_due(&mut self, now: Instant) {
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].is_due(now) {
                let job = self.delayed.swap_remove(i);
                self.levels[job.priority as usize].push_back(job);
            } else {
                i += 1;
            }
        }
    }
}

/// Point-in-time queue occupancy
#[derive(Debug, Clone, Copy)]
pub struct QueueStats {
    pub high: usize,
    pub normal: usize,
    pub low: usize,
    pub delayed: usize,
}

impl TaskQueue {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                levels: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                delayed: Vec::new(),
            }),
            notify: Notify::new(),
            max_size,
        }
    }

    /// Enqueue a job; returns false when the queue is at capacity
    pub fn try_enqueue(&self, job: Job) -> bool {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.len() >= self.max_size {
                return false;
            }

            debug!("Enqueuing job: kind={}, priority={}", job.kind, job.priority);
            if job.is_due(Instant::now()) {
                let level = job.priority as usize;
                inner.levels[level].push_back(job);
            } else {
                inner.delayed.push(job);
            }
        }
        self.notify.notify_one();
        true
    }

    /// Pop the highest-priority due job
    pub fn dequeue(&self) -> Option<Job> {
        let mut inner = self.inner.lock().unwrap();
        inner.promote_due(Instant::now());

        for level in (0..3).rev() {
            if let Some(job) = inner.levels[level].pop_front() {
                return Some(job);
            }
        }
        None
    }

    /// Wait until new work may be available
    pub async fn wait_for_work(&self) {
        self.notify.notified().await;
    }

    /// Whether an equivalent job is already queued or parked
    pub fn contains_kind(&self, kind: &JobKind) -> bool {
        let inner = self.inner.lock().unwrap();
        inner
            .levels
            .iter()
            .flatten()
            .chain(inner.delayed.iter())
            .any(|job| &job.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> QueueStats {
        let inner = self.inner.lock().unwrap();
        QueueStats {
            high: inner.levels[JobPriority::High as usize].len(),
            normal: inner.levels[JobPriority::Normal as usize].len(),
            low: inner.levels[JobPriority::Low as usize].len(),
            delayed: inner.delayed.len(),
        }
    }
}

impl InvalidationSink for TaskQueue {
    fn defer_invalidation(&self, prefix: String) {
        let kind = JobKind::CacheInvalidate { prefix };
        if !self.contains_kind(&kind) {
            self.try_enqueue(Job::new(kind));
        }
    }
}
