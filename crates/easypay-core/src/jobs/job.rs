//! Job types and definitions

use std::fmt;
use std::time::Instant;
use uuid::Uuid;

/// Unique job identifier
pub type JobId = Uuid;

/// Job priority levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobPriority {
    /// Processed last
    Low = 0,

    /// Default
    Normal = 1,

    /// Processed first
    High = 2,
}

impl Default for JobPriority {
    fn default() -> Self {
        JobPriority::Normal
    }
}

impl fmt::Display for JobPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobPriority::High => write!(f, "high"),
            JobPriority::Normal => write!(f, "normal"),
            JobPriority::Low => write!(f, "low"),
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    /// Permanently failed; attempt budget exhausted
    Dead,
}

/// The work a job performs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Sweep due outbound webhook deliveries
    WebhookDeliver,

    /// Re-run a cache prefix invalidation that failed inline
    CacheInvalidate { prefix: String },

    /// Re-check a payment stuck between processor and store
    PaymentReconcile { payment_id: Uuid },
}

impl JobKind {
    /// Dotted job-type name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::WebhookDeliver => "webhook.deliver",
            JobKind::CacheInvalidate { .. } => "cache.invalidate",
            JobKind::PaymentReconcile { .. } => "payment.reconcile",
        }
    }

    /// Default priority per kind
    pub fn priority(&self) -> JobPriority {
        match self {
            JobKind::PaymentReconcile { .. } => JobPriority::High,
            JobKind::WebhookDeliver => JobPriority::Normal,
            JobKind::CacheInvalidate { .. } => JobPriority::Low,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Job definition
#[derive(Debug, Clone)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,

    /// The work to perform
    pub kind: JobKind,

    /// Queue priority
    pub priority: JobPriority,

    /// Current attempt number (1-indexed once running)
    pub attempt: u32,

    /// Max attempts before the job is dead
    pub max_attempts: u32,

    /// Earliest execution time; `None` means immediately
    pub run_at: Option<Instant>,

    /// Created timestamp
    pub created_at: Instant,
}

impl Job {
    pub fn new(kind: JobKind) -> Self {
        let priority = kind.priority();
        Self {
            id: JobId::new_v4(),
            kind,
            priority,
            attempt: 0,
            max_attempts: 3,
            run_at: None,
            created_at: Instant::now(),
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn scheduled_at(mut self, run_at: Instant) -> Self {
        self.run_at = Some(run_at);
        self
    }

    /// Whether the job may run now
    pub fn is_due(&self, now: Instant) -> bool {
        self.run_at.map(|t| t <= now).unwrap_or(true)
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
