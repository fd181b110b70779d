//! Job - ジョブレコードとステータス遷移

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::ids::JobId;
use super::job_type::{JobType, QueueName};

/// Job status.
///
/// State transitions:
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Failed -> Pending (loop until max_attempts)
/// - Pending -> Active -> Dead (attempts exhausted, or the policy gave up)
/// - Dead -> Pending (manual requeue from the dead-letter list)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting in the queue. Invisible until `scheduled_for` is due.
    Pending,

    /// Claimed by exactly one worker.
    Active,

    /// Handler returned success.
    Completed,

    /// Last attempt failed; waiting for the backoff delay to elapse.
    Failed,

    /// Dead-lettered. Not retried further.
    Dead,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions without manual requeue)?
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Dead)
    }

    /// Can a job in this state be claimed once it is due?
    pub fn is_claimable(self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Failed)
    }
}

/// Options resolved at submission time and handed to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnqueueOptions {
    /// The job is invisible to claims until `enqueue time + delay`.
    pub delay: Duration,
    pub max_attempts: u32,
    /// Higher runs first. Equal priority is strict enqueue order.
    pub priority: i32,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            max_attempts: 1,
            priority: 0,
        }
    }
}

/// A job about to be persisted. The store assigns the id and timestamps.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub job_type: JobType,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    pub options: EnqueueOptions,
}

impl NewJob {
    pub fn new(
        job_type: impl Into<JobType>,
        queue: impl Into<QueueName>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            job_type: job_type.into(),
            queue: queue.into(),
            payload,
            options: EnqueueOptions::default(),
        }
    }

    pub fn with_options(mut self, options: EnqueueOptions) -> Self {
        self.options = options;
        self
    }
}

/// A job as held by the store.
///
/// Design:
/// - The store owns the record; a worker only sees a clone of it while the
///   job is `Active`.
/// - All state transitions go through the methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub job_type: JobType,
    pub queue: QueueName,
    pub payload: serde_json::Value,
    pub status: JobStatus,

    /// Number of attempts started so far (including the current one while Active).
    pub attempts: u32,
    pub max_attempts: u32,
    pub priority: i32,

    pub enqueued_at: DateTime<Utc>,
    /// Not claimable before this instant (initial delay or retry backoff).
    pub scheduled_for: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    pub last_error: Option<String>,

    /// Store-local insertion order; ties in `enqueued_at` are broken by it.
    pub seq: u64,
}

impl JobRecord {
    pub fn new(id: JobId, job: NewJob, seq: u64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            job_type: job.job_type,
            queue: job.queue,
            payload: job.payload,
            status: JobStatus::Pending,
            attempts: 0,
            max_attempts: job.options.max_attempts,
            priority: job.options.priority,
            enqueued_at: now,
            scheduled_for: schedule_after(now, job.options.delay),
            updated_at: now,
            last_error: None,
            seq,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for <= now
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Mark as claimed (increments attempts).
    pub fn start_attempt(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Active;
        self.attempts += 1;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Completed;
        self.updated_at = now;
    }

    pub fn schedule_retry(&mut self, next_run_at: DateTime<Utc>, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Failed;
        self.scheduled_for = next_run_at;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    pub fn mark_dead(&mut self, error: String, now: DateTime<Utc>) {
        self.status = JobStatus::Dead;
        self.last_error = Some(error);
        self.updated_at = now;
    }

    /// Failed -> Pending once the backoff elapsed.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.updated_at = now;
    }

    /// Dead -> Pending with a fresh attempt budget.
    pub fn revive(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Pending;
        self.attempts = 0;
        self.scheduled_for = now;
        self.updated_at = now;
    }

    /// A claim interrupted by a crash. The attempt stays counted: the job goes
    /// back to Pending, or to Dead when that attempt was its last one.
    pub fn recover(&mut self, now: DateTime<Utc>) {
        if self.attempts_exhausted() {
            self.status = JobStatus::Dead;
            self.last_error = Some("claim interrupted by a restart; attempts exhausted".to_string());
        } else {
            self.status = JobStatus::Pending;
            self.last_error = Some("claim interrupted by a restart".to_string());
        }
        self.updated_at = now;
    }
}

/// Counts per status for one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub dead: usize,
}

impl QueueCounts {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Pending => self.pending += 1,
            JobStatus::Active => self.active += 1,
            JobStatus::Completed => self.completed += 1,
            JobStatus::Failed => self.failed += 1,
            JobStatus::Dead => self.dead += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.active + self.completed + self.failed + self.dead
    }

    /// No job left that a worker could still run.
    pub fn is_settled(&self) -> bool {
        self.pending == 0 && self.active == 0 && self.failed == 0
    }
}

/// `now + delay`, saturating at the far future instead of overflowing.
pub fn schedule_after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
