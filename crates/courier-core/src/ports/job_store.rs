//! JobStore port - キューのストレージ（正本）
//!
//! # 不変条件
//! - `claim_next` はアトミック。ack / release されるまで、ジョブは高々 1 つの
//!   呼び出し元にしか渡らない
//! - 1 キュー内の eligible なジョブは priority（高い順）→ 投入順で claim される
//! - eligible = ステータスが claim 可能 かつ store の clock で `scheduled_for <= now`

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::domain::{JobId, JobRecord, JobType, NewJob, QueueCounts, QueueName, Result};

/// How long `claim_next` may wait for an eligible job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimWait {
    /// Return `None` right away if nothing is eligible.
    Poll,
    /// Suspend until a job becomes eligible or the timeout elapses.
    Block(Duration),
}

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub queue: QueueName,
    /// Job types the caller has no free slot for. Jobs of these types are
    /// skipped, not claimed.
    pub exclude_types: Vec<JobType>,
    pub wait: ClaimWait,
    /// Ends a blocking wait early with `None`, e.g. once an excluded type
    /// has a free slot again.
    pub interrupt: Option<Arc<Notify>>,
}

impl ClaimRequest {
    pub fn poll(queue: impl Into<QueueName>) -> Self {
        Self {
            queue: queue.into(),
            exclude_types: Vec::new(),
            wait: ClaimWait::Poll,
            interrupt: None,
        }
    }

    pub fn blocking(queue: impl Into<QueueName>, timeout: Duration) -> Self {
        Self {
            queue: queue.into(),
            exclude_types: Vec::new(),
            wait: ClaimWait::Block(timeout),
            interrupt: None,
        }
    }

    pub fn excluding(mut self, job_types: Vec<JobType>) -> Self {
        self.exclude_types = job_types;
        self
    }

    pub fn interrupted_by(mut self, signal: Arc<Notify>) -> Self {
        self.interrupt = Some(signal);
        self
    }
}

/// How an active job goes back to the store after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Back to the queue, eligible again after `delay`.
    Retry { delay: Duration, error: String },
    /// Dead-letter.
    Dead { error: String },
}

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new pending job. Fails only with `StoreUnavailable`.
    async fn enqueue(&self, job: NewJob) -> Result<JobId>;

    /// Claim the oldest eligible job of a queue, transitioning it to `Active`.
    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<JobRecord>>;

    /// Mark an active job completed.
    async fn acknowledge(&self, id: JobId) -> Result<()>;

    /// Return an active job for retry, or dead-letter it.
    async fn release(&self, id: JobId, release: Release) -> Result<()>;

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>>;

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts>;

    /// Dead-lettered jobs of a queue, oldest first.
    async fn list_dead(&self, queue: &QueueName) -> Result<Vec<JobRecord>>;

    /// Delete completed jobs of a queue finished at least `older_than` ago.
    /// Returns how many were removed.
    async fn purge_completed(&self, queue: &QueueName, older_than: Duration) -> Result<usize>;

    /// Move a dead job back to pending with a fresh attempt budget.
    async fn requeue_dead(&self, id: JobId) -> Result<()>;
}
