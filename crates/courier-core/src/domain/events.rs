//! Events - ワーカープールが発行するライフサイクルイベント

use std::time::Duration;

use super::ids::JobId;
use super::job_type::JobType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    Claimed {
        id: JobId,
        job_type: JobType,
        attempt: u32,
    },
    Completed {
        id: JobId,
        job_type: JobType,
        attempts: u32,
    },
    RetryScheduled {
        id: JobId,
        job_type: JobType,
        attempt: u32,
        delay: Duration,
        error: String,
    },
    /// Terminal. Reported, never retried.
    DeadLettered {
        id: JobId,
        job_type: JobType,
        attempts: u32,
        error: String,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> JobId {
        match self {
            JobEvent::Claimed { id, .. }
            | JobEvent::Completed { id, .. }
            | JobEvent::RetryScheduled { id, .. }
            | JobEvent::DeadLettered { id, .. } => *id,
        }
    }
}
