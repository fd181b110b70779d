//! EventSink の実装

use crate::domain::JobEvent;
use crate::ports::EventSink;

/// すべてのイベントを捨てる
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: JobEvent) {}
}

/// すべてのイベントを `tracing` で出力
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: JobEvent) {
        match event {
            JobEvent::Claimed {
                id,
                job_type,
                attempt,
            } => tracing::debug!(%id, %job_type, attempt, "job claimed"),
            JobEvent::Completed {
                id,
                job_type,
                attempts,
            } => tracing::info!(%id, %job_type, attempts, "job completed"),
            JobEvent::RetryScheduled {
                id,
                job_type,
                attempt,
                delay,
                error,
            } => tracing::warn!(
                %id,
                %job_type,
                attempt,
                delay_ms = delay.as_millis() as u64,
                %error,
                "job failed, retry scheduled"
            ),
            JobEvent::DeadLettered {
                id,
                job_type,
                attempts,
                error,
            } => tracing::error!(%id, %job_type, attempts, %error, "job dead-lettered"),
        }
    }
}
