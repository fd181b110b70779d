//! Dispatcher - ジョブ投入の窓口
//!
//! `submit` は永続化の前に registry でジョブ型を解決する。未知の型は
//! 同期的にエラーになり、store には何も書かれない。

use std::sync::Arc;
use std::time::Duration;

use crate::domain::{CourierError, EnqueueOptions, JobId, NewJob, Result};
use crate::ports::JobStore;
use crate::typed::{Job, JobRegistry};

/// Per-submission options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Not claimable before `now + delay`.
    pub delay: Option<Duration>,
    /// Overrides the registration's and the dispatcher's default.
    pub max_attempts: Option<u32>,
    /// Higher runs first. Equal priority keeps enqueue order.
    pub priority: i32,
}

impl SubmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn delay_ms(self, ms: u64) -> Self {
        self.delay(Duration::from_millis(ms))
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    default_max_attempts: u32,
}

impl Dispatcher {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(registry: Arc<JobRegistry>, store: Arc<dyn JobStore>) -> Self {
        Self {
            registry,
            store,
            default_max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_default_max_attempts(mut self, n: u32) -> Self {
        self.default_max_attempts = n;
        self
    }

    /// Persist a job for later execution.
    ///
    /// # Errors
    /// - `UnknownJobType`: nothing registered under `job_type`; nothing persisted
    /// - `InvalidOptions`: an attempt budget of zero
    /// - `StoreUnavailable`: the store could not persist the job
    pub async fn submit(
        &self,
        job_type: &str,
        payload: serde_json::Value,
        options: SubmitOptions,
    ) -> Result<JobId> {
        let entry = self.registry.resolve(job_type)?;
        let max_attempts = options
            .max_attempts
            .or(entry.options().max_attempts)
            .unwrap_or(self.default_max_attempts);
        if max_attempts == 0 {
            return Err(CourierError::InvalidOptions(format!(
                "{job_type}: max_attempts must be at least 1"
            )));
        }

        let queue = entry.options().queue.clone();
        let job = NewJob::new(entry.job_type(), queue.clone(), payload).with_options(
            EnqueueOptions {
                delay: options.delay.unwrap_or_default(),
                max_attempts,
                priority: options.priority,
            },
        );

        let id = self.store.enqueue(job).await.inspect_err(|err| {
            tracing::warn!(job_type, %queue, error = %err, "job submission failed");
        })?;
        tracing::debug!(%id, job_type, %queue, max_attempts, "job submitted");
        Ok(id)
    }

    pub async fn submit_job<T: Job>(&self, job: &T, options: SubmitOptions) -> Result<JobId> {
        let payload = serde_json::to_value(job).map_err(|e| {
            CourierError::InvalidOptions(format!("{}: payload encode: {e}", T::TYPE))
        })?;
        self.submit(T::TYPE, payload, options).await
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }
}
