//! JobRegistry - ジョブ型名 -> handler + options
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - Generic methods での登録と型安全性
//! - Arc による共有所有権（起動時に一度だけ登録し、以後は
//!   `Arc<JobRegistry>` として dispatcher と全ワーカープールが読み取り専用で共有）

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::handler::{DynHandler, FnHandler, Handler, TypedHandler};
use super::job::{Job, JobContext};
use crate::domain::{CourierError, HandlerError, JobType, QueueName, Result, RetryPolicy};

/// 登録ごとのオプション
#[derive(Debug, Clone)]
pub struct JobOptions {
    pub queue: QueueName,
    /// Max jobs of this type executing at once within one worker pool.
    pub concurrency: usize,
    /// Falls back to the dispatcher default when `None`.
    pub max_attempts: Option<u32>,
    /// Falls back to the pool's policy when `None`.
    pub retry_policy: Option<Arc<dyn RetryPolicy>>,
    /// Attempt time limit. No limit when `None`.
    pub timeout: Option<Duration>,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            queue: QueueName::default(),
            concurrency: 1,
            max_attempts: None,
            retry_policy: None,
            timeout: None,
        }
    }
}

impl JobOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(mut self, queue: impl Into<QueueName>) -> Self {
        self.queue = queue.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.concurrency = n;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = Some(n);
        self
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn validate(&self, job_type: &JobType) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CourierError::InvalidOptions(format!(
                "{job_type}: concurrency must be at least 1"
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(CourierError::InvalidOptions(format!(
                "{job_type}: max_attempts must be at least 1"
            )));
        }
        Ok(())
    }
}

pub struct RegistryEntry {
    job_type: JobType,
    handler: Arc<dyn DynHandler>,
    options: JobOptions,
}

impl RegistryEntry {
    pub fn job_type(&self) -> &JobType {
        &self.job_type
    }

    pub fn handler(&self) -> Arc<dyn DynHandler> {
        Arc::clone(&self.handler)
    }

    pub fn options(&self) -> &JobOptions {
        &self.options
    }
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("job_type", &self.job_type)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// JobRegistry はジョブ型ごとの handler と options を管理
///
/// # 使用例
/// ```ignore
/// let mut registry = JobRegistry::new();
/// registry.register_job::<SendEmail, _>(SendEmailHandler, JobOptions::new().concurrency(1))?;
/// registry.register_fn("cleanup", JobOptions::new(), |_ctx, _payload| async { Ok(()) })?;
///
/// let entry = registry.resolve("send-email")?;
/// ```
#[derive(Debug, Default)]
pub struct JobRegistry {
    entries: HashMap<JobType, Arc<RegistryEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails with `DuplicateRegistration` if `job_type` is taken, or
    /// `InvalidOptions` for a zero concurrency or attempt budget.
    pub fn register(
        &mut self,
        job_type: impl Into<JobType>,
        handler: Arc<dyn DynHandler>,
        options: JobOptions,
    ) -> Result<()> {
        let job_type = job_type.into();
        options.validate(&job_type)?;
        if self.entries.contains_key(&job_type) {
            return Err(CourierError::DuplicateRegistration(job_type));
        }

        tracing::debug!(
            %job_type,
            queue = %options.queue,
            concurrency = options.concurrency,
            "job type registered"
        );
        let entry = RegistryEntry {
            job_type: job_type.clone(),
            handler,
            options,
        };
        self.entries.insert(job_type, Arc::new(entry));
        Ok(())
    }

    pub fn register_job<T: Job, H: Handler<T> + 'static>(
        &mut self,
        handler: H,
        options: JobOptions,
    ) -> Result<()> {
        self.register(T::TYPE, Arc::new(TypedHandler::new(handler)), options)
    }

    pub fn register_fn<F, Fut>(
        &mut self,
        job_type: impl Into<JobType>,
        options: JobOptions,
        f: F,
    ) -> Result<()>
    where
        F: Fn(JobContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.register(job_type, Arc::new(FnHandler::new(f)), options)
    }

    /// Fails with `UnknownJobType` if nothing is registered under `job_type`.
    pub fn resolve(&self, job_type: &str) -> Result<Arc<RegistryEntry>> {
        self.get(job_type)
            .ok_or_else(|| CourierError::UnknownJobType(JobType::new(job_type)))
    }

    pub fn get(&self, job_type: &str) -> Option<Arc<RegistryEntry>> {
        self.entries.get(job_type).cloned()
    }

    pub fn contains(&self, job_type: &str) -> bool {
        self.entries.contains_key(job_type)
    }

    /// Registered type names, sorted.
    pub fn job_types(&self) -> Vec<JobType> {
        let mut types: Vec<JobType> = self.entries.keys().cloned().collect();
        types.sort();
        types
    }

    /// Entries routed to `queue`, sorted by type name.
    pub fn entries_for_queue(&self, queue: &QueueName) -> Vec<Arc<RegistryEntry>> {
        let mut entries: Vec<Arc<RegistryEntry>> = self
            .entries
            .values()
            .filter(|entry| &entry.options.queue == queue)
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.job_type.cmp(&b.job_type));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
