//! CourierBuilder - ワイヤリングと起動時検証
//!
//! # 学習ポイント
//! - Builder パターン（所有権を移しながらのメソッドチェーン）
//! - 起動時検証（Fail-fast 設計）
//!   - `expect_job_types()` でアプリが依存するジョブ型を宣言
//!   - `build()` で「expected ⊆ registered」を検査し、違反は `MissingJobTypes`

use std::future::Future;
use std::sync::Arc;

use super::dispatcher::Dispatcher;
use super::worker_pool::{PoolConfig, WorkerPool};
use crate::config::CourierConfig;
use crate::domain::{CourierError, ExponentialBackoff, HandlerError, JobType, Result, RetryPolicy};
use crate::impls::{FileJobStore, InMemoryJobStore, NoopEventSink};
use crate::ports::{EventSink, JobStore};
use crate::typed::{Handler, Job, JobContext, JobOptions, JobRegistry};

/// # 使用例
/// ```ignore
/// let courier = CourierBuilder::new()
///     .register_job::<SendEmail, _>(SendEmailHandler, JobOptions::new().concurrency(1))?
///     .expect_job_types(&[SendEmail::TYPE])
///     .build()?;
///
/// let pool = courier.start_pool(PoolConfig::new("default", 4))?;
/// courier.dispatcher().submit_job(&SendEmail { .. }, SubmitOptions::new()).await?;
/// ```
pub struct CourierBuilder {
    registry: JobRegistry,
    store: Option<Arc<dyn JobStore>>,
    expected: Option<Vec<String>>,
    default_max_attempts: u32,
    retry_policy: Arc<dyn RetryPolicy>,
    events: Arc<dyn EventSink>,
}

impl CourierBuilder {
    pub fn new() -> Self {
        Self {
            registry: JobRegistry::new(),
            store: None,
            expected: None,
            default_max_attempts: Dispatcher::DEFAULT_MAX_ATTEMPTS,
            retry_policy: Arc::new(ExponentialBackoff::default()),
            events: Arc::new(NoopEventSink),
        }
    }

    /// Builder preset from configuration: file store when `store_path` is
    /// set, attempt budget and backoff from the config.
    pub fn from_config(config: &CourierConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn JobStore> = match &config.store_path {
            Some(path) => Arc::new(FileJobStore::open(path)?),
            None => Arc::new(InMemoryJobStore::new()),
        };
        Ok(Self::new()
            .store(store)
            .default_max_attempts(config.default_max_attempts)
            .retry_policy(Arc::new(config.retry_policy())))
    }

    pub fn register_job<T: Job, H: Handler<T> + 'static>(
        mut self,
        handler: H,
        options: JobOptions,
    ) -> Result<Self> {
        self.registry.register_job::<T, H>(handler, options)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(
        mut self,
        job_type: impl Into<JobType>,
        options: JobOptions,
        f: F,
    ) -> Result<Self>
    where
        F: Fn(JobContext, serde_json::Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(job_type, options, f)?;
        Ok(self)
    }

    pub fn store(mut self, store: Arc<dyn JobStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn expect_job_types(mut self, job_types: &[&str]) -> Self {
        self.expected = Some(job_types.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn default_max_attempts(mut self, n: u32) -> Self {
        self.default_max_attempts = n;
        self
    }

    /// Pool-level policy for types registered without one.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn build(self) -> Result<Courier> {
        if let Some(expected) = &self.expected {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.contains(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(CourierError::MissingJobTypes(missing));
            }
        }
        if self.default_max_attempts == 0 {
            return Err(CourierError::InvalidOptions(
                "default_max_attempts must be at least 1".to_string(),
            ));
        }

        let registry = Arc::new(self.registry);
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryJobStore::new()));
        let dispatcher = Dispatcher::new(Arc::clone(&registry), Arc::clone(&store))
            .with_default_max_attempts(self.default_max_attempts);

        tracing::info!(job_types = registry.len(), "courier built");
        Ok(Courier {
            registry,
            store,
            dispatcher,
            retry_policy: self.retry_policy,
            events: self.events,
        })
    }
}

impl Default for CourierBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// ワイヤリング済みの registry + store + dispatcher。プールはここから起動する
#[derive(Clone)]
pub struct Courier {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    dispatcher: Dispatcher,
    retry_policy: Arc<dyn RetryPolicy>,
    events: Arc<dyn EventSink>,
}

impl Courier {
    pub fn builder() -> CourierBuilder {
        CourierBuilder::new()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Start a worker pool sharing this courier's registry, store, policy
    /// and event sink. Must be called inside a tokio runtime.
    pub fn start_pool(&self, config: PoolConfig) -> Result<WorkerPool> {
        WorkerPool::builder(config, Arc::clone(&self.registry), Arc::clone(&self.store))
            .retry_policy(Arc::clone(&self.retry_policy))
            .event_sink(Arc::clone(&self.events))
            .start()
    }
}
