//! WorkerPool - 1 キュー分の claim と上限付き実行
//!
//! # フロー
//! 1. Scheduler がプールのスロット（semaphore permit）を取得。空きが無ければ claim しない
//! 2. 型ごとのスロットが埋まっている型を除外して次のジョブを claim
//!    - 除外中の型のスロットが空くと `slot_freed` で待機を打ち切り、除外リストを作り直す
//! 3. 試行を `JoinSet` に spawn。permit は試行と一緒に移動する
//! 4. 成功 -> `acknowledge`、失敗 -> retry policy -> `release`
//!    - store が `StoreUnavailable` の間は backoff しながら settle を再試行
//!
//! `stop()` は claim を止め、grace period まで実行中の試行を待ち、
//! 残ったものは detach してレポートする。

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::{JoinHandle, JoinSet};

use super::retention_loop::RetentionLoop;
use super::status::{PoolStatus, ShutdownReport};
use crate::domain::{
    CourierError, ExponentialBackoff, HandlerError, JobEvent, JobId, JobRecord, JobType,
    QueueName, Result, RetryDecision, RetryPolicy,
};
use crate::impls::NoopEventSink;
use crate::ports::{ClaimRequest, EventSink, JobStore, Release};
use crate::typed::{JobContext, JobRegistry, RegistryEntry};

/// Ceiling for the pause between settle retries.
const MAX_SETTLE_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub queue: QueueName,
    /// Hard ceiling on attempts executing at once.
    pub concurrency: usize,
    /// Upper bound on one blocking claim; also bounds shutdown latency.
    pub poll_interval: Duration,
    pub shutdown_grace: Duration,
    /// Pause after the store reports `StoreUnavailable`.
    pub store_backoff: Duration,
    /// Completed jobs older than this are purged. `None` keeps them.
    pub completed_retention: Option<Duration>,
    pub retention_sweep: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            queue: QueueName::default(),
            concurrency: 10,
            poll_interval: Duration::from_millis(250),
            shutdown_grace: Duration::from_secs(30),
            store_backoff: Duration::from_secs(1),
            completed_retention: None,
            retention_sweep: Duration::from_secs(60),
        }
    }
}

impl PoolConfig {
    pub fn new(queue: impl Into<QueueName>, concurrency: usize) -> Self {
        Self {
            queue: queue.into(),
            concurrency,
            ..Self::default()
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn store_backoff(mut self, backoff: Duration) -> Self {
        self.store_backoff = backoff;
        self
    }

    pub fn completed_retention(mut self, keep_for: Duration) -> Self {
        self.completed_retention = Some(keep_for);
        self
    }

    pub fn retention_sweep(mut self, interval: Duration) -> Self {
        self.retention_sweep = interval;
        self
    }
}

pub struct WorkerPoolBuilder {
    config: PoolConfig,
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    retry_policy: Arc<dyn RetryPolicy>,
    events: Arc<dyn EventSink>,
}

impl WorkerPoolBuilder {
    /// Policy for job types registered without one.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Spawn the scheduler. Must be called inside a tokio runtime.
    pub fn start(self) -> Result<WorkerPool> {
        if self.config.concurrency == 0 {
            return Err(CourierError::InvalidOptions(
                "pool concurrency must be at least 1".to_string(),
            ));
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (abandon_tx, abandon_rx) = watch::channel(false);
        let running = Arc::new(AtomicUsize::new(0));
        let type_slots = self
            .registry
            .entries_for_queue(&self.config.queue)
            .into_iter()
            .map(|entry| {
                let limit = entry.options().concurrency;
                (entry.job_type().clone(), Arc::new(Semaphore::new(limit)))
            })
            .collect();

        let retention = self.config.completed_retention.map(|keep_for| {
            tokio::spawn(
                RetentionLoop {
                    store: Arc::clone(&self.store),
                    queue: self.config.queue.clone(),
                    keep_for,
                    sweep_interval: self.config.retention_sweep,
                    shutdown: shutdown_rx.clone(),
                }
                .run(),
            )
        });

        let scheduler = Scheduler {
            config: self.config.clone(),
            slots: Arc::new(Semaphore::new(self.config.concurrency)),
            type_slots,
            slot_freed: Arc::new(Notify::new()),
            shutdown: shutdown_rx,
            running: Arc::clone(&running),
            worker: Worker {
                registry: self.registry,
                store: self.store,
                retry_policy: self.retry_policy,
                events: self.events,
                settle_backoff: self.config.store_backoff,
                abandoned: abandon_rx,
            },
            abandon: abandon_tx,
        };

        tracing::info!(
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            "worker pool started"
        );
        Ok(WorkerPool {
            config: self.config,
            shutdown_tx,
            running,
            scheduler: tokio::spawn(scheduler.run()),
            retention,
        })
    }
}

/// 実行中プールのハンドル
pub struct WorkerPool {
    config: PoolConfig,
    shutdown_tx: watch::Sender<bool>,
    running: Arc<AtomicUsize>,
    scheduler: JoinHandle<ShutdownReport>,
    retention: Option<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn builder(
        config: PoolConfig,
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
    ) -> WorkerPoolBuilder {
        WorkerPoolBuilder {
            config,
            registry,
            store,
            retry_policy: Arc::new(ExponentialBackoff::default()),
            events: Arc::new(NoopEventSink),
        }
    }

    /// Start a pool on `queue` with default settings otherwise.
    pub fn start(
        queue: impl Into<QueueName>,
        registry: Arc<JobRegistry>,
        store: Arc<dyn JobStore>,
        concurrency: usize,
    ) -> Result<Self> {
        Self::builder(PoolConfig::new(queue, concurrency), registry, store).start()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            queue: self.config.queue.clone(),
            concurrency: self.config.concurrency,
            running: self.running.load(Ordering::SeqCst),
            shutting_down: *self.shutdown_tx.borrow(),
        }
    }

    /// Stop claiming new jobs. Does not wait.
    pub fn request_shutdown(&self) {
        // receiver が無い = scheduler は既に終了済み
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop claiming, wait for in-flight attempts up to the grace period.
    pub async fn stop(self) -> ShutdownReport {
        self.request_shutdown();
        if let Some(retention) = self.retention
            && let Err(err) = retention.await
        {
            tracing::error!(queue = %self.config.queue, error = %err, "retention task failed");
        }
        match self.scheduler.await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(queue = %self.config.queue, error = %err, "scheduler task failed");
                ShutdownReport {
                    clean: false,
                    in_flight: self.running.load(Ordering::SeqCst),
                }
            }
        }
    }
}

struct Scheduler {
    config: PoolConfig,
    slots: Arc<Semaphore>,
    type_slots: HashMap<JobType, Arc<Semaphore>>,
    /// Fired whenever a per-type slot is returned.
    slot_freed: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    running: Arc<AtomicUsize>,
    worker: Worker,
    /// Set once the grace period ran out; settle retries stop.
    abandon: watch::Sender<bool>,
}

impl Scheduler {
    async fn run(mut self) -> ShutdownReport {
        let mut in_flight: JoinSet<()> = JoinSet::new();

        loop {
            if *self.shutdown.borrow() {
                break;
            }
            while let Some(joined) = in_flight.try_join_next() {
                log_join_error(joined);
            }

            let permit = tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                permit = Arc::clone(&self.slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            // shutdown とは競わせない: 完了した claim は必ず実行する。
            // blocking wait は poll_interval が上限で、除外中の型にスロットが
            // 戻れば打ち切られる。
            let request = ClaimRequest::blocking(self.config.queue.clone(), self.config.poll_interval)
                .excluding(self.saturated_types())
                .interrupted_by(Arc::clone(&self.slot_freed));
            let record = match self.worker.store.claim_next(&request).await {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(err) => {
                    drop(permit);
                    tracing::warn!(
                        queue = %self.config.queue,
                        error = %err,
                        backoff_ms = self.config.store_backoff.as_millis() as u64,
                        "claim failed, backing off"
                    );
                    self.backoff().await;
                    continue;
                }
            };

            let type_slot = match self.type_slots.get(&record.job_type) {
                Some(slots) => Arc::clone(slots)
                    .acquire_owned()
                    .await
                    .ok()
                    .map(|permit| TypeSlot::new(permit, Arc::clone(&self.slot_freed))),
                None => None,
            };

            let worker = self.worker.clone();
            let guard = RunningGuard::new(Arc::clone(&self.running));
            in_flight.spawn(async move {
                let _permits: (OwnedSemaphorePermit, Option<TypeSlot>, RunningGuard) =
                    (permit, type_slot, guard);
                worker.execute(record).await;
            });
        }

        self.drain(in_flight).await
    }

    /// Types whose per-type slots are all taken.
    fn saturated_types(&self) -> Vec<JobType> {
        self.type_slots
            .iter()
            .filter(|(_, slots)| slots.available_permits() == 0)
            .map(|(job_type, _)| job_type.clone())
            .collect()
    }

    async fn backoff(&mut self) {
        tokio::select! {
            _ = self.shutdown.changed() => {}
            _ = tokio::time::sleep(self.config.store_backoff) => {}
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) -> ShutdownReport {
        let queue = &self.config.queue;
        let pending = in_flight.len();
        if pending > 0 {
            tracing::info!(%queue, in_flight = pending, "waiting for in-flight jobs");
        }

        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = in_flight.join_next().await {
                log_join_error(joined);
            }
        })
        .await;

        match drained {
            Ok(()) => {
                tracing::info!(%queue, "worker pool stopped cleanly");
                ShutdownReport {
                    clean: true,
                    in_flight: 0,
                }
            }
            Err(_) => {
                let remaining = in_flight.len();
                tracing::warn!(
                    %queue,
                    in_flight = remaining,
                    grace_ms = self.config.shutdown_grace.as_millis() as u64,
                    "grace period elapsed, detaching running handlers"
                );
                let _ = self.abandon.send(true);
                in_flight.detach_all();
                ShutdownReport {
                    clean: false,
                    in_flight: remaining,
                }
            }
        }
    }
}

fn log_join_error(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(err) = joined {
        tracing::error!(error = %err, "worker slot task failed");
    }
}

/// A per-type slot. Returning it wakes the scheduler, which may be waiting
/// with this type excluded.
struct TypeSlot {
    permit: Option<OwnedSemaphorePermit>,
    freed: Arc<Notify>,
}

impl TypeSlot {
    fn new(permit: OwnedSemaphorePermit, freed: Arc<Notify>) -> Self {
        Self {
            permit: Some(permit),
            freed,
        }
    }
}

impl Drop for TypeSlot {
    fn drop(&mut self) {
        // 通知より先に permit を返す（起きた scheduler から空きが見えるように）
        drop(self.permit.take());
        self.freed.notify_one();
    }
}

/// Counts an attempt as running for as long as it lives.
struct RunningGuard(Arc<AtomicUsize>);

impl RunningGuard {
    fn new(running: Arc<AtomicUsize>) -> Self {
        running.fetch_add(1, Ordering::SeqCst);
        Self(running)
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// 1 回の試行を実行し、結果を store に確定させる
#[derive(Clone)]
struct Worker {
    registry: Arc<JobRegistry>,
    store: Arc<dyn JobStore>,
    retry_policy: Arc<dyn RetryPolicy>,
    events: Arc<dyn EventSink>,
    settle_backoff: Duration,
    abandoned: watch::Receiver<bool>,
}

impl Worker {
    async fn execute(&self, record: JobRecord) {
        let id = record.id;
        let job_type = record.job_type.clone();
        tracing::debug!(%id, %job_type, attempt = record.attempts, "job claimed");
        self.events.emit(JobEvent::Claimed {
            id,
            job_type: job_type.clone(),
            attempt: record.attempts,
        });

        let Some(entry) = self.registry.get(job_type.as_str()) else {
            tracing::error!(%id, %job_type, "no handler registered for job type");
            self.dead_letter(&record, "unknown job type".to_string()).await;
            return;
        };

        match run_handler(&entry, &record).await {
            Ok(()) => self.complete(&record).await,
            Err(error) => self.fail(&record, &entry, error).await,
        }
    }

    async fn complete(&self, record: &JobRecord) {
        let id = record.id;
        if self.settle(id, "acknowledge", || self.store.acknowledge(id)).await {
            tracing::debug!(%id, job_type = %record.job_type, attempts = record.attempts, "job completed");
            self.events.emit(JobEvent::Completed {
                id,
                job_type: record.job_type.clone(),
                attempts: record.attempts,
            });
        }
    }

    async fn fail(&self, record: &JobRecord, entry: &RegistryEntry, error: HandlerError) {
        let policy = entry
            .options()
            .retry_policy
            .as_ref()
            .unwrap_or(&self.retry_policy);
        let decision = match policy.on_failure(record, &error) {
            // policy が何を返しても試行回数の上限は超えない
            RetryDecision::Retry { .. } if record.attempts_exhausted() => RetryDecision::DeadLetter {
                reason: format!(
                    "max attempts reached: {}/{}",
                    record.attempts, record.max_attempts
                ),
            },
            decision => decision,
        };

        let id = record.id;
        let message = error.message().to_string();
        match decision {
            RetryDecision::Retry { delay } => {
                let release = Release::Retry {
                    delay,
                    error: message.clone(),
                };
                if self
                    .settle(id, "release", || self.store.release(id, release.clone()))
                    .await
                {
                    tracing::warn!(
                        %id,
                        job_type = %record.job_type,
                        attempt = record.attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "job failed, retry scheduled"
                    );
                    self.events.emit(JobEvent::RetryScheduled {
                        id,
                        job_type: record.job_type.clone(),
                        attempt: record.attempts,
                        delay,
                        error: message,
                    });
                }
            }
            RetryDecision::DeadLetter { reason } => {
                tracing::debug!(%id, %reason, "retry policy gave up");
                self.dead_letter(record, message).await;
            }
        }
    }

    async fn dead_letter(&self, record: &JobRecord, error: String) {
        let id = record.id;
        let release = Release::Dead {
            error: error.clone(),
        };
        if self
            .settle(id, "dead-letter", || self.store.release(id, release.clone()))
            .await
        {
            tracing::error!(
                %id,
                job_type = %record.job_type,
                attempts = record.attempts,
                %error,
                "job dead-lettered"
            );
            self.events.emit(JobEvent::DeadLettered {
                id,
                job_type: record.job_type.clone(),
                attempts: record.attempts,
                error,
            });
        }
    }

    /// Run a store transition, retrying while the store is unavailable.
    /// The pause doubles up to `MAX_SETTLE_BACKOFF`. Retries go on until the
    /// transition goes through, the store rejects it, or the pool's grace
    /// period has run out. Returns whether it went through.
    async fn settle<F, Fut>(&self, id: JobId, action: &str, mut op: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut abandoned = self.abandoned.clone();
        let mut backoff = self.settle_backoff;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(()) => return true,
                Err(err @ CourierError::StoreUnavailable(_)) => {
                    tracing::warn!(
                        %id,
                        action,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %err,
                        "store unavailable"
                    );
                }
                Err(err) => {
                    tracing::error!(%id, action, error = %err, "store rejected transition");
                    return false;
                }
            }

            let mut stopped = *abandoned.borrow();
            if !stopped {
                let closed = tokio::select! {
                    _ = tokio::time::sleep(backoff) => false,
                    changed = abandoned.changed() => changed.is_err(),
                };
                stopped = closed || *abandoned.borrow();
            }
            if stopped {
                tracing::error!(%id, action, attempt, "pool stopped; job left active in the store");
                return false;
            }
            backoff = (backoff * 2).min(MAX_SETTLE_BACKOFF);
        }
    }
}

/// Run the handler on its own task so a panic stays inside this attempt.
async fn run_handler(
    entry: &RegistryEntry,
    record: &JobRecord,
) -> std::result::Result<(), HandlerError> {
    let handler = entry.handler();
    let ctx = JobContext::from_record(record);
    let payload = record.payload.clone();
    let mut task = tokio::spawn(async move { handler.handle_dyn(ctx, payload).await });

    let joined = match entry.options().timeout {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined,
            Err(_) => {
                task.abort();
                return Err(HandlerError::new(format!(
                    "handler timed out after {}ms",
                    limit.as_millis()
                )));
            }
        },
        None => task.await,
    };

    match joined {
        Ok(result) => result,
        Err(err) if err.is_panic() => Err(HandlerError::new(format!(
            "handler panicked: {}",
            panic_message(err.into_panic())
        ))),
        Err(err) => Err(HandlerError::new(format!("handler task cancelled: {err}"))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
