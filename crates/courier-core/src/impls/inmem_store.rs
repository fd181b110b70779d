//! InMemoryJobStore - プロセス内のキューストレージ
//!
//! # 学習ポイント
//! - 1 つの `tokio::sync::Mutex` で全状態を守り、claim をアトミックにする
//! - `Notify` による blocking claim（`enable()` で通知の取りこぼしを防ぐ）
//! - request 側の interrupt で待機を打ち切る

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use super::file_store::SnapshotFile;
use super::job_table::JobTable;
use crate::domain::{JobId, JobRecord, NewJob, QueueCounts, QueueName, Result};
use crate::ports::{
    ClaimRequest, ClaimWait, Clock, IdGenerator, JobStore, Release, SystemClock, UlidGenerator,
};

#[derive(Clone)]
pub struct InMemoryJobStore {
    state: Arc<Mutex<JobTable>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    ids: Arc<UlidGenerator<Arc<dyn Clock>>>,
    snapshot: Option<Arc<SnapshotFile>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Eligibility is judged by `clock`; pass a `FixedClock` to control it.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::from_table(JobTable::new(), clock, None)
    }

    pub(crate) fn from_table(
        table: JobTable,
        clock: Arc<dyn Clock>,
        snapshot: Option<SnapshotFile>,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(table)),
            notify: Arc::new(Notify::new()),
            ids: Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            clock,
            snapshot: snapshot.map(Arc::new),
        }
    }

    /// Wake every parked `claim_next`.
    ///
    /// Needed after changes made outside the store's own operations, such
    /// as advancing a `FixedClock`.
    pub fn wake_waiters(&self) {
        self.notify.notify_waiters();
    }

    /// Run `op` against the table.
    ///
    /// With a snapshot file attached the change is journaled, written out,
    /// and only then committed. A failed write rolls the table back.
    async fn apply<R>(
        &self,
        table: &mut JobTable,
        op: impl FnOnce(&mut JobTable) -> Result<R>,
        changed: impl FnOnce(&R) -> bool,
    ) -> Result<R> {
        let Some(snapshot) = &self.snapshot else {
            return op(table);
        };
        let revision = table.begin();
        let out = match op(table) {
            Ok(out) => out,
            Err(err) => {
                table.rollback();
                return Err(err);
            }
        };
        if changed(&out)
            && let Err(err) = snapshot.persist(revision, table).await
        {
            table.rollback();
            return Err(err);
        }
        table.commit();
        Ok(out)
    }

    async fn try_claim(&self, request: &ClaimRequest) -> Result<Option<JobRecord>> {
        let now = self.clock.now();
        let mut table = self.state.lock().await;
        self.apply(
            &mut table,
            |t| Ok(t.claim(&request.queue, &request.exclude_types, now)),
            Option::is_some,
        )
        .await
    }

    async fn next_due(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.next_due()
    }
}

async fn interrupted(signal: Option<&Notify>) {
    match signal {
        Some(signal) => signal.notified().await,
        None => std::future::pending().await,
    }
}

impl Default for InMemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryJobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryJobStore")
            .field("persistent", &self.snapshot.is_some())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        let id = self.ids.generate_job_id();
        let now = self.clock.now();
        let job_type = job.job_type.clone();
        {
            let mut table = self.state.lock().await;
            self.apply(&mut table, |t| Ok(t.insert(id, job, now)), |_| true)
                .await?;
        }
        self.notify.notify_waiters();
        tracing::debug!(%id, %job_type, "job enqueued");
        Ok(id)
    }

    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<JobRecord>> {
        let timeout = match request.wait {
            ClaimWait::Poll => return self.try_claim(request).await,
            ClaimWait::Block(timeout) => timeout,
        };
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400));

        loop {
            // 確認より先に登録しておく（確認と await の間の notify を取りこぼさない）
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_claim(request).await? {
                return Ok(Some(record));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }

            // 通知が無くても、最も早い scheduled ジョブの時刻には起きる
            let mut wake_at = deadline;
            if let Some(due) = self.next_due().await {
                let wait = (due - self.clock.now()).to_std().unwrap_or_default();
                if let Some(at) = Instant::now().checked_add(wait) {
                    wake_at = wake_at.min(at);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = interrupted(request.interrupt.as_deref()) => return Ok(None),
            }
        }
    }

    async fn acknowledge(&self, id: JobId) -> Result<()> {
        let now = self.clock.now();
        {
            let mut table = self.state.lock().await;
            self.apply(&mut table, |t| t.acknowledge(id, now), |_| true)
                .await?;
        }
        tracing::debug!(%id, "job acknowledged");
        Ok(())
    }

    async fn release(&self, id: JobId, release: Release) -> Result<()> {
        let now = self.clock.now();
        {
            let mut table = self.state.lock().await;
            self.apply(&mut table, |t| t.release(id, release, now), |_| true)
                .await?;
        }
        self.notify.notify_waiters();
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        Ok(self.state.lock().await.get(id).cloned())
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts> {
        Ok(self.state.lock().await.counts(queue))
    }

    async fn list_dead(&self, queue: &QueueName) -> Result<Vec<JobRecord>> {
        Ok(self.state.lock().await.list_dead(queue))
    }

    async fn purge_completed(&self, queue: &QueueName, older_than: Duration) -> Result<usize> {
        let cutoff = TimeDelta::from_std(older_than)
            .ok()
            .and_then(|age| self.clock.now().checked_sub_signed(age))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let purged = {
            let mut table = self.state.lock().await;
            self.apply(&mut table, |t| Ok(t.purge_completed(queue, cutoff)), |n| *n > 0)
                .await?
        };
        if purged > 0 {
            tracing::debug!(%queue, purged, "completed jobs purged");
        }
        Ok(purged)
    }

    async fn requeue_dead(&self, id: JobId) -> Result<()> {
        let now = self.clock.now();
        {
            let mut table = self.state.lock().await;
            self.apply(&mut table, |t| t.requeue_dead(id, now), |_| true)
                .await?;
        }
        self.notify.notify_waiters();
        tracing::info!(%id, "dead job requeued");
        Ok(())
    }
}
