//! FileJobStore - 単一ノード向けの JSON スナップショット永続化
//!
//! # 実装詳細
//! - 状態が変わるたびにテーブル全体を書き出す（temp ファイル → rename）
//! - 書き込みは `spawn_blocking` で blocking pool に逃がす
//! - open 時に `Active` だったジョブは試行の途中で中断されたもの。
//!   `Pending` に戻す（最後の試行だった場合は `Dead`）

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::inmem_store::InMemoryJobStore;
use super::job_table::{JobTable, SNAPSHOT_VERSION, Snapshot};
use crate::domain::{CourierError, JobId, JobRecord, NewJob, QueueCounts, QueueName, Result};
use crate::ports::{ClaimRequest, Clock, JobStore, Release, SystemClock};

fn unavailable(path: &Path, action: &str, err: impl std::fmt::Display) -> CourierError {
    CourierError::StoreUnavailable(format!("{action} {}: {err}", path.display()))
}

fn encode(path: &Path, table: &JobTable) -> Result<Vec<u8>> {
    table.encode().map_err(|e| unavailable(path, "encode", e))
}

#[derive(Debug)]
pub(crate) struct SnapshotFile {
    path: PathBuf,
    /// Revision currently on disk. Older revisions are never written over it.
    written: Mutex<u64>,
}

impl SnapshotFile {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            written: Mutex::new(0),
        }
    }

    pub fn load(&self) -> Result<Option<Snapshot>> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)
                    .map_err(|e| unavailable(&self.path, "decode", e))?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(unavailable(
                        &self.path,
                        "load",
                        format!("unsupported snapshot version {}", snapshot.version),
                    ));
                }
                Ok(Some(snapshot))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(unavailable(&self.path, "read", e)),
        }
    }

    /// Write `bytes` as `revision`. A no-op when a newer revision is
    /// already on disk.
    pub fn write(&self, revision: u64, bytes: &[u8]) -> Result<()> {
        let mut written = self
            .written
            .lock()
            .map_err(|_| unavailable(&self.path, "lock", "poisoned"))?;
        if revision < *written {
            return Ok(());
        }
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, bytes).map_err(|e| unavailable(&tmp, "write", e))?;
        fs::rename(&tmp, &self.path).map_err(|e| unavailable(&self.path, "rename", e))?;
        *written = revision;
        Ok(())
    }

    /// Encode `table` and write it on the blocking pool.
    pub async fn persist(self: &Arc<Self>, revision: u64, table: &JobTable) -> Result<()> {
        let bytes = encode(&self.path, table)?;
        let file = Arc::clone(self);
        tokio::task::spawn_blocking(move || file.write(revision, &bytes))
            .await
            .map_err(|e| unavailable(&self.path, "write", e))?
    }
}

/// FileJobStore は JSON ファイルに永続化されるジョブストア
///
/// # 実装詳細
/// - 振る舞いは `InMemoryJobStore` と同じ。変更は書き込みが終わってから見える
/// - 書き込み失敗は `StoreUnavailable` になり、メモリ上の状態は変わらない
#[derive(Debug, Clone)]
pub struct FileJobStore {
    inner: InMemoryJobStore,
    path: PathBuf,
}

impl FileJobStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| unavailable(parent, "create", e))?;
        }

        let file = SnapshotFile::new(path.clone());
        let table = match file.load()? {
            Some(snapshot) => {
                let (table, recovered) = JobTable::from_snapshot(snapshot, clock.now());
                if recovered > 0 {
                    tracing::warn!(
                        path = %path.display(),
                        recovered,
                        "recovered jobs interrupted mid-attempt"
                    );
                    file.write(0, &encode(&path, &table)?)?;
                }
                table
            }
            None => {
                let table = JobTable::new();
                file.write(0, &encode(&path, &table)?)?;
                table
            }
        };

        tracing::info!(path = %path.display(), "file job store opened");
        Ok(Self {
            inner: InMemoryJobStore::from_table(table, clock, Some(file)),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl JobStore for FileJobStore {
    async fn enqueue(&self, job: NewJob) -> Result<JobId> {
        self.inner.enqueue(job).await
    }

    async fn claim_next(&self, request: &ClaimRequest) -> Result<Option<JobRecord>> {
        self.inner.claim_next(request).await
    }

    async fn acknowledge(&self, id: JobId) -> Result<()> {
        self.inner.acknowledge(id).await
    }

    async fn release(&self, id: JobId, release: Release) -> Result<()> {
        self.inner.release(id, release).await
    }

    async fn get(&self, id: JobId) -> Result<Option<JobRecord>> {
        self.inner.get(id).await
    }

    async fn counts(&self, queue: &QueueName) -> Result<QueueCounts> {
        self.inner.counts(queue).await
    }

    async fn list_dead(&self, queue: &QueueName) -> Result<Vec<JobRecord>> {
        self.inner.list_dead(queue).await
    }

    async fn purge_completed(&self, queue: &QueueName, older_than: Duration) -> Result<usize> {
        self.inner.purge_completed(queue, older_than).await
    }

    async fn requeue_dead(&self, id: JobId) -> Result<()> {
        self.inner.requeue_dead(id).await
    }
}
