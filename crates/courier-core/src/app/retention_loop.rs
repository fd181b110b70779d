//! RetentionLoop - 完了済みジョブの定期削除
//!
//! # フロー
//! 1. `sweep_interval` ごとに起床
//! 2. `JobStore::purge_completed()` で `keep_for` より古い completed を削除
//! 3. shutdown で終了
//!
//! dead は削除しない（`list_dead` / `requeue_dead` の対象として残す）。

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::domain::QueueName;
use crate::ports::JobStore;

pub(crate) struct RetentionLoop {
    pub store: Arc<dyn JobStore>,
    pub queue: QueueName,
    pub keep_for: Duration,
    pub sweep_interval: Duration,
    pub shutdown: watch::Receiver<bool>,
}

impl RetentionLoop {
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
        tracing::debug!(queue = %self.queue, "retention loop stopped");
    }

    async fn sweep(&self) {
        match self.store.purge_completed(&self.queue, self.keep_for).await {
            Ok(0) => {}
            Ok(purged) => tracing::info!(queue = %self.queue, purged, "completed jobs purged"),
            // 次の tick で再試行
            Err(err) => tracing::warn!(queue = %self.queue, error = %err, "purge failed"),
        }
    }
}
