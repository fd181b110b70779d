//! Status - ワーカープールのステータス

use serde::Serialize;

use crate::domain::QueueName;

/// 実行中プールのスナップショット
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub queue: QueueName,
    pub concurrency: usize,
    /// Attempts executing right now. Never above `concurrency`.
    pub running: usize,
    pub shutting_down: bool,
}

impl PoolStatus {
    pub fn idle_slots(&self) -> usize {
        self.concurrency.saturating_sub(self.running)
    }
}

/// `WorkerPool::stop` の結果
///
/// `clean == false` は grace period 切れの時点で handler が実行中だったことを示す。
/// それらは kill されず detach され、`in_flight` がその数。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub clean: bool,
    pub in_flight: usize,
}
