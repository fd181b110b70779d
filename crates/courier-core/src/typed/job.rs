//! Job trait - ジョブ型名と payload 型を結びつける
//!
//! # 学習ポイント
//! - 関連定数 (`const TYPE`) による型名の固定
//! - Trait bounds
//!   - `Serialize` / `DeserializeOwned`: payload は JSON として store を通る
//!   - `Send + Sync + 'static`: handler は spawn されたタスクで動く

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{JobId, JobRecord, JobType};

/// Job は型付きジョブ
///
/// # 使用例
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct SendEmail {
///     to: String,
/// }
///
/// impl Job for SendEmail {
///     const TYPE: &'static str = "send-email";
/// }
/// ```
pub trait Job: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: &'static str;
}

/// 実行中の試行について handler が知っていること
#[derive(Debug, Clone, PartialEq)]
pub struct JobContext {
    pub id: JobId,
    pub job_type: JobType,
    /// 1-based.
    pub attempt: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl JobContext {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            id: record.id,
            job_type: record.job_type.clone(),
            attempt: record.attempts,
            max_attempts: record.max_attempts,
            enqueued_at: record.enqueued_at,
        }
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
