//! Domain - ドメインモデル（ids, names, job records, retry decisions, events, errors）
//!
//! ここでは IO を行わない。`JobRecord` に定義された遷移を動かすのは
//! store とワーカープール。

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod job;
pub mod job_type;

pub use self::decision::{ExponentialBackoff, RetryDecision, RetryPolicy};
pub use self::errors::{CourierError, ErrorKind, HandlerError, Result};
pub use self::events::JobEvent;
pub use self::ids::JobId;
pub use self::job::{EnqueueOptions, JobRecord, JobStatus, NewJob, QueueCounts, schedule_after};
pub use self::job_type::{JobType, QueueName};
