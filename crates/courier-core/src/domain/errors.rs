//! Errors - エラー型と分類
//!
//! 2 系統:
//! - `CourierError`: インフラ障害と API の誤用。register / submit / claim
//!   の呼び出し元に同期的に返る
//! - `HandlerError`: ジョブのロジックが返すもの。ワーカープールが受け取り
//!   retry か dead-letter に変換する。submit した側には見えない

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ids::JobId;
use super::job::JobStatus;
use super::job_type::JobType;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("unknown job type: {0}")]
    UnknownJobType(JobType),

    #[error("job type already registered: {0}")]
    DuplicateRegistration(JobType),

    #[error("job store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("invalid transition for {id}: job is {status:?}")]
    InvalidTransition { id: JobId, status: JobStatus },

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("missing job types: {0:?}. These job types were expected but not registered.")]
    MissingJobTypes(Vec<String>),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<envy::Error> for CourierError {
    fn from(err: envy::Error) -> Self {
        CourierError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CourierError>;

/// Classification a handler may attach to its error.
///
/// The default retry policy treats both kinds the same; the distinction only
/// matters to custom policies that choose to look at it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    #[default]
    Transient,
    Permanent,
}

/// Error returned by job logic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct HandlerError {
    kind: ErrorKind,
    message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A payload that does not decode will not decode on the next attempt either.
impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::permanent(format!("json decode: {err}"))
    }
}
