//! Names - ジョブ型とキューの名前
//!
//! ジョブ型名は自由形式（`"send-email"`, `"processWebhookJob"`）。
//! 名前が有効かどうかを決めるのは registry だけ。

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Name of a job type. Key of the job registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobType(String);

impl JobType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for JobType {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&JobType> for JobType {
    fn from(name: &JobType) -> Self {
        name.clone()
    }
}

impl Borrow<str> for JobType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of a queue: the category a job is held in until a worker pool claims it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueueName(String);

impl QueueName {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self::new(Self::DEFAULT)
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for QueueName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for QueueName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl From<&QueueName> for QueueName {
    fn from(name: &QueueName) -> Self {
        name.clone()
    }
}
