//! Decision - 失敗した試行の後でジョブをどうするか
//!
//! `RetryPolicy` はジョブレコードとエラーだけから決まる純粋関数。
//! 決定を store に適用するのはワーカープール。

use std::fmt;
use std::time::Duration;

use super::errors::HandlerError;
use super::job::JobRecord;

/// The next action for a job whose attempt failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Return the job to the queue, invisible for `delay`.
    Retry { delay: Duration },

    /// Give up. The job is dead-lettered.
    DeadLetter { reason: String },
}

/// Decides between retry and dead-letter.
///
/// Registered per job type (or as the pool default). Implementations must not
/// have side effects; the pool performs the release.
pub trait RetryPolicy: fmt::Debug + Send + Sync {
    fn on_failure(&self, job: &JobRecord, error: &HandlerError) -> RetryDecision;
}

/// Default policy: exponential backoff, dead-letter once attempts reach
/// `max_attempts`. Every error is retried the same way regardless of its kind.
#[derive(Debug, Clone, PartialEq)]
pub struct ExponentialBackoff {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl ExponentialBackoff {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
        }
    }

    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    ///
    /// With base=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ExponentialBackoff {
    /// 2s base, doubling, capped at one day.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 2.0, Duration::from_secs(86_400))
    }
}

impl RetryPolicy for ExponentialBackoff {
    fn on_failure(&self, job: &JobRecord, _error: &HandlerError) -> RetryDecision {
        if job.attempts_exhausted() {
            RetryDecision::DeadLetter {
                reason: format!("max attempts reached: {}/{}", job.attempts, job.max_attempts),
            }
        } else {
            RetryDecision::Retry {
                delay: self.next_delay(job.attempts),
            }
        }
    }
}
