//! IdGenerator port - ID 生成

use ulid::Ulid;

use crate::domain::JobId;
use crate::ports::Clock;

/// Generates job ids.
///
/// `Send + Sync`: shared by every task that enqueues into a store.
pub trait IdGenerator: Send + Sync {
    fn generate_job_id(&self) -> JobId;
}

/// ULID generator driven by a `Clock`.
///
/// The timestamp part comes from the clock, so with a `FixedClock` the ids
/// are still unique (random part) but carry a deterministic timestamp.
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_job_id(&self) -> JobId {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        JobId::from(ulid)
    }
}
