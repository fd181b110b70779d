//! JobTable - レコードと ready/scheduled インデックス
//!
//! # 設計
//! - `records` がジョブ状態の正本
//! - `ready`: キューごとの due かつ claim 可能な id（priority 降順, seq 昇順）
//! - `scheduled`: まだ due でないジョブの min-heap（初回 delay / retry backoff）。
//!   pop 時にレコードと照合し、古いエントリはその場で捨てる
//! - `begin` で開いた `Checkpoint` が `commit` までに触れたレコードを覚えておき、
//!   `rollback` はテーブル全体をコピーせずにそれらを戻す

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BinaryHeap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    CourierError, JobId, JobRecord, JobStatus, JobType, NewJob, QueueCounts, QueueName, Result,
    schedule_after,
};
use crate::ports::Release;

pub(crate) const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ReadyKey {
    priority: Reverse<i32>,
    seq: u64,
}

impl ReadyKey {
    fn of(record: &JobRecord) -> Self {
        Self {
            priority: Reverse(record.priority),
            seq: record.seq,
        }
    }
}

/// Heap entry. Reverse ordering so `BinaryHeap` pops the earliest first.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledJob {
    scheduled_for: DateTime<Utc>,
    seq: u64,
    id: JobId,
}

impl PartialOrd for ScheduledJob {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledJob {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .scheduled_for
            .cmp(&self.scheduled_for)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Serialized form of a table. Indexes are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Snapshot {
    pub version: u32,
    pub next_seq: u64,
    pub jobs: Vec<JobRecord>,
}

/// Borrowed twin of `Snapshot`, encoded without cloning records.
#[derive(Serialize)]
struct SnapshotView<'a> {
    version: u32,
    next_seq: u64,
    jobs: Vec<&'a JobRecord>,
}

/// Records as they were before the first change since `begin`.
/// `None` means the record did not exist.
#[derive(Debug, Clone, Default)]
struct Checkpoint {
    next_seq: u64,
    before: HashMap<JobId, Option<JobRecord>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct JobTable {
    records: HashMap<JobId, JobRecord>,
    ready: HashMap<QueueName, BTreeMap<ReadyKey, JobId>>,
    scheduled: BinaryHeap<ScheduledJob>,
    next_seq: u64,
    revision: u64,
    checkpoint: Option<Checkpoint>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a snapshot. Jobs that were `Active` when the snapshot was
    /// written belonged to a process that is gone; they go back to `Pending`,
    /// or to `Dead` if the interrupted claim used their last attempt.
    ///
    /// Returns the table and the number of recovered jobs.
    pub fn from_snapshot(snapshot: Snapshot, now: DateTime<Utc>) -> (Self, usize) {
        let mut table = Self::new();
        let mut recovered = 0;
        let mut max_seq = 0;

        for mut record in snapshot.jobs {
            if record.status == JobStatus::Active {
                record.recover(now);
                recovered += 1;
            }
            max_seq = max_seq.max(record.seq + 1);
            let id = record.id;
            table.records.insert(id, record);
            table.index(id, now);
        }
        table.next_seq = snapshot.next_seq.max(max_seq);
        (table, recovered)
    }

    #[cfg(test)]
    pub fn to_snapshot(&self) -> Snapshot {
        let mut jobs: Vec<JobRecord> = self.records.values().cloned().collect();
        jobs.sort_by_key(|job| job.seq);
        Snapshot {
            version: SNAPSHOT_VERSION,
            next_seq: self.next_seq,
            jobs,
        }
    }

    /// Serialize the current state as a `Snapshot`.
    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(&SnapshotView {
            version: SNAPSHOT_VERSION,
            next_seq: self.next_seq,
            jobs: self.records.values().collect(),
        })
    }

    /// Open a checkpoint and return the revision it will commit as.
    /// An earlier checkpoint left open is discarded.
    pub fn begin(&mut self) -> u64 {
        self.revision += 1;
        self.checkpoint = Some(Checkpoint {
            next_seq: self.next_seq,
            before: HashMap::new(),
        });
        self.revision
    }

    pub fn commit(&mut self) {
        self.checkpoint = None;
    }

    /// Undo every change since `begin`.
    pub fn rollback(&mut self) {
        let Some(checkpoint) = self.checkpoint.take() else {
            return;
        };
        self.next_seq = checkpoint.next_seq;
        for (id, before) in checkpoint.before {
            if let Some(current) = self.records.remove(&id)
                && let Some(ready) = self.ready.get_mut(&current.queue)
            {
                ready.remove(&ReadyKey::of(&current));
            }
            let Some(record) = before else {
                continue;
            };
            // due になれば promote_due が `ready` に戻す
            if record.status.is_claimable() {
                self.scheduled.push(ScheduledJob {
                    scheduled_for: record.scheduled_for,
                    seq: record.seq,
                    id,
                });
            }
            self.records.insert(id, record);
        }
    }

    /// Remember `id` as it is now, once per checkpoint.
    fn touch(&mut self, id: JobId) {
        if let Some(checkpoint) = self.checkpoint.as_mut() {
            let records = &self.records;
            checkpoint
                .before
                .entry(id)
                .or_insert_with(|| records.get(&id).cloned());
        }
    }

    pub fn insert(&mut self, id: JobId, job: NewJob, now: DateTime<Utc>) -> JobId {
        self.touch(id);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.insert(id, JobRecord::new(id, job, seq, now));
        self.index(id, now);
        id
    }

    /// Put a claimable record into `ready` (due) or `scheduled` (not yet due).
    fn index(&mut self, id: JobId, now: DateTime<Utc>) {
        self.touch(id);
        let Some(record) = self.records.get_mut(&id) else {
            return;
        };
        if !record.status.is_claimable() {
            return;
        }
        if record.is_due(now) {
            if record.status == JobStatus::Failed {
                record.requeue(now);
            }
            self.ready
                .entry(record.queue.clone())
                .or_default()
                .insert(ReadyKey::of(record), id);
        } else {
            self.scheduled.push(ScheduledJob {
                scheduled_for: record.scheduled_for,
                seq: record.seq,
                id,
            });
        }
    }

    /// Move jobs whose time has come from `scheduled` to `ready`.
    pub fn promote_due(&mut self, now: DateTime<Utc>) {
        while let Some(top) = self.scheduled.peek() {
            if top.scheduled_for > now {
                break; // heap is sorted
            }
            let Some(entry) = self.scheduled.pop() else {
                break;
            };
            self.touch(entry.id);
            let Some(record) = self.records.get_mut(&entry.id) else {
                continue;
            };
            if !record.status.is_claimable() || record.scheduled_for != entry.scheduled_for {
                continue; // stale entry
            }
            if record.status == JobStatus::Failed {
                record.requeue(now);
            }
            self.ready
                .entry(record.queue.clone())
                .or_default()
                .insert(ReadyKey::of(record), entry.id);
        }
    }

    /// Claim the first eligible job of `queue` whose type is not excluded.
    /// A job whose attempt budget is already spent is dead-lettered instead.
    pub fn claim(
        &mut self,
        queue: &QueueName,
        exclude: &[JobType],
        now: DateTime<Utc>,
    ) -> Option<JobRecord> {
        self.promote_due(now);

        loop {
            let ready = self.ready.get_mut(queue)?;
            let records = &self.records;
            let key = ready
                .iter()
                .find(|(_, id)| {
                    records.get(id).is_some_and(|record| {
                        record.status.is_claimable() && !exclude.contains(&record.job_type)
                    })
                })
                .map(|(key, _)| *key)?;
            let id = ready.remove(&key)?;

            self.touch(id);
            let record = self.records.get_mut(&id)?;
            if record.attempts_exhausted() {
                record.mark_dead("attempts exhausted".to_string(), now);
                continue;
            }
            record.start_attempt(now);
            return Some(record.clone());
        }
    }

    fn active_mut(&mut self, id: JobId) -> Result<&mut JobRecord> {
        self.touch(id);
        let record = self
            .records
            .get_mut(&id)
            .ok_or(CourierError::JobNotFound(id))?;
        if record.status != JobStatus::Active {
            return Err(CourierError::InvalidTransition {
                id,
                status: record.status,
            });
        }
        Ok(record)
    }

    pub fn acknowledge(&mut self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        self.active_mut(id)?.mark_completed(now);
        Ok(())
    }

    pub fn release(&mut self, id: JobId, release: Release, now: DateTime<Utc>) -> Result<()> {
        match release {
            Release::Retry { delay, error } => {
                self.active_mut(id)?
                    .schedule_retry(schedule_after(now, delay), error, now);
                self.index(id, now);
            }
            Release::Dead { error } => {
                self.active_mut(id)?.mark_dead(error, now);
            }
        }
        Ok(())
    }

    pub fn requeue_dead(&mut self, id: JobId, now: DateTime<Utc>) -> Result<()> {
        self.touch(id);
        let record = self
            .records
            .get_mut(&id)
            .ok_or(CourierError::JobNotFound(id))?;
        if record.status != JobStatus::Dead {
            return Err(CourierError::InvalidTransition {
                id,
                status: record.status,
            });
        }
        record.revive(now);
        self.index(id, now);
        Ok(())
    }

    /// Drop completed jobs of `queue` last updated at or before `cutoff`.
    pub fn purge_completed(&mut self, queue: &QueueName, cutoff: DateTime<Utc>) -> usize {
        let expired: Vec<JobId> = self
            .records
            .values()
            .filter(|r| {
                &r.queue == queue && r.status == JobStatus::Completed && r.updated_at <= cutoff
            })
            .map(|r| r.id)
            .collect();
        for id in &expired {
            self.touch(*id);
            self.records.remove(id);
        }
        expired.len()
    }

    pub fn get(&self, id: JobId) -> Option<&JobRecord> {
        self.records.get(&id)
    }

    pub fn counts(&self, queue: &QueueName) -> QueueCounts {
        let mut counts = QueueCounts::default();
        for record in self.records.values().filter(|r| &r.queue == queue) {
            counts.record(record.status);
        }
        counts
    }

    pub fn list_dead(&self, queue: &QueueName) -> Vec<JobRecord> {
        let mut dead: Vec<JobRecord> = self
            .records
            .values()
            .filter(|r| &r.queue == queue && r.status == JobStatus::Dead)
            .cloned()
            .collect();
        dead.sort_by_key(|r| r.seq);
        dead
    }

    /// Earliest `scheduled_for` among not-yet-due jobs.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.scheduled.peek().map(|entry| entry.scheduled_for)
    }
}
