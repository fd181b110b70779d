//! EventSink port - ジョブのライフサイクルイベントの出力先
//!
//! 実装: `NoopEventSink`, `TracingEventSink`（`impls` 参照）

use crate::domain::JobEvent;

/// Called inline by worker slots; implementations must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}
