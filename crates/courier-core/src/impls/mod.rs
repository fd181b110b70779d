//! Impls - ports の実装
//!
//! - **InMemoryJobStore**: プロセス内 store（テスト用、再起動でジョブを失ってよい環境用）
//! - **FileJobStore**: 同じ store を JSON スナップショットで永続化
//! - **NoopEventSink** / **TracingEventSink**: ライフサイクルイベントの出力先

pub mod event_sink;
pub mod file_store;
pub mod inmem_store;
mod job_table;

pub use self::event_sink::{NoopEventSink, TracingEventSink};
pub use self::file_store::FileJobStore;
pub use self::inmem_store::InMemoryJobStore;
