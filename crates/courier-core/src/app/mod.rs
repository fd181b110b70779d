//! App - ports の上に載るアプリケーション層
//!
//! # コンポーネント
//! - **CourierBuilder / Courier**: ワイヤリングと起動時検証
//! - **Dispatcher**: ジョブ投入
//! - **WorkerPool**: claim ループと上限付き実行
//! - **RetentionLoop**: 完了済みジョブの定期削除
//! - **AuthGate**: 認証済みセッションでのみアクションを実行
//! - **status**: プールのステータスと停止レポート

pub mod builder;
pub mod dispatcher;
pub mod guard;
mod retention_loop;
pub mod status;
pub mod worker_pool;

pub use self::builder::{Courier, CourierBuilder};
pub use self::dispatcher::{Dispatcher, SubmitOptions};
pub use self::guard::{AuthGate, UnauthorizedResponse};
pub use self::status::{PoolStatus, ShutdownReport};
pub use self::worker_pool::{PoolConfig, WorkerPool, WorkerPoolBuilder};
