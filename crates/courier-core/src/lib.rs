//! courier-core
//!
//! Background job dispatch: named job types routed to handlers, executed by
//! worker pools under a hard concurrency ceiling, with retry and
//! dead-lettering.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, job types, job records, retry decisions, events, errors）
//! - **ports**: 抽象化レイヤー（`JobStore`, `Clock`, `IdGenerator`, `EventSink`, `SessionResolver`）
//! - **impls**: 実装（in-memory / file snapshot store, event sink）
//! - **typed**: 型付き Job API（`Job` trait, `Handler<T>`, `JobRegistry`）
//! - **app**: アプリケーションロジック（builder, dispatcher, worker pool, auth gate）
//! - **config** / **observability**: 環境変数の設定、tracing の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;

pub use self::app::{
    Courier, CourierBuilder, Dispatcher, PoolConfig, ShutdownReport, SubmitOptions, WorkerPool,
};
pub use self::config::CourierConfig;
pub use self::domain::{CourierError, HandlerError, JobId, JobStatus, Result};
pub use self::typed::{Handler, Job, JobContext, JobOptions, JobRegistry};
