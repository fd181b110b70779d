//! Typed - ジョブ API
//!
//! # 2 層構成
//! - **Typed**: `Job` trait, `Handler<T>` trait。payload 型と型名が一緒に
//!   移動するので、型名の typo はコンパイルが通らない
//! - **Dyn**: `DynHandler`（object-safe）。registry が保持する形

pub mod handler;
pub mod job;
pub mod registry;

pub use self::handler::{DynHandler, FnHandler, Handler, TypedHandler};
pub use self::job::{Job, JobContext};
pub use self::registry::{JobOptions, JobRegistry, RegistryEntry};
