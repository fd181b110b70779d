//! Handler trait - ジョブを実行する Handler の定義
//!
//! # 学習ポイント
//! - ジェネリック trait (`Handler<T>`): デコード済みの payload を受け取る
//! - Object-safe trait (`DynHandler`): 生の JSON を受け取り、registry が
//!   `Arc<dyn DynHandler>` として保持できる
//! - Type erasure パターン (`TypedHandler<T, H>` / `FnHandler<F>` → `DynHandler`)

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::job::{Job, JobContext};
use crate::domain::HandlerError;

/// Handler は 1 つのジョブ型を実行
///
/// # 使用例
/// ```ignore
/// struct SendEmailHandler;
///
/// #[async_trait]
/// impl Handler<SendEmail> for SendEmailHandler {
///     async fn handle(&self, ctx: JobContext, job: SendEmail) -> Result<(), HandlerError> {
///         mailer.send(&job.to).await.map_err(|e| HandlerError::new(e.to_string()))
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Job>: Send + Sync {
    async fn handle(&self, ctx: JobContext, job: T) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait DynHandler: Send + Sync {
    async fn handle_dyn(
        &self,
        ctx: JobContext,
        payload: serde_json::Value,
    ) -> Result<(), HandlerError>;
}

pub struct TypedHandler<T: Job, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Job, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Job, H: Handler<T>> DynHandler for TypedHandler<T, H> {
    async fn handle_dyn(
        &self,
        ctx: JobContext,
        payload: serde_json::Value,
    ) -> Result<(), HandlerError> {
        // デコードできない payload は何度やってもできない（permanent）
        let job: T = serde_json::from_value(payload)?;
        self.handler.handle(ctx, job).await
    }
}

/// 生の JSON payload を受け取るクロージャ handler
pub struct FnHandler<F> {
    f: F,
}

impl<F> FnHandler<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F, Fut> DynHandler for FnHandler<F>
where
    F: Fn(JobContext, serde_json::Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle_dyn(
        &self,
        ctx: JobContext,
        payload: serde_json::Value,
    ) -> Result<(), HandlerError> {
        (self.f)(ctx, payload).await
    }
}
