//! AuthGate - 認証済みセッションでのみアクションを実行
//!
//! セッション自体は `SessionResolver` が返す。このモジュールが決めるのは
//! セッションが無いときに呼び出し側が受け取るもの（構造化された 401
//! レスポンス。エラーにはしない）だけ。

use std::future::Future;

use serde::Serialize;

use crate::ports::{Session, SessionResolver};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnauthorizedResponse {
    pub status: u16,
    pub message: String,
}

impl Default for UnauthorizedResponse {
    fn default() -> Self {
        Self {
            status: 401,
            message: "Unauthorized".to_string(),
        }
    }
}

pub struct AuthGate<R> {
    resolver: R,
}

impl<R: SessionResolver> AuthGate<R> {
    pub fn new(resolver: R) -> Self {
        Self { resolver }
    }

    /// Resolve the current session and hand it to `action`.
    /// `action` is not invoked when resolution fails.
    pub async fn run<T, F, Fut>(&self, action: F) -> Result<T, UnauthorizedResponse>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = T>,
    {
        match self.resolver.resolve_current_session().await {
            Ok(session) => Ok(action(session).await),
            Err(err) => {
                tracing::debug!(error = %err, "request rejected");
                Err(UnauthorizedResponse::default())
            }
        }
    }
}
