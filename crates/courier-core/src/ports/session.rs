//! SessionResolver port - リクエストの user / workspace
//!
//! セッションの発行は外側の Web アプリケーションの責務。
//! この crate は結果を受け取るだけ。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user: User,
    pub workspace: Workspace,
}

/// No valid session for the request (missing, expired, revoked...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("unauthorized")]
pub struct Unauthorized;

#[async_trait]
pub trait SessionResolver: Send + Sync {
    async fn resolve_current_session(&self) -> Result<Session, Unauthorized>;
}
