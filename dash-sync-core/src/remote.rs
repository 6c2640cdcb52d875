//! Remote persistence boundary.
//!
//! The remote store is a black box: a save either succeeds or fails with a
//! [`RemoteError`], and whether a failure is worth retrying is decided from
//! the error text alone.

use async_trait::async_trait;
use thiserror::Error;

use crate::error::is_retryable_message;
use crate::models::Layout;

/// Errors reported by a remote store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Remote rejected layout: {0}")]
    Rejected(String),
}

impl RemoteError {
    pub fn is_retryable(&self) -> bool {
        is_retryable_message(&self.to_string())
    }
}

/// Primary (remote) persistence for layouts, one record per user.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Upserts the user's layout.
    async fn save(&self, user_id: &str, layout: &Layout) -> Result<(), RemoteError>;

    /// Fetches the user's layout, `Ok(None)` if the user has none.
    async fn load(&self, user_id: &str) -> Result<Option<Layout>, RemoteError>;
}
