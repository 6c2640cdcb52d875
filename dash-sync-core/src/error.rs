//! Save error types and retry classification.

use thiserror::Error;

use crate::remote::RemoteError;

/// Fragments that mark an error as transient.
const RETRYABLE_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "timed out",
    "connection",
    "econnreset",
    "econnrefused",
    "unavailable",
    "bad gateway",
    "fetch failed",
];

/// Fragments that mark an error as permanent even if it also looks transient.
const NON_RETRYABLE_PATTERNS: &[&str] = &["validation"];

/// Classifies an error message as transient (worth retrying) or permanent.
///
/// Any standalone 3-digit token in the 500-599 range counts as a server error.
pub fn is_retryable_message(message: &str) -> bool {
    let lower = message.to_lowercase();

    if NON_RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return false;
    }
    if RETRYABLE_PATTERNS.iter().any(|p| lower.contains(p)) {
        return true;
    }

    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .any(|status| (500..600).contains(&status))
}

/// Errors surfaced by a save attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SaveError {
    #[error("Layout validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Save cancelled")]
    Cancelled,

    #[error("Auto-save has been disposed")]
    Disposed,
}

impl SaveError {
    /// Returns true if the orchestrator should retry after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            SaveError::Validation(_) | SaveError::Cancelled | SaveError::Disposed => false,
            SaveError::Remote(e) => e.is_retryable(),
            SaveError::Storage(msg) => is_retryable_message(msg),
        }
    }
}
