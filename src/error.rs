//! Error types for the reading feed.

use crate::types::ReadingId;
use thiserror::Error;

/// Main error type for feed operations.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Query failed: {0}")]
    Query(String),

    #[error("Fetch of reading {id} failed: {reason}")]
    Fetch { id: ReadingId, reason: String },

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("No async runtime: {0}")]
    Runtime(String),
}

impl From<serde_json::Error> for FeedError {
    fn from(e: serde_json::Error) -> Self {
        FeedError::Serialization(e.to_string())
    }
}

/// Result type for feed operations.
pub type Result<T> = std::result::Result<T, FeedError>;

/// The initial query failed. Held as view state, never returned.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("failed to load initial readings: {reason}")]
pub struct LoadError {
    pub reason: String,
}

/// Why the live subscription is not healthy.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("failed to connect to realtime updates: {0}")]
    Rejected(String),

    #[error("timed out")]
    TimedOut,
}

impl SubscriptionError {
    /// Rejection with the reason carried by the signal, if any.
    pub fn rejected(reason: Option<&str>) -> Self {
        SubscriptionError::Rejected(reason.unwrap_or("unknown error").to_string())
    }
}
