//! Feed configuration.

use crate::error::{FeedError, Result};
use serde::Deserialize;

/// Window size of the primary live view.
pub const PRIMARY_CAPACITY: usize = 50;

/// Window size of the administrative view.
pub const ADMIN_CAPACITY: usize = 20;

/// Configuration for one reconciled view.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Record set to query and subscribe to.
    pub table: String,

    /// Name of the realtime channel.
    pub channel: String,

    /// Maximum readings held in the window (N).
    pub capacity: usize,

    /// Column the initial query orders by, most recent first.
    pub order_column: String,

    /// Bounded capacity of the subscription's delivery channel.
    /// Default: 1000
    pub buffer_size: usize,

    /// Discard fetch completions superseded by a later event for the same id.
    pub guard_stale_completions: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            table: "readings".to_string(),
            channel: "readings-realtime".to_string(),
            capacity: PRIMARY_CAPACITY,
            order_column: "timestamp".to_string(),
            buffer_size: 1000,
            guard_stale_completions: true,
        }
    }
}

impl FeedConfig {
    /// The live feed view (50 readings).
    pub fn primary() -> Self {
        Self::default()
    }

    /// The administrative view (20 readings).
    pub fn admin() -> Self {
        Self {
            capacity: ADMIN_CAPACITY,
            channel: "readings-admin".to_string(),
            ..Self::default()
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: FeedConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(FeedError::InvalidConfig("capacity must be > 0".into()));
        }
        if self.buffer_size == 0 {
            return Err(FeedError::InvalidConfig("buffer_size must be > 0".into()));
        }
        if self.table.trim().is_empty() {
            return Err(FeedError::InvalidConfig("table name is empty".into()));
        }
        Ok(())
    }
}
