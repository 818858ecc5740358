//! # Reading Feed
//!
//! Live, bounded view over sensor readings kept in step with a backend
//! change feed.
//!
//! ## Core Concepts
//!
//! - **Window**: the newest N readings, most recent first, no duplicates
//! - **Change feed**: page queries, point fetches and a subscription
//!   delivering inserts, updates, deletes and lifecycle signals
//! - **Monitor**: connecting / connected / disconnected, with a reason
//! - **Controller**: seeds the window, applies live changes, and owns the
//!   subscription for its lifetime
//!
//! ## Example
//!
//! ```ignore
//! use reading_feed::{FeedConfig, MemoryFeed, ReconciliationController};
//!
//! let feed = Arc::new(MemoryFeed::new());
//! let mut controller = ReconciliationController::start(feed.clone(), FeedConfig::primary())?;
//!
//! // A producer writes; the window follows.
//! feed.insert(Reading::new("r-1", "session-1", "temperature", 21.4, Timestamp::now()));
//!
//! let latest = controller.snapshot().first().cloned();
//! let status = controller.status();
//!
//! controller.stop().await;
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod feed;
pub mod generator;
pub mod monitor;
pub mod types;
pub mod view;
pub mod window;

// Re-exports
pub use config::{FeedConfig, ADMIN_CAPACITY, PRIMARY_CAPACITY};
pub use controller::{LoadState, ReconciliationController};
pub use error::{FeedError, LoadError, Result, SubscriptionError};
pub use feed::{
    ChangeEvent, ChangeFeedClient, EventKind, EventMask, FeedMessage, FetchGate, LifecycleSignal,
    MemoryFeed, MemoryFeedOptions, OrderBy, QueryFilter, ReadingQuery, Subscription,
    SubscriptionHandle, SubscriptionId, SubscriptionRequest,
};
pub use generator::{next_value, MockGenerator, SensorProfile, Trend};
pub use monitor::{ConnectionMonitor, ConnectionState};
pub use types::*;
pub use view::{FeedStatus, ValueBand};
pub use window::{CompletionGuard, EventSeq, Placement, ReadingStore};
