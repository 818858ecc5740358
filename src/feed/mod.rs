//! Change-feed contract and an in-process implementation.
//!
//! A change feed offers three things:
//! - Bounded page queries over a record set
//! - Point fetches of fully joined records
//! - Subscriptions delivering row changes plus connection lifecycle
//!
//! # Example
//!
//! ```ignore
//! let feed = MemoryFeed::new();
//! let mut sub = feed.subscribe(&SubscriptionRequest {
//!     channel: "readings-realtime".into(),
//!     table: "readings".into(),
//!     events: EventMask::all(),
//!     buffer_size: 100,
//! }).await?;
//!
//! while let Some(message) = sub.messages.recv().await {
//!     match message {
//!         FeedMessage::Change(event) => println!("{:?} {}", event.kind, event.id),
//!         FeedMessage::Lifecycle(LifecycleSignal::Closed) => break,
//!         FeedMessage::Lifecycle(signal) => println!("{:?}", signal),
//!     }
//! }
//! ```

mod client;
mod memory;
mod types;

pub use client::ChangeFeedClient;
pub use memory::{FetchGate, MemoryFeed, MemoryFeedOptions};
pub use types::{
    ChangeEvent, EventKind, EventMask, FeedMessage, LifecycleSignal, OrderBy, QueryFilter,
    ReadingQuery, Subscription, SubscriptionHandle, SubscriptionId, SubscriptionRequest,
};
