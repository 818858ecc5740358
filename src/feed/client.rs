//! The backend contract the controller is written against.

use async_trait::async_trait;

use super::types::{ReadingQuery, Subscription, SubscriptionHandle, SubscriptionRequest};
use crate::error::Result;
use crate::types::{Reading, ReadingId};

/// Query, point-fetch and change-subscription access to a record set.
///
/// Records returned by `query` and `fetch_by_id` are fully joined (the
/// session and its asset attached). Change events are not.
#[async_trait]
pub trait ChangeFeedClient: Send + Sync + 'static {
    /// An ordered, bounded page of readings.
    async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>>;

    /// One fully joined reading. `Ok(None)` when it no longer exists.
    async fn fetch_by_id(&self, table: &str, id: &ReadingId) -> Result<Option<Reading>>;

    /// Open a change subscription.
    async fn subscribe(&self, request: &SubscriptionRequest) -> Result<Subscription>;

    /// Release a subscription. Releasing twice is harmless.
    async fn unsubscribe(&self, handle: SubscriptionHandle);
}
