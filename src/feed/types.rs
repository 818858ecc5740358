//! Message and request types exchanged with a change feed.

use crate::types::{Reading, ReadingId};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Kind of row change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventKind {
    Insert,
    Update,
    Delete,
}

/// Which change kinds a subscription wants.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventMask {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl EventMask {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }

    pub fn contains(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Insert => self.insert,
            EventKind::Update => self.update,
            EventKind::Delete => self.delete,
        }
    }
}

impl Default for EventMask {
    fn default() -> Self {
        Self::all()
    }
}

/// A row change notification.
///
/// Only the raw row is carried; the joined session is not. Receivers are
/// expected to re-fetch the full record by `id`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: EventKind,
    pub id: ReadingId,
    #[serde(default)]
    pub new_values: Option<serde_json::Value>,
    #[serde(default)]
    pub old_values: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(row: &Reading) -> Self {
        Self {
            kind: EventKind::Insert,
            id: row.id.clone(),
            new_values: serde_json::to_value(row).ok(),
            old_values: None,
        }
    }

    pub fn update(old: &Reading, new: &Reading) -> Self {
        Self {
            kind: EventKind::Update,
            id: new.id.clone(),
            new_values: serde_json::to_value(new).ok(),
            old_values: serde_json::to_value(old).ok(),
        }
    }

    pub fn delete(old: &Reading) -> Self {
        Self {
            kind: EventKind::Delete,
            id: old.id.clone(),
            new_values: None,
            old_values: serde_json::to_value(old).ok(),
        }
    }

    /// Delete notification carrying only the id.
    pub fn delete_id(id: impl Into<ReadingId>) -> Self {
        Self {
            kind: EventKind::Delete,
            id: id.into(),
            new_values: None,
            old_values: None,
        }
    }
}

/// Connection lifecycle reported by the feed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LifecycleSignal {
    Connecting,
    Subscribed,
    Rejected { reason: Option<String> },
    TimedOut,
    Closed,
}

/// Everything a subscription can deliver.
#[derive(Clone, Debug, PartialEq)]
pub enum FeedMessage {
    Change(ChangeEvent),
    Lifecycle(LifecycleSignal),
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Token returned by `subscribe` and given back to `unsubscribe`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub channel: String,
}

/// What to subscribe to.
#[derive(Clone, Debug)]
pub struct SubscriptionRequest {
    pub channel: String,
    pub table: String,
    pub events: EventMask,
    /// Max buffered messages before the subscriber is dropped.
    pub buffer_size: usize,
}

/// An open subscription.
pub struct Subscription {
    pub handle: SubscriptionHandle,
    /// Changes and lifecycle signals, in delivery order.
    pub messages: mpsc::Receiver<FeedMessage>,
}

/// Equality filter on one column.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryFilter {
    Eq {
        column: String,
        value: serde_json::Value,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub ascending: bool,
}

/// A bounded page query.
#[derive(Clone, Debug, PartialEq)]
pub struct ReadingQuery {
    pub table: String,
    pub filter: Option<QueryFilter>,
    pub order_by: OrderBy,
    pub limit: usize,
}

impl ReadingQuery {
    /// The newest `limit` rows by `column`, descending.
    pub fn latest(table: impl Into<String>, column: impl Into<String>, limit: usize) -> Self {
        Self {
            table: table.into(),
            filter: None,
            order_by: OrderBy {
                column: column.into(),
                ascending: false,
            },
            limit,
        }
    }

    pub fn with_filter(mut self, column: impl Into<String>, value: serde_json::Value) -> Self {
        self.filter = Some(QueryFilter::Eq {
            column: column.into(),
            value,
        });
        self
    }
}
