//! In-process change feed.
//!
//! Holds a reading table plus a session join table and broadcasts row
//! changes to subscribers over bounded channels. It also exposes fault
//! injection (failing queries and fetches, held fetch completions) so
//! every failure path of a consumer can be driven deterministically.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use super::client::ChangeFeedClient;
use super::types::{
    ChangeEvent, FeedMessage, LifecycleSignal, QueryFilter, ReadingQuery, Subscription,
    SubscriptionHandle, SubscriptionId, SubscriptionRequest,
};
use crate::error::{FeedError, Result};
use crate::types::{Reading, ReadingId};

/// Options for a memory feed.
#[derive(Clone, Debug)]
pub struct MemoryFeedOptions {
    /// Table served by this feed.
    pub table: String,
    /// Send `Subscribed` as soon as a subscription opens.
    pub auto_ack: bool,
}

impl Default for MemoryFeedOptions {
    fn default() -> Self {
        Self {
            table: "readings".to_string(),
            auto_ack: true,
        }
    }
}

/// Internal subscription state.
struct Subscriber {
    request: SubscriptionRequest,
    sender: mpsc::Sender<FeedMessage>,
}

impl Subscriber {
    /// Try to send a message. Returns false if the buffer is full or the
    /// receiver is gone (subscriber will be dropped).
    fn try_send(&self, message: FeedMessage) -> bool {
        self.sender.try_send(message).is_ok()
    }

    fn wants(&self, event: &ChangeEvent) -> bool {
        self.request.events.contains(event.kind)
    }
}

#[derive(Default)]
struct Faults {
    query_error: Option<String>,
    subscribe_error: Option<String>,
    failing_fetches: HashSet<ReadingId>,
}

/// Holds back fetch completions for one reading until released.
#[derive(Clone)]
pub struct FetchGate {
    permits: Arc<Semaphore>,
}

impl FetchGate {
    /// Let one held fetch complete.
    pub fn release(&self) {
        self.permits.add_permits(1);
    }
}

/// In-process `ChangeFeedClient`.
pub struct MemoryFeed {
    options: MemoryFeedOptions,
    rows: RwLock<HashMap<ReadingId, Reading>>,
    /// session_id -> joined session payload.
    sessions: RwLock<HashMap<String, serde_json::Value>>,
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
    faults: Mutex<Faults>,
    gates: Mutex<HashMap<ReadingId, FetchGate>>,
    unsubscribes: Mutex<HashMap<SubscriptionId, usize>>,
    fetches: AtomicU64,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::with_options(MemoryFeedOptions::default())
    }

    pub fn with_options(options: MemoryFeedOptions) -> Self {
        Self {
            options,
            rows: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            faults: Mutex::new(Faults::default()),
            gates: Mutex::new(HashMap::new()),
            unsubscribes: Mutex::new(HashMap::new()),
            fetches: AtomicU64::new(0),
        }
    }

    // --- Data ---

    /// Register the payload joined onto readings of `session_id`.
    pub fn add_session(&self, session_id: impl Into<String>, payload: serde_json::Value) {
        self.sessions.write().insert(session_id.into(), payload);
    }

    /// Insert a row without notifying subscribers (history before they connect).
    pub fn preload(&self, readings: impl IntoIterator<Item = Reading>) {
        let mut rows = self.rows.write();
        for reading in readings {
            rows.insert(reading.id.clone(), Self::strip(reading));
        }
    }

    /// Insert a row and broadcast the change.
    pub fn insert(&self, reading: Reading) -> ReadingId {
        let row = Self::strip(reading);
        let id = row.id.clone();
        let event = ChangeEvent::insert(&row);
        self.rows.write().insert(id.clone(), row);
        self.broadcast_change(event);
        id
    }

    /// Replace an existing row and broadcast the change. Returns false
    /// if the row does not exist.
    pub fn update(&self, reading: Reading) -> bool {
        let row = Self::strip(reading);
        let event = {
            let mut rows = self.rows.write();
            match rows.get_mut(&row.id) {
                Some(slot) => {
                    let event = ChangeEvent::update(slot, &row);
                    *slot = row;
                    event
                }
                None => return false,
            }
        };
        self.broadcast_change(event);
        true
    }

    /// Delete a row and broadcast the change.
    pub fn delete(&self, id: &ReadingId) -> Option<Reading> {
        let removed = self.rows.write().remove(id)?;
        self.broadcast_change(ChangeEvent::delete(&removed));
        Some(removed)
    }

    /// Broadcast a change without touching the table, as another writer's
    /// notification would arrive.
    pub fn emit(&self, event: ChangeEvent) {
        self.broadcast_change(event);
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().len()
    }

    // --- Lifecycle ---

    /// Send a lifecycle signal to every subscriber.
    pub fn signal(&self, signal: LifecycleSignal) {
        self.broadcast(|_| true, FeedMessage::Lifecycle(signal));
    }

    /// Close every subscription from the feed side.
    pub fn close_all(&self) {
        let drained: Vec<Subscriber> = self.subscribers.write().drain().map(|(_, s)| s).collect();
        for sub in drained {
            let _ = sub.try_send(FeedMessage::Lifecycle(LifecycleSignal::Closed));
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// How many times `unsubscribe` was called for `handle`.
    pub fn unsubscribe_count(&self, handle: &SubscriptionHandle) -> usize {
        self.unsubscribes.lock().get(&handle.id).copied().unwrap_or(0)
    }

    /// Total `unsubscribe` calls across all handles.
    pub fn total_unsubscribes(&self) -> usize {
        self.unsubscribes.lock().values().sum()
    }

    // --- Faults ---

    pub fn fail_queries(&self, reason: Option<&str>) {
        self.faults.lock().query_error = reason.map(str::to_string);
    }

    pub fn fail_subscribes(&self, reason: Option<&str>) {
        self.faults.lock().subscribe_error = reason.map(str::to_string);
    }

    pub fn fail_fetch(&self, id: impl Into<ReadingId>) {
        self.faults.lock().failing_fetches.insert(id.into());
    }

    pub fn heal_fetch(&self, id: &ReadingId) {
        self.faults.lock().failing_fetches.remove(id);
    }

    /// Hold fetches of `id`: each fetch reads the row immediately but only
    /// returns after one `FetchGate::release`.
    pub fn hold_fetches(&self, id: impl Into<ReadingId>) -> FetchGate {
        self.gates
            .lock()
            .entry(id.into())
            .or_insert_with(|| FetchGate {
                permits: Arc::new(Semaphore::new(0)),
            })
            .clone()
    }

    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    // --- Internals ---

    /// Rows are stored un-joined; joins happen on read.
    fn strip(mut reading: Reading) -> Reading {
        reading.session = None;
        reading
    }

    fn enrich(&self, mut reading: Reading) -> Reading {
        reading.session = self.sessions.read().get(&reading.session_id).cloned();
        reading
    }

    fn check_table(&self, table: &str) -> Result<()> {
        if table != self.options.table {
            return Err(FeedError::Query(format!("unknown table: {}", table)));
        }
        Ok(())
    }

    fn broadcast_change(&self, event: ChangeEvent) {
        debug!(kind = ?event.kind, id = %event.id, "broadcasting change");
        let wanted = event.clone();
        self.broadcast(move |sub| sub.wants(&wanted), FeedMessage::Change(event));
    }

    /// Internal broadcast helper. Drops subscribers that fail to receive.
    fn broadcast<F>(&self, filter: F, message: FeedMessage)
    where
        F: Fn(&Subscriber) -> bool,
    {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscribers.read();
            for (id, sub) in subs.iter() {
                if filter(sub) && !sub.try_send(message.clone()) {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscribers.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    debug!(subscription = id.0, "dropping slow subscriber");
                    // Best effort; the closed channel tells the receiver anyway.
                    let _ = sub.try_send(FeedMessage::Lifecycle(LifecycleSignal::Closed));
                }
            }
        }
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

fn matches_filter(reading: &Reading, filter: &QueryFilter) -> Result<bool> {
    match filter {
        QueryFilter::Eq { column, value } => {
            let row = serde_json::to_value(reading)?;
            Ok(row.get(column) == Some(value))
        }
    }
}

/// Columns a query may order by.
const ORDER_COLUMNS: &[&str] = &["timestamp", "value"];

fn compare_by(column: &str, a: &Reading, b: &Reading) -> CmpOrdering {
    let ordering = match column {
        "value" => a.value.partial_cmp(&b.value).unwrap_or(CmpOrdering::Equal),
        _ => a.timestamp.cmp(&b.timestamp),
    };
    ordering.then_with(|| a.id.cmp(&b.id))
}

#[async_trait]
impl ChangeFeedClient for MemoryFeed {
    async fn query(&self, query: &ReadingQuery) -> Result<Vec<Reading>> {
        if let Some(reason) = self.faults.lock().query_error.clone() {
            return Err(FeedError::Query(reason));
        }
        self.check_table(&query.table)?;
        if !ORDER_COLUMNS.contains(&query.order_by.column.as_str()) {
            return Err(FeedError::Query(format!(
                "unsupported order column: {}",
                query.order_by.column
            )));
        }

        let mut rows = Vec::new();
        for reading in self.rows.read().values() {
            let keep = match &query.filter {
                Some(filter) => matches_filter(reading, filter)?,
                None => true,
            };
            if keep {
                rows.push(reading.clone());
            }
        }

        let column = query.order_by.column.as_str();
        rows.sort_by(|a, b| compare_by(column, a, b));
        if !query.order_by.ascending {
            rows.reverse();
        }

        Ok(rows
            .into_iter()
            .take(query.limit)
            .map(|r| self.enrich(r))
            .collect())
    }

    async fn fetch_by_id(&self, table: &str, id: &ReadingId) -> Result<Option<Reading>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_table(table)?;

        if self.faults.lock().failing_fetches.contains(id) {
            return Err(FeedError::Fetch {
                id: id.clone(),
                reason: "injected fetch failure".to_string(),
            });
        }

        // Read now, answer later: a held fetch returns the row as it was.
        let row = self.rows.read().get(id).cloned().map(|r| self.enrich(r));
        let gate = self.gates.lock().get(id).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.permits.acquire().await {
                permit.forget();
            }
        }
        Ok(row)
    }

    async fn subscribe(&self, request: &SubscriptionRequest) -> Result<Subscription> {
        if let Some(reason) = self.faults.lock().subscribe_error.clone() {
            return Err(FeedError::Subscribe(reason));
        }
        self.check_table(&request.table)
            .map_err(|e| FeedError::Subscribe(e.to_string()))?;

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, messages) = mpsc::channel(request.buffer_size.max(1));

        if self.options.auto_ack {
            let _ = sender.try_send(FeedMessage::Lifecycle(LifecycleSignal::Subscribed));
        }

        self.subscribers.write().insert(
            id,
            Subscriber {
                request: request.clone(),
                sender,
            },
        );

        debug!(subscription = id.0, channel = %request.channel, "subscription opened");
        Ok(Subscription {
            handle: SubscriptionHandle {
                id,
                channel: request.channel.clone(),
            },
            messages,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        *self.unsubscribes.lock().entry(handle.id).or_insert(0) += 1;
        if let Some(sub) = self.subscribers.write().remove(&handle.id) {
            let _ = sub.try_send(FeedMessage::Lifecycle(LifecycleSignal::Closed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::{EventKind, EventMask};
    use crate::types::Timestamp;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    fn request(buffer_size: usize) -> SubscriptionRequest {
        SubscriptionRequest {
            channel: "test".into(),
            table: "readings".into(),
            events: EventMask::all(),
            buffer_size,
        }
    }

    fn reading(id: &str, ts: i64) -> Reading {
        Reading::new(id, "s1", "humidity", 40.0, Timestamp(ts))
    }

    async fn next(sub: &mut Subscription) -> FeedMessage {
        timeout(Duration::from_millis(200), sub.messages.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe() {
        let feed = MemoryFeed::new();
        let sub = feed.subscribe(&request(10)).await.unwrap();
        assert_eq!(feed.subscriber_count(), 1);

        feed.unsubscribe(sub.handle.clone()).await;
        feed.unsubscribe(sub.handle.clone()).await;
        assert_eq!(feed.subscriber_count(), 0);
        assert_eq!(feed.unsubscribe_count(&sub.handle), 2);
    }

    #[tokio::test]
    async fn test_broadcast_insert_after_ack() {
        let feed = MemoryFeed::new();
        let mut sub = feed.subscribe(&request(10)).await.unwrap();

        assert_eq!(
            next(&mut sub).await,
            FeedMessage::Lifecycle(LifecycleSignal::Subscribed)
        );

        feed.insert(reading("r1", 1));
        match next(&mut sub).await {
            FeedMessage::Change(event) => {
                assert_eq!(event.kind, EventKind::Insert);
                assert_eq!(event.id, ReadingId::from("r1"));
            }
            other => panic!("Expected change, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_mask_filters_kinds() {
        let feed = MemoryFeed::new();
        let mut req = request(10);
        req.events = EventMask {
            insert: false,
            ..EventMask::all()
        };
        let mut sub = feed.subscribe(&req).await.unwrap();
        let _ack = next(&mut sub).await;

        feed.insert(reading("r1", 1));
        feed.delete(&"r1".into());

        match next(&mut sub).await {
            FeedMessage::Change(event) => assert_eq!(event.kind, EventKind::Delete),
            other => panic!("Expected delete, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_id_only_delete() {
        let feed = MemoryFeed::new();
        feed.preload(vec![reading("r1", 1)]);
        let mut sub = feed.subscribe(&request(10)).await.unwrap();
        let _ack = next(&mut sub).await;

        feed.emit(ChangeEvent::delete_id("r1"));

        match next(&mut sub).await {
            FeedMessage::Change(event) => {
                assert_eq!(event.kind, EventKind::Delete);
                assert_eq!(event.id, ReadingId::from("r1"));
                assert!(event.old_values.is_none());
            }
            other => panic!("Expected delete, got {:?}", other),
        }
        // The table itself is untouched.
        assert_eq!(feed.row_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_slow_subscriber() {
        let feed = MemoryFeed::new();
        let _sub = feed.subscribe(&request(2)).await.unwrap();

        for i in 0..10 {
            feed.insert(reading(&format!("r{}", i), i));
        }

        assert_eq!(feed.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_query_orders_limits_and_joins() {
        let feed = MemoryFeed::new();
        feed.add_session("s1", json!({"name": "Run A", "asset": {"name": "Pump 3"}}));
        feed.preload((0..10).map(|i| reading(&format!("r{}", i), i)));

        let rows = feed
            .query(&ReadingQuery::latest("readings", "timestamp", 3))
            .await
            .unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.id.0.as_str()).collect();
        assert_eq!(ids, vec!["r9", "r8", "r7"]);
        assert_eq!(rows[0].session.as_ref().unwrap()["asset"]["name"], "Pump 3");
    }

    #[tokio::test]
    async fn test_query_filter_and_errors() {
        let feed = MemoryFeed::new();
        feed.preload(vec![
            reading("a", 1),
            Reading::new("b", "s2", "humidity", 1.0, Timestamp(2)),
        ]);

        let rows = feed
            .query(&ReadingQuery::latest("readings", "timestamp", 10).with_filter("session_id", json!("s2")))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, ReadingId::from("b"));

        let bad_column = feed
            .query(&ReadingQuery::latest("readings", "color", 10))
            .await;
        assert!(matches!(bad_column, Err(FeedError::Query(_))));

        let bad_table = feed.query(&ReadingQuery::latest("assets", "timestamp", 10)).await;
        assert!(matches!(bad_table, Err(FeedError::Query(_))));

        feed.fail_queries(Some("boom"));
        let failed = feed.query(&ReadingQuery::latest("readings", "timestamp", 10)).await;
        assert!(matches!(failed, Err(FeedError::Query(reason)) if reason == "boom"));
    }

    #[tokio::test]
    async fn test_held_fetch_returns_old_row() {
        let feed = Arc::new(MemoryFeed::new());
        feed.preload(vec![reading("a", 1)]);
        let gate = feed.hold_fetches("a");

        let fetcher = {
            let feed = Arc::clone(&feed);
            tokio::spawn(async move { feed.fetch_by_id("readings", &"a".into()).await })
        };
        tokio::task::yield_now().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        feed.delete(&"a".into());
        gate.release();

        let row = fetcher.await.unwrap().unwrap();
        assert_eq!(row.map(|r| r.id), Some(ReadingId::from("a")));
        assert_eq!(feed.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_injection() {
        let feed = MemoryFeed::new();
        feed.preload(vec![reading("a", 1)]);
        feed.fail_fetch("a");
        assert!(feed.fetch_by_id("readings", &"a".into()).await.is_err());

        feed.heal_fetch(&"a".into());
        assert!(feed.fetch_by_id("readings", &"a".into()).await.unwrap().is_some());
        assert!(feed.fetch_by_id("readings", &"zz".into()).await.unwrap().is_none());
    }
}
