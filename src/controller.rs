//! Reconciles a bounded reading window against a live change feed.
//!
//! One controller owns one window. Its event loop runs on the tokio
//! runtime it was started from and is the only writer of the window:
//! - the initial query and every enrichment fetch run as separate tasks,
//!   so a slow fetch never holds up the next event;
//! - task completions come back through the same loop and are applied
//!   one at a time;
//! - lifecycle signals drive the connection monitor.
//!
//! Nothing here returns an error to the consumer after `start`. Failures
//! become state: a load error, a subscription error, or a logged and
//! dropped event.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinError, JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FeedConfig;
use crate::error::{FeedError, LoadError, Result};
use crate::feed::{
    ChangeEvent, ChangeFeedClient, EventKind, EventMask, FeedMessage, ReadingQuery,
    SubscriptionHandle, SubscriptionRequest,
};
use crate::monitor::{ConnectionMonitor, ConnectionState};
use crate::types::{Reading, ReadingId};
use crate::view::FeedStatus;
use crate::window::{CompletionGuard, EventSeq, Placement, ReadingStore};

/// Progress of the initial query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    Failed(LoadError),
}

/// State shared between the event loop (sole writer) and readers.
struct ViewState {
    store: ReadingStore,
    monitor: ConnectionMonitor,
    load: LoadState,
    pending_fetches: usize,
    /// Cleared on shutdown; nothing mutates the window afterwards.
    active: bool,
}

enum Command {
    Reload,
    Resubscribe,
}

/// What a spawned task was doing, for when it panics before saying so.
enum TaskKind {
    Load { generation: u64 },
    Fetch { id: ReadingId, seq: EventSeq },
}

enum TaskOutput {
    Loaded {
        generation: u64,
        result: Result<Vec<Reading>>,
    },
    Fetched {
        id: ReadingId,
        seq: EventSeq,
        placement: Placement,
        result: Result<Option<Reading>>,
    },
}

/// Live, bounded, most-recent-first view over a reading table.
///
/// # Example
///
/// ```ignore
/// let feed = Arc::new(MemoryFeed::new());
/// let controller = ReconciliationController::start(feed, FeedConfig::primary())?;
///
/// let mut changes = controller.changes();
/// while changes.changed().await.is_ok() {
///     let status = controller.status();
///     render(&controller.snapshot(), &status);
/// }
/// ```
pub struct ReconciliationController {
    view: Arc<RwLock<ViewState>>,
    commands: mpsc::UnboundedSender<Command>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    revisions: watch::Receiver<u64>,
}

impl ReconciliationController {
    /// Validate `config`, then start loading and subscribing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(client: Arc<dyn ChangeFeedClient>, config: FeedConfig) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| FeedError::Runtime(e.to_string()))?;

        let view = Arc::new(RwLock::new(ViewState {
            store: ReadingStore::with_capacity(config.capacity)?,
            monitor: ConnectionMonitor::new(),
            load: LoadState::Loading,
            pending_fetches: 0,
            active: true,
        }));
        let (revision, revisions) = watch::channel(0);
        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let event_loop = EventLoop {
            guard_enabled: config.guard_stale_completions,
            client,
            config,
            view: Arc::clone(&view),
            revision,
            guard: CompletionGuard::new(),
            tasks: JoinSet::new(),
            task_kinds: HashMap::new(),
            subscription: None,
            messages: None,
            load_generation: 0,
        };
        let task = runtime.spawn(event_loop.run(command_rx, cancel.clone()));

        Ok(Self {
            view,
            commands,
            cancel,
            task: Some(task),
            revisions,
        })
    }

    /// Current window, position 0 first.
    pub fn snapshot(&self) -> Vec<Reading> {
        self.view.read().store.snapshot()
    }

    pub fn len(&self) -> usize {
        self.view.read().store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.read().store.is_empty()
    }

    pub fn get(&self, id: &ReadingId) -> Option<Reading> {
        self.view.read().store.get(id).cloned()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.view.read().monitor.state()
    }

    /// The subscription error if there is one, otherwise the load error.
    pub fn error(&self) -> Option<String> {
        let view = self.view.read();
        if let Some(e) = view.monitor.error() {
            return Some(e.to_string());
        }
        match &view.load {
            LoadState::Failed(e) => Some(e.to_string()),
            _ => None,
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.view.read().load.clone()
    }

    pub fn load_error(&self) -> Option<LoadError> {
        match &self.view.read().load {
            LoadState::Failed(e) => Some(e.clone()),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.view.read().load == LoadState::Loading
    }

    /// Enrichment fetches not yet completed.
    pub fn pending_fetches(&self) -> usize {
        self.view.read().pending_fetches
    }

    /// False once the controller has shut down.
    pub fn is_active(&self) -> bool {
        self.view.read().active
    }

    pub fn status(&self) -> FeedStatus {
        let error = self.error();
        let view = self.view.read();
        FeedStatus::new(
            view.monitor.state(),
            error,
            view.load == LoadState::Loading,
            view.store.len(),
        )
    }

    /// Revision counter, bumped after every state change.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.revisions.clone()
    }

    /// Re-issue the initial query. No-op after shutdown.
    pub fn reload(&self) {
        if self.commands.send(Command::Reload).is_err() {
            debug!("reload ignored, controller stopped");
        }
    }

    /// Release the current subscription and open a fresh one. No-op after
    /// shutdown.
    pub fn resubscribe(&self) {
        if self.commands.send(Command::Resubscribe).is_err() {
            debug!("resubscribe ignored, controller stopped");
        }
    }

    /// Shut down: abort in-flight fetches and release the subscription.
    ///
    /// Safe to call more than once.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "reconciliation loop ended abnormally");
            }
        }
    }
}

impl Drop for ReconciliationController {
    fn drop(&mut self) {
        // The loop still releases the subscription on its way out.
        self.cancel.cancel();
    }
}

/// The single writer of a controller's view.
struct EventLoop {
    client: Arc<dyn ChangeFeedClient>,
    config: FeedConfig,
    view: Arc<RwLock<ViewState>>,
    revision: watch::Sender<u64>,
    guard: CompletionGuard,
    guard_enabled: bool,
    tasks: JoinSet<TaskOutput>,
    task_kinds: HashMap<task::Id, TaskKind>,
    subscription: Option<SubscriptionHandle>,
    messages: Option<mpsc::Receiver<FeedMessage>>,
    /// Only the newest load may seed the window.
    load_generation: u64,
}

impl EventLoop {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        cancel: CancellationToken,
    ) {
        self.start_load();
        self.open_subscription(&cancel).await;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                Some(command) = commands.recv() => match command {
                    Command::Reload => self.start_load(),
                    Command::Resubscribe => {
                        self.release_subscription().await;
                        self.open_subscription(&cancel).await;
                    }
                },

                // Drain completions before taking more messages.
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.handle_completion(joined)
                }

                message = next_message(&mut self.messages) => self.handle_message(message),
            }
        }

        self.shutdown().await;
    }

    // --- Lifecycle ---

    fn start_load(&mut self) {
        self.load_generation += 1;
        let generation = self.load_generation;
        self.update_view(|view| view.load = LoadState::Loading);

        let query = ReadingQuery::latest(
            self.config.table.clone(),
            self.config.order_column.clone(),
            self.config.capacity,
        );
        let client = Arc::clone(&self.client);
        info!(table = %query.table, limit = query.limit, "loading initial readings");
        let handle = self.tasks.spawn(async move {
            let result = client.query(&query).await;
            TaskOutput::Loaded { generation, result }
        });
        self.task_kinds.insert(handle.id(), TaskKind::Load { generation });
    }

    async fn open_subscription(&mut self, cancel: &CancellationToken) {
        self.update_view(|view| view.monitor.begin_attempt());

        let request = SubscriptionRequest {
            channel: self.config.channel.clone(),
            table: self.config.table.clone(),
            events: EventMask::all(),
            buffer_size: self.config.buffer_size,
        };
        let client = Arc::clone(&self.client);
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = client.subscribe(&request) => result,
        };

        match result {
            Ok(subscription) => {
                info!(channel = %request.channel, "subscription opened");
                self.subscription = Some(subscription.handle);
                self.messages = Some(subscription.messages);
            }
            Err(e) => {
                let reason = match e {
                    FeedError::Subscribe(reason) => reason,
                    other => other.to_string(),
                };
                self.update_view(|view| view.monitor.rejected(Some(&reason)));
            }
        }
    }

    /// Release the current subscription, at most once per handle.
    async fn release_subscription(&mut self) {
        self.messages = None;
        if let Some(handle) = self.subscription.take() {
            debug!(subscription = handle.id.0, "releasing subscription");
            self.client.unsubscribe(handle).await;
        }
    }

    async fn shutdown(&mut self) {
        self.tasks.abort_all();
        self.task_kinds.clear();
        self.guard.clear();
        self.update_view(|view| {
            view.active = false;
            view.pending_fetches = 0;
            view.monitor.closed();
        });
        self.release_subscription().await;
        info!(channel = %self.config.channel, "reconciliation stopped");
    }

    // --- Feed messages ---

    fn handle_message(&mut self, message: Option<FeedMessage>) {
        match message {
            Some(FeedMessage::Change(event)) => self.handle_change(event),
            Some(FeedMessage::Lifecycle(signal)) => {
                debug!(?signal, "lifecycle signal");
                self.update_view(|view| view.monitor.apply(&signal));
            }
            None => {
                // Feed ended the stream without saying so.
                self.messages = None;
                self.update_view(|view| view.monitor.closed());
            }
        }
    }

    fn handle_change(&mut self, event: ChangeEvent) {
        let seq = self.guard.stamp();
        let placement = match event.kind {
            EventKind::Delete => {
                self.guard.forget(&event.id);
                let id = event.id;
                let removed = self.update_view(|view| view.active && view.store.remove(&id));
                debug!(id = %id, removed, "reading deleted");
                return;
            }
            EventKind::Insert => Placement::Front,
            EventKind::Update => Placement::InPlace,
        };

        // The event only carries the raw row; fetch the joined record.
        if self.guard_enabled {
            self.guard.begin_fetch(event.id.clone(), seq, placement);
        }
        let client = Arc::clone(&self.client);
        let table = self.config.table.clone();
        let id = event.id;
        self.update_view(|view| view.pending_fetches += 1);
        let fetched = id.clone();
        let handle = self.tasks.spawn(async move {
            let result = client.fetch_by_id(&table, &fetched).await;
            TaskOutput::Fetched {
                id: fetched,
                seq,
                placement,
                result,
            }
        });
        self.task_kinds.insert(handle.id(), TaskKind::Fetch { id, seq });
    }

    // --- Task completions ---

    fn handle_completion(
        &mut self,
        joined: std::result::Result<(task::Id, TaskOutput), JoinError>,
    ) {
        let (task_id, output) = match joined {
            Ok(joined) => joined,
            Err(e) => return self.handle_task_failure(e),
        };
        self.task_kinds.remove(&task_id);

        match output {
            TaskOutput::Loaded { generation, result } => self.apply_load(generation, result),
            TaskOutput::Fetched {
                id,
                seq,
                placement,
                result,
            } => self.apply_fetch(id, seq, placement, result),
        }
    }

    /// A task ended without an output: aborted, or panicked.
    fn handle_task_failure(&mut self, e: JoinError) {
        let kind = self.task_kinds.remove(&e.id());
        if e.is_cancelled() {
            return;
        }
        error!(error = %e, "feed task panicked");

        match kind {
            Some(TaskKind::Load { generation }) => {
                self.apply_load(generation, Err(FeedError::Query("query task panicked".into())))
            }
            Some(TaskKind::Fetch { id, seq }) => {
                if self.guard_enabled {
                    self.guard.abandon(&id, seq);
                }
                self.update_view(|view| {
                    view.pending_fetches = view.pending_fetches.saturating_sub(1)
                });
            }
            None => {}
        }
    }

    fn apply_load(&mut self, generation: u64, result: Result<Vec<Reading>>) {
        if generation != self.load_generation {
            debug!(generation, "discarding superseded load");
            return;
        }
        match result {
            Ok(rows) => {
                info!(count = rows.len(), "initial readings loaded");
                self.update_view(|view| {
                    if view.active {
                        view.store.seed(rows);
                        view.load = LoadState::Loaded;
                    }
                });
            }
            Err(e) => {
                let load_error = LoadError {
                    reason: e.to_string(),
                };
                error!(error = %load_error, "initial load failed");
                self.update_view(|view| view.load = LoadState::Failed(load_error));
            }
        }
    }

    fn apply_fetch(
        &mut self,
        id: ReadingId,
        seq: EventSeq,
        placement: Placement,
        result: Result<Option<Reading>>,
    ) {
        self.update_view(|view| {
            view.pending_fetches = view.pending_fetches.saturating_sub(1)
        });

        let placement = if self.guard_enabled {
            match self.guard.accept(&id, seq) {
                Some(placement) => placement,
                None => {
                    debug!(id = %id, seq = seq.0, "discarding stale fetch completion");
                    return;
                }
            }
        } else {
            placement
        };

        let reading = match result {
            Ok(Some(reading)) => reading,
            Ok(None) => {
                warn!(id = %id, "reading gone before enrichment, dropping event");
                return;
            }
            Err(e) => {
                warn!(id = %id, error = %e, "enrichment fetch failed, dropping event");
                return;
            }
        };

        self.update_view(|view| {
            if !view.active {
                return;
            }
            match placement {
                Placement::Front => {
                    if let Some(evicted) = view.store.upsert_front(reading) {
                        debug!(id = %evicted, "evicted from window");
                    }
                    debug!(id = %id, "reading inserted");
                }
                Placement::InPlace => {
                    let applied = view.store.upsert_in_place(reading);
                    debug!(id = %id, applied, "reading updated");
                }
            }
        });
    }

    /// Mutate the view and tell readers about it.
    fn update_view<R>(&self, f: impl FnOnce(&mut ViewState) -> R) -> R {
        let result = f(&mut self.view.write());
        self.revision.send_modify(|revision| *revision += 1);
        result
    }
}

/// Next message of the current subscription; never resolves without one.
async fn next_message(messages: &mut Option<mpsc::Receiver<FeedMessage>>) -> Option<FeedMessage> {
    match messages {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}
