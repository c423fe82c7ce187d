//! Change-feed fan-out to derived views.
//!
//! A single task owns every subscription and every throttle timer, so
//! notifications are processed one at a time in arrival order. Each view has
//! a throttle window: the first change opens it, later changes inside the
//! window only replace the pending payload, and one refresh fires when the
//! window closes. Refreshes run as separate tasks stamped with a per-view
//! generation so a late result can never overwrite a newer one.
//!
//! If a feed cannot be (re)established the dispatcher reports
//! [`SyncHealth::Degraded`] and falls back to recomputing every view on a
//! fixed poll interval while it keeps trying to resubscribe.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use stockflow_events::{ChangeBatch, Collection};

use crate::config::DispatcherConfig;
use crate::error::EngineError;
use crate::store::{ChangeSubscription, DocumentStore, FeedError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerReason {
    /// First computation after the dispatcher starts.
    Initial,
    /// One or more change batches arrived.
    Change,
    /// The subscriber fell behind; individual batches were dropped.
    Lagged,
    /// Recompute pass while the feed is degraded.
    Poll,
    /// Explicit refresh request.
    Manual,
}

/// What a view handler receives when its throttle window closes.
#[derive(Debug, Clone)]
pub struct ViewTrigger {
    pub view: String,
    /// Strictly increasing per view; pass it to the publish step.
    pub generation: u64,
    pub reason: TriggerReason,
    /// Most recent batch seen in the window, if any.
    pub batch: Option<ChangeBatch>,
}

/// Recomputes one derived view.
#[async_trait]
pub trait ViewHandler: Send + Sync {
    async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError>;
}

#[async_trait]
impl<H> ViewHandler for Arc<H>
where
    H: ViewHandler + ?Sized,
{
    async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError> {
        (**self).refresh(trigger).await
    }
}

pub struct ViewRegistration {
    pub name: String,
    pub collections: Vec<Collection>,
    pub throttle: Duration,
    pub handler: Arc<dyn ViewHandler>,
}

impl ViewRegistration {
    pub fn new(
        name: impl Into<String>,
        collections: impl IntoIterator<Item = Collection>,
        throttle: Duration,
        handler: Arc<dyn ViewHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            collections: collections.into_iter().collect(),
            throttle,
            handler,
        }
    }

    fn watches(&self, collection: Collection) -> bool {
        self.collections.contains(&collection)
    }
}

impl core::fmt::Debug for ViewRegistration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ViewRegistration")
            .field("name", &self.name)
            .field("collections", &self.collections)
            .field("throttle", &self.throttle)
            .finish_non_exhaustive()
    }
}

/// Whether projections are fed live or by polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncHealth {
    Live,
    Degraded {
        reason: String,
        since: DateTime<Utc>,
    },
}

impl SyncHealth {
    pub fn is_live(&self) -> bool {
        matches!(self, SyncHealth::Live)
    }

    /// The degraded-sync warning to surface to callers, if any.
    pub fn warning(&self) -> Option<EngineError> {
        match self {
            SyncHealth::Live => None,
            SyncHealth::Degraded { reason, since } => Some(EngineError::SyncDegraded(format!(
                "{reason} (since {})",
                since.to_rfc3339()
            ))),
        }
    }
}

#[derive(Debug)]
enum Control {
    Unsubscribe {
        view: String,
        ack: oneshot::Sender<bool>,
    },
    Refresh {
        view: Option<String>,
    },
}

/// Handle to control and stop a running dispatcher.
///
/// Dropping the handle stops the dispatcher as well.
#[derive(Debug)]
pub struct DispatcherHandle {
    control: mpsc::UnboundedSender<Control>,
    shutdown: CancellationToken,
    join: Option<JoinHandle<()>>,
    health: watch::Receiver<SyncHealth>,
}

impl DispatcherHandle {
    /// Stop refreshing `view`. Pending and in-flight refreshes are dropped;
    /// once this returns no further refresh of the view is started.
    /// Returns `false` if the view was not registered.
    pub async fn unsubscribe(&self, view: &str) -> bool {
        let (ack, done) = oneshot::channel();
        let sent = self.control.send(Control::Unsubscribe {
            view: view.to_string(),
            ack,
        });
        if sent.is_err() {
            return false;
        }
        done.await.unwrap_or(false)
    }

    /// Refresh one view as soon as possible, bypassing its throttle window.
    pub fn refresh_now(&self, view: &str) {
        let _ = self.control.send(Control::Refresh {
            view: Some(view.to_string()),
        });
    }

    pub fn refresh_all(&self) {
        let _ = self.control.send(Control::Refresh { view: None });
    }

    pub fn health(&self) -> watch::Receiver<SyncHealth> {
        self.health.clone()
    }

    /// Request graceful shutdown and wait for the dispatcher to stop.
    pub async fn shutdown(mut self) {
        self.shutdown.cancel();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Builder for the dispatcher task.
pub struct ChangeFeedDispatcher<S> {
    store: Arc<S>,
    config: DispatcherConfig,
    views: Vec<ViewRegistration>,
}

impl<S> ChangeFeedDispatcher<S>
where
    S: DocumentStore + 'static,
{
    pub fn new(store: Arc<S>, config: DispatcherConfig) -> Self {
        Self {
            store,
            config,
            views: Vec::new(),
        }
    }

    /// Register a view using the configured throttle for `name`.
    pub fn register(
        &mut self,
        name: &str,
        collections: impl IntoIterator<Item = Collection>,
        handler: Arc<dyn ViewHandler>,
    ) -> &mut Self {
        let throttle = self.config.throttle_for(name);
        self.register_view(ViewRegistration::new(name, collections, throttle, handler))
    }

    pub fn register_view(&mut self, registration: ViewRegistration) -> &mut Self {
        self.views.retain(|v| v.name != registration.name);
        self.views.push(registration);
        self
    }

    /// Spawn the dispatcher onto the current tokio runtime.
    pub fn start(self) -> DispatcherHandle {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (health_tx, health_rx) = watch::channel(SyncHealth::Live);
        let shutdown = CancellationToken::new();

        let views: BTreeMap<String, ViewRegistration> = self
            .views
            .into_iter()
            .map(|v| (v.name.clone(), v))
            .collect();

        let dispatch = DispatchLoop {
            store: self.store,
            poll_interval: self.config.poll_interval.max(Duration::from_millis(1)),
            views,
            pending: HashMap::new(),
            in_flight: HashMap::new(),
            generations: HashMap::new(),
            orders_feed: None,
            inventory_feed: None,
            health: health_tx,
        };
        let join = tokio::spawn(dispatch.run(control_rx, shutdown.clone()));

        DispatcherHandle {
            control: control_tx,
            shutdown,
            join: Some(join),
            health: health_rx,
        }
    }
}

#[derive(Debug)]
struct PendingRefresh {
    due: Instant,
    reason: TriggerReason,
    batch: Option<ChangeBatch>,
}

struct DispatchLoop<S> {
    store: Arc<S>,
    poll_interval: Duration,
    views: BTreeMap<String, ViewRegistration>,
    pending: HashMap<String, PendingRefresh>,
    in_flight: HashMap<String, Vec<JoinHandle<()>>>,
    generations: HashMap<String, u64>,
    orders_feed: Option<ChangeSubscription>,
    inventory_feed: Option<ChangeSubscription>,
    health: watch::Sender<SyncHealth>,
}

async fn next_batch(feed: &mut Option<ChangeSubscription>) -> Result<ChangeBatch, FeedError> {
    match feed {
        Some(sub) => sub.next().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_due(due: Option<Instant>) {
    match due {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<S> DispatchLoop<S>
where
    S: DocumentStore + 'static,
{
    async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<Control>,
        shutdown: CancellationToken,
    ) {
        info!(views = self.views.len(), "change feed dispatcher started");

        self.connect_feeds();
        self.schedule_all(TriggerReason::Initial, true);

        let mut poll =
            tokio::time::interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let next_due = self.pending.values().map(|p| p.due).min();
            let degraded = !self.health.borrow().is_live();

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,

                msg = control.recv() => match msg {
                    Some(msg) => self.handle_control(msg),
                    None => break,
                },

                result = next_batch(&mut self.orders_feed) => {
                    self.on_feed(Collection::Orders, result);
                }

                result = next_batch(&mut self.inventory_feed) => {
                    self.on_feed(Collection::Inventory, result);
                }

                _ = sleep_until_due(next_due) => self.fire_due(),

                _ = poll.tick(), if degraded => self.poll_degraded(),
            }
        }

        self.pending.clear();
        for (_, tasks) in self.in_flight.drain() {
            for task in tasks {
                task.abort();
            }
        }
        info!("change feed dispatcher stopped");
    }

    fn handle_control(&mut self, msg: Control) {
        match msg {
            Control::Unsubscribe { view, ack } => {
                let existed = self.views.remove(&view).is_some();
                self.pending.remove(&view);
                if let Some(tasks) = self.in_flight.remove(&view) {
                    for task in tasks {
                        task.abort();
                    }
                }
                // Drop feeds nobody listens to any more.
                for collection in Collection::ALL {
                    if !self.wanted(collection) {
                        *self.feed_mut(collection) = None;
                    }
                }
                if existed {
                    info!(view = %view, "view unsubscribed");
                }
                let _ = ack.send(existed);
            }
            Control::Refresh { view: Some(view) } => {
                self.schedule(&view, TriggerReason::Manual, None, true);
            }
            Control::Refresh { view: None } => self.schedule_all(TriggerReason::Manual, true),
        }
    }

    fn on_feed(&mut self, collection: Collection, result: Result<ChangeBatch, FeedError>) {
        match result {
            Ok(batch) => {
                debug!(
                    %collection,
                    sequence = batch.sequence,
                    changes = batch.changes.len(),
                    "change batch received"
                );
                self.store.invalidate(collection);
                for view in self.watchers(collection) {
                    self.schedule(&view, TriggerReason::Change, Some(batch.clone()), false);
                }
            }
            Err(FeedError::Lagged(missed)) => {
                warn!(%collection, missed, "change feed lagged; recomputing watchers");
                self.store.invalidate(collection);
                for view in self.watchers(collection) {
                    self.schedule(&view, TriggerReason::Lagged, None, false);
                }
            }
            Err(FeedError::Closed) => {
                *self.feed_mut(collection) = None;
                self.degrade(format!("change feed for {collection} closed"));
                self.store.invalidate(collection);
                for view in self.watchers(collection) {
                    self.schedule(&view, TriggerReason::Poll, None, true);
                }
            }
        }
    }

    fn poll_degraded(&mut self) {
        debug!("polling views while change feed is degraded");
        for collection in Collection::ALL {
            self.store.invalidate(collection);
        }
        self.schedule_all(TriggerReason::Poll, true);
        self.connect_feeds();
    }

    fn fire_due(&mut self) {
        let now = Instant::now();
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(view, _)| view.clone())
            .collect();

        for view in due {
            let Some(pending) = self.pending.remove(&view) else {
                continue;
            };
            let Some(registration) = self.views.get(&view) else {
                continue;
            };

            let generation = {
                let counter = self.generations.entry(view.clone()).or_insert(0);
                *counter += 1;
                *counter
            };
            let trigger = ViewTrigger {
                view: view.clone(),
                generation,
                reason: pending.reason,
                batch: pending.batch,
            };
            let handler = registration.handler.clone();
            let name = view.clone();
            let task = tokio::spawn(async move {
                if let Err(err) = handler.refresh(trigger).await {
                    warn!(view = %name, generation, error = %err, "view refresh failed");
                }
            });

            let tasks = self.in_flight.entry(view).or_default();
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }

    /// Open a throttle window for `view`, or fold into the one already open.
    fn schedule(
        &mut self,
        view: &str,
        reason: TriggerReason,
        batch: Option<ChangeBatch>,
        immediate: bool,
    ) {
        let Some(registration) = self.views.get(view) else {
            return;
        };
        let now = Instant::now();
        match self.pending.get_mut(view) {
            Some(pending) => {
                pending.reason = reason;
                pending.batch = batch;
                if immediate {
                    pending.due = pending.due.min(now);
                }
            }
            None => {
                let due = if immediate {
                    now
                } else {
                    now + registration.throttle
                };
                self.pending.insert(
                    view.to_string(),
                    PendingRefresh { due, reason, batch },
                );
            }
        }
    }

    fn schedule_all(&mut self, reason: TriggerReason, immediate: bool) {
        let views: Vec<String> = self.views.keys().cloned().collect();
        for view in views {
            self.schedule(&view, reason, None, immediate);
        }
    }

    fn watchers(&self, collection: Collection) -> Vec<String> {
        self.views
            .values()
            .filter(|v| v.watches(collection))
            .map(|v| v.name.clone())
            .collect()
    }

    fn wanted(&self, collection: Collection) -> bool {
        self.views.values().any(|v| v.watches(collection))
    }

    fn feed_mut(&mut self, collection: Collection) -> &mut Option<ChangeSubscription> {
        match collection {
            Collection::Orders => &mut self.orders_feed,
            Collection::Inventory => &mut self.inventory_feed,
        }
    }

    /// Subscribe every wanted collection that has no live feed.
    fn connect_feeds(&mut self) {
        let mut failure = None;
        for collection in Collection::ALL {
            if !self.wanted(collection) || self.feed_mut(collection).is_some() {
                continue;
            }
            match self.store.subscribe(collection) {
                Ok(sub) => {
                    debug!(%collection, "subscribed to change feed");
                    *self.feed_mut(collection) = Some(sub);
                }
                Err(err) => {
                    failure = Some(format!("subscribing to {collection} failed: {err}"));
                }
            }
        }

        match failure {
            Some(reason) => self.degrade(reason),
            None => self.recover(),
        }
    }

    fn degrade(&mut self, reason: String) {
        let already = !self.health.borrow().is_live();
        if already {
            debug!(reason = %reason, "change feed still degraded");
            return;
        }
        warn!(reason = %reason, "change feed degraded; falling back to polling");
        self.health.send_replace(SyncHealth::Degraded {
            reason,
            since: Utc::now(),
        });
    }

    fn recover(&mut self) {
        if self.health.borrow().is_live() {
            return;
        }
        info!("change feed restored");
        self.health.send_replace(SyncHealth::Live);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use stockflow_core::ProductId;
    use stockflow_inventory::InventoryItem;

    use crate::store::InMemoryDocumentStore;

    #[derive(Default)]
    struct Recorder {
        triggers: Mutex<Vec<ViewTrigger>>,
    }

    impl Recorder {
        fn with_reason(&self, reason: TriggerReason) -> Vec<ViewTrigger> {
            self.triggers
                .lock()
                .unwrap()
                .iter()
                .filter(|t| t.reason == reason)
                .cloned()
                .collect()
        }

        fn count(&self) -> usize {
            self.triggers.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ViewHandler for Recorder {
        async fn refresh(&self, trigger: ViewTrigger) -> Result<(), EngineError> {
            self.triggers.lock().unwrap().push(trigger);
            Ok(())
        }
    }

    fn start(
        store: &Arc<InMemoryDocumentStore>,
        throttle: Duration,
    ) -> (Arc<Recorder>, DispatcherHandle) {
        let recorder = Arc::new(Recorder::default());
        let mut dispatcher = ChangeFeedDispatcher::new(
            store.clone(),
            DispatcherConfig::default().with_poll_interval(Duration::from_secs(10)),
        );
        dispatcher.register_view(ViewRegistration::new(
            "probe",
            [Collection::Inventory],
            throttle,
            recorder.clone(),
        ));
        (recorder, dispatcher.start())
    }

    #[tokio::test(start_paused = true)]
    async fn initial_refresh_fires_immediately() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (recorder, handle) = start(&store, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1)).await;

        let initial = recorder.with_reason(TriggerReason::Initial);
        assert_eq!(initial.len(), 1);
        assert_eq!(initial[0].generation, 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn bursts_inside_the_window_coalesce_to_the_latest_batch() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (recorder, handle) = start(&store, Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let item = InventoryItem::new(ProductId::new(), "Spring");
        let mut last_sequence = 0;
        for qty in 1..=3 {
            last_sequence = store.seed_item(item.clone().with_quantity(qty)).unwrap().sequence;
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(recorder.with_reason(TriggerReason::Change).is_empty());

        tokio::time::sleep(Duration::from_secs(3)).await;

        let changes = recorder.with_reason(TriggerReason::Change);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].batch.as_ref().map(|b| b.sequence), Some(last_sequence));
        assert_eq!(changes[0].generation, 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn changes_after_the_window_open_a_new_one() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (recorder, handle) = start(&store, Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let item = InventoryItem::new(ProductId::new(), "Spring");
        store.seed_item(item.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        store.seed_item(item.with_quantity(4)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(recorder.with_reason(TriggerReason::Change).len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn unsubscribe_cancels_the_pending_refresh() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (recorder, handle) = start(&store, Duration::from_secs(2));
        tokio::time::sleep(Duration::from_millis(1)).await;
        let before = recorder.count();

        store
            .seed_item(InventoryItem::new(ProductId::new(), "Spring"))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.unsubscribe("probe").await);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(recorder.count(), before);
        assert!(!handle.unsubscribe("probe").await);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn closed_feed_degrades_then_polls_and_recovers() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let (recorder, handle) = start(&store, Duration::from_secs(2));
        let mut health = handle.health();
        tokio::time::sleep(Duration::from_millis(1)).await;

        store.sever_change_feeds();
        health.changed().await.unwrap();
        let degraded = health.borrow_and_update().clone();
        assert!(!degraded.is_live());
        assert!(matches!(degraded.warning(), Some(EngineError::SyncDegraded(_))));

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!recorder.with_reason(TriggerReason::Poll).is_empty());
        assert!(!handle.health().borrow().is_live());

        store.restore_change_feeds();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(handle.health().borrow().is_live());

        // Live again: a fresh write is delivered through the feed.
        let polls = recorder.with_reason(TriggerReason::Poll).len();
        store
            .seed_item(InventoryItem::new(ProductId::new(), "Spring"))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(recorder.with_reason(TriggerReason::Change).len(), 1);
        assert_eq!(recorder.with_reason(TriggerReason::Poll).len(), polls);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_failure_at_start_is_degraded() {
        let store = Arc::new(InMemoryDocumentStore::new());
        store.sever_change_feeds();
        let (recorder, handle) = start(&store, Duration::from_secs(2));

        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!handle.health().borrow().is_live());
        // Views are still computed once up front.
        assert_eq!(recorder.with_reason(TriggerReason::Initial).len(), 1);
        handle.shutdown().await;
    }
}
