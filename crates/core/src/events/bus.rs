//! Central pub/sub event bus.
//!
//! The bus fans events out to two subscriber populations: synchronous
//! subscribers, invoked inline in registration order on `publish`, and
//! asynchronous subscribers, fed through a single bounded FIFO queue drained
//! by one processing task. Cross-kind ordering is preserved because every
//! event passes through the same queue; intra-kind async invocations run
//! concurrently with no mutual ordering guarantee.
//!
//! Subscriber failures are isolated: each invocation's result is recorded in
//! the bus counters (and a bounded dead-letter list) without ever propagating
//! out of `publish` or the processing loop.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::errors::{EventError, HandlerError, Result};
use crate::events::envelope::{Event, EventKind};

/// Tuning knobs for the bus.
#[derive(Clone, Debug)]
pub struct EventBusConfig {
    /// Capacity of the async dispatch queue. `publish` drops (with a warning)
    /// when it is full; `publish_async` suspends instead.
    pub queue_capacity: usize,
    /// Ring-buffer cap for the observability history.
    pub max_history: usize,
    /// Worker-pool size for blocking subscribers.
    pub blocking_workers: usize,
    /// Dequeue timeout of the processing loop; bounds how long shutdown can
    /// go unobserved.
    pub recv_timeout: Duration,
    /// Ring-buffer cap for failed deliveries kept for inspection.
    pub dead_letter_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_history: 1000,
            blocking_workers: 4,
            recv_timeout: Duration::from_secs(1),
            dead_letter_capacity: 100,
        }
    }
}

/// Handle returned by the subscribe methods; passed back to `unsubscribe`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// A delivery that failed, retained for operational dashboards.
#[derive(Clone, Debug, Serialize)]
pub struct DeadLetter {
    pub event: Event,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// Snapshot of the monotonic bus counters.
#[derive(Clone, Debug, Serialize)]
pub struct BusStatistics {
    pub events_published: u64,
    pub events_processed: u64,
    pub delivery_errors: u64,
    pub events_dropped: u64,
    pub subscribers_count: u64,
    pub running: bool,
    pub history_len: usize,
    pub dead_letter_len: usize,
    pub sync_subscribers: HashMap<&'static str, usize>,
    pub async_subscribers: HashMap<&'static str, usize>,
}

type SyncFn = Arc<dyn Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync>;
type AsyncFn =
    Arc<dyn Fn(Event) -> BoxFuture<'static, std::result::Result<(), HandlerError>> + Send + Sync>;

/// Async-side subscriber categories. Plain tasks run on the runtime;
/// blocking closures are pushed through the bounded worker pool so a stalled
/// one cannot wedge the processing loop.
enum AsyncSubscriber {
    Task(AsyncFn),
    Blocking(SyncFn),
}

struct Registries {
    sync: HashMap<EventKind, Vec<(SubscriptionId, SyncFn)>>,
    asynchronous: HashMap<EventKind, Vec<(SubscriptionId, AsyncSubscriber)>>,
    history: VecDeque<Event>,
    dead_letters: VecDeque<DeadLetter>,
}

#[derive(Default)]
struct Counters {
    events_published: AtomicU64,
    events_processed: AtomicU64,
    delivery_errors: AtomicU64,
    events_dropped: AtomicU64,
    subscribers_count: AtomicU64,
}

struct Lifecycle {
    tx: Option<mpsc::Sender<Event>>,
    task: Option<JoinHandle<mpsc::Receiver<Event>>>,
}

struct BusInner {
    config: EventBusConfig,
    registries: Mutex<Registries>,
    counters: Counters,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    shutting_down: AtomicBool,
    next_subscription: AtomicU64,
    blocking_pool: Arc<Semaphore>,
}

/// Cloneable handle to the shared bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let blocking_pool = Arc::new(Semaphore::new(config.blocking_workers.max(1)));
        Self {
            inner: Arc::new(BusInner {
                config,
                registries: Mutex::new(Registries {
                    sync: HashMap::new(),
                    asynchronous: HashMap::new(),
                    history: VecDeque::new(),
                    dead_letters: VecDeque::new(),
                }),
                counters: Counters::default(),
                lifecycle: Mutex::new(Lifecycle { tx: None, task: None }),
                running: AtomicBool::new(false),
                shutting_down: AtomicBool::new(false),
                next_subscription: AtomicU64::new(1),
                blocking_pool,
            }),
        }
    }

    /// Starts the processing loop. Idempotent while running.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self
            .inner
            .lifecycle
            .lock()
            .expect("bus lifecycle lock poisoned");
        if self.inner.running.load(Ordering::SeqCst) {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(self.inner.config.queue_capacity);
        lifecycle.tx = Some(tx);
        self.inner.shutting_down.store(false, Ordering::SeqCst);
        self.inner.running.store(true, Ordering::SeqCst);

        let inner = Arc::clone(&self.inner);
        lifecycle.task = Some(tokio::spawn(process_events(inner, rx)));
        drop(lifecycle);

        tracing::info!("Event bus started");
        Ok(())
    }

    /// Stops the processing loop, then drains queued-but-undelivered events
    /// synchronously. In-flight deliveries are joined, not interrupted.
    pub async fn stop(&self) {
        let (task, _tx) = {
            let mut lifecycle = self
                .inner
                .lifecycle
                .lock()
                .expect("bus lifecycle lock poisoned");
            if !self.inner.running.load(Ordering::SeqCst) {
                return;
            }
            self.inner.shutting_down.store(true, Ordering::SeqCst);
            self.inner.running.store(false, Ordering::SeqCst);
            (lifecycle.task.take(), lifecycle.tx.take())
        };

        if let Some(task) = task {
            match task.await {
                Ok(mut rx) => {
                    // Deliver whatever the loop left behind before declaring
                    // the bus stopped.
                    while let Ok(event) = rx.try_recv() {
                        deliver_to_async_subscribers(&self.inner, &event).await;
                    }
                }
                Err(e) => tracing::error!("Event bus processing task failed: {e}"),
            }
        }

        self.inner.shutting_down.store(false, Ordering::SeqCst);
        tracing::info!("Event bus stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Registers a synchronous subscriber, invoked inline on `publish` in
    /// registration order.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        let id = self.next_id();
        let mut registries = self.lock_registries();
        registries
            .sync
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        self.inner
            .counters
            .subscribers_count
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(kind = %kind, "Subscribed (sync)");
        id
    }

    /// Registers an asynchronous subscriber, invoked concurrently with other
    /// async subscribers of the same kind by the processing loop.
    pub fn subscribe_async<F, Fut>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        let wrapped: AsyncFn = Arc::new(move |event| Box::pin(handler(event)));
        self.push_async(kind, AsyncSubscriber::Task(wrapped))
    }

    /// Registers a blocking subscriber on the async path. Invocations run on
    /// the bounded worker pool so the processing loop is never blocked.
    pub fn subscribe_blocking<F>(&self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: Fn(&Event) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.push_async(kind, AsyncSubscriber::Blocking(Arc::new(handler)))
    }

    /// Removes a subscription from either registry.
    pub fn unsubscribe(&self, kind: EventKind, id: SubscriptionId) {
        let mut registries = self.lock_registries();
        let mut removed = 0usize;
        if let Some(subs) = registries.sync.get_mut(&kind) {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed += before - subs.len();
        }
        if let Some(subs) = registries.asynchronous.get_mut(&kind) {
            let before = subs.len();
            subs.retain(|(sub_id, _)| *sub_id != id);
            removed += before - subs.len();
        }
        if removed > 0 {
            self.inner
                .counters
                .subscribers_count
                .fetch_sub(removed as u64, Ordering::Relaxed);
            tracing::debug!(kind = %kind, "Unsubscribed");
        }
    }

    /// Publishes an event synchronously: all sync subscribers for the kind
    /// run inline, in order, each failure isolated; then, if async
    /// subscribers exist, the event is enqueued without blocking (a full or
    /// absent queue drops the event with a warning).
    pub fn publish(&self, event: &Event) {
        self.inner
            .counters
            .events_published
            .fetch_add(1, Ordering::Relaxed);

        let kind = event.kind();
        let (sync_subs, has_async) = {
            let mut registries = self.lock_registries();
            push_capped(
                &mut registries.history,
                event.clone(),
                self.inner.config.max_history,
            );
            let subs: Vec<SyncFn> = registries
                .sync
                .get(&kind)
                .map(|subs| subs.iter().map(|(_, f)| Arc::clone(f)).collect())
                .unwrap_or_default();
            let has_async = registries
                .asynchronous
                .get(&kind)
                .is_some_and(|subs| !subs.is_empty());
            (subs, has_async)
        };

        for handler in sync_subs {
            match handler(event) {
                Ok(()) => {
                    self.inner
                        .counters
                        .events_processed
                        .fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => self.record_failure(event, &e),
            }
        }

        if has_async {
            let tx = {
                let lifecycle = self
                    .inner
                    .lifecycle
                    .lock()
                    .expect("bus lifecycle lock poisoned");
                lifecycle.tx.clone()
            };
            match tx {
                Some(tx) => {
                    if let Err(e) = tx.try_send(event.clone()) {
                        self.inner
                            .counters
                            .events_dropped
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(kind = %kind, "Event queue unavailable, dropping event: {e}");
                    }
                }
                None => {
                    self.inner
                        .counters
                        .events_dropped
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(kind = %kind, "Event bus not started, dropping event for async subscribers");
                }
            }
        }
    }

    /// Publishes an event onto the async queue, suspending while it is full.
    /// Lazily starts the bus if it is not running.
    pub async fn publish_async(&self, event: Event) -> Result<()> {
        if !self.is_running() {
            self.start().await?;
        }

        let tx = {
            let lifecycle = self
                .inner
                .lifecycle
                .lock()
                .expect("bus lifecycle lock poisoned");
            lifecycle.tx.clone()
        };
        let tx = tx.ok_or(EventError::BusNotRunning)?;

        tx.send(event.clone())
            .await
            .map_err(|_| EventError::QueueClosed)?;

        self.inner
            .counters
            .events_published
            .fetch_add(1, Ordering::Relaxed);
        let mut registries = self.lock_registries();
        push_capped(
            &mut registries.history,
            event,
            self.inner.config.max_history,
        );
        Ok(())
    }

    /// Recent events, newest last, optionally filtered by kind.
    pub fn get_event_history(&self, kind: Option<EventKind>, limit: usize) -> Vec<Event> {
        let registries = self.lock_registries();
        let matching: Vec<&Event> = registries
            .history
            .iter()
            .filter(|event| kind.is_none_or(|k| event.kind() == k))
            .collect();
        matching
            .into_iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.lock_registries().history.clear();
    }

    /// Failed deliveries retained for inspection, oldest first.
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock_registries().dead_letters.iter().cloned().collect()
    }

    /// Per-kind (sync, async) subscriber counts.
    pub fn subscriber_counts(&self, kind: EventKind) -> (usize, usize) {
        let registries = self.lock_registries();
        (
            registries.sync.get(&kind).map_or(0, Vec::len),
            registries.asynchronous.get(&kind).map_or(0, Vec::len),
        )
    }

    pub fn statistics(&self) -> BusStatistics {
        let registries = self.lock_registries();
        let counters = &self.inner.counters;
        BusStatistics {
            events_published: counters.events_published.load(Ordering::Relaxed),
            events_processed: counters.events_processed.load(Ordering::Relaxed),
            delivery_errors: counters.delivery_errors.load(Ordering::Relaxed),
            events_dropped: counters.events_dropped.load(Ordering::Relaxed),
            subscribers_count: counters.subscribers_count.load(Ordering::Relaxed),
            running: self.is_running(),
            history_len: registries.history.len(),
            dead_letter_len: registries.dead_letters.len(),
            sync_subscribers: registries
                .sync
                .iter()
                .filter(|(_, subs)| !subs.is_empty())
                .map(|(kind, subs)| (kind.as_str(), subs.len()))
                .collect(),
            async_subscribers: registries
                .asynchronous
                .iter()
                .filter(|(_, subs)| !subs.is_empty())
                .map(|(kind, subs)| (kind.as_str(), subs.len()))
                .collect(),
        }
    }

    fn push_async(&self, kind: EventKind, subscriber: AsyncSubscriber) -> SubscriptionId {
        let id = self.next_id();
        let mut registries = self.lock_registries();
        registries
            .asynchronous
            .entry(kind)
            .or_default()
            .push((id, subscriber));
        self.inner
            .counters
            .subscribers_count
            .fetch_add(1, Ordering::Relaxed);
        tracing::debug!(kind = %kind, "Subscribed (async)");
        id
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.inner.next_subscription.fetch_add(1, Ordering::Relaxed))
    }

    fn lock_registries(&self) -> std::sync::MutexGuard<'_, Registries> {
        self.inner
            .registries
            .lock()
            .expect("bus registry lock poisoned")
    }

    fn record_failure(&self, event: &Event, error: &HandlerError) {
        record_failure(&self.inner, event, error);
    }
}

fn push_capped<T>(buffer: &mut VecDeque<T>, item: T, cap: usize) {
    buffer.push_back(item);
    while buffer.len() > cap {
        buffer.pop_front();
    }
}

fn record_failure(inner: &BusInner, event: &Event, error: &HandlerError) {
    inner.counters.delivery_errors.fetch_add(1, Ordering::Relaxed);
    tracing::error!(kind = %event.kind(), event_id = %event.id, "Subscriber failed: {error}");
    let mut registries = inner.registries.lock().expect("bus registry lock poisoned");
    let cap = inner.config.dead_letter_capacity;
    push_capped(
        &mut registries.dead_letters,
        DeadLetter {
            event: event.clone(),
            error: error.to_string(),
            failed_at: Utc::now(),
        },
        cap,
    );
}

/// Single-consumer processing loop: dequeues in strict publish order and
/// fans each event out to its async subscribers. Returns the receiver so the
/// caller can drain the residue on shutdown.
async fn process_events(inner: Arc<BusInner>, mut rx: mpsc::Receiver<Event>) -> mpsc::Receiver<Event> {
    loop {
        if inner.shutting_down.load(Ordering::SeqCst) {
            break;
        }
        match timeout(inner.config.recv_timeout, rx.recv()).await {
            Ok(Some(event)) => deliver_to_async_subscribers(&inner, &event).await,
            Ok(None) => break,
            Err(_) => continue,
        }
    }
    rx
}

/// Fans one event out to all async subscribers of its kind concurrently,
/// collecting per-invocation results without propagating any of them.
async fn deliver_to_async_subscribers(inner: &Arc<BusInner>, event: &Event) {
    let kind = event.kind();
    let handlers: Vec<AsyncFn> = {
        let registries = inner.registries.lock().expect("bus registry lock poisoned");
        let Some(subs) = registries.asynchronous.get(&kind) else {
            return;
        };
        subs.iter()
            .map(|(_, subscriber)| match subscriber {
                AsyncSubscriber::Task(f) => Arc::clone(f),
                AsyncSubscriber::Blocking(f) => into_pooled(Arc::clone(f), Arc::clone(&inner.blocking_pool)),
            })
            .collect()
    };

    if handlers.is_empty() {
        return;
    }

    let invocations = handlers.into_iter().map(|handler| handler(event.clone()));
    for result in join_all(invocations).await {
        match result {
            Ok(()) => {
                inner
                    .counters
                    .events_processed
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => record_failure(inner, event, &e),
        }
    }
}

/// Adapts a blocking closure to the async contract by routing each call
/// through the semaphore-bounded worker pool.
fn into_pooled(handler: SyncFn, pool: Arc<Semaphore>) -> AsyncFn {
    Arc::new(move |event: Event| {
        let handler = Arc::clone(&handler);
        let pool = Arc::clone(&pool);
        Box::pin(async move {
            let _permit = pool
                .acquire_owned()
                .await
                .map_err(|_| HandlerError::Collaborator("blocking worker pool closed".into()))?;
            tokio::task::spawn_blocking(move || handler(&event))
                .await
                .map_err(|e| HandlerError::Collaborator(format!("blocking worker panicked: {e}")))?
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::envelope::UpdateScope;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> EventBusConfig {
        EventBusConfig {
            recv_timeout: Duration::from_millis(20),
            ..EventBusConfig::default()
        }
    }

    fn grid_event() -> Event {
        Event::grid_update(vec![], UpdateScope::Incremental, None)
    }

    async fn wait_until(check: impl Fn() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test]
    async fn test_sync_subscribers_run_in_registration_order() {
        let bus = EventBus::new(test_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let order = Arc::clone(&order);
            bus.subscribe(EventKind::GridUpdate, move |_| {
                order.lock().unwrap().push(tag);
                Ok(())
            });
        }

        bus.publish(&grid_event());
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
        assert_eq!(bus.statistics().events_processed, 3);
    }

    #[tokio::test]
    async fn test_failing_subscriber_does_not_block_later_ones() {
        let bus = EventBus::new(test_config());
        let ran = Arc::new(AtomicBool::new(false));

        bus.subscribe(EventKind::GridUpdate, |_| {
            Err(HandlerError::Collaborator("boom".into()))
        });
        let flag = Arc::clone(&ran);
        bus.subscribe(EventKind::GridUpdate, move |_| {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&grid_event());

        assert!(ran.load(Ordering::SeqCst));
        let stats = bus.statistics();
        assert_eq!(stats.delivery_errors, 1);
        assert_eq!(stats.events_processed, 1);
        assert_eq!(bus.dead_letters().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_capped_and_ordered() {
        let bus = EventBus::new(EventBusConfig {
            max_history: 5,
            ..test_config()
        });

        let mut ids = Vec::new();
        for _ in 0..8 {
            let event = grid_event();
            ids.push(event.id);
            bus.publish(&event);
        }

        let history = bus.get_event_history(None, 100);
        assert_eq!(history.len(), 5);
        let kept: Vec<_> = history.iter().map(|e| e.id).collect();
        assert_eq!(kept, ids[3..].to_vec());

        // Limit returns the most recent slice, still in order.
        let tail = bus.get_event_history(Some(EventKind::GridUpdate), 2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[1].id, ids[7]);
    }

    #[tokio::test]
    async fn test_sync_publish_without_queue_drops_with_warning() {
        let bus = EventBus::new(test_config());
        bus.subscribe_async(EventKind::GridUpdate, |_| async { Ok(()) });

        // Bus never started: the sync path cannot enqueue, so it drops.
        bus.publish(&grid_event());
        assert_eq!(bus.statistics().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_sync_publish_drops_when_queue_is_full() {
        let bus = EventBus::new(EventBusConfig {
            queue_capacity: 1,
            ..test_config()
        });
        let gate = Arc::new(Semaphore::new(0));
        let entered = Arc::new(AtomicUsize::new(0));

        let gate_sub = Arc::clone(&gate);
        let entered_sub = Arc::clone(&entered);
        bus.subscribe_async(EventKind::GridUpdate, move |_| {
            let gate = Arc::clone(&gate_sub);
            let entered = Arc::clone(&entered_sub);
            async move {
                entered.fetch_add(1, Ordering::SeqCst);
                gate.acquire()
                    .await
                    .map_err(|_| HandlerError::Collaborator("gate closed".into()))?
                    .forget();
                Ok(())
            }
        });

        bus.start().await.unwrap();
        // First event occupies the processing loop behind the gate, the
        // second fills the one-slot queue, the third has nowhere to go.
        bus.publish_async(grid_event()).await.unwrap();
        let entered_check = Arc::clone(&entered);
        wait_until(move || entered_check.load(Ordering::SeqCst) == 1).await;
        bus.publish(&grid_event());
        bus.publish(&grid_event());

        assert_eq!(bus.statistics().events_dropped, 1);

        gate.add_permits(2);
        bus.stop().await;
        assert_eq!(entered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_publish_async_lazily_starts_and_delivers_exactly_once() {
        let bus = EventBus::new(test_config());
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        bus.subscribe_async(EventKind::GridUpdate, move |_| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        assert!(!bus.is_running());
        for _ in 0..3 {
            bus.publish_async(grid_event()).await.unwrap();
        }
        assert!(bus.is_running());

        let delivered = Arc::clone(&delivered);
        wait_until(move || delivered.load(Ordering::SeqCst) == 3).await;
        bus.stop().await;
    }

    #[tokio::test]
    async fn test_stop_drains_queued_events() {
        let bus = EventBus::new(test_config());
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        bus.subscribe_async(EventKind::GridUpdate, move |_| {
            let count = Arc::clone(&count);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        for _ in 0..5 {
            bus.publish_async(grid_event()).await.unwrap();
        }
        bus.stop().await;

        assert_eq!(delivered.load(Ordering::SeqCst), 5);
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn test_blocking_subscribers_run_through_worker_pool() {
        let bus = EventBus::new(test_config());
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        bus.subscribe_blocking(EventKind::GridUpdate, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish_async(grid_event()).await.unwrap();
        let delivered_check = Arc::clone(&delivered);
        wait_until(move || delivered_check.load(Ordering::SeqCst) == 1).await;
        bus.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_publish_keeps_counters_consistent() {
        let bus = EventBus::new(test_config());
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        bus.subscribe(EventKind::GridUpdate, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let bus = bus.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    bus.publish(&grid_event());
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(delivered.load(Ordering::SeqCst), 800);
        let stats = bus.statistics();
        assert_eq!(stats.events_published, 800);
        assert_eq!(stats.events_processed, 800);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_handler() {
        let bus = EventBus::new(test_config());
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        let id = bus.subscribe(EventKind::GridUpdate, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&grid_event());
        bus.unsubscribe(EventKind::GridUpdate, id);
        bus.publish(&grid_event());

        assert_eq!(delivered.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_counts(EventKind::GridUpdate), (0, 0));
    }

    #[tokio::test]
    async fn test_kind_filtering_only_invokes_matching_subscribers() {
        let bus = EventBus::new(test_config());
        let grid_hits = Arc::new(AtomicUsize::new(0));
        let viz_hits = Arc::new(AtomicUsize::new(0));

        let count = Arc::clone(&grid_hits);
        bus.subscribe(EventKind::GridUpdate, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let count = Arc::clone(&viz_hits);
        bus.subscribe(EventKind::VisualizationUpdate, move |_| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        bus.publish(&grid_event());

        assert_eq!(grid_hits.load(Ordering::SeqCst), 1);
        assert_eq!(viz_hits.load(Ordering::SeqCst), 0);
    }
}
