//! Time-boundary monitor and scheduled-event dispatcher.
//!
//! Two periodic loops run against the bus: the boundary monitor compares the
//! current wall clock against the last observation and publishes a
//! `TimeChange` event per crossed hour/day/week/month boundary, and the
//! scheduler fires one-shot entries whose time has come. Both loops read time
//! through the [`Clock`] seam so boundary logic is testable without waiting
//! for real boundaries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::Serialize;

use crate::errors::{EventError, Result};
use crate::events::bus::{BusStatistics, EventBus};
use crate::events::envelope::{BoundaryKind, Event, EventPriority, LayerKind};
use crate::events::schedules::{ScheduleId, ScheduledEntry};

/// Source of the current time. Production uses [`SystemClock`]; tests inject
/// a stepped clock to force boundary crossings.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Poll interval of the boundary monitor. Values below one second are
    /// rejected at start.
    pub monitor_interval: Duration,
    /// Poll interval of the scheduled-event loop.
    pub scheduler_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            monitor_interval: Duration::from_secs(60),
            scheduler_interval: Duration::from_secs(10),
        }
    }
}

/// Snapshot of dispatcher state for observability.
#[derive(Clone, Debug, Serialize)]
pub struct DispatcherStatistics {
    pub running: bool,
    pub pending_scheduled: usize,
    pub boundaries_emitted: u64,
    pub scheduled_fired: u64,
    pub publish_errors: u64,
    pub bus: BusStatistics,
}

struct DispatcherInner {
    bus: EventBus,
    clock: Arc<dyn Clock>,
    config: DispatcherConfig,
    running: AtomicBool,
    last_seen: Mutex<DateTime<Utc>>,
    schedules: Mutex<Vec<ScheduledEntry>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    next_schedule_id: AtomicU64,
    boundaries_emitted: AtomicU64,
    scheduled_fired: AtomicU64,
    publish_errors: AtomicU64,
}

/// Cloneable handle to the dispatcher.
#[derive(Clone)]
pub struct TimeEventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl TimeEventDispatcher {
    pub fn new(bus: EventBus, config: DispatcherConfig) -> Self {
        Self::with_clock(bus, config, Arc::new(SystemClock))
    }

    pub fn with_clock(bus: EventBus, config: DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self {
            inner: Arc::new(DispatcherInner {
                bus,
                clock,
                config,
                running: AtomicBool::new(false),
                last_seen: Mutex::new(now),
                schedules: Mutex::new(Vec::new()),
                tasks: Mutex::new(Vec::new()),
                next_schedule_id: AtomicU64::new(1),
                boundaries_emitted: AtomicU64::new(0),
                scheduled_fired: AtomicU64::new(0),
                publish_errors: AtomicU64::new(0),
            }),
        }
    }

    /// Starts the bus (if needed) and both loops. Idempotent while running.
    pub async fn start(&self) -> Result<()> {
        if self.inner.config.monitor_interval < Duration::from_secs(1) {
            return Err(EventError::InvalidConfigValue(format!(
                "monitor interval {:?} is below the 1s minimum",
                self.inner.config.monitor_interval
            )));
        }
        self.inner.bus.start().await?;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        *self
            .inner
            .last_seen
            .lock()
            .expect("dispatcher clock lock poisoned") = self.inner.clock.now();

        let monitor = {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                let interval = dispatcher.inner.config.monitor_interval;
                while dispatcher.inner.running.load(Ordering::SeqCst) {
                    tokio::time::sleep(interval).await;
                    if !dispatcher.inner.running.load(Ordering::SeqCst) {
                        break;
                    }
                    dispatcher.check_time_boundaries().await;
                }
            })
        };
        let scheduler = {
            let dispatcher = self.clone();
            tokio::spawn(async move {
                let interval = dispatcher.inner.config.scheduler_interval;
                while dispatcher.inner.running.load(Ordering::SeqCst) {
                    tokio::time::sleep(interval).await;
                    if !dispatcher.inner.running.load(Ordering::SeqCst) {
                        break;
                    }
                    dispatcher.fire_due_events().await;
                }
            })
        };

        let mut tasks = self.inner.tasks.lock().expect("dispatcher task lock poisoned");
        tasks.push(monitor);
        tasks.push(scheduler);
        tracing::info!("Time event dispatcher started");
        Ok(())
    }

    /// Stops both loops, then the bus (draining its queue). Already-published
    /// events are unaffected.
    pub async fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            let tasks: Vec<_> = self
                .inner
                .tasks
                .lock()
                .expect("dispatcher task lock poisoned")
                .drain(..)
                .collect();
            for task in tasks {
                task.abort();
            }
            tracing::info!("Time event dispatcher stopped");
        }
        self.inner.bus.stop().await;
    }

    /// Publishes immediately on the synchronous path.
    pub fn dispatch_event_now(&self, event: &Event) {
        self.inner.bus.publish(event);
    }

    /// Publishes immediately on the async queue.
    pub async fn dispatch_event_async(&self, event: Event) -> Result<()> {
        self.inner.bus.publish_async(event).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Schedules a one-shot event at an absolute time. Entries in the past
    /// fire on the next scheduler tick.
    pub fn schedule_event(&self, event: Event, fire_at: DateTime<Utc>) -> ScheduleId {
        let id = ScheduleId(self.inner.next_schedule_id.fetch_add(1, Ordering::Relaxed));
        let mut schedules = self
            .inner
            .schedules
            .lock()
            .expect("dispatcher schedule lock poisoned");
        let position = schedules
            .partition_point(|entry| entry.fire_at <= fire_at);
        schedules.insert(position, ScheduledEntry { id, fire_at, event });
        tracing::debug!(%fire_at, "Scheduled one-shot event");
        id
    }

    /// Schedules an event one `interval` from now. Despite the name this is
    /// a single firing; callers re-arm from their own handling if they want
    /// true recurrence.
    pub fn schedule_recurring_event(&self, event: Event, interval: Duration) -> Result<ScheduleId> {
        let interval = chrono::Duration::from_std(interval)
            .map_err(|e| EventError::Scheduling(format!("interval out of range: {e}")))?;
        Ok(self.schedule_event(event, self.inner.clock.now() + interval))
    }

    /// Removes a pending entry. Returns whether anything was removed.
    pub fn cancel_scheduled(&self, id: ScheduleId) -> bool {
        let mut schedules = self
            .inner
            .schedules
            .lock()
            .expect("dispatcher schedule lock poisoned");
        let before = schedules.len();
        schedules.retain(|entry| entry.id != id);
        before != schedules.len()
    }

    /// Pending entries, soonest first.
    pub fn get_scheduled_events(&self) -> Vec<ScheduledEntry> {
        self.inner
            .schedules
            .lock()
            .expect("dispatcher schedule lock poisoned")
            .clone()
    }

    pub fn clear_scheduled_events(&self) {
        self.inner
            .schedules
            .lock()
            .expect("dispatcher schedule lock poisoned")
            .clear();
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.inner.clock.now()
    }

    pub fn statistics(&self) -> DispatcherStatistics {
        DispatcherStatistics {
            running: self.is_running(),
            pending_scheduled: self
                .inner
                .schedules
                .lock()
                .expect("dispatcher schedule lock poisoned")
                .len(),
            boundaries_emitted: self.inner.boundaries_emitted.load(Ordering::Relaxed),
            scheduled_fired: self.inner.scheduled_fired.load(Ordering::Relaxed),
            publish_errors: self.inner.publish_errors.load(Ordering::Relaxed),
            bus: self.inner.bus.statistics(),
        }
    }

    /// One boundary-monitor pass: detect crossings since the last
    /// observation, publish a high-priority `TimeChange` per crossing, and
    /// advance the baseline. Hour and day crossings additionally request a
    /// full assumption-layer recalculation.
    pub async fn check_time_boundaries(&self) {
        let now = self.inner.clock.now();
        let previous = {
            let mut last_seen = self
                .inner
                .last_seen
                .lock()
                .expect("dispatcher clock lock poisoned");
            let previous = *last_seen;
            *last_seen = now;
            previous
        };

        for boundary in crossed_boundaries(previous, now) {
            tracing::info!(boundary = boundary.as_str(), "Time boundary crossed");
            self.inner.boundaries_emitted.fetch_add(1, Ordering::Relaxed);

            let event = Event::time_change(previous, now, boundary)
                .with_priority(EventPriority::High);
            if let Err(e) = self.inner.bus.publish_async(event).await {
                self.inner.publish_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to publish time change event: {e}");
            }

            let layer_reason = match boundary {
                BoundaryKind::Hour => Some("hour_change"),
                BoundaryKind::Day => Some("day_change"),
                _ => None,
            };
            if let Some(reason) = layer_reason {
                let update = Event::assumption_layer_update(LayerKind::All, reason);
                if let Err(e) = self.inner.bus.publish_async(update).await {
                    self.inner.publish_errors.fetch_add(1, Ordering::Relaxed);
                    tracing::error!("Failed to publish assumption layer update: {e}");
                }
            }
        }
    }

    /// One scheduler pass: publish and drop every entry whose time has come.
    pub async fn fire_due_events(&self) {
        let now = self.inner.clock.now();
        let due: Vec<ScheduledEntry> = {
            let mut schedules = self
                .inner
                .schedules
                .lock()
                .expect("dispatcher schedule lock poisoned");
            let split = schedules.partition_point(|entry| entry.fire_at <= now);
            schedules.drain(..split).collect()
        };

        for entry in due {
            tracing::debug!(fire_at = %entry.fire_at, "Firing scheduled event");
            self.inner.scheduled_fired.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = self.inner.bus.publish_async(entry.event).await {
                self.inner.publish_errors.fetch_add(1, Ordering::Relaxed);
                tracing::error!("Failed to publish scheduled event: {e}");
            }
        }
    }
}

/// Boundaries crossed moving from `previous` to `now`, coarsest last.
fn crossed_boundaries(previous: DateTime<Utc>, now: DateTime<Utc>) -> Vec<BoundaryKind> {
    let mut crossed = Vec::new();
    if previous.date_naive() != now.date_naive() || previous.hour() != now.hour() {
        crossed.push(BoundaryKind::Hour);
    }
    if previous.date_naive() != now.date_naive() {
        crossed.push(BoundaryKind::Day);
    }
    if previous.iso_week() != now.iso_week() {
        crossed.push(BoundaryKind::Week);
    }
    if (previous.year(), previous.month()) != (now.year(), now.month()) {
        crossed.push(BoundaryKind::Month);
    }
    crossed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::bus::EventBusConfig;
    use crate::events::envelope::{EventKind, EventPayload, UpdateScope};
    use chrono::TimeZone;

    struct SteppedClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl SteppedClock {
        fn new(start: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(start),
            })
        }

        fn set(&self, now: DateTime<Utc>) {
            *self.now.lock().unwrap() = now;
        }
    }

    impl Clock for SteppedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.now.lock().unwrap()
        }
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    fn test_bus() -> EventBus {
        EventBus::new(EventBusConfig {
            recv_timeout: Duration::from_millis(20),
            ..EventBusConfig::default()
        })
    }

    #[test]
    fn test_crossed_boundaries_hour_only() {
        let crossed = crossed_boundaries(at(2026, 8, 27, 10, 59), at(2026, 8, 27, 11, 0));
        assert_eq!(crossed, vec![BoundaryKind::Hour]);
    }

    #[test]
    fn test_crossed_boundaries_midnight() {
        // Thursday to Friday, same ISO week and month.
        let crossed = crossed_boundaries(at(2026, 8, 27, 23, 59), at(2026, 8, 28, 0, 0));
        assert_eq!(crossed, vec![BoundaryKind::Hour, BoundaryKind::Day]);
    }

    #[test]
    fn test_crossed_boundaries_month_turn() {
        // Aug 31 2026 is a Monday, Sep 1 a Tuesday: same ISO week.
        let crossed = crossed_boundaries(at(2026, 8, 31, 23, 30), at(2026, 9, 1, 0, 30));
        assert_eq!(
            crossed,
            vec![BoundaryKind::Hour, BoundaryKind::Day, BoundaryKind::Month]
        );
    }

    #[test]
    fn test_crossed_boundaries_none_within_hour() {
        assert!(crossed_boundaries(at(2026, 8, 27, 10, 0), at(2026, 8, 27, 10, 59)).is_empty());
    }

    #[tokio::test]
    async fn test_boundary_pass_publishes_time_change_and_layer_update() {
        let bus = test_bus();
        bus.start().await.unwrap();

        let clock = SteppedClock::new(at(2026, 8, 27, 10, 59));
        let dispatcher = TimeEventDispatcher::with_clock(
            bus.clone(),
            DispatcherConfig::default(),
            clock.clone(),
        );

        clock.set(at(2026, 8, 27, 11, 1));
        dispatcher.check_time_boundaries().await;
        bus.stop().await;

        let time_changes = bus.get_event_history(Some(EventKind::TimeChange), 10);
        assert_eq!(time_changes.len(), 1);
        assert_eq!(time_changes[0].priority, EventPriority::High);
        match &time_changes[0].payload {
            EventPayload::TimeChange { boundary_type, .. } => {
                assert_eq!(*boundary_type, BoundaryKind::Hour);
            }
            _ => panic!("Expected TimeChange"),
        }

        let layer_updates = bus.get_event_history(Some(EventKind::AssumptionLayerUpdate), 10);
        assert_eq!(layer_updates.len(), 1);
        match &layer_updates[0].payload {
            EventPayload::AssumptionLayerUpdate {
                recalculation_reason,
                ..
            } => assert_eq!(recalculation_reason, "hour_change"),
            _ => panic!("Expected AssumptionLayerUpdate"),
        }

        assert_eq!(dispatcher.statistics().boundaries_emitted, 1);
    }

    #[tokio::test]
    async fn test_midnight_pass_emits_hour_and_day_changes_once_each() {
        let bus = test_bus();
        bus.start().await.unwrap();

        let clock = SteppedClock::new(at(2026, 8, 27, 23, 59));
        let dispatcher = TimeEventDispatcher::with_clock(
            bus.clone(),
            DispatcherConfig::default(),
            clock.clone(),
        );

        clock.set(at(2026, 8, 28, 0, 1));
        dispatcher.check_time_boundaries().await;
        bus.stop().await;

        let time_changes = bus.get_event_history(Some(EventKind::TimeChange), 10);
        let boundaries: Vec<_> = time_changes
            .iter()
            .map(|event| match &event.payload {
                EventPayload::TimeChange { boundary_type, .. } => *boundary_type,
                _ => panic!("Expected TimeChange"),
            })
            .collect();
        assert_eq!(boundaries, vec![BoundaryKind::Hour, BoundaryKind::Day]);

        let reasons: Vec<_> = bus
            .get_event_history(Some(EventKind::AssumptionLayerUpdate), 10)
            .iter()
            .map(|event| match &event.payload {
                EventPayload::AssumptionLayerUpdate {
                    recalculation_reason,
                    ..
                } => recalculation_reason.clone(),
                _ => panic!("Expected AssumptionLayerUpdate"),
            })
            .collect();
        assert_eq!(reasons, vec!["hour_change", "day_change"]);

        let stats = dispatcher.statistics();
        assert_eq!(stats.boundaries_emitted, 2);
        assert_eq!(stats.publish_errors, 0);
    }

    #[tokio::test]
    async fn test_scheduler_fires_due_entries_in_order() {
        let bus = test_bus();
        bus.start().await.unwrap();

        let clock = SteppedClock::new(at(2026, 8, 27, 12, 0));
        let dispatcher = TimeEventDispatcher::with_clock(
            bus.clone(),
            DispatcherConfig::default(),
            clock.clone(),
        );

        let later = Event::grid_update(vec![], UpdateScope::Full, None);
        let sooner = Event::grid_update(vec![], UpdateScope::Incremental, None);
        let sooner_id = sooner.id;
        dispatcher.schedule_event(later, at(2026, 8, 27, 12, 30));
        dispatcher.schedule_event(sooner, at(2026, 8, 27, 12, 10));
        let far = dispatcher.schedule_event(
            Event::grid_update(vec![], UpdateScope::Full, None),
            at(2026, 8, 27, 18, 0),
        );

        clock.set(at(2026, 8, 27, 12, 45));
        dispatcher.fire_due_events().await;
        bus.stop().await;

        let fired = bus.get_event_history(Some(EventKind::GridUpdate), 10);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].id, sooner_id);
        assert_eq!(dispatcher.statistics().pending_scheduled, 1);
        assert!(dispatcher.cancel_scheduled(far));
        assert_eq!(dispatcher.statistics().pending_scheduled, 0);
    }

    #[tokio::test]
    async fn test_past_schedule_fires_on_next_pass() {
        let bus = test_bus();
        bus.start().await.unwrap();

        let clock = SteppedClock::new(at(2026, 8, 27, 12, 0));
        let dispatcher = TimeEventDispatcher::with_clock(
            bus.clone(),
            DispatcherConfig::default(),
            clock.clone(),
        );

        dispatcher.schedule_event(
            Event::grid_update(vec![], UpdateScope::Full, None),
            at(2026, 8, 27, 11, 0),
        );
        dispatcher.fire_due_events().await;
        bus.stop().await;

        assert_eq!(dispatcher.statistics().scheduled_fired, 1);
    }

    #[tokio::test]
    async fn test_recurring_schedule_is_single_shot() {
        let bus = test_bus();
        let clock = SteppedClock::new(at(2026, 8, 27, 12, 0));
        let dispatcher = TimeEventDispatcher::with_clock(
            bus.clone(),
            DispatcherConfig::default(),
            clock.clone(),
        );

        dispatcher
            .schedule_recurring_event(
                Event::grid_update(vec![], UpdateScope::Full, None),
                Duration::from_secs(600),
            )
            .unwrap();

        bus.start().await.unwrap();
        clock.set(at(2026, 8, 27, 12, 15));
        dispatcher.fire_due_events().await;
        assert_eq!(dispatcher.statistics().pending_scheduled, 0);

        // Nothing re-armed itself.
        clock.set(at(2026, 8, 27, 12, 45));
        dispatcher.fire_due_events().await;
        bus.stop().await;
        assert_eq!(dispatcher.statistics().scheduled_fired, 1);
    }

    #[tokio::test]
    async fn test_start_rejects_sub_second_monitor_interval() {
        let dispatcher = TimeEventDispatcher::new(
            test_bus(),
            DispatcherConfig {
                monitor_interval: Duration::from_millis(200),
                ..DispatcherConfig::default()
            },
        );
        assert!(matches!(
            dispatcher.start().await,
            Err(EventError::InvalidConfigValue(_))
        ));
        assert!(!dispatcher.is_running());
    }
}
