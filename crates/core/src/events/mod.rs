//! Event envelope, bus, dispatcher, and handler registry.

pub mod bus;
pub mod dispatcher;
pub mod envelope;
pub mod registry;
pub mod schedules;

pub use bus::{BusStatistics, DeadLetter, EventBus, EventBusConfig, SubscriptionId};
pub use dispatcher::{
    Clock, DispatcherConfig, DispatcherStatistics, SystemClock, TimeEventDispatcher,
};
pub use envelope::{
    BoundaryKind, Event, EventKind, EventPayload, EventPriority, LayerKind, UpdateScope,
    VisualizationKind,
};
pub use registry::HandlerRegistry;
pub use schedules::{ScheduleId, ScheduledEntry, TimeBasedEventScheduler};
