//! PulseGrid core: the event-driven coordination layer of a geospatial
//! demand-analytics platform.
//!
//! The crate provides a typed in-process event bus, a time-boundary and
//! scheduled-event dispatcher, and the reactive handlers that keep assumption
//! layers, the scoring grid, and visualization surfaces consistent as
//! external events flow in. Analytics subsystems are reached only through
//! the collaborator traits in [`collaborators`].

pub mod collaborators;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod models;

pub use errors::{EventError, HandlerError, ProcessorError, Result};
