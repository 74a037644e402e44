//! Core error types for the PulseGrid event system.
//!
//! The taxonomy separates handler business failures (isolated and counted at
//! both the handler and the bus), bus delivery faults, and dispatcher
//! scheduling faults. None of these are end-user facing; they surface through
//! counters and logs. Only `start()` failures propagate to the caller.

use thiserror::Error;

/// Type alias for Result using the event system Error type.
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors raised by the bus and dispatcher lifecycle and loops.
#[derive(Error, Debug)]
pub enum EventError {
    #[error("Event bus is not running")]
    BusNotRunning,

    #[error("Event queue is closed")]
    QueueClosed,

    #[error("Scheduling error: {0}")]
    Scheduling(String),

    #[error("No handler registered under name '{0}'")]
    UnknownHandler(String),

    #[error("Invalid configuration value: {0}")]
    InvalidConfigValue(String),
}

/// A business-logic failure inside an event handler.
///
/// Handlers log and count these locally, then re-raise so the bus delivery
/// layer also records the failure. Delivery never aborts on them.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Collaborator call failed: {0}")]
    Collaborator(String),

    #[error("Webhook processing failed: {0}")]
    Processor(#[from] ProcessorError),

    #[error("Malformed event payload: {0}")]
    MalformedPayload(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

/// A failure translating a raw vendor webhook payload.
#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("Unsupported webhook type: {0}")]
    UnsupportedType(String),

    #[error("Invalid webhook payload: {0}")]
    InvalidPayload(String),
}
