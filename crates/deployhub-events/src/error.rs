//! Error types for the events service.

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Failure to hand an event to one subscriber.
///
/// Every variant is terminal for that subscriber: the broadcaster evicts it
/// and its connection moves to `Closing`.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The subscriber's outbound buffer is gone.
    #[error("subscriber outbox closed")]
    Closed,

    /// The outbound buffer stayed full for the whole delivery window.
    #[error("delivery timed out after {0:?}")]
    TimedOut(Duration),
}

/// Invalid connection state transition.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// The requested transition skips a state or goes backwards.
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}
