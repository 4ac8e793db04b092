//! Publish channel error types.

use thiserror::Error;

/// Errors raised by a publish channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The channel was closed and accepts no more publishers or subscribers.
    #[error("publish channel is closed")]
    Closed,

    /// Topic name is empty, too long, or contains a NUL byte.
    #[error("invalid topic: {0}")]
    InvalidTopic(String),

    /// Frame could not be encoded or decoded.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// The channel was opened without a publish endpoint.
    #[error("channel has no publish endpoint")]
    NotPublisher,

    /// The channel was opened without a subscribe endpoint.
    #[error("channel has no subscribe endpoint")]
    NotSubscriber,

    /// Underlying transport failure.
    #[error("transport error: {0}")]
    Transport(String),
}
