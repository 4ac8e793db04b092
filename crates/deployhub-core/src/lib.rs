//! DeployHub core types.
//!
//! This crate holds everything the DeployHub services share:
//!
//! - [`event`] - Opaque change events and the bus wire framing
//! - [`channel`] - The publish channel abstraction with in-process and NNG
//!   PUB/SUB implementations
//! - [`metrics`] - Named counters and gauges with Prometheus text export
//! - [`error`] - Channel error types
//!
//! # Example
//!
//! ```ignore
//! use deployhub_core::{Event, LocalChannel, PublishChannel, DEFAULT_TOPIC};
//!
//! let channel = LocalChannel::new(64);
//! let mut events = channel.subscribe(DEFAULT_TOPIC)?;
//! channel.publish(DEFAULT_TOPIC, Event::from(r#"{"id":1}"#))?;
//! let event = events.recv().await;
//! ```

pub mod channel;
pub mod error;
pub mod event;
pub mod metrics;

pub use channel::{
    EventStream, LocalChannel, NngChannel, NngChannelConfig, PublishChannel, SharedChannel,
    DEFAULT_BUS_ADDRESS,
};
pub use error::ChannelError;
pub use event::{Event, DEFAULT_TOPIC};
pub use metrics::{Counter, Gauge, MetricsRegistry, SharedMetrics};
