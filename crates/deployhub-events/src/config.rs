//! Events service configuration.

use std::time::Duration;

use clap::Parser;
use deployhub_core::DEFAULT_TOPIC;

use crate::broadcaster::DEFAULT_DELIVERY_TIMEOUT;
use crate::connection::{ConnectionSettings, DEFAULT_OUTBOUND_BUFFER, DEFAULT_WRITE_TIMEOUT};

/// DeployHub events service command line arguments.
#[derive(Debug, Parser)]
#[command(name = "deployhub-events")]
#[command(about = "Real-time WebSocket fan-out of DeployHub change events")]
pub struct Args {
    /// Address to listen on for HTTP and WebSocket requests.
    #[arg(short, long, env = "EVENTS_LISTEN", default_value = "0.0.0.0:8082")]
    pub listen: String,

    /// NNG address of the publish channel to dial.
    #[arg(short, long, env = "BUS_ADDR", default_value = "tcp://127.0.0.1:7400")]
    pub bus: String,

    /// Topic to subscribe to.
    #[arg(short, long, env = "EVENTS_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Events buffered per subscriber before deliveries start waiting.
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_BUFFER)]
    pub outbound_buffer: usize,

    /// Time (ms) a delivery may wait for room in a subscriber buffer.
    #[arg(long, default_value_t = DEFAULT_DELIVERY_TIMEOUT.as_millis() as u64)]
    pub delivery_timeout_ms: u64,

    /// Time (ms) a single WebSocket write may take.
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    pub write_timeout_ms: u64,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Events service configuration.
#[derive(Debug, Clone)]
pub struct EventsConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// Publish channel address.
    pub bus_addr: String,
    /// Topic carrying change events.
    pub topic: String,
    /// Per-subscriber outbound buffer size.
    pub outbound_buffer: usize,
    /// Per-subscriber delivery timeout.
    pub delivery_timeout: Duration,
    /// Per-write socket timeout.
    pub write_timeout: Duration,
}

impl EventsConfig {
    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the outbound buffer size.
    pub fn with_outbound_buffer(mut self, buffer: usize) -> Self {
        self.outbound_buffer = buffer;
        self
    }

    /// Set the delivery timeout.
    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = timeout;
        self
    }

    /// Set the write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Settings applied to each connection.
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            outbound_buffer: self.outbound_buffer,
            write_timeout: self.write_timeout,
        }
    }
}

impl From<&Args> for EventsConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            bus_addr: args.bus.clone(),
            topic: args.topic.clone(),
            outbound_buffer: args.outbound_buffer.max(1),
            delivery_timeout: Duration::from_millis(args.delivery_timeout_ms),
            write_timeout: Duration::from_millis(args.write_timeout_ms),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8082".to_string(),
            bus_addr: "tcp://127.0.0.1:7400".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
            delivery_timeout: DEFAULT_DELIVERY_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}
