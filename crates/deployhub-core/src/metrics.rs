//! Service metrics.
//!
//! Every service keeps one [`MetricsRegistry`] and hands out [`Counter`] and
//! [`Gauge`] handles to the components that record into it. The registry
//! renders everything in the Prometheus text exposition format for the
//! `/metrics` endpoint.
//!
//! ```ignore
//! let metrics = MetricsRegistry::new("deployhub_events");
//! let delivered = metrics.counter("events_delivered_total", "Events delivered to subscribers");
//! delivered.inc();
//! let text = metrics.to_prometheus();
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

/// Monotonic counter handle.
#[derive(Debug, Clone, Default)]
pub struct Counter(Arc<AtomicU64>);

impl Counter {
    /// Increment by one.
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Gauge handle that can go up and down.
#[derive(Debug, Clone, Default)]
pub struct Gauge(Arc<AtomicI64>);

impl Gauge {
    /// Set the value.
    pub fn set(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Current value.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
enum Metric {
    Counter { help: String, handle: Counter },
    Gauge { help: String, handle: Gauge },
}

/// Registry of named metrics for one service.
#[derive(Debug)]
pub struct MetricsRegistry {
    namespace: String,
    started_at: Instant,
    metrics: RwLock<BTreeMap<String, Metric>>,
}

impl MetricsRegistry {
    /// Create a registry whose metric names are prefixed with `namespace`.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            started_at: Instant::now(),
            metrics: RwLock::new(BTreeMap::new()),
        }
    }

    /// Get or create a counter.
    ///
    /// Asking for a name already registered as a gauge returns a detached
    /// counter that is never exported.
    pub fn counter(&self, name: &str, help: &str) -> Counter {
        if let Some(Metric::Counter { handle, .. }) = self.metrics.read().get(name) {
            return handle.clone();
        }

        let mut metrics = self.metrics.write();
        let entry = metrics.entry(name.to_string()).or_insert_with(|| Metric::Counter {
            help: help.to_string(),
            handle: Counter::default(),
        });
        match entry {
            Metric::Counter { handle, .. } => handle.clone(),
            Metric::Gauge { .. } => {
                tracing::warn!(name, "metric already registered as a gauge");
                Counter::default()
            }
        }
    }

    /// Get or create a gauge.
    pub fn gauge(&self, name: &str, help: &str) -> Gauge {
        if let Some(Metric::Gauge { handle, .. }) = self.metrics.read().get(name) {
            return handle.clone();
        }

        let mut metrics = self.metrics.write();
        let entry = metrics.entry(name.to_string()).or_insert_with(|| Metric::Gauge {
            help: help.to_string(),
            handle: Gauge::default(),
        });
        match entry {
            Metric::Gauge { handle, .. } => handle.clone(),
            Metric::Counter { .. } => {
                tracing::warn!(name, "metric already registered as a counter");
                Gauge::default()
            }
        }
    }

    /// Seconds since the registry was created.
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Export all metrics in Prometheus text format.
    pub fn to_prometheus(&self) -> String {
        let ns = &self.namespace;
        let mut out = String::new();

        out.push_str(&format!("# HELP {ns}_uptime_seconds Service uptime in seconds\n"));
        out.push_str(&format!("# TYPE {ns}_uptime_seconds gauge\n"));
        out.push_str(&format!("{ns}_uptime_seconds {}\n\n", self.uptime_secs()));

        for (name, metric) in self.metrics.read().iter() {
            let (help, kind, value) = match metric {
                Metric::Counter { help, handle } => (help, "counter", handle.get() as i64),
                Metric::Gauge { help, handle } => (help, "gauge", handle.get()),
            };
            out.push_str(&format!("# HELP {ns}_{name} {help}\n"));
            out.push_str(&format!("# TYPE {ns}_{name} {kind}\n"));
            out.push_str(&format!("{ns}_{name} {value}\n\n"));
        }

        out
    }
}

/// Shared metrics registry handle.
pub type SharedMetrics = Arc<MetricsRegistry>;
