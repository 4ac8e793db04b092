//! Change event publishing.

use deployhub_core::{Counter, Event, MetricsRegistry, SharedChannel};

use crate::model::Deployment;

/// Publishes the JSON form of changed records to the publish channel.
///
/// Publishing is best effort: a failure is logged and counted, and never
/// undoes or fails the mutation that triggered it.
pub struct EventPublisher {
    channel: SharedChannel,
    topic: String,
    published: Counter,
    failures: Counter,
}

impl EventPublisher {
    /// Publish to `topic` on `channel`.
    pub fn new(channel: SharedChannel, topic: impl Into<String>) -> Self {
        Self {
            channel,
            topic: topic.into(),
            published: Counter::default(),
            failures: Counter::default(),
        }
    }

    /// Record into `metrics`.
    pub fn with_metrics(mut self, metrics: &MetricsRegistry) -> Self {
        self.published = metrics.counter("events_published_total", "Change events published");
        self.failures = metrics.counter("publish_failures_total", "Change events that could not be published");
        self
    }

    /// Whether the channel still accepts events.
    pub fn is_open(&self) -> bool {
        !self.channel.is_closed()
    }

    /// Announce a changed record.
    pub fn publish(&self, deployment: &Deployment) {
        let payload = match serde_json::to_vec(deployment) {
            Ok(payload) => payload,
            Err(e) => {
                self.failures.inc();
                tracing::error!(id = deployment.id, error = %e, "failed to encode change event");
                return;
            }
        };

        match self.channel.publish(&self.topic, Event::from(payload)) {
            Ok(()) => {
                self.published.inc();
                tracing::debug!(id = deployment.id, status = %deployment.status, topic = %self.topic, "change event published");
            }
            Err(e) => {
                self.failures.inc();
                tracing::warn!(id = deployment.id, topic = %self.topic, error = %e, "failed to publish change event");
            }
        }
    }
}
