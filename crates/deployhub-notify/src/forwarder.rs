//! Webhook forwarder.
//!
//! Every event read from the publish channel is POSTed to every configured
//! URL. URLs are served concurrently and independently within a round, so a
//! slow or failing endpoint delays only its own delivery. Rounds run one
//! event at a time, which keeps per-URL delivery in publish order.
//!
//! Delivery is at least once within a bounded number of attempts: transport
//! failures, timeouts and retryable statuses are retried after a linearly
//! growing delay. A delivery that runs out of attempts, or fails with a final
//! status, is dropped with an error log and counted as a dead letter.

use std::time::Duration;

use deployhub_core::{Counter, Event, EventStream, MetricsRegistry};
use futures::future::join_all;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_TYPE};

use crate::error::NotifyError;

/// Header identifying the notification kind to receivers.
pub const NOTIFICATION_HEADER: &str = "x-argo-notification";

/// Value of [`NOTIFICATION_HEADER`] for change events.
pub const NOTIFICATION_KIND: &str = "rollout-event";

/// Retry schedule for one delivery.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first. At least one.
    pub max_attempts: u32,
    /// Delay before the second attempt; later delays grow linearly.
    pub backoff: Duration,
    /// Cap on any single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt).min(self.max_backoff)
    }
}

/// Outcome of forwarding one event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ForwardReport {
    /// URLs that accepted the event.
    pub delivered: usize,
    /// URLs that never accepted it.
    pub dead_letters: usize,
}

#[derive(Debug, Clone, Default)]
struct ForwarderMetrics {
    events: Counter,
    deliveries: Counter,
    retries: Counter,
    dead_letters: Counter,
}

/// POSTs change events to a fixed set of webhook URLs.
pub struct WebhookForwarder {
    client: reqwest::Client,
    urls: Vec<String>,
    timeout: Duration,
    retry: RetryPolicy,
    metrics: ForwarderMetrics,
}

impl WebhookForwarder {
    /// Create a forwarder. Blank URLs are ignored.
    pub fn new(urls: Vec<String>, timeout: Duration, retry: RetryPolicy) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| NotifyError::Transport(format!("failed to build HTTP client: {}", e)))?;

        let urls = urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();

        Ok(Self {
            client,
            urls,
            timeout,
            retry: RetryPolicy {
                max_attempts: retry.max_attempts.max(1),
                ..retry
            },
            metrics: ForwarderMetrics::default(),
        })
    }

    /// Record into `metrics`.
    pub fn with_metrics(mut self, metrics: &MetricsRegistry) -> Self {
        self.metrics = ForwarderMetrics {
            events: metrics.counter("events_received_total", "Events read from the publish channel"),
            deliveries: metrics.counter("webhook_deliveries_total", "Webhook deliveries accepted"),
            retries: metrics.counter("webhook_retries_total", "Webhook attempts retried"),
            dead_letters: metrics.counter(
                "webhook_dead_letters_total",
                "Webhook deliveries dropped after failing",
            ),
        };
        self
    }

    /// Configured URLs.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Forward every event until the stream ends.
    pub async fn run(&self, mut events: EventStream) {
        tracing::info!(topic = events.topic(), urls = self.urls.len(), "forwarder started");
        while let Some(event) = events.recv().await {
            self.forward(&event).await;
        }
        tracing::info!(topic = events.topic(), "publish channel closed, forwarder stopped");
    }

    /// Deliver one event to every URL.
    pub async fn forward(&self, event: &Event) -> ForwardReport {
        self.metrics.events.inc();
        if self.urls.is_empty() {
            tracing::trace!("no webhook urls configured");
            return ForwardReport::default();
        }

        let results = join_all(self.urls.iter().map(|url| self.deliver(url, event))).await;

        let mut report = ForwardReport::default();
        for (url, result) in self.urls.iter().zip(results) {
            match result {
                Ok(attempts) => {
                    report.delivered += 1;
                    self.metrics.deliveries.inc();
                    tracing::debug!(%url, attempts, "webhook delivered");
                }
                Err(e) => {
                    report.dead_letters += 1;
                    self.metrics.dead_letters.inc();
                    tracing::error!(%url, error = %e, bytes = event.len(), "webhook delivery dropped");
                }
            }
        }
        report
    }

    /// Deliver to one URL, retrying as the policy allows. Returns the number
    /// of attempts used.
    pub async fn deliver(&self, url: &str, event: &Event) -> Result<u32, NotifyError> {
        let mut attempt = 1;
        loop {
            match self.attempt(url, event).await {
                Ok(()) => return Ok(attempt),
                Err(e) if e.is_retryable() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay(attempt);
                    self.metrics.retries.inc();
                    tracing::warn!(%url, attempt, error = %e, delay = ?delay, "webhook attempt failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn attempt(&self, url: &str, event: &Event) -> Result<(), NotifyError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(
                HeaderName::from_static(NOTIFICATION_HEADER),
                HeaderValue::from_static(NOTIFICATION_KIND),
            )
            .body(event.payload().clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    NotifyError::Timeout(self.timeout)
                } else if e.is_builder() {
                    NotifyError::InvalidUrl(url.to_string())
                } else {
                    NotifyError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(NotifyError::Status(status.as_u16()))
        }
    }
}
