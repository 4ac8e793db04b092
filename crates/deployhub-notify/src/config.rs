//! Forwarder configuration.

use std::time::Duration;

use clap::Parser;
use deployhub_core::DEFAULT_TOPIC;

use crate::forwarder::RetryPolicy;

/// DeployHub webhook forwarder command line arguments.
#[derive(Debug, Parser)]
#[command(name = "deployhub-notify")]
#[command(about = "Forwards DeployHub change events to webhooks")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, env = "NOTIFY_LISTEN", default_value = "0.0.0.0:8083")]
    pub listen: String,

    /// NNG address of the publish channel to dial.
    #[arg(short, long, env = "BUS_ADDR", default_value = "tcp://127.0.0.1:7400")]
    pub bus: String,

    /// Topic to subscribe to.
    #[arg(short, long, env = "EVENTS_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Webhook URLs, comma-separated or repeated.
    #[arg(short, long = "webhook", env = "WEBHOOK_URLS", value_delimiter = ',')]
    pub webhooks: Vec<String>,

    /// Per-attempt timeout (ms).
    #[arg(long, default_value_t = 5_000)]
    pub timeout_ms: u64,

    /// Attempts per delivery, including the first.
    #[arg(long, default_value_t = 3)]
    pub max_attempts: u32,

    /// Delay (ms) before the first retry; later retries wait proportionally longer.
    #[arg(long, default_value_t = 200)]
    pub backoff_ms: u64,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Forwarder configuration.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// Publish channel address.
    pub bus_addr: String,
    /// Topic carrying change events.
    pub topic: String,
    /// Webhook URLs.
    pub webhook_urls: Vec<String>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Retry schedule.
    pub retry: RetryPolicy,
}

impl NotifyConfig {
    /// Set the webhook URLs.
    pub fn with_webhook_urls(mut self, urls: Vec<String>) -> Self {
        self.webhook_urls = urls;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry schedule.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl From<&Args> for NotifyConfig {
    fn from(args: &Args) -> Self {
        Self {
            listen_addr: args.listen.clone(),
            bus_addr: args.bus.clone(),
            topic: args.topic.clone(),
            webhook_urls: args.webhooks.clone(),
            timeout: Duration::from_millis(args.timeout_ms),
            retry: RetryPolicy {
                max_attempts: args.max_attempts,
                backoff: Duration::from_millis(args.backoff_ms),
                ..RetryPolicy::default()
            },
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8083".to_string(),
            bus_addr: "tcp://127.0.0.1:7400".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            webhook_urls: Vec::new(),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
        }
    }
}
