//! Record store configuration.

use std::path::PathBuf;

use clap::Parser;
use deployhub_core::DEFAULT_TOPIC;

use crate::store::StoreConfig;

/// DeployHub record store command line arguments.
#[derive(Debug, Parser)]
#[command(name = "deployhub-records")]
#[command(about = "Deployment record store for DeployHub")]
pub struct Args {
    /// Address to listen on for HTTP requests.
    #[arg(short, long, env = "RECORDS_LISTEN", default_value = "0.0.0.0:8081")]
    pub listen: String,

    /// Directory holding the record database.
    #[arg(short, long, env = "DATA_DIR", default_value = "./data/records")]
    pub data_dir: PathBuf,

    /// NNG address the publish channel listens on.
    #[arg(short, long, env = "BUS_LISTEN", default_value = "tcp://0.0.0.0:7400")]
    pub bus: String,

    /// Topic change events are published on.
    #[arg(short, long, env = "EVENTS_TOPIC", default_value = DEFAULT_TOPIC)]
    pub topic: String,

    /// Page cache capacity in megabytes.
    #[arg(long, default_value_t = 64)]
    pub cache_mb: u64,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Record store configuration.
#[derive(Debug, Clone)]
pub struct RecordsConfig {
    /// Address to listen on.
    pub listen_addr: String,
    /// Publish channel listen address.
    pub bus_addr: String,
    /// Topic carrying change events.
    pub topic: String,
    /// Storage settings.
    pub store: StoreConfig,
}

impl RecordsConfig {
    /// Set the listen address.
    pub fn with_listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = addr.into();
        self
    }

    /// Set the topic.
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Set the storage settings.
    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

impl From<&Args> for RecordsConfig {
    fn from(args: &Args) -> Self {
        let mut store = StoreConfig::new(&args.data_dir);
        store.cache_capacity = args.cache_mb * 1024 * 1024;

        Self {
            listen_addr: args.listen.clone(),
            bus_addr: args.bus.clone(),
            topic: args.topic.clone(),
            store,
        }
    }
}

impl Default for RecordsConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8081".to_string(),
            bus_addr: "tcp://0.0.0.0:7400".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            store: StoreConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["deployhub-records"]);
        let config = RecordsConfig::from(&args);

        assert_eq!(config.listen_addr, "0.0.0.0:8081");
        assert_eq!(config.bus_addr, "tcp://0.0.0.0:7400");
        assert_eq!(config.topic, "deployments.events");
        assert_eq!(config.store.path, PathBuf::from("./data/records"));
        assert_eq!(config.store.cache_capacity, 64 * 1024 * 1024);
    }

    #[test]
    fn test_data_dir_override() {
        let args = Args::parse_from(["deployhub-records", "--data-dir", "/var/lib/deployhub"]);
        let config = RecordsConfig::from(&args);
        assert_eq!(config.store.path, PathBuf::from("/var/lib/deployhub"));
    }
}
