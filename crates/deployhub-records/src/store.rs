//! Deployment storage on sled.
//!
//! Records live in one tree keyed by the big-endian ID, so iterating the
//! tree in reverse yields the newest record first. IDs come from sled's
//! persistent monotonic generator.

use std::path::PathBuf;

use chrono::Utc;
use sled::{Db, Tree};

use crate::error::RecordError;
use crate::model::{Deployment, DeploymentInput};

/// Tree holding deployment records.
const DEPLOYMENTS_TREE: &str = "deployments";

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the database directory.
    pub path: PathBuf,
    /// Page cache capacity in bytes.
    pub cache_capacity: u64,
    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,
    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/records"),
            cache_capacity: 64 * 1024 * 1024,
            flush_every_ms: Some(500),
            temporary: false,
        }
    }
}

impl StoreConfig {
    /// Create a configuration for the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::new(),
            temporary: true,
            ..Default::default()
        }
    }

    fn to_sled_config(&self) -> sled::Config {
        let config = sled::Config::new()
            .cache_capacity(self.cache_capacity)
            .use_compression(true)
            .flush_every_ms(self.flush_every_ms);

        if self.temporary {
            config.temporary(true)
        } else {
            config.path(&self.path)
        }
    }
}

/// Deployment record store.
pub struct DeploymentStore {
    db: Db,
    records: Tree,
}

impl DeploymentStore {
    /// Open or create a store.
    pub fn open(config: &StoreConfig) -> Result<Self, RecordError> {
        let db = config.to_sled_config().open()?;
        let records = db.open_tree(DEPLOYMENTS_TREE)?;
        if db.was_recovered() {
            tracing::info!(path = %config.path.display(), records = records.len(), "store recovered");
        }
        Ok(Self { db, records })
    }

    /// All records, newest first.
    pub fn list(&self) -> Result<Vec<Deployment>, RecordError> {
        self.records
            .iter()
            .rev()
            .map(|entry| -> Result<Deployment, RecordError> {
                let (_, value) = entry?;
                Ok(serde_json::from_slice(&value)?)
            })
            .collect()
    }

    /// One record.
    pub fn get(&self, id: i64) -> Result<Option<Deployment>, RecordError> {
        match self.records.get(key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Validate and insert a new record.
    pub fn create(&self, input: DeploymentInput) -> Result<Deployment, RecordError> {
        input.validate()?;
        let id = self.next_id()?;
        let deployment = Deployment::new(id, input, Utc::now());
        self.records.insert(key(id), serde_json::to_vec(&deployment)?)?;
        Ok(deployment)
    }

    /// Replace the mutable fields of an existing record. `None` if absent.
    pub fn update(&self, id: i64, input: DeploymentInput) -> Result<Option<Deployment>, RecordError> {
        input.validate()?;

        let mut failure = None;
        let updated = self.records.update_and_fetch(key(id), |current| {
            let current = current?;
            let result = serde_json::from_slice::<Deployment>(current).and_then(|mut deployment| {
                deployment.apply(input.clone());
                serde_json::to_vec(&deployment)
            });
            match result {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    // Leave the stored value untouched.
                    failure = Some(e);
                    Some(current.to_vec())
                }
            }
        })?;

        if let Some(e) = failure {
            return Err(e.into());
        }
        match updated {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Remove a record, returning it if it existed.
    pub fn delete(&self, id: i64) -> Result<Option<Deployment>, RecordError> {
        match self.records.remove(key(id))? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), RecordError> {
        self.db.flush()?;
        Ok(())
    }

    fn next_id(&self) -> Result<i64, RecordError> {
        let id = self.db.generate_id()?;
        // Start at 1 like a SERIAL column.
        i64::try_from(id + 1)
            .map_err(|_| RecordError::Validation("deployment id space exhausted".to_string()))
    }
}

fn key(id: i64) -> [u8; 8] {
    id.to_be_bytes()
}
