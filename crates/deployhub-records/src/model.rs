//! Deployment records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RecordError;

/// Status carried by the event published when a record is removed.
pub const DELETED_STATUS: &str = "deleted";

/// A stored deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    /// Store-assigned identifier.
    pub id: i64,
    /// Service or application name.
    pub name: String,
    /// Deployed version.
    pub version: String,
    /// Free-form rollout status.
    pub status: String,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
}

impl Deployment {
    /// Build a record from validated input.
    pub fn new(id: i64, input: DeploymentInput, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            name: input.name,
            version: input.version,
            status: input.status,
            created_at,
        }
    }

    /// Replace the mutable fields, keeping `id` and `created_at`.
    pub fn apply(&mut self, input: DeploymentInput) {
        self.name = input.name;
        self.version = input.version;
        self.status = input.status;
    }

    /// The record as announced after removal.
    pub fn into_deleted(mut self) -> Self {
        self.status = DELETED_STATUS.to_string();
        self
    }
}

/// Body of create and update requests.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeploymentInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: String,
}

impl DeploymentInput {
    /// Create input from its fields.
    pub fn new(name: impl Into<String>, version: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            status: status.into(),
        }
    }

    /// All fields are required and must not be blank.
    pub fn validate(&self) -> Result<(), RecordError> {
        let missing: Vec<&str> = [
            ("name", &self.name),
            ("version", &self.version),
            ("status", &self.status),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RecordError::Validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )))
        }
    }
}
