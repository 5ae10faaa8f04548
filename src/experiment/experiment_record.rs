//! Experiment Record - root entity owning agents, publications and ledger

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Experiment Record represents one research run.
///
/// This is the root entity of the schema: agents, publications, reviews,
/// citations, solutions, ledger entries and resolution events all belong
/// to exactly one experiment and are removed with it.
///
/// `id` is assigned by the store; a freshly built record carries `0`
/// until [`Store::create_experiment`](crate::store::Store::create_experiment)
/// returns the persisted copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    id: i64,
    uuid: Uuid,
    name: String,
    problem: String,
    config: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Create a new, not yet persisted, experiment record.
    ///
    /// # Arguments
    ///
    /// * `name` - Unique human-readable name
    /// * `problem` - Reference to the research problem being worked on
    #[must_use]
    pub fn new(name: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::builder(name, problem).build()
    }

    /// Create a builder for constructing an experiment record with optional fields.
    #[must_use]
    pub fn builder(name: impl Into<String>, problem: impl Into<String>) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(name, problem)
    }

    /// Store-assigned row id (`0` before persistence).
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Globally unique identifier.
    #[must_use]
    pub const fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the problem reference.
    #[must_use]
    pub fn problem(&self) -> &str {
        &self.problem
    }

    /// Get the experiment configuration, if any.
    #[must_use]
    pub const fn config(&self) -> Option<&serde_json::Value> {
        self.config.as_ref()
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    id: i64,
    uuid: Uuid,
    name: String,
    problem: String,
    config: Option<serde_json::Value>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            id: 0,
            uuid: Uuid::new_v4(),
            name: name.into(),
            problem: problem.into(),
            config: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// Set the experiment configuration.
    #[must_use]
    pub fn config(mut self, config: serde_json::Value) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the uuid (used when loading from storage).
    #[must_use]
    pub const fn uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    /// Set the row id (used when loading from storage).
    #[must_use]
    pub const fn id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Set a custom update timestamp. Defaults to `created_at`.
    #[must_use]
    pub const fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            id: self.id,
            uuid: self.uuid,
            name: self.name,
            problem: self.problem,
            config: self.config,
            created_at: self.created_at,
            updated_at: self.updated_at.unwrap_or(self.created_at),
        }
    }
}
