//! Compute provisioning contract: one isolated sandbox per experiment.

use std::future::Future;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;
use tracing::{debug, info};

use crate::Error;

/// Provisioning failures.
#[derive(ThisError, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    /// A sandbox for the experiment is already running.
    #[error("sandbox {0} already exists")]
    AlreadyExists(String),
    /// No sandbox for the experiment.
    #[error("sandbox {0} not found")]
    NotFound(String),
    /// Provider-side failure.
    #[error("sandbox failure: {0}")]
    Failed(String),
}

impl From<SandboxError> for Error {
    fn from(err: SandboxError) -> Self {
        Self::Sandbox(err.to_string())
    }
}

/// Address of an experiment's sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SandboxHandle {
    /// Owning experiment.
    pub experiment_id: i64,
    /// Provider-side name.
    pub name: String,
}

impl SandboxHandle {
    /// Deterministic handle of an experiment's sandbox.
    #[must_use]
    pub fn for_experiment(experiment_id: i64) -> Self {
        Self {
            experiment_id,
            name: format!("consensus-exp-{experiment_id}"),
        }
    }
}

/// Result of a command run in a sandbox.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecOutput {
    /// Process exit code.
    pub exit_code: i32,
    /// Captured stdout.
    pub stdout: String,
    /// Captured stderr.
    pub stderr: String,
}

/// Creates, destroys and executes in per-experiment sandboxes.
pub trait Provisioner: Send + Sync + 'static {
    /// Create the experiment's sandbox.
    ///
    /// Returns `SandboxError::AlreadyExists` if it is already running.
    fn create_sandbox(
        &self,
        experiment_id: i64,
    ) -> impl Future<Output = Result<SandboxHandle, SandboxError>> + Send;

    /// Destroy the experiment's sandbox.
    fn delete_sandbox(&self, experiment_id: i64) -> impl Future<Output = Result<(), SandboxError>> + Send;

    /// Run `command` inside the sandbox.
    fn exec(
        &self,
        handle: &SandboxHandle,
        command: &str,
    ) -> impl Future<Output = Result<ExecOutput, SandboxError>> + Send;
}

/// Create the sandbox, treating "already exists" as success.
///
/// # Errors
///
/// Returns `Error::Sandbox` on any other provisioning failure.
pub async fn ensure_sandbox<P: Provisioner>(provisioner: &P, experiment_id: i64) -> crate::Result<SandboxHandle> {
    match provisioner.create_sandbox(experiment_id).await {
        Ok(handle) => {
            info!(experiment_id, sandbox = %handle.name, "sandbox created");
            Ok(handle)
        }
        Err(SandboxError::AlreadyExists(name)) => {
            debug!(experiment_id, sandbox = %name, "sandbox already running");
            Ok(SandboxHandle::for_experiment(experiment_id))
        }
        Err(e) => Err(e.into()),
    }
}

/// In-process provisioner: records commands instead of running them.
#[derive(Debug, Default)]
pub struct LocalProvisioner {
    sandboxes: DashMap<i64, Vec<String>>,
}

impl LocalProvisioner {
    /// Empty provisioner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands executed in the experiment's sandbox, in order.
    #[must_use]
    pub fn commands(&self, experiment_id: i64) -> Vec<String> {
        self.sandboxes
            .get(&experiment_id)
            .map(|log| log.value().clone())
            .unwrap_or_default()
    }

    /// Whether the experiment's sandbox exists.
    #[must_use]
    pub fn is_running(&self, experiment_id: i64) -> bool {
        self.sandboxes.contains_key(&experiment_id)
    }
}

impl Provisioner for LocalProvisioner {
    async fn create_sandbox(&self, experiment_id: i64) -> Result<SandboxHandle, SandboxError> {
        let handle = SandboxHandle::for_experiment(experiment_id);
        match self.sandboxes.entry(experiment_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(SandboxError::AlreadyExists(handle.name)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(Vec::new());
                Ok(handle)
            }
        }
    }

    async fn delete_sandbox(&self, experiment_id: i64) -> Result<(), SandboxError> {
        self.sandboxes
            .remove(&experiment_id)
            .map(|_| ())
            .ok_or_else(|| SandboxError::NotFound(SandboxHandle::for_experiment(experiment_id).name))
    }

    async fn exec(&self, handle: &SandboxHandle, command: &str) -> Result<ExecOutput, SandboxError> {
        let mut log = self
            .sandboxes
            .get_mut(&handle.experiment_id)
            .ok_or_else(|| SandboxError::NotFound(handle.name.clone()))?;
        log.push(command.to_string());
        Ok(ExecOutput::default())
    }
}
