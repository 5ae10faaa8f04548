//! Error types for consensus-lab
//!
//! Toyota Way: Clear error messages with actionable guidance (Respect for People)
//!
//! Every variant tells the caller what to do next: integrity errors are
//! corrective feedback for the originating agent, transient errors are
//! retried, everything else is an operator problem.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// consensus-lab error types
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed input (empty title/content, bad selector, ...)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transition attempted on a publication that is not SUBMITTED.
    ///
    /// Also returned to the loser of a conditional-update race.
    #[error("Invalid state: publication [{reference}] is {status}, expected {expected}\nRe-fetch the publication before retrying")]
    InvalidState {
        /// Publication reference
        reference: String,
        /// Status observed at the time of the call
        status: String,
        /// Status required by the operation
        expected: String,
    },

    /// Reviewer is the author of the publication
    #[error("Self review rejected: agent '{agent}' authored publication [{reference}]")]
    SelfReview {
        /// Reviewer name
        agent: String,
        /// Publication reference
        reference: String,
    },

    /// A review for this (reviewer, publication) pair already exists
    #[error("Duplicate review rejected: agent '{agent}' already reviewed publication [{reference}]")]
    DuplicateReview {
        /// Reviewer name
        agent: String,
        /// Publication reference
        reference: String,
    },

    /// Publish/reject requested before the review policy reached that verdict
    #[error("Publish policy not satisfied for [{reference}]: {detail}")]
    PolicyUnsatisfied {
        /// Publication reference
        reference: String,
        /// Tally summary
        detail: String,
    },

    /// Spend cap reached; no new steps are dispatched for the experiment
    #[error("Budget exceeded: spent ${spent:.4} of ${cap:.4}")]
    BudgetExceeded {
        /// Dollars spent so far
        spent: f64,
        /// Configured cap in dollars
        cap: f64,
    },

    /// Model provider temporarily unavailable (retried with backoff)
    #[error("Provider unavailable: {0}")]
    ProviderTransient(String),

    /// Model provider failure that retrying will not fix
    #[error("Provider error: {0}")]
    Provider(String),

    /// Compute sandbox provisioning or execution failed
    #[error("Sandbox error: {0}")]
    Sandbox(String),

    /// Entity lookup failed
    #[error("Not found: {0}")]
    NotFound(String),

    /// SQLite error
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// JSON encoding/decoding error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking storage task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Join(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Data-integrity errors: rejected immediately and reported to the
    /// originating agent as a corrective tool failure.
    #[must_use]
    pub const fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::Validation(_)
                | Self::InvalidState { .. }
                | Self::SelfReview { .. }
                | Self::DuplicateReview { .. }
                | Self::PolicyUnsatisfied { .. }
                | Self::NotFound(_)
        )
    }

    /// Errors worth retrying with backoff.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderTransient(_))
    }

    /// Short machine-readable kind, used in tool failure payloads and logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidState { .. } => "invalid_state",
            Self::SelfReview { .. } => "self_review",
            Self::DuplicateReview { .. } => "duplicate_review",
            Self::PolicyUnsatisfied { .. } => "policy_unsatisfied",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::ProviderTransient(_) => "provider_transient",
            Self::Provider(_) => "provider",
            Self::Sandbox(_) => "sandbox",
            Self::NotFound(_) => "not_found",
            Self::Storage(_) => "storage",
            Self::Serialization(_) => "serialization",
            Self::Join(_) => "join",
            Self::Io(_) => "io",
            Self::Other(_) => "other",
        }
    }
}
