//! Solution and Resolution records - append-only nomination and declaration logs

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Why an agent changed its nominated solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolutionReason {
    /// First nomination.
    NoPrevious,
    /// The previous nomination turned out to be wrong.
    PreviousWrong,
    /// The new publication improves on the previous one.
    PreviousImproved,
    /// A different approach altogether.
    NewApproach,
}

impl SolutionReason {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoPrevious => "NO_PREVIOUS",
            Self::PreviousWrong => "PREVIOUS_WRONG",
            Self::PreviousImproved => "PREVIOUS_IMPROVED",
            Self::NewApproach => "NEW_APPROACH",
        }
    }
}

impl fmt::Display for SolutionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SolutionReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "NO_PREVIOUS" => Ok(Self::NoPrevious),
            "PREVIOUS_WRONG" => Ok(Self::PreviousWrong),
            "PREVIOUS_IMPROVED" => Ok(Self::PreviousImproved),
            "NEW_APPROACH" => Ok(Self::NewApproach),
            other => Err(Error::Validation(format!("unknown solution reason '{other}'"))),
        }
    }
}

/// One row of an agent's nomination log.
///
/// The agent's current solution is its latest row; `reference == None`
/// means the agent currently backs no publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub(crate) id: i64,
    pub(crate) experiment_id: i64,
    pub(crate) agent_id: i64,
    pub(crate) agent: String,
    pub(crate) publication_id: Option<i64>,
    pub(crate) reference: Option<String>,
    pub(crate) reason: SolutionReason,
    pub(crate) created_at: DateTime<Utc>,
}

impl SolutionRecord {
    /// Row id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Owning experiment id.
    #[must_use]
    pub const fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    /// Nominating agent id.
    #[must_use]
    pub const fn agent_id(&self) -> i64 {
        self.agent_id
    }

    /// Nominating agent name.
    #[must_use]
    pub fn agent(&self) -> &str {
        &self.agent
    }

    /// Nominated publication id, if any.
    #[must_use]
    pub const fn publication_id(&self) -> Option<i64> {
        self.publication_id
    }

    /// Nominated publication reference, if any.
    #[must_use]
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    /// Reason given for the nomination.
    #[must_use]
    pub const fn reason(&self) -> SolutionReason {
        self.reason
    }

    /// Nomination timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Audit record of a declared best-overall solution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub(crate) id: i64,
    pub(crate) experiment_id: i64,
    pub(crate) reference: String,
    pub(crate) rationale: String,
    pub(crate) created_at: DateTime<Utc>,
}

impl ResolutionRecord {
    /// Row id.
    #[must_use]
    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Owning experiment id.
    #[must_use]
    pub const fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    /// Declared publication reference.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Free-text rationale.
    #[must_use]
    pub fn rationale(&self) -> &str {
        &self.rationale
    }

    /// Declaration timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
