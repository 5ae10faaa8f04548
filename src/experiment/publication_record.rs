//! Publication Record - a submitted write-up and its lifecycle status

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Lifecycle status of a publication.
///
/// `Submitted` is the only non-terminal state. It transitions exactly once,
/// to either `Published` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublicationStatus {
    /// Awaiting reviews.
    Submitted,
    /// Accepted; citable as an authoritative result.
    Published,
    /// Refused; terminal.
    Rejected,
}

impl PublicationStatus {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "SUBMITTED",
            Self::Published => "PUBLISHED",
            Self::Rejected => "REJECTED",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Submitted)
    }
}

impl fmt::Display for PublicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PublicationStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SUBMITTED" => Ok(Self::Submitted),
            "PUBLISHED" => Ok(Self::Published),
            "REJECTED" => Ok(Self::Rejected),
            other => Err(Error::Validation(format!("unknown publication status '{other}'"))),
        }
    }
}

/// Submission payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPublication {
    /// Title (required, non-blank).
    pub title: String,
    /// Short summary.
    #[serde(rename = "abstract", default)]
    pub abstract_text: String,
    /// Full write-up (required, non-blank).
    pub content: String,
}

impl NewPublication {
    /// Create a submission payload.
    #[must_use]
    pub fn new(
        title: impl Into<String>,
        abstract_text: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            abstract_text: abstract_text.into(),
            content: content.into(),
        }
    }

    /// Reject blank title or content.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(Error::Validation("publication title must not be empty".to_string()));
        }
        if self.content.trim().is_empty() {
            return Err(Error::Validation(
                "publication content must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Publication Record as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationRecord {
    pub(crate) id: i64,
    pub(crate) experiment_id: i64,
    pub(crate) author_id: i64,
    pub(crate) author: String,
    pub(crate) title: String,
    #[serde(rename = "abstract")]
    pub(crate) abstract_text: String,
    pub(crate) content: String,
    pub(crate) status: PublicationStatus,
    pub(crate) reference: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl PublicationRecord {
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

    /// Author agent id.
    #[must_use]
    pub const fn author_id(&self) -> i64 {
        self.author_id
    }

    /// Author agent name.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Abstract.
    #[must_use]
    pub fn abstract_text(&self) -> &str {
        &self.abstract_text
    }

    /// Full content.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> PublicationStatus {
        self.status
    }

    /// Short opaque reference, unique within the experiment.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Submission timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last status change timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}
