//! Review Record - one agent's graded assessment of a publication

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Review grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Grade {
    /// Strong accept.
    StrongAccept,
    /// Accept.
    Accept,
    /// Reject.
    Reject,
    /// Strong reject (may veto publication, see `ThresholdPolicy`).
    StrongReject,
}

impl Grade {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StrongAccept => "STRONG_ACCEPT",
            Self::Accept => "ACCEPT",
            Self::Reject => "REJECT",
            Self::StrongReject => "STRONG_REJECT",
        }
    }

    /// ACCEPT or STRONG_ACCEPT.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::StrongAccept | Self::Accept)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Grade {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STRONG_ACCEPT" => Ok(Self::StrongAccept),
            "ACCEPT" => Ok(Self::Accept),
            "REJECT" => Ok(Self::Reject),
            "STRONG_REJECT" => Ok(Self::StrongReject),
            other => Err(Error::Validation(format!("unknown review grade '{other}'"))),
        }
    }
}

/// Review Record as persisted.
///
/// At most one review exists per (author, publication) pair, and the
/// author is never the publication's author. Both are schema constraints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub(crate) id: i64,
    pub(crate) experiment_id: i64,
    pub(crate) publication_id: i64,
    pub(crate) reference: String,
    pub(crate) author_id: i64,
    pub(crate) author: String,
    pub(crate) grade: Grade,
    pub(crate) content: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl ReviewRecord {
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

    /// Reviewed publication id.
    #[must_use]
    pub const fn publication_id(&self) -> i64 {
        self.publication_id
    }

    /// Reviewed publication reference.
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// Reviewer agent id.
    #[must_use]
    pub const fn author_id(&self) -> i64 {
        self.author_id
    }

    /// Reviewer agent name.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Grade.
    #[must_use]
    pub const fn grade(&self) -> Grade {
        self.grade
    }

    /// Review text.
    #[must_use]
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last update timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Grade counts for one publication.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewTally {
    /// STRONG_ACCEPT count.
    pub strong_accept: usize,
    /// ACCEPT count.
    pub accept: usize,
    /// REJECT count.
    pub reject: usize,
    /// STRONG_REJECT count.
    pub strong_reject: usize,
}

impl ReviewTally {
    /// Tally a sequence of grades.
    pub fn from_grades(grades: impl IntoIterator<Item = Grade>) -> Self {
        let mut tally = Self::default();
        for grade in grades {
            tally.add(grade);
        }
        tally
    }

    /// Count one more grade.
    pub fn add(&mut self, grade: Grade) {
        match grade {
            Grade::StrongAccept => self.strong_accept += 1,
            Grade::Accept => self.accept += 1,
            Grade::Reject => self.reject += 1,
            Grade::StrongReject => self.strong_reject += 1,
        }
    }

    /// ACCEPT + STRONG_ACCEPT.
    #[must_use]
    pub const fn accepts(&self) -> usize {
        self.strong_accept + self.accept
    }

    /// REJECT + STRONG_REJECT.
    #[must_use]
    pub const fn rejects(&self) -> usize {
        self.reject + self.strong_reject
    }

    /// Total reviews.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.accepts() + self.rejects()
    }
}

impl fmt::Display for ReviewTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} strong accept, {} accept, {} reject, {} strong reject",
            self.strong_accept, self.accept, self.reject, self.strong_reject
        )
    }
}
