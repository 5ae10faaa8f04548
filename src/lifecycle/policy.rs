//! Publish policy: maps a publication's review grades to a verdict.
//!
//! The thresholds are experiment configuration, read from
//! `config.publish_policy` of the experiment record:
//!
//! ```json
//! { "publish_policy": { "min_accepts": 2, "max_rejects": 1, "strong_reject_veto": true } }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::experiment::{ExperimentRecord, ReviewTally};
use crate::{Error, Result};

/// Outcome of evaluating a policy against the current reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Reviews justify SUBMITTED → PUBLISHED.
    Publish,
    /// Reviews justify SUBMITTED → REJECTED.
    Reject,
    /// Not enough reviews yet.
    Pending,
}

/// Decides publication from a review tally.
///
/// Implementations must be pure: the same tally always yields the same verdict.
pub trait PublishPolicy: Send + Sync + fmt::Debug {
    /// Evaluate the tally.
    fn decide(&self, tally: &ReviewTally) -> Verdict;
}

/// Counting policy: enough accepts publish, too many rejects (or any
/// strong reject when vetoing) reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdPolicy {
    /// ACCEPT/STRONG_ACCEPT reviews needed to publish.
    pub min_accepts: usize,
    /// REJECT/STRONG_REJECT reviews tolerated; one more rejects.
    pub max_rejects: usize,
    /// A single STRONG_REJECT rejects.
    pub strong_reject_veto: bool,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            min_accepts: 2,
            max_rejects: 1,
            strong_reject_veto: true,
        }
    }
}

impl ThresholdPolicy {
    /// Policy configured on the experiment, or the default.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if `publish_policy` is present but malformed
    /// or requires zero accepts.
    pub fn from_experiment(experiment: &ExperimentRecord) -> Result<Self> {
        let Some(raw) = experiment.config().and_then(|c| c.get("publish_policy")) else {
            return Ok(Self::default());
        };
        let policy: Self = serde_json::from_value(raw.clone()).map_err(|e| {
            Error::Validation(format!(
                "invalid publish_policy for experiment '{}': {e}",
                experiment.name()
            ))
        })?;
        if policy.min_accepts == 0 {
            return Err(Error::Validation(
                "publish_policy.min_accepts must be at least 1".to_string(),
            ));
        }
        Ok(policy)
    }

    /// This policy with both thresholds lowered to what `reviewers` assigned
    /// reviews can reach. `min_accepts` never drops below one.
    #[must_use]
    pub fn reachable_with(self, reviewers: usize) -> Self {
        Self {
            min_accepts: self.min_accepts.min(reviewers.max(1)),
            max_rejects: self.max_rejects.min(reviewers.saturating_sub(1)),
            ..self
        }
    }
}

impl PublishPolicy for ThresholdPolicy {
    fn decide(&self, tally: &ReviewTally) -> Verdict {
        if self.strong_reject_veto && tally.strong_reject > 0 {
            return Verdict::Reject;
        }
        if tally.rejects() > self.max_rejects {
            return Verdict::Reject;
        }
        if tally.accepts() >= self.min_accepts {
            return Verdict::Publish;
        }
        Verdict::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::Grade;

    #[test]
    fn test_reachable_with_single_reviewer() {
        let policy = ThresholdPolicy::default().reachable_with(1);
        let tally = |grades: &[Grade]| ReviewTally::from_grades(grades.iter().copied());

        assert_eq!(policy.min_accepts, 1);
        assert_eq!(policy.max_rejects, 0);
        assert_eq!(policy.decide(&tally(&[Grade::Accept])), Verdict::Publish);
        assert_eq!(policy.decide(&tally(&[Grade::Reject])), Verdict::Reject);
    }

    #[test]
    fn test_reachable_with_enough_reviewers_is_unchanged() {
        let policy = ThresholdPolicy::default();
        assert_eq!(policy.reachable_with(2), policy);
        assert_eq!(policy.reachable_with(4), policy);
        assert_eq!(policy.reachable_with(0).min_accepts, 1);
    }

    #[test]
    fn test_default_policy() {
        let policy = ThresholdPolicy::default();
        let tally = |grades: &[Grade]| ReviewTally::from_grades(grades.iter().copied());

        assert_eq!(policy.decide(&tally(&[])), Verdict::Pending);
        assert_eq!(policy.decide(&tally(&[Grade::Accept])), Verdict::Pending);
        assert_eq!(
            policy.decide(&tally(&[Grade::Accept, Grade::StrongAccept])),
            Verdict::Publish
        );
        assert_eq!(
            policy.decide(&tally(&[Grade::Accept, Grade::Reject])),
            Verdict::Pending
        );
        assert_eq!(
            policy.decide(&tally(&[Grade::Reject, Grade::Reject])),
            Verdict::Reject
        );
        assert_eq!(
            policy.decide(&tally(&[Grade::Accept, Grade::Accept, Grade::StrongReject])),
            Verdict::Reject
        );
    }

    #[test]
    fn test_veto_disabled() {
        let policy = ThresholdPolicy {
            min_accepts: 2,
            max_rejects: 1,
            strong_reject_veto: false,
        };
        let tally = ReviewTally::from_grades([Grade::Accept, Grade::Accept, Grade::StrongReject]);
        assert_eq!(policy.decide(&tally), Verdict::Publish);
    }

    #[test]
    fn test_from_experiment_config() {
        let experiment = ExperimentRecord::builder("e", "p")
            .config(serde_json::json!({"publish_policy": {"min_accepts": 1}}))
            .build();
        let policy = ThresholdPolicy::from_experiment(&experiment).unwrap();
        assert_eq!(policy.min_accepts, 1);
        assert_eq!(policy.max_rejects, ThresholdPolicy::default().max_rejects);

        let plain = ExperimentRecord::new("e", "p");
        assert_eq!(
            ThresholdPolicy::from_experiment(&plain).unwrap(),
            ThresholdPolicy::default()
        );
    }

    #[test]
    fn test_from_experiment_rejects_zero_accepts() {
        let experiment = ExperimentRecord::builder("e", "p")
            .config(serde_json::json!({"publish_policy": {"min_accepts": 0}}))
            .build();
        assert!(matches!(
            ThresholdPolicy::from_experiment(&experiment),
            Err(Error::Validation(_))
        ));
    }
}
