//! Run configuration
//!
//! Environment variables (all optional, unparsable values fail fast):
//! - `CONSENSUS_COST_CAP`: spend cap in dollars
//! - `CONSENSUS_REVIEWER_COUNT`: reviewers assigned per publication
//! - `CONSENSUS_MODEL_OVERRIDE`: model used by every agent for this run
//! - `CONSENSUS_MAX_STEPS`: per-agent step limit
//!
//! Experiment-level settings (the publish policy) live in the experiment
//! record's `config`, see [`crate::lifecycle::ThresholdPolicy`].

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::experiment::Cost;
use crate::runner::RetryPolicy;

/// Scheduler parameters for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Spend cap in dollars; no new step starts once reached.
    #[serde(default = "default_cost_cap")]
    pub cost_cap: f64,

    /// Reviewers per publication (bounded by agents - 1).
    #[serde(default = "default_reviewer_count")]
    pub reviewer_count: usize,

    /// Model replacing every agent's configured model.
    #[serde(default)]
    pub model_override: Option<String>,

    /// Per-agent step limit.
    #[serde(default)]
    pub max_steps: Option<u64>,

    /// Backoff for transient provider failures.
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Pause between an agent's steps, in milliseconds.
    #[serde(default)]
    pub idle_delay_ms: u64,
}

const fn default_cost_cap() -> f64 {
    10.0
}

const fn default_reviewer_count() -> usize {
    4
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            cost_cap: default_cost_cap(),
            reviewer_count: default_reviewer_count(),
            model_override: None,
            max_steps: None,
            retry: RetryPolicy::default(),
            idle_delay_ms: 0,
        }
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("{name}={raw:?} is not valid"))
}

impl RunConfig {
    /// Defaults overridden by `CONSENSUS_*` environment variables.
    ///
    /// # Errors
    ///
    /// Fails if a variable is set to an unparsable or out-of-range value.
    pub fn from_env() -> Result<Self> {
        Self::default().with_overrides(|name| env::var(name).ok())
    }

    /// Apply overrides from `lookup` (variable name → value).
    ///
    /// # Errors
    ///
    /// Fails if a value is unparsable or out of range.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        if let Some(raw) = lookup("CONSENSUS_COST_CAP") {
            self.cost_cap = parse_var("CONSENSUS_COST_CAP", &raw)?;
        }
        if let Some(raw) = lookup("CONSENSUS_REVIEWER_COUNT") {
            self.reviewer_count = parse_var("CONSENSUS_REVIEWER_COUNT", &raw)?;
        }
        if let Some(raw) = lookup("CONSENSUS_MODEL_OVERRIDE") {
            let model = raw.trim();
            self.model_override = (!model.is_empty()).then(|| model.to_string());
        }
        if let Some(raw) = lookup("CONSENSUS_MAX_STEPS") {
            self.max_steps = Some(parse_var("CONSENSUS_MAX_STEPS", &raw)?);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check ranges.
    ///
    /// # Errors
    ///
    /// Fails on a negative or non-finite cost cap.
    pub fn validate(&self) -> Result<()> {
        if !self.cost_cap.is_finite() || self.cost_cap < 0.0 {
            return Err(anyhow!("cost cap must be a non-negative amount, got {}", self.cost_cap));
        }
        Ok(())
    }

    /// Cost cap as an exact amount.
    #[must_use]
    pub fn cap(&self) -> Cost {
        Cost::from_dollars(self.cost_cap)
    }

    /// Pause between steps.
    #[must_use]
    pub const fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.reviewer_count, 4);
        assert_eq!(config.cap(), Cost::from_dollars(10.0));
        assert!(config.model_override.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = RunConfig::default()
            .with_overrides(lookup(&[
                ("CONSENSUS_COST_CAP", "2.5"),
                ("CONSENSUS_REVIEWER_COUNT", "2"),
                ("CONSENSUS_MODEL_OVERRIDE", "claude-haiku"),
                ("CONSENSUS_MAX_STEPS", "40"),
            ]))
            .unwrap();
        assert_eq!(config.cap(), Cost::from_dollars(2.5));
        assert_eq!(config.reviewer_count, 2);
        assert_eq!(config.model_override.as_deref(), Some("claude-haiku"));
        assert_eq!(config.max_steps, Some(40));
    }

    #[test]
    fn test_invalid_values_fail_fast() {
        assert!(RunConfig::default()
            .with_overrides(lookup(&[("CONSENSUS_REVIEWER_COUNT", "many")]))
            .is_err());
        assert!(RunConfig::default()
            .with_overrides(lookup(&[("CONSENSUS_COST_CAP", "-1")]))
            .is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RunConfig = serde_json::from_str(r#"{"reviewer_count": 1}"#).unwrap();
        assert_eq!(config.reviewer_count, 1);
        assert!((config.cost_cap - 10.0).abs() < f64::EPSILON);
    }
}
