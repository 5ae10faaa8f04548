//! Ledger records - token usage and derived cost

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Nanodollars per dollar.
const NANOS_PER_DOLLAR: f64 = 1_000_000_000.0;

/// Monetary amount in integer nanodollars.
///
/// Integer storage keeps ledger sums exact: ten entries of $1.001 add up
/// to exactly $10.01.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Cost(i64);

impl Cost {
    /// Zero cost.
    pub const ZERO: Self = Self(0);

    /// From integer nanodollars.
    #[must_use]
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// From dollars, rounded to the nearest nanodollar.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_dollars(dollars: f64) -> Self {
        Self((dollars * NANOS_PER_DOLLAR).round() as i64)
    }

    /// Integer nanodollars.
    #[must_use]
    pub const fn nanos(self) -> i64 {
        self.0
    }

    /// Dollars as a float (display only; comparisons use nanos).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn dollars(self) -> f64 {
        self.0 as f64 / NANOS_PER_DOLLAR
    }

    /// `self - other`, floored at zero.
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        let diff = self.0.saturating_sub(other.0);
        if diff < 0 {
            Self::ZERO
        } else {
            Self(diff)
        }
    }
}

impl Add for Cost {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Cost {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Sum for Cost {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Add::add)
    }
}

impl fmt::Display for Cost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.4}", self.dollars())
    }
}

/// Token counts reported by one model invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens.
    pub input: u64,
    /// Completion tokens.
    pub output: u64,
    /// Prompt tokens served from cache.
    pub cached: u64,
    /// Reasoning tokens.
    pub thinking: u64,
}

impl TokenUsage {
    /// Usage with input and output tokens only.
    #[must_use]
    pub const fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            cached: 0,
            thinking: 0,
        }
    }

    /// Set cached tokens.
    #[must_use]
    pub const fn cached(mut self, cached: u64) -> Self {
        self.cached = cached;
        self
    }

    /// Set thinking tokens.
    #[must_use]
    pub const fn thinking(mut self, thinking: u64) -> Self {
        self.thinking = thinking;
        self
    }

    /// Sum of all counters, saturating at `u64::MAX`.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input
            .saturating_add(self.output)
            .saturating_add(self.cached)
            .saturating_add(self.thinking)
    }
}

/// What a ledger entry is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageSource {
    /// Agent that consumed the tokens, if any.
    pub agent_id: Option<i64>,
    /// Step index within the agent's run, if any.
    pub step: Option<u64>,
    /// Model that was billed (used for pricing).
    pub model: String,
}

impl UsageSource {
    /// Usage by an agent step.
    #[must_use]
    pub fn step(agent_id: i64, step: u64, model: impl Into<String>) -> Self {
        Self {
            agent_id: Some(agent_id),
            step: Some(step),
            model: model.into(),
        }
    }

    /// Usage not attributed to any agent.
    #[must_use]
    pub fn unattributed(model: impl Into<String>) -> Self {
        Self {
            agent_id: None,
            step: None,
            model: model.into(),
        }
    }
}

/// One append-only ledger row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub(crate) id: i64,
    pub(crate) experiment_id: i64,
    pub(crate) source: UsageSource,
    pub(crate) usage: TokenUsage,
    pub(crate) cost: Cost,
    pub(crate) created_at: DateTime<Utc>,
}

impl LedgerEntry {
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

    /// Attribution.
    #[must_use]
    pub const fn source(&self) -> &UsageSource {
        &self.source
    }

    /// Token counts.
    #[must_use]
    pub const fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Derived cost.
    #[must_use]
    pub const fn cost(&self) -> Cost {
        self.cost
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cost_sum_is_exact() {
        let total: Cost = (0..10).map(|_| Cost::from_dollars(1.001)).sum();
        assert_eq!(total, Cost::from_dollars(10.01));
        assert!(total > Cost::from_dollars(10.0));
    }

    #[test]
    fn test_cost_saturating_sub() {
        let cap = Cost::from_dollars(5.0);
        assert_eq!(cap.saturating_sub(Cost::from_dollars(7.0)), Cost::ZERO);
        assert_eq!(cap.saturating_sub(Cost::from_dollars(2.0)), Cost::from_dollars(3.0));
    }

    #[test]
    fn test_usage_total() {
        let usage = TokenUsage::new(10, 5).cached(3).thinking(2);
        assert_eq!(usage.total(), 20);
    }

    #[test]
    fn test_usage_total_saturates() {
        let usage = TokenUsage::new(u64::MAX, u64::MAX).thinking(1);
        assert_eq!(usage.total(), u64::MAX);
    }
}
