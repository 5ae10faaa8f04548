//! Run outcome reporting.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::experiment::Cost;

/// How an agent's loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentOutcome {
    /// The agent stopped voluntarily.
    Finished,
    /// Per-agent step limit reached.
    StepLimit,
    /// The experiment reached its cost cap.
    BudgetExhausted,
    /// Operator stop signal.
    Cancelled,
    /// Provider retries exhausted.
    Stalled,
    /// Non-recoverable error (storage, permanent provider failure, panic).
    Failed,
}

impl AgentOutcome {
    /// Whether this outcome makes the run exit non-zero.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Stalled | Self::Failed)
    }
}

impl fmt::Display for AgentOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Finished => "finished",
            Self::StepLimit => "step_limit",
            Self::BudgetExhausted => "budget_exhausted",
            Self::Cancelled => "cancelled",
            Self::Stalled => "stalled",
            Self::Failed => "failed",
        };
        f.pad(s)
    }
}

/// One agent's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentReport {
    /// Agent id.
    pub agent_id: i64,
    /// Agent name.
    pub agent: String,
    /// How the loop ended.
    pub outcome: AgentOutcome,
    /// Model invocations recorded.
    pub steps: u64,
    /// Error behind a `Stalled`/`Failed` outcome.
    pub error: Option<String>,
}

/// Result of running an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Experiment id.
    pub experiment_id: i64,
    /// Per-agent results, in agent order.
    pub agents: Vec<AgentReport>,
    /// Experiment spend after the run.
    pub spent: Cost,
}

impl RunReport {
    /// Agents whose loop stalled or failed.
    pub fn failures(&self) -> impl Iterator<Item = &AgentReport> {
        self.agents.iter().filter(|a| a.outcome.is_failure())
    }

    /// Total steps over all agents.
    #[must_use]
    pub fn total_steps(&self) -> u64 {
        self.agents.iter().map(|a| a.steps).sum()
    }

    /// Process exit code: non-zero if any agent stalled or failed.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        i32::from(self.failures().next().is_some())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "experiment #{}: {} agents, {} steps, spent {}",
            self.experiment_id,
            self.agents.len(),
            self.total_steps(),
            self.spent
        )?;
        for agent in &self.agents {
            write!(f, "  {:<16} {:<16} steps={}", agent.agent, agent.outcome, agent.steps)?;
            if let Some(error) = &agent.error {
                write!(f, " error={error}")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
