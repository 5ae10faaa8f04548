//! Agent Record - a simulated researcher participating in an experiment

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Reasoning budget requested from the model provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    /// No extended reasoning.
    None,
    /// Small reasoning budget.
    #[default]
    Low,
    /// Large reasoning budget.
    High,
}

impl ThinkingLevel {
    /// Storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::High => "high",
        }
    }
}

impl FromStr for ThinkingLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            other => Err(Error::Validation(format!("unknown thinking level '{other}'"))),
        }
    }
}

/// Tool families an agent may be offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCapability {
    /// Submit, review, publish and read publications.
    Publications,
    /// Nominate a current best solution.
    Solutions,
    /// Register/unregister agents exempt from mandatory review.
    Advisory,
    /// Execute commands in the experiment sandbox.
    Sandbox,
}

impl ToolCapability {
    /// Every capability, used as the default tool set.
    pub const ALL: [Self; 4] = [
        Self::Publications,
        Self::Solutions,
        Self::Advisory,
        Self::Sandbox,
    ];
}

/// Editable part of an agent: which model it runs and what it may do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model provider name (e.g. "anthropic").
    pub provider: String,
    /// Model identifier.
    pub model: String,
    /// Reasoning budget.
    #[serde(default)]
    pub thinking: ThinkingLevel,
    /// Tool capability set.
    #[serde(default = "all_capabilities")]
    pub tools: BTreeSet<ToolCapability>,
}

fn all_capabilities() -> BTreeSet<ToolCapability> {
    ToolCapability::ALL.into_iter().collect()
}

impl AgentConfig {
    /// Config with the default thinking level and every tool capability.
    #[must_use]
    pub fn new(provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            thinking: ThinkingLevel::default(),
            tools: all_capabilities(),
        }
    }

    /// Set the thinking level.
    #[must_use]
    pub const fn thinking(mut self, thinking: ThinkingLevel) -> Self {
        self.thinking = thinking;
        self
    }

    /// Replace the tool capability set.
    #[must_use]
    pub fn tools(mut self, tools: impl IntoIterator<Item = ToolCapability>) -> Self {
        self.tools = tools.into_iter().collect();
        self
    }

    /// Whether the capability is enabled.
    #[must_use]
    pub fn allows(&self, capability: ToolCapability) -> bool {
        self.tools.contains(&capability)
    }
}

/// Agent to be created inside an experiment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAgent {
    /// Name, unique within the experiment.
    pub name: String,
    /// Model and tool configuration.
    pub config: AgentConfig,
}

impl NewAgent {
    /// Create a new agent description.
    #[must_use]
    pub fn new(name: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            name: name.into(),
            config,
        }
    }
}

/// Agent Record as persisted.
///
/// Identity (`id`, `experiment_id`, `name`) is immutable once created; only
/// the [`AgentConfig`] may be edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub(crate) id: i64,
    pub(crate) experiment_id: i64,
    pub(crate) name: String,
    pub(crate) config: AgentConfig,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl AgentRecord {
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

    /// Agent name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Model and tool configuration.
    #[must_use]
    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Last config edit timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Same agent with the model replaced (operator override, not persisted).
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }
}

impl fmt::Display for AgentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}
