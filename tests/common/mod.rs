//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use consensus_lab::experiment::{
    AgentConfig, AgentRecord, ExperimentRecord, NewAgent, TokenUsage, ToolCapability,
};
use consensus_lab::lifecycle::PublicationLifecycle;
use consensus_lab::runner::{Conversation, ModelClient, ModelResponse, ToolSpec};
use consensus_lab::store::Store;
use consensus_lab::Result;

/// Experiment with agents `a1..=aN`.
pub struct Lab {
    pub store: Store,
    pub experiment: ExperimentRecord,
    pub agents: Vec<AgentRecord>,
}

impl Lab {
    pub async fn new(agent_count: usize) -> Self {
        Self::with_tools(agent_count, &ToolCapability::ALL).await
    }

    pub async fn with_tools(agent_count: usize, tools: &[ToolCapability]) -> Self {
        let store = Store::open_in_memory().unwrap();
        let experiment = store
            .create_experiment(ExperimentRecord::new("E", "find the bug"))
            .await
            .unwrap();
        let mut agents = Vec::new();
        for i in 1..=agent_count {
            let config = AgentConfig::new("anthropic", "claude-test").tools(tools.iter().copied());
            agents.push(
                store
                    .create_agent(experiment.id(), NewAgent::new(format!("a{i}"), config))
                    .await
                    .unwrap(),
            );
        }
        Self {
            store,
            experiment,
            agents,
        }
    }

    pub fn lifecycle(&self) -> PublicationLifecycle {
        PublicationLifecycle::for_experiment(self.store.clone(), &self.experiment).unwrap()
    }

    pub fn agent_id(&self, name: &str) -> i64 {
        self.agents
            .iter()
            .find(|a| a.name() == name)
            .map(AgentRecord::id)
            .unwrap()
    }
}

/// Step handed to a scripted model.
pub struct Turn<'a> {
    pub agent: &'a str,
    pub model: &'a str,
    pub call: usize,
    pub conversation: &'a Conversation,
}

impl Turn<'_> {
    /// Concatenated text of every user message so far.
    pub fn user_text(&self) -> String {
        use consensus_lab::runner::{ContentBlock, Role};
        self.conversation
            .messages()
            .iter()
            .filter(|m| m.role == Role::User)
            .flat_map(|m| m.blocks.iter())
            .filter_map(|b| match b {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::ToolResult { output, .. } => Some(output.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

type Script = dyn Fn(&Turn<'_>) -> Result<ModelResponse> + Send + Sync;

/// Model client driven by a closure; the agent name is taken from the
/// opening prompt.
pub struct FnModel {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl FnModel {
    pub fn new(script: impl Fn(&Turn<'_>) -> Result<ModelResponse> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn agent_name(conversation: &Conversation) -> String {
    use consensus_lab::runner::ContentBlock;
    conversation
        .messages()
        .first()
        .and_then(|m| m.blocks.first())
        .and_then(|b| match b {
            ContentBlock::Text { text } => text.strip_prefix("You are "),
            _ => None,
        })
        .and_then(|rest| rest.split(',').next())
        .unwrap_or_default()
        .to_string()
}

impl ModelClient for FnModel {
    async fn invoke(
        &self,
        config: &AgentConfig,
        conversation: &Conversation,
        _tools: &[ToolSpec],
    ) -> Result<ModelResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let agent = agent_name(conversation);
        (self.script)(&Turn {
            agent: &agent,
            model: &config.model,
            call,
            conversation,
        })
    }
}

pub fn usage(input: u64, output: u64) -> TokenUsage {
    TokenUsage::new(input, output)
}
