//! Research Run Example
//!
//! Runs a three-agent experiment end to end against a scripted model:
//! one agent publishes a finding, the assigned reviewers accept it, and
//! everyone nominates it as the current best solution.
//!
//! Run with: cargo run --example research_run

use std::sync::Arc;

use anyhow::{Context, Result};
use consensus_lab::config::RunConfig;
use consensus_lab::experiment::{AgentConfig, ExperimentRecord, NewAgent, TokenUsage};
use consensus_lab::ledger::{ModelPrices, ModelRates};
use consensus_lab::operator::{run_experiment, RunParams};
use consensus_lab::runner::{
    ContentBlock, Conversation, LocalProvisioner, ModelClient, ModelResponse, Role, StopReason,
    ToolSpec,
};
use consensus_lab::solution::SolutionTracker;
use consensus_lab::store::Store;
use consensus_lab::telemetry::init_tracing;
use serde_json::json;

/// Deterministic stand-in for a model provider.
struct ScriptedResearcher;

impl ScriptedResearcher {
    fn said(conversation: &Conversation, needle: &str) -> bool {
        conversation
            .messages()
            .iter()
            .filter(|m| m.role == Role::User)
            .flat_map(|m| m.blocks.iter())
            .any(|b| match b {
                ContentBlock::Text { text } => text.contains(needle),
                ContentBlock::ToolResult { output, .. } => output.contains(needle),
                _ => false,
            })
    }

    fn requested(conversation: &Conversation) -> Option<String> {
        conversation
            .messages()
            .iter()
            .flat_map(|m| m.blocks.iter())
            .find_map(|b| match b {
                ContentBlock::Text { text } => text.strip_prefix("You have been asked to review: ["),
                _ => None,
            })
            .map(|rest| rest.chars().take(4).collect())
    }

    fn respond(blocks: Vec<ContentBlock>, stop: StopReason) -> ModelResponse {
        ModelResponse {
            blocks,
            usage: TokenUsage::new(1_200, 300),
            stop,
        }
    }

    fn tool(name: &str, input: serde_json::Value) -> ModelResponse {
        Self::respond(vec![ContentBlock::tool_call("call", name, input)], StopReason::ToolUse)
    }
}

impl ModelClient for ScriptedResearcher {
    async fn invoke(
        &self,
        _config: &AgentConfig,
        conversation: &Conversation,
        _tools: &[ToolSpec],
    ) -> consensus_lab::Result<ModelResponse> {
        let is_author = Self::said(conversation, "You are alice");

        if is_author && !Self::said(conversation, "reviewers_assigned") {
            return Ok(Self::tool(
                "submit_publication",
                json!({
                    "title": "Integer overflow in the length check",
                    "abstract": "A crafted header bypasses the bounds check.",
                    "content": "Setting len to 0xffffffff wraps the addition; PoC attached."
                }),
            ));
        }
        if !is_author {
            if let Some(reference) = Self::requested(conversation) {
                if !Self::said(conversation, "\"grade\"") {
                    return Ok(Self::tool(
                        "submit_review",
                        json!({"reference": reference, "grade": "ACCEPT", "content": "Reproduced."}),
                    ));
                }
            }
        }

        if Self::said(conversation, "\"reason\"") {
            return Ok(Self::respond(vec![ContentBlock::text("Done.")], StopReason::Done));
        }
        // Nominate the first publication of the latest published list
        let listed = conversation
            .messages()
            .last()
            .into_iter()
            .flat_map(|m| m.blocks.iter())
            .find_map(|b| match b {
                ContentBlock::ToolResult { output, .. } => serde_json::from_str::<serde_json::Value>(output)
                    .ok()
                    .and_then(|v| v.get(0)?.get("reference")?.as_str().map(String::from)),
                _ => None,
            });
        Ok(match listed {
            Some(reference) => Self::tool(
                "nominate_solution",
                json!({"reference": reference, "reason": "NO_PREVIOUS"}),
            ),
            None => Self::tool("list_publications", json!({"status": "PUBLISHED"})),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("consensus_lab=info");
    println!("=== consensus-lab Research Run ===\n");

    // -------------------------------------------------------------------------
    // 1. Register the experiment and its agents
    // -------------------------------------------------------------------------
    let store = Store::open_in_memory().context("opening store")?;
    let experiment = store
        .create_experiment(ExperimentRecord::new("overflow-hunt", "Find a memory-safety bug in the parser"))
        .await?;
    for name in ["alice", "bob", "carol"] {
        store
            .create_agent(experiment.id(), NewAgent::new(name, AgentConfig::new("anthropic", "claude-sonnet")))
            .await?;
    }
    println!("1. Experiment '{}' ({})", experiment.name(), experiment.uuid());

    // -------------------------------------------------------------------------
    // 2. Run it
    // -------------------------------------------------------------------------
    let prices = ModelPrices::new(ModelRates::new(3.0, 15.0));
    let params = RunParams::new("overflow-hunt").config(RunConfig {
        reviewer_count: 2,
        max_steps: Some(40),
        idle_delay_ms: 20,
        ..RunConfig::from_env()?
    });
    let report = run_experiment(
        store.clone(),
        params,
        Arc::new(ScriptedResearcher),
        Arc::new(LocalProvisioner::new()),
        Arc::new(prices),
    )
    .await?;
    println!("\n2. Run report\n{report}");

    // -------------------------------------------------------------------------
    // 3. Consensus
    // -------------------------------------------------------------------------
    let tracker = SolutionTracker::new(store.clone(), experiment.id());
    println!("3. Support");
    for entry in tracker.support_tally().await? {
        println!("   [{}] supported by {} agent(s)", entry.reference, entry.support);
    }

    std::process::exit(report.exit_code());
}
