//! Scheduler / runner
//!
//! Drives every agent of one experiment concurrently, one tokio task per
//! agent. Before each step an agent checks the operator [`StopSignal`], its
//! step limit and the experiment's cost cap; then it invokes the model
//! (retrying transient failures), records usage in the ledger and executes
//! the tool calls the model produced.
//!
//! ```text
//!   ┌────────── loop ───────────────────────────────────────────────┐
//!   │ stop? ─ limit? ─ within_budget? ─ inject review requests      │
//!   │   → invoke (retry) → ledger.record → dispatch tools → results │
//!   └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Integrity errors from a tool are returned to the agent as a failed tool
//! result. An agent whose retries are exhausted is marked stalled; siblings
//! keep running. In-flight steps are never aborted.

mod assignment;
mod model;
mod report;
mod retry;
mod sandbox;
mod tools;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::experiment::{AgentRecord, Cost, ExperimentRecord, ToolCapability, UsageSource};
use crate::ledger::{BudgetLedger, PriceTable};
use crate::lifecycle::{PublicationLifecycle, ThresholdPolicy};
use crate::solution::SolutionTracker;
use crate::store::Store;
use crate::{Error, Result};

pub use assignment::ReviewAssignment;
pub use model::{ContentBlock, Conversation, Message, ModelClient, ModelResponse, Role, StopReason};
pub use report::{AgentOutcome, AgentReport, RunReport};
pub use retry::RetryPolicy;
pub use sandbox::{ensure_sandbox, ExecOutput, LocalProvisioner, Provisioner, SandboxError, SandboxHandle};
pub use tools::{catalog, ToolContext, ToolInvocation, ToolSpec};

/// Operator cancellation, shared by every agent task of a run.
///
/// Stopping halts dispatch of new steps; a step already in flight finishes.
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    /// Signal in the running state.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request a stop.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    /// Whether a stop was requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop is requested.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        // Sender lives in `self`, so the channel cannot close while waiting
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

fn opening_prompt(experiment: &ExperimentRecord, agent: &AgentRecord) -> String {
    format!(
        "You are {name}, a researcher in experiment '{exp}'.\n\
         Problem: {problem}\n\n\
         Publish your findings, cite prior work with [ref], review the publications \
         you are asked to review and nominate the publication you believe is the \
         current best solution. Stop when you have nothing further to contribute.",
        name = agent.name(),
        exp = experiment.name(),
        problem = experiment.problem(),
    )
}

/// Runs one experiment's agents.
#[derive(Debug)]
pub struct Runner<M, P> {
    store: Store,
    experiment: ExperimentRecord,
    config: RunConfig,
    model: Arc<M>,
    provisioner: Arc<P>,
    prices: Arc<dyn PriceTable>,
    stop: StopSignal,
}

impl<M: ModelClient, P: Provisioner> Runner<M, P> {
    /// Runner for `experiment`.
    #[must_use]
    pub fn new(
        store: Store,
        experiment: ExperimentRecord,
        config: RunConfig,
        model: Arc<M>,
        provisioner: Arc<P>,
        prices: Arc<dyn PriceTable>,
    ) -> Self {
        Self {
            store,
            experiment,
            config,
            model,
            provisioner,
            prices,
            stop: StopSignal::new(),
        }
    }

    /// Use an externally owned stop signal.
    #[must_use]
    pub fn with_stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    /// Handle for cancelling this run.
    #[must_use]
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Run every agent to completion.
    ///
    /// # Errors
    ///
    /// Fails only on setup errors (malformed publish policy, storage,
    /// sandbox provisioning); per-agent failures are reported in the
    /// [`RunReport`].
    pub async fn run(&self) -> Result<RunReport> {
        let experiment_id = self.experiment.id();
        let configured = ThresholdPolicy::from_experiment(&self.experiment)?;
        let solutions = SolutionTracker::new(self.store.clone(), experiment_id);
        let ledger = BudgetLedger::new(self.store.clone(), Arc::clone(&self.prices));

        let mut agents = self.store.list_agents(experiment_id).await?;
        if let Some(model) = &self.config.model_override {
            agents = agents.into_iter().map(|a| a.with_model(model.clone())).collect();
        }
        let assignment = Arc::new(ReviewAssignment::new(
            agents.iter().map(AgentRecord::id).collect(),
            self.config.reviewer_count,
        ));
        let reviewers = assignment.effective_count();
        let policy = configured.reachable_with(reviewers);
        if reviewers == 0 {
            warn!(
                experiment = %self.experiment.name(),
                "no reviewers can be assigned; only advisory authors can publish"
            );
        } else if policy != configured {
            warn!(
                experiment = %self.experiment.name(),
                min_accepts = configured.min_accepts,
                max_rejects = configured.max_rejects,
                reviewers,
                "publish policy thresholds exceed assigned reviewers; lowering them"
            );
        }
        let lifecycle = PublicationLifecycle::new(self.store.clone(), experiment_id, Arc::new(policy));

        let sandbox = if agents.iter().any(|a| a.config().allows(ToolCapability::Sandbox)) {
            Some(ensure_sandbox(self.provisioner.as_ref(), experiment_id).await?)
        } else {
            None
        };

        info!(
            experiment = %self.experiment.name(),
            agents = agents.len(),
            reviewers,
            min_accepts = policy.min_accepts,
            cap = %self.config.cap(),
            "starting run"
        );

        let mut handles: Vec<(AgentRecord, JoinHandle<AgentReport>)> = Vec::with_capacity(agents.len());
        for agent in agents {
            let task = AgentTask {
                conversation: Conversation::new(opening_prompt(&self.experiment, &agent)),
                tools: ToolContext {
                    agent: agent.clone(),
                    lifecycle: lifecycle.clone(),
                    solutions: solutions.clone(),
                    assignment: Arc::clone(&assignment),
                    provisioner: Arc::clone(&self.provisioner),
                    sandbox: sandbox.clone(),
                },
                model: Arc::clone(&self.model),
                ledger: ledger.clone(),
                config: self.config.clone(),
                cap: self.config.cap(),
                stop: self.stop.clone(),
            };
            handles.push((agent, tokio::spawn(task.run())));
        }

        let mut reports = Vec::with_capacity(handles.len());
        for (agent, handle) in handles {
            let report = handle.await.unwrap_or_else(|e| {
                error!(agent = %agent.name(), error = %e, "agent task panicked");
                AgentReport {
                    agent_id: agent.id(),
                    agent: agent.name().to_string(),
                    outcome: AgentOutcome::Failed,
                    steps: 0,
                    error: Some(Error::Join(e.to_string()).to_string()),
                }
            });
            reports.push(report);
        }

        let report = RunReport {
            experiment_id,
            agents: reports,
            spent: ledger.spent(experiment_id).await?,
        };
        info!(
            experiment = %self.experiment.name(),
            steps = report.total_steps(),
            spent = %report.spent,
            failures = report.failures().count(),
            "run finished"
        );
        Ok(report)
    }
}

/// One agent's step loop.
struct AgentTask<M, P> {
    conversation: Conversation,
    tools: ToolContext<P>,
    model: Arc<M>,
    ledger: BudgetLedger,
    config: RunConfig,
    cap: Cost,
    stop: StopSignal,
}

impl<M: ModelClient, P: Provisioner> AgentTask<M, P> {
    fn report(&self, steps: u64, outcome: AgentOutcome, error: Option<&Error>) -> AgentReport {
        let agent = &self.tools.agent;
        match error {
            Some(e) => warn!(agent = %agent.name(), %outcome, steps, error = %e, "agent loop ended"),
            None => info!(agent = %agent.name(), %outcome, steps, "agent loop ended"),
        }
        AgentReport {
            agent_id: agent.id(),
            agent: agent.name().to_string(),
            outcome,
            steps,
            error: error.map(ToString::to_string),
        }
    }

    async fn run(mut self) -> AgentReport {
        let experiment_id = self.tools.agent.experiment_id();
        let agent_id = self.tools.agent.id();
        let tools = catalog(&self.tools.agent);
        let mut step: u64 = 0;

        loop {
            if self.stop.is_stopped() {
                return self.report(step, AgentOutcome::Cancelled, None);
            }
            if self.config.max_steps.is_some_and(|max| step >= max) {
                return self.report(step, AgentOutcome::StepLimit, None);
            }
            match self.ledger.ensure_within(experiment_id, self.cap).await {
                Ok(()) => {}
                Err(e @ Error::BudgetExceeded { .. }) => {
                    return self.report(step, AgentOutcome::BudgetExhausted, Some(&e))
                }
                Err(e) => return self.report(step, AgentOutcome::Failed, Some(&e)),
            }

            let requests = self.tools.assignment.take_unannounced(agent_id);
            if !requests.is_empty() {
                let listed: Vec<String> = requests.iter().map(|r| format!("[{r}]")).collect();
                debug!(agent = %self.tools.agent.name(), requests = ?requests, "delivering review requests");
                self.conversation.push_user(vec![ContentBlock::text(format!(
                    "You have been asked to review: {}",
                    listed.join(", ")
                ))]);
            }

            let response = {
                let model = &self.model;
                let config = self.tools.agent.config();
                let conversation = &self.conversation;
                let tools = &tools;
                self.config
                    .retry
                    .run("invoke", || model.invoke(config, conversation, tools))
                    .await
            };
            let response = match response {
                Ok(response) => response,
                Err(e) if e.is_transient() => return self.report(step, AgentOutcome::Stalled, Some(&e)),
                Err(e) => return self.report(step, AgentOutcome::Failed, Some(&e)),
            };

            let source = UsageSource::step(agent_id, step, self.tools.agent.config().model.clone());
            if let Err(e) = self.ledger.record(experiment_id, source, response.usage).await {
                return self.report(step, AgentOutcome::Failed, Some(&e));
            }
            step += 1;

            let calls: Vec<(String, String, serde_json::Value)> = response
                .tool_calls()
                .map(|(id, name, input)| (id.to_string(), name.to_string(), input.clone()))
                .collect();
            let stop = response.stop;
            self.conversation.push_assistant(response.blocks);

            let mut results = Vec::with_capacity(calls.len());
            for (call_id, name, input) in calls {
                let outcome = match ToolInvocation::parse(&name, &input) {
                    Ok(invocation) => self.tools.dispatch(invocation).await,
                    Err(e) => Err(e),
                };
                let block = match outcome {
                    Ok(output) => ContentBlock::ToolResult {
                        call_id,
                        output: output.to_string(),
                        is_error: false,
                    },
                    Err(e) if e.is_integrity() || matches!(e, Error::Sandbox(_)) => {
                        debug!(agent = %self.tools.agent.name(), tool = %name, error = %e, "tool failure");
                        ContentBlock::ToolResult {
                            call_id,
                            output: serde_json::json!({ "error": e.kind(), "message": e.to_string() })
                                .to_string(),
                            is_error: true,
                        }
                    }
                    Err(e) => return self.report(step, AgentOutcome::Failed, Some(&e)),
                };
                results.push(block);
            }
            self.conversation.push_user(results);

            if stop == StopReason::Done {
                return self.report(step, AgentOutcome::Finished, None);
            }
            let idle = self.config.idle_delay();
            if !idle.is_zero() {
                tokio::select! {
                    () = tokio::time::sleep(idle) => {}
                    () = self.stop.stopped() => {}
                }
            }
        }
    }
}
