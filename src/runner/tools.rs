//! Agent tools: typed invocations, the catalog offered to the model and
//! dispatch onto the lifecycle, solution tracker, advisory registry and
//! sandbox.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::assignment::ReviewAssignment;
use super::sandbox::{Provisioner, SandboxHandle};
use crate::experiment::{
    AgentRecord, Grade, NewPublication, PublicationRecord, PublicationStatus, SolutionReason,
    ToolCapability,
};
use crate::lifecycle::PublicationLifecycle;
use crate::solution::SolutionTracker;
use crate::{Error, Result};

/// A parsed tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "input", rename_all = "snake_case")]
pub enum ToolInvocation {
    /// Submit a new publication.
    SubmitPublication {
        /// Title.
        title: String,
        /// Abstract.
        #[serde(rename = "abstract", default)]
        abstract_text: String,
        /// Full content; `[ref]` groups become citations.
        content: String,
    },
    /// Review a SUBMITTED publication.
    SubmitReview {
        /// Publication reference.
        reference: String,
        /// Grade.
        grade: Grade,
        /// Review text.
        content: String,
    },
    /// Publish one's own publication.
    PublishPublication {
        /// Publication reference.
        reference: String,
    },
    /// Read one publication with its reviews.
    GetPublication {
        /// Publication reference.
        reference: String,
    },
    /// List publications, optionally by status.
    ListPublications {
        /// Status filter.
        #[serde(default)]
        status: Option<PublicationStatus>,
    },
    /// List review obligations.
    ListReviewRequests {},
    /// Nominate the current best solution (or none).
    NominateSolution {
        /// Publication reference, `null` to retract.
        #[serde(default)]
        reference: Option<String>,
        /// Why the nomination changed.
        reason: SolutionReason,
    },
    /// Exempt an agent from mandatory review.
    RegisterAdvisory {
        /// Agent name.
        agent: String,
    },
    /// Remove an agent's exemption.
    UnregisterAdvisory {
        /// Agent name.
        agent: String,
    },
    /// Run a shell command in the experiment sandbox.
    SandboxExec {
        /// Command line.
        command: String,
    },
}

impl ToolInvocation {
    /// Parse a model tool call.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an unknown tool or malformed input.
    pub fn parse(name: &str, input: &serde_json::Value) -> Result<Self> {
        let input = if input.is_null() { json!({}) } else { input.clone() };
        serde_json::from_value(json!({ "tool": name, "input": input }))
            .map_err(|e| Error::Validation(format!("invalid call to '{name}': {e}")))
    }

    /// Capability gating this tool.
    #[must_use]
    pub const fn capability(&self) -> ToolCapability {
        match self {
            Self::SubmitPublication { .. }
            | Self::SubmitReview { .. }
            | Self::PublishPublication { .. }
            | Self::GetPublication { .. }
            | Self::ListPublications { .. }
            | Self::ListReviewRequests {} => ToolCapability::Publications,
            Self::NominateSolution { .. } => ToolCapability::Solutions,
            Self::RegisterAdvisory { .. } | Self::UnregisterAdvisory { .. } => ToolCapability::Advisory,
            Self::SandboxExec { .. } => ToolCapability::Sandbox,
        }
    }
}

/// Catalog entry describing a tool to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ToolSpec {
    /// Tool name (the `tool` tag of [`ToolInvocation`]).
    pub name: &'static str,
    /// What the tool does.
    pub description: &'static str,
    /// Capability gating the tool.
    #[serde(skip)]
    pub capability: ToolCapability,
}

const CATALOG: &[ToolSpec] = &[
    ToolSpec {
        name: "submit_publication",
        description: "Submit a publication {title, abstract, content}. Cite others with [ref]. \
                      It stays SUBMITTED until reviewed; advisory authors publish it with publish_publication.",
        capability: ToolCapability::Publications,
    },
    ToolSpec {
        name: "submit_review",
        description: "Review a submitted publication {reference, grade, content}.",
        capability: ToolCapability::Publications,
    },
    ToolSpec {
        name: "publish_publication",
        description: "Publish a submitted publication once its reviews allow it {reference}.",
        capability: ToolCapability::Publications,
    },
    ToolSpec {
        name: "get_publication",
        description: "Read a publication and its reviews {reference}.",
        capability: ToolCapability::Publications,
    },
    ToolSpec {
        name: "list_publications",
        description: "List publications, optionally filtered {status}.",
        capability: ToolCapability::Publications,
    },
    ToolSpec {
        name: "list_review_requests",
        description: "List publications you have been asked to review.",
        capability: ToolCapability::Publications,
    },
    ToolSpec {
        name: "nominate_solution",
        description: "Point at the published best solution, or null {reference, reason}.",
        capability: ToolCapability::Solutions,
    },
    ToolSpec {
        name: "register_advisory",
        description: "Exempt an agent from mandatory review {agent}.",
        capability: ToolCapability::Advisory,
    },
    ToolSpec {
        name: "unregister_advisory",
        description: "Remove an agent's review exemption {agent}.",
        capability: ToolCapability::Advisory,
    },
    ToolSpec {
        name: "sandbox_exec",
        description: "Run a command in the experiment sandbox {command}.",
        capability: ToolCapability::Sandbox,
    },
];

/// Tools the agent is allowed to use.
#[must_use]
pub fn catalog(agent: &AgentRecord) -> Vec<ToolSpec> {
    CATALOG
        .iter()
        .filter(|spec| agent.config().allows(spec.capability))
        .copied()
        .collect()
}

fn summary(p: &PublicationRecord) -> serde_json::Value {
    json!({
        "reference": p.reference(),
        "title": p.title(),
        "author": p.author(),
        "status": p.status(),
    })
}

/// Everything an agent's tool calls act on.
#[derive(Debug)]
pub struct ToolContext<P> {
    pub(crate) agent: AgentRecord,
    pub(crate) lifecycle: PublicationLifecycle,
    pub(crate) solutions: SolutionTracker,
    pub(crate) assignment: Arc<ReviewAssignment>,
    pub(crate) provisioner: Arc<P>,
    pub(crate) sandbox: Option<SandboxHandle>,
}

impl<P: Provisioner> ToolContext<P> {
    /// Apply a publication's current verdict and update obligations.
    async fn settle(&self, reference: &str) -> Result<PublicationStatus> {
        let status = self.lifecycle.settle(reference).await?;
        if status.is_terminal() {
            self.assignment.retire(reference);
        }
        Ok(status)
    }

    /// Execute `invocation` on behalf of the agent, returning JSON output.
    ///
    /// # Errors
    ///
    /// Integrity errors (`Error::is_integrity`) are corrective feedback for
    /// the agent; anything else is a run failure.
    pub async fn dispatch(&self, invocation: ToolInvocation) -> Result<serde_json::Value> {
        if !self.agent.config().allows(invocation.capability()) {
            return Err(Error::Validation(format!(
                "tool capability {:?} is not enabled for agent '{}'",
                invocation.capability(),
                self.agent.name()
            )));
        }
        debug!(agent = %self.agent.name(), tool = ?invocation.capability(), "dispatching tool");

        match invocation {
            ToolInvocation::SubmitPublication {
                title,
                abstract_text,
                content,
            } => {
                let submission = self
                    .lifecycle
                    .submit(self.agent.id(), NewPublication::new(title, abstract_text, content))
                    .await?;
                let reference = submission.publication.reference().to_string();
                // Advisory authors publish explicitly; nobody is asked to review.
                let advisory = self.lifecycle.advisory().contains(self.agent.name()).await?;
                let reviewers = if advisory {
                    0
                } else {
                    self.assignment
                        .assign(self.agent.id(), &reference, &mut rand::thread_rng())
                        .len()
                };
                Ok(json!({
                    "reference": reference,
                    "status": submission.publication.status(),
                    "advisory": advisory,
                    "reviewers_assigned": reviewers,
                    "unresolved_citations": submission.citations.unknown_targets,
                }))
            }
            ToolInvocation::SubmitReview {
                reference,
                grade,
                content,
            } => {
                let review = self
                    .lifecycle
                    .review(self.agent.id(), &reference, grade, &content)
                    .await?;
                self.assignment.complete(self.agent.id(), review.reference());
                let status = self.settle(review.reference()).await?;
                Ok(json!({ "reference": review.reference(), "grade": grade, "status": status }))
            }
            ToolInvocation::PublishPublication { reference } => {
                let publication = self.lifecycle.get(&reference).await?;
                if publication.author_id() != self.agent.id() {
                    return Err(Error::Validation(format!(
                        "only the author may publish [{}]",
                        publication.reference()
                    )));
                }
                let published = self.lifecycle.publish(&reference).await?;
                self.assignment.retire(published.reference());
                Ok(summary(&published))
            }
            ToolInvocation::GetPublication { reference } => {
                let publication = self.lifecycle.get(&reference).await?;
                let reviews = self.lifecycle.reviews_for(&reference).await?;
                let reviews: Vec<_> = reviews
                    .iter()
                    .map(|r| json!({ "author": r.author(), "grade": r.grade(), "content": r.content() }))
                    .collect();
                Ok(json!({
                    "reference": publication.reference(),
                    "title": publication.title(),
                    "abstract": publication.abstract_text(),
                    "content": publication.content(),
                    "author": publication.author(),
                    "status": publication.status(),
                    "reviews": reviews,
                }))
            }
            ToolInvocation::ListPublications { status } => {
                let publications = self.lifecycle.list(status).await?;
                Ok(json!(publications.iter().map(summary).collect::<Vec<_>>()))
            }
            ToolInvocation::ListReviewRequests {} => {
                Ok(json!(self.assignment.outstanding(self.agent.id())))
            }
            ToolInvocation::NominateSolution { reference, reason } => {
                let record = self
                    .solutions
                    .nominate(self.agent.id(), reference.as_deref(), reason)
                    .await?;
                Ok(json!({ "reference": record.reference(), "reason": record.reason() }))
            }
            ToolInvocation::RegisterAdvisory { agent } => {
                let added = self.lifecycle.advisory().register(&agent).await?;
                Ok(json!({ "agent": agent, "registered": added }))
            }
            ToolInvocation::UnregisterAdvisory { agent } => {
                let removed = self.lifecycle.advisory().unregister(&agent).await?;
                Ok(json!({ "agent": agent, "unregistered": removed }))
            }
            ToolInvocation::SandboxExec { command } => {
                let handle = self
                    .sandbox
                    .as_ref()
                    .ok_or_else(|| Error::Sandbox("no sandbox provisioned for this run".to_string()))?;
                let output = self.provisioner.exec(handle, &command).await?;
                Ok(serde_json::to_value(output)?)
            }
        }
    }
}
