//! Reviewer assignment and per-agent pending-review queues.
//!
//! Obligations live only in memory: they are a delivery mechanism, the
//! durable outcome is the review row an agent eventually writes.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Obligation {
    reference: String,
    announced: bool,
}

/// Selects reviewers for new publications and tracks what each agent owes.
#[derive(Debug)]
pub struct ReviewAssignment {
    agents: Vec<i64>,
    reviewer_count: usize,
    pending: DashMap<i64, Vec<Obligation>>,
}

impl ReviewAssignment {
    /// Assignment over `agents` with `reviewer_count` reviewers per publication.
    #[must_use]
    pub fn new(agents: Vec<i64>, reviewer_count: usize) -> Self {
        Self {
            agents,
            reviewer_count,
            pending: DashMap::new(),
        }
    }

    /// Reviewers per publication: `min(agents - 1, configured)`.
    #[must_use]
    pub fn effective_count(&self) -> usize {
        self.reviewer_count.min(self.agents.len().saturating_sub(1))
    }

    /// Pick reviewers for `reference` distinct from its author and queue
    /// the obligation for each. Returns the chosen agent ids.
    pub fn assign<R: Rng + ?Sized>(&self, author_id: i64, reference: &str, rng: &mut R) -> Vec<i64> {
        let candidates: Vec<i64> = self.agents.iter().copied().filter(|&a| a != author_id).collect();
        let chosen: Vec<i64> = candidates
            .choose_multiple(rng, self.effective_count())
            .copied()
            .collect();
        for &reviewer in &chosen {
            let mut queue = self.pending.entry(reviewer).or_default();
            if !queue.iter().any(|o| o.reference == reference) {
                queue.push(Obligation {
                    reference: reference.to_string(),
                    announced: false,
                });
            }
        }
        info!(%reference, author_id, reviewers = ?chosen, "reviewers assigned");
        chosen
    }

    /// Obligations not yet shown to the agent; marks them shown.
    pub fn take_unannounced(&self, agent_id: i64) -> Vec<String> {
        self.pending
            .get_mut(&agent_id)
            .map(|mut queue| {
                queue
                    .iter_mut()
                    .filter(|o| !o.announced)
                    .map(|o| {
                        o.announced = true;
                        o.reference.clone()
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every outstanding obligation of the agent.
    #[must_use]
    pub fn outstanding(&self, agent_id: i64) -> Vec<String> {
        self.pending
            .get(&agent_id)
            .map(|queue| queue.iter().map(|o| o.reference.clone()).collect())
            .unwrap_or_default()
    }

    /// The agent reviewed `reference`.
    pub fn complete(&self, agent_id: i64, reference: &str) {
        if let Some(mut queue) = self.pending.get_mut(&agent_id) {
            queue.retain(|o| o.reference != reference);
        }
    }

    /// `reference` left SUBMITTED; nobody owes it a review any more.
    pub fn retire(&self, reference: &str) {
        for mut queue in self.pending.iter_mut() {
            queue.retain(|o| o.reference != reference);
        }
    }
}
