//! Publication lifecycle
//!
//! ```text
//!                ┌──────────── publish ───────────▶ PUBLISHED
//!   submit ──▶ SUBMITTED
//!                └──────────── reject ────────────▶ REJECTED
//! ```
//!
//! SUBMITTED is the only non-terminal state. Both transitions are a single
//! conditional update keyed on `status = 'SUBMITTED'`, so of two racing
//! transitions exactly one changes a row and the other observes
//! [`Error::InvalidState`].
//!
//! Publishing requires the [`PublishPolicy`] to reach [`Verdict::Publish`],
//! unless the author is in the experiment's [`AdvisoryRegistry`], in which
//! case it succeeds with no reviews at all.

mod advisory;
mod policy;
mod reference;

use std::sync::Arc;

use rand::SeedableRng;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::citation::{self, extract_citations, CitationGraph, Extraction};
use crate::experiment::{
    ExperimentRecord, Grade, NewPublication, PublicationRecord, PublicationStatus, ReviewRecord,
    ReviewTally,
};
use crate::store::rows::{self, now_micros, PUBLICATION_SELECT, REVIEW_SELECT};
use crate::store::{constraint_violation, Constraint, Store};
use crate::{Error, Result};

pub use advisory::AdvisoryRegistry;
pub use policy::{PublishPolicy, ThresholdPolicy, Verdict};
pub use reference::{normalize_reference, REFERENCE_LEN};

/// A freshly submitted publication and what its citation scan found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    /// The stored publication, status SUBMITTED.
    pub publication: PublicationRecord,
    /// Citation scan result; `unknown_targets` are diagnostics only.
    pub citations: Extraction,
}

/// Publication lifecycle of one experiment.
#[derive(Debug, Clone)]
pub struct PublicationLifecycle {
    store: Store,
    experiment_id: i64,
    policy: Arc<dyn PublishPolicy>,
    advisory: AdvisoryRegistry,
}

fn load_publication(conn: &Connection, experiment_id: i64, reference: &str) -> Result<PublicationRecord> {
    conn.query_row(
        &format!("{PUBLICATION_SELECT} WHERE p.experiment_id = ?1 AND p.reference = ?2"),
        params![experiment_id, reference],
        rows::publication,
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("publication [{reference}]")))
}

fn load_tally(conn: &Connection, publication_id: i64) -> Result<ReviewTally> {
    let mut stmt = conn.prepare_cached("SELECT grade FROM reviews WHERE publication_id = ?1")?;
    let grades = stmt
        .query_map([publication_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    let grades = grades
        .iter()
        .map(|g| g.parse::<Grade>())
        .collect::<Result<Vec<_>>>()?;
    Ok(ReviewTally::from_grades(grades))
}

fn agent_name(conn: &Connection, experiment_id: i64, agent_id: i64) -> Result<String> {
    conn.query_row(
        "SELECT name FROM agents WHERE id = ?1 AND experiment_id = ?2",
        params![agent_id, experiment_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| Error::NotFound(format!("agent #{agent_id} in experiment #{experiment_id}")))
}

fn invalid_state(publication: &PublicationRecord, expected: PublicationStatus) -> Error {
    Error::InvalidState {
        reference: publication.reference.clone(),
        status: publication.status.to_string(),
        expected: expected.to_string(),
    }
}

/// Conditional SUBMITTED → `target` update. The loser of a race gets
/// `Error::InvalidState` carrying the status that won.
fn transition(
    conn: &Connection,
    publication: &PublicationRecord,
    target: PublicationStatus,
) -> Result<PublicationRecord> {
    let changed = conn.execute(
        "UPDATE publications SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
        params![
            target.as_str(),
            now_micros(),
            publication.id,
            PublicationStatus::Submitted.as_str(),
        ],
    )?;
    let current = load_publication(conn, publication.experiment_id, &publication.reference)?;
    if changed == 0 {
        debug!(reference = %publication.reference, status = %current.status, "lost transition race");
        return Err(invalid_state(&current, PublicationStatus::Submitted));
    }
    info!(
        experiment_id = publication.experiment_id,
        reference = %publication.reference,
        status = %target,
        "publication transitioned"
    );
    Ok(current)
}

impl PublicationLifecycle {
    /// Lifecycle with an explicit policy.
    #[must_use]
    pub fn new(store: Store, experiment_id: i64, policy: Arc<dyn PublishPolicy>) -> Self {
        let advisory = AdvisoryRegistry::new(store.clone(), experiment_id);
        Self {
            store,
            experiment_id,
            policy,
            advisory,
        }
    }

    /// Lifecycle using the experiment's configured [`ThresholdPolicy`].
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the configured policy is malformed.
    pub fn for_experiment(store: Store, experiment: &ExperimentRecord) -> Result<Self> {
        let policy = ThresholdPolicy::from_experiment(experiment)?;
        Ok(Self::new(store, experiment.id(), Arc::new(policy)))
    }

    /// Owning experiment id.
    #[must_use]
    pub const fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    /// The experiment's advisory registry.
    #[must_use]
    pub const fn advisory(&self) -> &AdvisoryRegistry {
        &self.advisory
    }

    /// The experiment's citation graph (read-only).
    #[must_use]
    pub fn citations(&self) -> CitationGraph {
        CitationGraph::new(self.store.clone(), self.experiment_id)
    }

    /// Submit a new publication authored by `author_id`.
    ///
    /// The publication gets a fresh reference and its citation edges are
    /// written in the same transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for an empty title or content and
    /// `Error::NotFound` if the author is not part of the experiment.
    pub async fn submit(&self, author_id: i64, submission: NewPublication) -> Result<Submission> {
        submission.validate()?;
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let author = agent_name(&tx, experiment_id, author_id)?;
                let now = now_micros();
                let mut rng = rand::rngs::StdRng::from_entropy();

                let mut inserted = None;
                for _ in 0..reference::REFERENCE_RETRIES {
                    let candidate = reference::generate_reference(&mut rng);
                    let result = tx.execute(
                        "INSERT INTO publications (experiment_id, author_id, title, abstract, \
                         content, status, reference, created_at, updated_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
                        params![
                            experiment_id,
                            author_id,
                            submission.title,
                            submission.abstract_text,
                            submission.content,
                            PublicationStatus::Submitted.as_str(),
                            candidate,
                            now,
                        ],
                    );
                    match result {
                        Ok(_) => {
                            inserted = Some((tx.last_insert_rowid(), candidate));
                            break;
                        }
                        Err(e) if constraint_violation(&e) == Some(Constraint::Unique) => {
                            debug!(reference = %candidate, "reference collision, retrying");
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                let Some((id, reference)) = inserted else {
                    return Err(Error::Other(
                        "failed to generate a unique publication reference".to_string(),
                    ));
                };

                let known = citation::graph::known_references(&tx, experiment_id)?;
                let citations = extract_citations(&submission.content, &known, &reference);
                citation::graph::replace_edges(&tx, experiment_id, id, &citations.references)?;
                if !citations.unknown_targets.is_empty() {
                    warn!(
                        %reference,
                        unknown = ?citations.unknown_targets,
                        "publication cites unknown references"
                    );
                }

                let publication = load_publication(&tx, experiment_id, &reference)?;
                tx.commit()?;
                info!(experiment_id, %reference, author = %author, "publication submitted");
                Ok(Submission {
                    publication,
                    citations,
                })
            })
            .await
    }

    /// Record `reviewer_id`'s review of `reference`.
    ///
    /// # Errors
    ///
    /// - `Error::SelfReview` if the reviewer authored the publication
    /// - `Error::InvalidState` if the publication is no longer SUBMITTED
    /// - `Error::DuplicateReview` if this reviewer already reviewed it
    /// - `Error::NotFound` for an unknown reviewer or reference
    pub async fn review(
        &self,
        reviewer_id: i64,
        reference: &str,
        grade: Grade,
        content: &str,
    ) -> Result<ReviewRecord> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        let content = content.to_string();
        self.store
            .call(move |conn| {
                let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
                let reviewer = agent_name(&tx, experiment_id, reviewer_id)?;
                let publication = load_publication(&tx, experiment_id, &reference)?;

                let self_review = || Error::SelfReview {
                    agent: reviewer.clone(),
                    reference: reference.clone(),
                };
                if publication.author_id == reviewer_id {
                    return Err(self_review());
                }
                if publication.status != PublicationStatus::Submitted {
                    return Err(invalid_state(&publication, PublicationStatus::Submitted));
                }

                let now = now_micros();
                let inserted = tx.execute(
                    "INSERT INTO reviews (experiment_id, publication_id, author_id, grade, content, \
                     created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                    params![
                        experiment_id,
                        publication.id,
                        reviewer_id,
                        grade.as_str(),
                        content,
                        now
                    ],
                );
                if let Err(e) = inserted {
                    return Err(match constraint_violation(&e) {
                        Some(Constraint::Unique) => Error::DuplicateReview {
                            agent: reviewer.clone(),
                            reference: reference.clone(),
                        },
                        Some(Constraint::Trigger) => self_review(),
                        _ => e.into(),
                    });
                }
                let id = tx.last_insert_rowid();
                let review = tx.query_row(&format!("{REVIEW_SELECT} WHERE r.id = ?1"), [id], rows::review)?;
                tx.commit()?;
                info!(experiment_id, %reference, reviewer = %reviewer, %grade, "review recorded");
                Ok(review)
            })
            .await
    }

    /// SUBMITTED → PUBLISHED.
    ///
    /// Succeeds with no reviews if the author is an advisory agent,
    /// otherwise only when the policy's verdict is [`Verdict::Publish`].
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` if the publication is not SUBMITTED (including
    ///   a second publish, or losing a race to another transition)
    /// - `Error::PolicyUnsatisfied` if the reviews do not justify publication
    pub async fn publish(&self, reference: &str) -> Result<PublicationRecord> {
        self.decide_and_transition(reference, PublicationStatus::Published)
            .await
    }

    /// SUBMITTED → REJECTED, only when the policy's verdict is [`Verdict::Reject`].
    ///
    /// # Errors
    ///
    /// - `Error::InvalidState` if the publication is not SUBMITTED
    /// - `Error::PolicyUnsatisfied` if the reviews do not justify rejection
    pub async fn reject(&self, reference: &str) -> Result<PublicationRecord> {
        self.decide_and_transition(reference, PublicationStatus::Rejected)
            .await
    }

    async fn decide_and_transition(
        &self,
        reference: &str,
        target: PublicationStatus,
    ) -> Result<PublicationRecord> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        let policy = Arc::clone(&self.policy);
        self.store
            .call(move |conn| {
                let publication = load_publication(conn, experiment_id, &reference)?;
                if publication.status != PublicationStatus::Submitted {
                    return Err(invalid_state(&publication, PublicationStatus::Submitted));
                }

                let bypass = target == PublicationStatus::Published
                    && advisory::is_advisor(conn, experiment_id, &publication.author)?;
                if bypass {
                    debug!(%reference, author = %publication.author, "advisory fast path");
                } else {
                    let tally = load_tally(conn, publication.id)?;
                    let wanted = match target {
                        PublicationStatus::Published => Verdict::Publish,
                        _ => Verdict::Reject,
                    };
                    if policy.decide(&tally) != wanted {
                        return Err(Error::PolicyUnsatisfied {
                            reference,
                            detail: tally.to_string(),
                        });
                    }
                }

                transition(conn, &publication, target)
            })
            .await
    }

    /// Apply whatever the reviews (or advisory membership) currently justify.
    ///
    /// Returns the publication's status afterwards. A terminal publication is
    /// returned unchanged; losing a race to a concurrent transition is not an
    /// error here, the winner's status is returned.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn settle(&self, reference: &str) -> Result<PublicationStatus> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        let policy = Arc::clone(&self.policy);
        self.store
            .call(move |conn| {
                let publication = load_publication(conn, experiment_id, &reference)?;
                if publication.status.is_terminal() {
                    return Ok(publication.status);
                }
                let verdict = if advisory::is_advisor(conn, experiment_id, &publication.author)? {
                    Verdict::Publish
                } else {
                    policy.decide(&load_tally(conn, publication.id)?)
                };
                let target = match verdict {
                    Verdict::Publish => PublicationStatus::Published,
                    Verdict::Reject => PublicationStatus::Rejected,
                    Verdict::Pending => return Ok(PublicationStatus::Submitted),
                };
                match transition(conn, &publication, target) {
                    Ok(updated) => Ok(updated.status),
                    Err(Error::InvalidState { .. }) => {
                        Ok(load_publication(conn, experiment_id, &reference)?.status)
                    }
                    Err(e) => Err(e),
                }
            })
            .await
    }

    /// Re-scan an existing publication against the current reference set,
    /// replacing its outgoing citation edges.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn refresh_citations(&self, reference: &str) -> Result<Extraction> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        self.store
            .call(move |conn| {
                let tx = conn.transaction()?;
                let publication = load_publication(&tx, experiment_id, &reference)?;
                let known = citation::graph::known_references(&tx, experiment_id)?;
                let citations = extract_citations(&publication.content, &known, &reference);
                citation::graph::replace_edges(&tx, experiment_id, publication.id, &citations.references)?;
                tx.commit()?;
                Ok(citations)
            })
            .await
    }

    /// Look up a publication by reference.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn get(&self, reference: &str) -> Result<PublicationRecord> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        self.store
            .call(move |conn| load_publication(conn, experiment_id, &reference))
            .await
    }

    /// Publications of the experiment, newest first, optionally by status.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn list(&self, status: Option<PublicationStatus>) -> Result<Vec<PublicationRecord>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "{PUBLICATION_SELECT} WHERE p.experiment_id = ?1 \
                     AND (?2 IS NULL OR p.status = ?2) ORDER BY p.created_at DESC, p.id DESC"
                ))?;
                let records = stmt
                    .query_map(
                        params![experiment_id, status.map(PublicationStatus::as_str)],
                        rows::publication,
                    )?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
    }

    /// Reviews of a publication, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn reviews_for(&self, reference: &str) -> Result<Vec<ReviewRecord>> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        self.store
            .call(move |conn| {
                let publication = load_publication(conn, experiment_id, &reference)?;
                let mut stmt = conn.prepare_cached(&format!(
                    "{REVIEW_SELECT} WHERE r.publication_id = ?1 ORDER BY r.id"
                ))?;
                let reviews = stmt
                    .query_map([publication.id], rows::review)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(reviews)
            })
            .await
    }

    /// Grade counts of a publication.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn review_tally(&self, reference: &str) -> Result<ReviewTally> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        self.store
            .call(move |conn| {
                let publication = load_publication(conn, experiment_id, &reference)?;
                load_tally(conn, publication.id)
            })
            .await
    }
}
