//! Solution / support tracker
//!
//! Every nomination appends a row to `solutions`; nothing is ever updated.
//! An agent's *current* solution is its latest row (by `created_at`, ties
//! broken by id). Support for a publication is the number of agents whose
//! current row points at it, computed in a single statement so a reader
//! never observes an agent counted twice mid-move.
//!
//! Resolution events are an independent audit trail of "best valid
//! solution" declarations; the latest one is authoritative.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::experiment::{PublicationStatus, ResolutionRecord, SolutionReason, SolutionRecord};
use crate::lifecycle::normalize_reference;
use crate::store::rows::{self, now_micros, RESOLUTION_SELECT, SOLUTION_SELECT};
use crate::store::Store;
use crate::{Error, Result};

/// Row ids of each agent's current (latest) nomination.
const CURRENT_ROWS: &str = "SELECT s.id FROM solutions s WHERE s.experiment_id = ?1 \
     AND s.id = (SELECT l.id FROM solutions l WHERE l.agent_id = s.agent_id \
                 ORDER BY l.created_at DESC, l.id DESC LIMIT 1)";

/// Support of one publication.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportCount {
    /// Publication reference.
    pub reference: String,
    /// Agents currently nominating it.
    pub support: usize,
}

/// Solution nominations and resolution events of one experiment.
#[derive(Debug, Clone)]
pub struct SolutionTracker {
    store: Store,
    experiment_id: i64,
}

fn publication_id(conn: &Connection, experiment_id: i64, reference: &str) -> Result<(i64, PublicationStatus)> {
    let found: Option<(i64, String)> = conn
        .query_row(
            "SELECT id, status FROM publications WHERE experiment_id = ?1 AND reference = ?2",
            params![experiment_id, reference],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let (id, status) = found.ok_or_else(|| Error::NotFound(format!("publication [{reference}]")))?;
    Ok((id, status.parse()?))
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_truncation)]
fn as_count(n: i64) -> usize {
    n.max(0) as usize
}

impl SolutionTracker {
    /// Tracker of `experiment_id`.
    #[must_use]
    pub const fn new(store: Store, experiment_id: i64) -> Self {
        Self {
            store,
            experiment_id,
        }
    }

    /// Append a nomination. `None` retracts the agent's current answer.
    ///
    /// # Errors
    ///
    /// - `Error::NotFound` for an agent or reference outside the experiment
    /// - `Error::InvalidState` if the publication is not PUBLISHED
    pub async fn nominate(
        &self,
        agent_id: i64,
        reference: Option<&str>,
        reason: SolutionReason,
    ) -> Result<SolutionRecord> {
        let experiment_id = self.experiment_id;
        let reference = reference.map(normalize_reference);
        self.store
            .call(move |conn| {
                let tx = conn.transaction()?;
                let agent: Option<String> = tx
                    .query_row(
                        "SELECT name FROM agents WHERE id = ?1 AND experiment_id = ?2",
                        params![agent_id, experiment_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let agent = agent.ok_or_else(|| {
                    Error::NotFound(format!("agent #{agent_id} in experiment #{experiment_id}"))
                })?;

                let target = match &reference {
                    Some(r) => {
                        let (id, status) = publication_id(&tx, experiment_id, r)?;
                        if status != PublicationStatus::Published {
                            return Err(Error::InvalidState {
                                reference: r.clone(),
                                status: status.to_string(),
                                expected: PublicationStatus::Published.to_string(),
                            });
                        }
                        Some(id)
                    }
                    None => None,
                };

                tx.execute(
                    "INSERT INTO solutions (experiment_id, agent_id, publication_id, reason, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![experiment_id, agent_id, target, reason.as_str(), now_micros()],
                )?;
                let id = tx.last_insert_rowid();
                let record = tx.query_row(&format!("{SOLUTION_SELECT} WHERE s.id = ?1"), [id], rows::solution)?;
                tx.commit()?;
                info!(
                    experiment_id,
                    agent = %agent,
                    reference = reference.as_deref().unwrap_or("-"),
                    %reason,
                    "solution nominated"
                );
                Ok(record)
            })
            .await
    }

    /// The agent's latest nomination, if it ever nominated.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn current_solution(&self, agent_id: i64) -> Result<Option<SolutionRecord>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let record = conn
                    .query_row(
                        &format!(
                            "{SOLUTION_SELECT} WHERE s.experiment_id = ?1 AND s.agent_id = ?2 \
                             ORDER BY s.created_at DESC, s.id DESC LIMIT 1"
                        ),
                        params![experiment_id, agent_id],
                        rows::solution,
                    )
                    .optional()?;
                Ok(record)
            })
            .await
    }

    /// Number of agents whose current solution is `reference`.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn support(&self, reference: &str) -> Result<usize> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        self.store
            .call(move |conn| {
                let (id, _) = publication_id(conn, experiment_id, &reference)?;
                let n: i64 = conn.query_row(
                    &format!(
                        "SELECT COUNT(*) FROM solutions WHERE publication_id = ?2 \
                         AND id IN ({CURRENT_ROWS})"
                    ),
                    params![experiment_id, id],
                    |row| row.get(0),
                )?;
                Ok(as_count(n))
            })
            .await
    }

    /// Every publication with non-zero support, highest first.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn support_tally(&self) -> Result<Vec<SupportCount>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "SELECT p.reference, COUNT(*) AS support FROM solutions s \
                     JOIN publications p ON p.id = s.publication_id \
                     WHERE s.id IN ({CURRENT_ROWS}) \
                     GROUP BY p.id ORDER BY support DESC, p.reference"
                ))?;
                let tally = stmt
                    .query_map([experiment_id], |row| {
                        Ok(SupportCount {
                            reference: row.get(0)?,
                            support: as_count(row.get(1)?),
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(tally)
            })
            .await
    }

    /// The agent's nomination log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn history(&self, agent_id: i64) -> Result<Vec<SolutionRecord>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "{SOLUTION_SELECT} WHERE s.experiment_id = ?1 AND s.agent_id = ?2 \
                     ORDER BY s.created_at, s.id"
                ))?;
                let records = stmt
                    .query_map(params![experiment_id, agent_id], rows::solution)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
    }

    /// Append a resolution event naming `reference` as the best valid solution.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn declare_resolution(&self, reference: &str, rationale: &str) -> Result<ResolutionRecord> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        let rationale = rationale.to_string();
        self.store
            .call(move |conn| {
                let (publication_id, _) = publication_id(conn, experiment_id, &reference)?;
                conn.execute(
                    "INSERT INTO resolutions (experiment_id, publication_id, rationale, created_at) \
                     VALUES (?1, ?2, ?3, ?4)",
                    params![experiment_id, publication_id, rationale, now_micros()],
                )?;
                let id = conn.last_insert_rowid();
                let record =
                    conn.query_row(&format!("{RESOLUTION_SELECT} WHERE r.id = ?1"), [id], rows::resolution)?;
                info!(experiment_id, %reference, "resolution declared");
                Ok(record)
            })
            .await
    }

    /// Most recent resolution event.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn current_resolution(&self) -> Result<Option<ResolutionRecord>> {
        Ok(self.resolution_history().await?.pop())
    }

    /// All resolution events, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn resolution_history(&self) -> Result<Vec<ResolutionRecord>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&format!(
                    "{RESOLUTION_SELECT} WHERE r.experiment_id = ?1 ORDER BY r.created_at, r.id"
                ))?;
                let records = stmt
                    .query_map([experiment_id], rows::resolution)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(records)
            })
            .await
    }
}
