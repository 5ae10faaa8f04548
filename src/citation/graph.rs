//! Citation graph storage: edge replacement and read-only queries.

use std::collections::BTreeSet;

use rusqlite::{params, Connection, OptionalExtension};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::lifecycle::normalize_reference;
use crate::store::rows::now_micros;
use crate::store::Store;
use crate::{Error, Result};

/// Directed edge `citing → cited`, by reference.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitationEdge {
    /// Reference of the citing publication.
    pub from: String,
    /// Reference of the cited publication.
    pub to: String,
}

/// Every reference currently known in an experiment.
pub(crate) fn known_references(conn: &Connection, experiment_id: i64) -> Result<FxHashSet<String>> {
    let mut stmt = conn.prepare_cached("SELECT reference FROM publications WHERE experiment_id = ?1")?;
    let refs = stmt
        .query_map([experiment_id], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<FxHashSet<_>>>()?;
    Ok(refs)
}

/// Replace all outgoing edges of `from_id` with edges to `targets`.
///
/// Must run inside the caller's transaction so the delete and inserts
/// are observed together. Returns the number of edges written.
pub(crate) fn replace_edges(
    conn: &Connection,
    experiment_id: i64,
    from_id: i64,
    targets: &BTreeSet<String>,
) -> Result<usize> {
    conn.execute("DELETE FROM citations WHERE from_id = ?1", [from_id])?;
    let now = now_micros();
    let mut insert = conn.prepare_cached(
        "INSERT OR IGNORE INTO citations (experiment_id, from_id, to_id, created_at) \
         SELECT ?1, ?2, id, ?4 FROM publications \
         WHERE experiment_id = ?1 AND reference = ?3 AND id <> ?2",
    )?;
    let mut written = 0;
    for target in targets {
        written += insert.execute(params![experiment_id, from_id, target, now])?;
    }
    debug!(experiment_id, from_id, written, "replaced citation edges");
    Ok(written)
}

/// Read-only view of one experiment's citation graph.
#[derive(Debug, Clone)]
pub struct CitationGraph {
    store: Store,
    experiment_id: i64,
}

impl CitationGraph {
    /// Graph of `experiment_id`.
    #[must_use]
    pub const fn new(store: Store, experiment_id: i64) -> Self {
        Self {
            store,
            experiment_id,
        }
    }

    /// References cited by `reference`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn citations_of(&self, reference: &str) -> Result<Vec<String>> {
        self.neighbours(
            reference,
            "SELECT t.reference FROM citations c JOIN publications t ON t.id = c.to_id \
             WHERE c.from_id = ?1 ORDER BY t.reference",
        )
        .await
    }

    /// References citing `reference`, sorted.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown reference.
    pub async fn cited_by(&self, reference: &str) -> Result<Vec<String>> {
        self.neighbours(
            reference,
            "SELECT f.reference FROM citations c JOIN publications f ON f.id = c.from_id \
             WHERE c.to_id = ?1 ORDER BY f.reference",
        )
        .await
    }

    async fn neighbours(&self, reference: &str, sql: &'static str) -> Result<Vec<String>> {
        let experiment_id = self.experiment_id;
        let reference = normalize_reference(reference);
        self.store
            .call(move |conn| {
                let id: i64 = conn
                    .query_row(
                        "SELECT id FROM publications WHERE experiment_id = ?1 AND reference = ?2",
                        params![experiment_id, reference],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| Error::NotFound(format!("publication [{reference}]")))?;
                let mut stmt = conn.prepare_cached(sql)?;
                let refs = stmt
                    .query_map([id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(refs)
            })
            .await
    }

    /// Every edge of the experiment, sorted.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn edges(&self) -> Result<Vec<CitationEdge>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT f.reference, t.reference FROM citations c \
                     JOIN publications f ON f.id = c.from_id \
                     JOIN publications t ON t.id = c.to_id \
                     WHERE c.experiment_id = ?1 ORDER BY f.reference, t.reference",
                )?;
                let edges = stmt
                    .query_map([experiment_id], |row| {
                        Ok(CitationEdge {
                            from: row.get(0)?,
                            to: row.get(1)?,
                        })
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(edges)
            })
            .await
    }

    /// In-degree of every cited publication.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn citation_counts(&self) -> Result<FxHashMap<String, usize>> {
        let edges = self.edges().await?;
        let mut counts: FxHashMap<String, usize> = FxHashMap::default();
        for edge in edges {
            *counts.entry(edge.to).or_default() += 1;
        }
        Ok(counts)
    }
}
