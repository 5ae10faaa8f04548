//! Relational store - single source of truth for every entity
//!
//! One SQLite connection guarded by a mutex. Calls run on the tokio
//! blocking pool so agent tasks never block the async executor on disk IO.
//! Because each [`Store::call`] closure holds the connection exclusively,
//! a closure is an atomic unit; multi-statement writes additionally use a
//! transaction so a failure leaves no partial effect.
//!
//! ## Example
//!
//! ```rust
//! use consensus_lab::experiment::{AgentConfig, ExperimentRecord, NewAgent};
//! use consensus_lab::store::Store;
//!
//! # async fn example() -> consensus_lab::Result<()> {
//! let store = Store::open_in_memory()?;
//! let experiment = store
//!     .create_experiment(ExperimentRecord::new("exp-001", "CVE-2024-0001"))
//!     .await?;
//! let agent = store
//!     .create_agent(experiment.id(), NewAgent::new("a1", AgentConfig::new("anthropic", "claude")))
//!     .await?;
//! assert_eq!(agent.experiment_id(), experiment.id());
//! # Ok(())
//! # }
//! ```

pub(crate) mod rows;
mod schema;

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::{debug, info};

use crate::experiment::{AgentConfig, AgentRecord, ExperimentRecord, NewAgent};
use crate::{Error, Result};

use rows::{now_micros, to_micros, AGENT_SELECT, EXPERIMENT_SELECT};

/// Which schema constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Constraint {
    /// UNIQUE or PRIMARY KEY.
    Unique,
    /// Trigger `RAISE(ABORT, ...)`.
    Trigger,
    /// FOREIGN KEY.
    ForeignKey,
    /// CHECK.
    Check,
    /// Any other constraint failure.
    Other,
}

/// Classify a constraint violation, `None` for any other error.
pub(crate) fn constraint_violation(err: &rusqlite::Error) -> Option<Constraint> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Some(match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Constraint::Unique,
                rusqlite::ffi::SQLITE_CONSTRAINT_TRIGGER => Constraint::Trigger,
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Constraint::ForeignKey,
                rusqlite::ffi::SQLITE_CONSTRAINT_CHECK => Constraint::Check,
                _ => Constraint::Other,
            })
        }
        _ => None,
    }
}

/// Handle to the relational store. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open (or create) a database file.
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory or the database cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        info!(path = %path.display(), "opened store");
        Self::init(conn)
    }

    /// Open a private in-memory database (tests, demos).
    ///
    /// # Errors
    ///
    /// Returns error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(schema::PRAGMAS)?;
        schema::create_tables(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` with exclusive access to the connection on the blocking pool.
    ///
    /// A poisoned mutex is recovered: the SQLite connection stays usable
    /// after a panic in another closure.
    pub(crate) async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| Error::Join(e.to_string()))?
    }

    // ------------------------------------------------------------------
    // Experiments
    // ------------------------------------------------------------------

    /// Persist a new experiment and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` if the name is blank or already taken.
    pub async fn create_experiment(&self, record: ExperimentRecord) -> Result<ExperimentRecord> {
        if record.name().trim().is_empty() {
            return Err(Error::Validation("experiment name must not be empty".to_string()));
        }
        self.call(move |conn| {
            let config = record.config().map(serde_json::to_string).transpose()?;
            let inserted = conn.execute(
                "INSERT INTO experiments (uuid, name, problem, config, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.uuid().to_string(),
                    record.name(),
                    record.problem(),
                    config,
                    to_micros(record.created_at()),
                    to_micros(record.updated_at()),
                ],
            );
            match inserted {
                Ok(_) => {
                    let id = conn.last_insert_rowid();
                    info!(experiment = record.name(), id, "created experiment");
                    Ok(conn.query_row(&format!("{EXPERIMENT_SELECT} WHERE id = ?1"), [id], rows::experiment)?)
                }
                Err(e) if constraint_violation(&e) == Some(Constraint::Unique) => Err(
                    Error::Validation(format!("experiment '{}' already exists", record.name())),
                ),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Look up an experiment by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such experiment exists.
    pub async fn experiment(&self, id: i64) -> Result<ExperimentRecord> {
        self.call(move |conn| {
            conn.query_row(&format!("{EXPERIMENT_SELECT} WHERE id = ?1"), [id], rows::experiment)
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("experiment #{id}")))
        })
        .await
    }

    /// Resolve an operator selector: a uuid, or else an experiment name.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if nothing matches.
    pub async fn find_experiment(&self, selector: &str) -> Result<ExperimentRecord> {
        let selector = selector.trim().to_string();
        self.call(move |conn| {
            let by_uuid = match uuid::Uuid::parse_str(&selector) {
                Ok(uuid) => conn
                    .query_row(
                        &format!("{EXPERIMENT_SELECT} WHERE uuid = ?1"),
                        [uuid.to_string()],
                        rows::experiment,
                    )
                    .optional()?,
                Err(_) => None,
            };
            if let Some(record) = by_uuid {
                return Ok(record);
            }
            conn.query_row(
                &format!("{EXPERIMENT_SELECT} WHERE name = ?1"),
                [&selector],
                rows::experiment,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("experiment '{selector}'")))
        })
        .await
    }

    /// All experiments, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn list_experiments(&self) -> Result<Vec<ExperimentRecord>> {
        self.call(|conn| {
            let mut stmt = conn.prepare(&format!("{EXPERIMENT_SELECT} ORDER BY id"))?;
            let records = stmt
                .query_map([], rows::experiment)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(records)
        })
        .await
    }

    /// Delete an experiment and everything it owns.
    ///
    /// Returns `false` if no such experiment existed.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn delete_experiment(&self, id: i64) -> Result<bool> {
        self.call(move |conn| {
            let deleted = conn.execute("DELETE FROM experiments WHERE id = ?1", [id])?;
            if deleted > 0 {
                info!(experiment_id = id, "deleted experiment (cascade)");
            }
            Ok(deleted > 0)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    /// Register an agent in an experiment.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a blank or duplicate name and
    /// `Error::NotFound` for an unknown experiment.
    pub async fn create_agent(&self, experiment_id: i64, agent: NewAgent) -> Result<AgentRecord> {
        if agent.name.trim().is_empty() {
            return Err(Error::Validation("agent name must not be empty".to_string()));
        }
        self.call(move |conn| {
            let now = now_micros();
            let tools = serde_json::to_string(&agent.config.tools)?;
            let inserted = conn.execute(
                "INSERT INTO agents (experiment_id, name, provider, model, thinking, tools, \
                 created_at, updated_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    experiment_id,
                    agent.name,
                    agent.config.provider,
                    agent.config.model,
                    agent.config.thinking.as_str(),
                    tools,
                    now,
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) => {
                    return Err(match constraint_violation(&e) {
                        Some(Constraint::Unique) => Error::Validation(format!(
                            "agent '{}' already exists in experiment #{experiment_id}",
                            agent.name
                        )),
                        Some(Constraint::ForeignKey) => {
                            Error::NotFound(format!("experiment #{experiment_id}"))
                        }
                        _ => e.into(),
                    })
                }
            }
            let id = conn.last_insert_rowid();
            debug!(experiment_id, agent = %agent.name, id, "created agent");
            Ok(conn.query_row(&format!("{AGENT_SELECT} WHERE id = ?1"), [id], rows::agent)?)
        })
        .await
    }

    /// Look up an agent by id.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such agent exists.
    pub async fn agent(&self, id: i64) -> Result<AgentRecord> {
        self.call(move |conn| {
            conn.query_row(&format!("{AGENT_SELECT} WHERE id = ?1"), [id], rows::agent)
                .optional()?
                .ok_or_else(|| Error::NotFound(format!("agent #{id}")))
        })
        .await
    }

    /// Look up an agent by name within an experiment.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such agent exists.
    pub async fn agent_by_name(&self, experiment_id: i64, name: &str) -> Result<AgentRecord> {
        let name = name.to_string();
        self.call(move |conn| {
            conn.query_row(
                &format!("{AGENT_SELECT} WHERE experiment_id = ?1 AND name = ?2"),
                params![experiment_id, name],
                rows::agent,
            )
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("agent '{name}'")))
        })
        .await
    }

    /// All agents of an experiment, in creation order.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn list_agents(&self, experiment_id: i64) -> Result<Vec<AgentRecord>> {
        self.call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("{AGENT_SELECT} WHERE experiment_id = ?1 ORDER BY id"))?;
            let agents = stmt
                .query_map([experiment_id], rows::agent)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(agents)
        })
        .await
    }

    /// Replace an agent's editable configuration.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no such agent exists.
    pub async fn update_agent_config(&self, agent_id: i64, config: AgentConfig) -> Result<AgentRecord> {
        self.call(move |conn| {
            let tools = serde_json::to_string(&config.tools)?;
            let updated = conn.execute(
                "UPDATE agents SET provider = ?1, model = ?2, thinking = ?3, tools = ?4, \
                 updated_at = ?5 WHERE id = ?6",
                params![
                    config.provider,
                    config.model,
                    config.thinking.as_str(),
                    tools,
                    now_micros(),
                    agent_id,
                ],
            )?;
            if updated == 0 {
                return Err(Error::NotFound(format!("agent #{agent_id}")));
            }
            Ok(conn.query_row(&format!("{AGENT_SELECT} WHERE id = ?1"), [agent_id], rows::agent)?)
        })
        .await
    }
}
