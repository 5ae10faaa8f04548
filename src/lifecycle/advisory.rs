//! Advisory registry: agents exempt from mandatory peer review.
//!
//! Membership is per experiment and persisted in the `advisors` table; it
//! disappears with the experiment (or the agent) through the foreign key.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::store::rows::now_micros;
use crate::store::{constraint_violation, Constraint, Store};
use crate::{Error, Result};

/// Whether the agent named `agent_name` is an advisor in `experiment_id`.
pub(crate) fn is_advisor(conn: &Connection, experiment_id: i64, agent_name: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM advisors WHERE experiment_id = ?1 AND agent_name = ?2",
            params![experiment_id, agent_name],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Advisory membership of one experiment.
#[derive(Debug, Clone)]
pub struct AdvisoryRegistry {
    store: Store,
    experiment_id: i64,
}

impl AdvisoryRegistry {
    /// Registry of `experiment_id`.
    #[must_use]
    pub const fn new(store: Store, experiment_id: i64) -> Self {
        Self {
            store,
            experiment_id,
        }
    }

    /// Owning experiment id.
    #[must_use]
    pub const fn experiment_id(&self) -> i64 {
        self.experiment_id
    }

    /// Add an agent. Returns `false` if it was already registered.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if no agent of that name exists in the experiment.
    pub async fn register(&self, agent_name: &str) -> Result<bool> {
        let experiment_id = self.experiment_id;
        let agent_name = agent_name.to_string();
        self.store
            .call(move |conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO advisors (experiment_id, agent_name, created_at) \
                     VALUES (?1, ?2, ?3)",
                    params![experiment_id, agent_name, now_micros()],
                );
                match inserted {
                    Ok(n) => {
                        if n > 0 {
                            info!(experiment_id, agent = %agent_name, "registered advisory agent");
                        }
                        Ok(n > 0)
                    }
                    Err(e) if constraint_violation(&e) == Some(Constraint::ForeignKey) => Err(
                        Error::NotFound(format!("agent '{agent_name}' in experiment #{experiment_id}")),
                    ),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Remove an agent. Returns `false` if it was not registered.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn unregister(&self, agent_name: &str) -> Result<bool> {
        let experiment_id = self.experiment_id;
        let agent_name = agent_name.to_string();
        self.store
            .call(move |conn| {
                let removed = conn.execute(
                    "DELETE FROM advisors WHERE experiment_id = ?1 AND agent_name = ?2",
                    params![experiment_id, agent_name],
                )?;
                if removed > 0 {
                    info!(experiment_id, agent = %agent_name, "unregistered advisory agent");
                }
                Ok(removed > 0)
            })
            .await
    }

    /// Whether an agent is registered.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn contains(&self, agent_name: &str) -> Result<bool> {
        let experiment_id = self.experiment_id;
        let agent_name = agent_name.to_string();
        self.store
            .call(move |conn| is_advisor(conn, experiment_id, &agent_name))
            .await
    }

    /// Registered agent names, sorted.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn members(&self) -> Result<Vec<String>> {
        let experiment_id = self.experiment_id;
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT agent_name FROM advisors WHERE experiment_id = ?1 ORDER BY agent_name",
                )?;
                let names = stmt
                    .query_map([experiment_id], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(names)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{AgentConfig, ExperimentRecord, NewAgent};

    async fn setup() -> (Store, i64, i64) {
        let store = Store::open_in_memory().unwrap();
        let e1 = store.create_experiment(ExperimentRecord::new("e1", "p")).await.unwrap();
        let e2 = store.create_experiment(ExperimentRecord::new("e2", "p")).await.unwrap();
        for exp in [e1.id(), e2.id()] {
            store
                .create_agent(exp, NewAgent::new("a1", AgentConfig::new("x", "m")))
                .await
                .unwrap();
        }
        (store, e1.id(), e2.id())
    }

    #[tokio::test]
    async fn test_register_unregister() {
        let (store, e1, _) = setup().await;
        let registry = AdvisoryRegistry::new(store, e1);

        assert!(!registry.contains("a1").await.unwrap());
        assert!(registry.register("a1").await.unwrap());
        assert!(!registry.register("a1").await.unwrap());
        assert!(registry.contains("a1").await.unwrap());
        assert_eq!(registry.members().await.unwrap(), vec!["a1".to_string()]);

        assert!(registry.unregister("a1").await.unwrap());
        assert!(!registry.unregister("a1").await.unwrap());
        assert!(!registry.contains("a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_registry_scoped_to_experiment() {
        let (store, e1, e2) = setup().await;
        let first = AdvisoryRegistry::new(store.clone(), e1);
        let second = AdvisoryRegistry::new(store, e2);

        first.register("a1").await.unwrap();
        assert!(first.contains("a1").await.unwrap());
        assert!(!second.contains("a1").await.unwrap());
    }

    #[tokio::test]
    async fn test_register_unknown_agent() {
        let (store, e1, _) = setup().await;
        let registry = AdvisoryRegistry::new(store, e1);
        assert!(matches!(
            registry.register("ghost").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_membership_removed_with_experiment() {
        let (store, e1, _) = setup().await;
        let registry = AdvisoryRegistry::new(store.clone(), e1);
        registry.register("a1").await.unwrap();

        store.delete_experiment(e1).await.unwrap();
        assert!(registry.members().await.unwrap().is_empty());
    }
}
