//! Budget ledger - append-only usage accounting and spend-cap checks
//!
//! Each model call appends one row with its token counts and the cost
//! derived from a [`PriceTable`] at record time. Spend is always the sum
//! over the log; nothing is reconciled or rewritten afterwards.
//!
//! The cap is soft: [`BudgetLedger::within_budget`] gates whether a *new*
//! step is dispatched, it never invalidates recorded usage.

use std::fmt;
use std::sync::Arc;

use rusqlite::params;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::experiment::{Cost, LedgerEntry, TokenUsage, UsageSource};
use crate::store::rows::{self, now_micros, LEDGER_SELECT};
use crate::store::Store;
use crate::{Error, Result};

/// Tokens per pricing unit.
const TOKENS_PER_UNIT: i128 = 1_000_000;

/// Derives the cost of token usage.
pub trait PriceTable: Send + Sync + fmt::Debug {
    /// Cost of `usage` on `model`.
    fn cost(&self, model: &str, usage: &TokenUsage) -> Cost;
}

/// Dollar rates per million tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelRates {
    /// Prompt tokens.
    pub input: f64,
    /// Completion tokens.
    pub output: f64,
    /// Cache-read tokens.
    pub cached: f64,
    /// Reasoning tokens.
    pub thinking: f64,
}

impl ModelRates {
    /// Rates with cached and thinking tokens billed as input and output.
    #[must_use]
    pub const fn new(input: f64, output: f64) -> Self {
        Self {
            input,
            output,
            cached: input,
            thinking: output,
        }
    }

    /// Override the cached-token rate.
    #[must_use]
    pub const fn cached(mut self, cached: f64) -> Self {
        self.cached = cached;
        self
    }
}

/// Per-model price table with a fallback for unlisted models.
///
/// Lookup is exact first, then the longest listed prefix
/// (`claude-sonnet` prices `claude-sonnet-4-20250514`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelPrices {
    models: FxHashMap<String, ModelRates>,
    fallback: ModelRates,
}

fn line_cost(tokens: u64, dollars_per_million: f64) -> i128 {
    let nanos_per_million = i128::from(Cost::from_dollars(dollars_per_million).nanos());
    let raw = i128::from(tokens).saturating_mul(nanos_per_million);
    raw.saturating_add(TOKENS_PER_UNIT / 2) / TOKENS_PER_UNIT
}

impl ModelPrices {
    /// Empty table billing every model at `fallback`.
    #[must_use]
    pub fn new(fallback: ModelRates) -> Self {
        Self {
            models: FxHashMap::default(),
            fallback,
        }
    }

    /// Add or replace a model's rates.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>, rates: ModelRates) -> Self {
        self.models.insert(model.into(), rates);
        self
    }

    /// Rates applied to `model`.
    #[must_use]
    pub fn rates(&self, model: &str) -> ModelRates {
        if let Some(rates) = self.models.get(model) {
            return *rates;
        }
        self.models
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(self.fallback, |(_, rates)| *rates)
    }
}

impl PriceTable for ModelPrices {
    fn cost(&self, model: &str, usage: &TokenUsage) -> Cost {
        let rates = self.rates(model);
        let nanos = line_cost(usage.input, rates.input)
            .saturating_add(line_cost(usage.output, rates.output))
            .saturating_add(line_cost(usage.cached, rates.cached))
            .saturating_add(line_cost(usage.thinking, rates.thinking));
        Cost::from_nanos(i64::try_from(nanos).unwrap_or(i64::MAX))
    }
}

/// Ledger over the shared store, pricing with one [`PriceTable`].
#[derive(Debug, Clone)]
pub struct BudgetLedger {
    store: Store,
    prices: Arc<dyn PriceTable>,
}

impl BudgetLedger {
    /// Ledger pricing usage with `prices`.
    #[must_use]
    pub fn new(store: Store, prices: Arc<dyn PriceTable>) -> Self {
        Self { store, prices }
    }

    /// Append usage and its derived cost.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure (including an unknown experiment).
    pub async fn record(
        &self,
        experiment_id: i64,
        source: UsageSource,
        usage: TokenUsage,
    ) -> Result<LedgerEntry> {
        let cost = self.prices.cost(&source.model, &usage);
        self.store
            .call(move |conn| {
                let step = source.step.and_then(|s| i64::try_from(s).ok());
                let tokens = |n: u64| i64::try_from(n).unwrap_or(i64::MAX);
                conn.execute(
                    "INSERT INTO ledger (experiment_id, agent_id, step, model, input_tokens, \
                     output_tokens, cached_tokens, thinking_tokens, cost_nanos, created_at) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        experiment_id,
                        source.agent_id,
                        step,
                        source.model,
                        tokens(usage.input),
                        tokens(usage.output),
                        tokens(usage.cached),
                        tokens(usage.thinking),
                        cost.nanos(),
                        now_micros(),
                    ],
                )?;
                let id = conn.last_insert_rowid();
                let entry = conn.query_row(&format!("{LEDGER_SELECT} WHERE id = ?1"), [id], rows::ledger_entry)?;
                debug!(
                    experiment_id,
                    agent_id = ?entry.source().agent_id,
                    tokens = usage.total(),
                    %cost,
                    "usage recorded"
                );
                Ok(entry)
            })
            .await
    }

    /// Total cost recorded for the experiment.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn spent(&self, experiment_id: i64) -> Result<Cost> {
        self.store
            .call(move |conn| {
                let nanos: i64 = conn.query_row(
                    "SELECT COALESCE(SUM(cost_nanos), 0) FROM ledger WHERE experiment_id = ?1",
                    [experiment_id],
                    |row| row.get(0),
                )?;
                Ok(Cost::from_nanos(nanos))
            })
            .await
    }

    /// `cap - spent`, floored at zero.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn remaining(&self, experiment_id: i64, cap: Cost) -> Result<Cost> {
        Ok(cap.saturating_sub(self.spent(experiment_id).await?))
    }

    /// `spent < cap`.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn within_budget(&self, experiment_id: i64, cap: Cost) -> Result<bool> {
        Ok(self.spent(experiment_id).await? < cap)
    }

    /// Gate for dispatching a new step.
    ///
    /// # Errors
    ///
    /// Returns `Error::BudgetExceeded` once `spent >= cap`.
    pub async fn ensure_within(&self, experiment_id: i64, cap: Cost) -> Result<()> {
        let spent = self.spent(experiment_id).await?;
        if spent < cap {
            return Ok(());
        }
        warn!(experiment_id, %spent, %cap, "cost cap reached");
        Err(Error::BudgetExceeded {
            spent: spent.dollars(),
            cap: cap.dollars(),
        })
    }

    /// Every entry of the experiment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn entries(&self, experiment_id: i64) -> Result<Vec<LedgerEntry>> {
        self.store
            .call(move |conn| {
                let mut stmt =
                    conn.prepare_cached(&format!("{LEDGER_SELECT} WHERE experiment_id = ?1 ORDER BY id"))?;
                let entries = stmt
                    .query_map([experiment_id], rows::ledger_entry)?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(entries)
            })
            .await
    }

    /// Spend per agent. Unattributed usage is keyed `None`.
    ///
    /// # Errors
    ///
    /// Returns error on storage failure.
    pub async fn spent_by_agent(&self, experiment_id: i64) -> Result<FxHashMap<Option<i64>, Cost>> {
        self.store
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT agent_id, SUM(cost_nanos) FROM ledger WHERE experiment_id = ?1 \
                     GROUP BY agent_id",
                )?;
                let totals = stmt
                    .query_map([experiment_id], |row| {
                        Ok((row.get::<_, Option<i64>>(0)?, Cost::from_nanos(row.get(1)?)))
                    })?
                    .collect::<rusqlite::Result<FxHashMap<_, _>>>()?;
                Ok(totals)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::{AgentConfig, ExperimentRecord, NewAgent};

    async fn setup() -> (BudgetLedger, i64, i64) {
        let store = Store::open_in_memory().unwrap();
        let experiment = store
            .create_experiment(ExperimentRecord::new("exp", "problem"))
            .await
            .unwrap();
        let agent = store
            .create_agent(experiment.id(), NewAgent::new("a1", AgentConfig::new("x", "m")))
            .await
            .unwrap();
        let prices = ModelPrices::new(ModelRates::new(10.0, 30.0));
        (BudgetLedger::new(store, Arc::new(prices)), experiment.id(), agent.id())
    }

    #[test]
    fn test_price_lookup_prefers_longest_prefix() {
        let prices = ModelPrices::new(ModelRates::new(1.0, 1.0))
            .with_model("claude", ModelRates::new(3.0, 15.0))
            .with_model("claude-opus", ModelRates::new(15.0, 75.0));
        assert!((prices.rates("claude-opus-4").input - 15.0).abs() < f64::EPSILON);
        assert!((prices.rates("claude-haiku").input - 3.0).abs() < f64::EPSILON);
        assert!((prices.rates("gpt").input - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cost_is_exact() {
        let prices = ModelPrices::new(ModelRates::new(10.0, 30.0));
        let cost = prices.cost("m", &TokenUsage::new(1_001_000, 0));
        assert_eq!(cost, Cost::from_dollars(10.01));
        let cost = prices.cost("m", &TokenUsage::new(0, 1_000).thinking(1_000));
        assert_eq!(cost, Cost::from_dollars(0.06));
    }

    #[tokio::test]
    async fn test_budget_cap_is_strict() {
        let (ledger, exp, agent) = setup().await;
        let cap = Cost::from_dollars(10.00);
        assert!(ledger.within_budget(exp, cap).await.unwrap());

        ledger
            .record(exp, UsageSource::step(agent, 0, "m"), TokenUsage::new(1_000_000, 0))
            .await
            .unwrap();
        // Exactly at the cap is already over
        assert!(!ledger.within_budget(exp, cap).await.unwrap());

        ledger
            .record(exp, UsageSource::unattributed("m"), TokenUsage::new(1_000, 0))
            .await
            .unwrap();
        assert_eq!(ledger.spent(exp).await.unwrap(), Cost::from_dollars(10.01));
        assert_eq!(ledger.remaining(exp, cap).await.unwrap(), Cost::ZERO);
        assert!(matches!(
            ledger.ensure_within(exp, cap).await,
            Err(Error::BudgetExceeded { .. })
        ));
    }

    #[tokio::test]
    async fn test_spent_by_agent() {
        let (ledger, exp, agent) = setup().await;
        ledger
            .record(exp, UsageSource::step(agent, 0, "m"), TokenUsage::new(100_000, 0))
            .await
            .unwrap();
        ledger
            .record(exp, UsageSource::unattributed("m"), TokenUsage::new(200_000, 0))
            .await
            .unwrap();

        let by_agent = ledger.spent_by_agent(exp).await.unwrap();
        assert_eq!(by_agent[&Some(agent)], Cost::from_dollars(1.0));
        assert_eq!(by_agent[&None], Cost::from_dollars(2.0));
        assert_eq!(ledger.entries(exp).await.unwrap().len(), 2);
    }
}
