//! Budget Ledger Tests
//!
//! Append-only usage records, exact spend totals, the strict cost cap,
//! per-agent attribution and per-model pricing against a real store.

use std::sync::Arc;

use consensus_lab::experiment::{
    AgentConfig, Cost, ExperimentRecord, NewAgent, TokenUsage, UsageSource,
};
use consensus_lab::ledger::{BudgetLedger, ModelPrices, ModelRates, PriceTable};
use consensus_lab::store::Store;
use consensus_lab::Error;

struct Books {
    store: Store,
    ledger: BudgetLedger,
    experiment: i64,
    agent: i64,
}

async fn books(prices: ModelPrices) -> Books {
    let store = Store::open_in_memory().unwrap();
    let experiment = store
        .create_experiment(ExperimentRecord::new("E", "problem"))
        .await
        .unwrap();
    let agent = store
        .create_agent(experiment.id(), NewAgent::new("a1", AgentConfig::new("anthropic", "claude-test")))
        .await
        .unwrap();
    let prices: Arc<dyn PriceTable> = Arc::new(prices);
    Books {
        ledger: BudgetLedger::new(store.clone(), prices),
        store,
        experiment: experiment.id(),
        agent: agent.id(),
    }
}

fn flat(rate: f64) -> ModelPrices {
    ModelPrices::new(ModelRates::new(rate, rate))
}

// =============================================================================
// Spend and the cost cap
// =============================================================================

#[tokio::test]
async fn test_spend_over_cap_blocks_further_steps() {
    let b = books(flat(10.0)).await;
    let cap = Cost::from_dollars(10.00);

    b.ledger
        .record(b.experiment, UsageSource::step(b.agent, 0, "m"), TokenUsage::new(600_000, 0))
        .await
        .unwrap();
    assert!(b.ledger.within_budget(b.experiment, cap).await.unwrap());
    assert_eq!(
        b.ledger.remaining(b.experiment, cap).await.unwrap(),
        Cost::from_dollars(4.0)
    );

    b.ledger
        .record(b.experiment, UsageSource::step(b.agent, 1, "m"), TokenUsage::new(401_000, 0))
        .await
        .unwrap();

    assert_eq!(b.ledger.spent(b.experiment).await.unwrap(), Cost::from_dollars(10.01));
    assert!(!b.ledger.within_budget(b.experiment, cap).await.unwrap());
    assert_eq!(b.ledger.remaining(b.experiment, cap).await.unwrap(), Cost::ZERO);

    let err = b.ledger.ensure_within(b.experiment, cap).await.unwrap_err();
    assert!(matches!(err, Error::BudgetExceeded { .. }));
    assert!(err.to_string().contains("$10.0100"));
}

#[tokio::test]
async fn test_empty_ledger_is_within_any_positive_cap() {
    let b = books(flat(10.0)).await;

    assert_eq!(b.ledger.spent(b.experiment).await.unwrap(), Cost::ZERO);
    assert!(b.ledger.within_budget(b.experiment, Cost::from_dollars(0.01)).await.unwrap());
    assert!(!b.ledger.within_budget(b.experiment, Cost::ZERO).await.unwrap());
}

#[tokio::test]
async fn test_spend_is_per_experiment() {
    let b = books(flat(10.0)).await;
    let other = b
        .store
        .create_experiment(ExperimentRecord::new("F", "problem"))
        .await
        .unwrap();

    b.ledger
        .record(b.experiment, UsageSource::unattributed("m"), TokenUsage::new(1_000_000, 0))
        .await
        .unwrap();

    assert_eq!(b.ledger.spent(other.id()).await.unwrap(), Cost::ZERO);
    assert!(b.ledger.entries(other.id()).await.unwrap().is_empty());
}

// =============================================================================
// Entries and attribution
// =============================================================================

#[tokio::test]
async fn test_entries_keep_attribution_in_order() {
    let b = books(flat(1.0)).await;

    b.ledger
        .record(b.experiment, UsageSource::step(b.agent, 0, "m"), TokenUsage::new(100, 50))
        .await
        .unwrap();
    b.ledger
        .record(b.experiment, UsageSource::unattributed("judge"), TokenUsage::new(10, 0).cached(5))
        .await
        .unwrap();

    let entries = b.ledger.entries(b.experiment).await.unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].source().agent_id, Some(b.agent));
    assert_eq!(entries[0].source().step, Some(0));
    assert_eq!(entries[0].usage(), TokenUsage::new(100, 50));
    assert_eq!(entries[1].source().agent_id, None);
    assert_eq!(entries[1].source().model, "judge");
    assert!(entries[0].id() < entries[1].id());

    let total: Cost = entries.iter().map(|e| e.cost()).sum();
    assert_eq!(total, b.ledger.spent(b.experiment).await.unwrap());
}

#[tokio::test]
async fn test_spend_by_agent_includes_unattributed() {
    let b = books(flat(10.0)).await;

    for step in 0..3 {
        b.ledger
            .record(b.experiment, UsageSource::step(b.agent, step, "m"), TokenUsage::new(100_000, 0))
            .await
            .unwrap();
    }
    b.ledger
        .record(b.experiment, UsageSource::unattributed("m"), TokenUsage::new(50_000, 0))
        .await
        .unwrap();

    let by_agent = b.ledger.spent_by_agent(b.experiment).await.unwrap();
    assert_eq!(by_agent.len(), 2);
    assert_eq!(by_agent[&Some(b.agent)], Cost::from_dollars(3.0));
    assert_eq!(by_agent[&None], Cost::from_dollars(0.5));
}

#[tokio::test]
async fn test_entries_removed_with_experiment() {
    let b = books(flat(10.0)).await;
    b.ledger
        .record(b.experiment, UsageSource::step(b.agent, 0, "m"), TokenUsage::new(1_000, 0))
        .await
        .unwrap();

    assert!(b.store.delete_experiment(b.experiment).await.unwrap());
    assert!(b.ledger.entries(b.experiment).await.unwrap().is_empty());
}

// =============================================================================
// Pricing
// =============================================================================

#[tokio::test]
async fn test_recorded_cost_uses_model_rates() {
    let prices = flat(1.0).with_model("claude-opus", ModelRates::new(15.0, 75.0));
    let b = books(prices).await;

    let opus = b
        .ledger
        .record(b.experiment, UsageSource::step(b.agent, 0, "claude-opus-4"), TokenUsage::new(1_000_000, 100_000))
        .await
        .unwrap();
    let other = b
        .ledger
        .record(b.experiment, UsageSource::step(b.agent, 1, "gpt-test"), TokenUsage::new(1_000_000, 0))
        .await
        .unwrap();

    assert_eq!(opus.cost(), Cost::from_dollars(22.5));
    assert_eq!(other.cost(), Cost::from_dollars(1.0));
}

#[tokio::test]
async fn test_oversized_usage_is_recorded_without_panic() {
    let b = books(flat(10.0)).await;
    let usage = TokenUsage::new(u64::MAX, u64::MAX).cached(u64::MAX).thinking(u64::MAX);

    let entry = b
        .ledger
        .record(b.experiment, UsageSource::step(b.agent, 0, "m"), usage)
        .await
        .unwrap();

    assert_eq!(entry.cost(), Cost::from_nanos(i64::MAX));
    assert!(!b.ledger.within_budget(b.experiment, Cost::from_dollars(10.0)).await.unwrap());
}

// =============================================================================
// Concurrency
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_sum_exactly() {
    let b = books(flat(10.0)).await;

    let handles: Vec<_> = (0..16)
        .map(|step| {
            let ledger = b.ledger.clone();
            let (experiment, agent) = (b.experiment, b.agent);
            tokio::spawn(async move {
                ledger
                    .record(experiment, UsageSource::step(agent, step, "m"), TokenUsage::new(1_000, 0))
                    .await
                    .unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(b.ledger.entries(b.experiment).await.unwrap().len(), 16);
    assert_eq!(b.ledger.spent(b.experiment).await.unwrap(), Cost::from_dollars(0.16));
}
