//! Operator entrypoint: run an experiment's agents with run parameters.

use std::sync::Arc;

use tracing::info;

use crate::config::RunConfig;
use crate::ledger::PriceTable;
use crate::runner::{ModelClient, Provisioner, RunReport, Runner, StopSignal};
use crate::store::Store;
use crate::{Error, Result};

/// What to run and under which limits.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Experiment name or uuid.
    pub selector: String,
    /// Scheduler settings (cost cap, reviewer count, model override, ...).
    pub config: RunConfig,
    stop: Option<StopSignal>,
}

impl RunParams {
    /// Run `selector` with default settings.
    #[must_use]
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            config: RunConfig::default(),
            stop: None,
        }
    }

    /// Replace all settings.
    #[must_use]
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Spend cap in dollars.
    #[must_use]
    pub fn cost_cap(mut self, dollars: f64) -> Self {
        self.config.cost_cap = dollars;
        self
    }

    /// Reviewers per publication.
    #[must_use]
    pub fn reviewer_count(mut self, count: usize) -> Self {
        self.config.reviewer_count = count;
        self
    }

    /// Model replacing every agent's configured model.
    #[must_use]
    pub fn model_override(mut self, model: impl Into<String>) -> Self {
        self.config.model_override = Some(model.into());
        self
    }

    /// Cancel the run through `stop`.
    #[must_use]
    pub fn stop_signal(mut self, stop: StopSignal) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Resolve the experiment and run its agents.
///
/// The caller turns [`RunReport::exit_code`] into the process exit status.
///
/// # Errors
///
/// - `Error::NotFound` if the selector matches no experiment
/// - `Error::Validation` for a negative cost cap
/// - any setup error from [`Runner::run`]
pub async fn run_experiment<M: ModelClient, P: Provisioner>(
    store: Store,
    params: RunParams,
    model: Arc<M>,
    provisioner: Arc<P>,
    prices: Arc<dyn PriceTable>,
) -> Result<RunReport> {
    params
        .config
        .validate()
        .map_err(|e| Error::Validation(e.to_string()))?;
    let experiment = store.find_experiment(&params.selector).await?;
    info!(
        experiment = %experiment.name(),
        uuid = %experiment.uuid(),
        model_override = params.config.model_override.as_deref().unwrap_or("-"),
        "operator run requested"
    );

    let mut runner = Runner::new(store, experiment, params.config, model, provisioner, prices);
    if let Some(stop) = params.stop {
        runner = runner.with_stop_signal(stop);
    }
    runner.run().await
}
