//! Run orchestration — one strategy or a batch, simulator plus analytics.
//!
//! A batch returns one outcome per unit of work, so callers can tell "ran and
//! traded nothing" apart from "failed to run". Strategy faults inside a run
//! are not batch failures; they surface as a partial result with the failure
//! attached. Only input problems that prevent a replay
//! from starting produce `Failed` outcomes.

use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use backlab_core::domain::Bar;
use backlab_core::sim::constraints::TradeConstraints;
use backlab_core::sim::costs::CostModel;
use backlab_core::sim::strategy::Strategy;
use backlab_core::sim::{run_backtest, SimError};

use crate::metrics::{AnalyticsConfig, PerformanceReport};
use crate::result::{BacktestResult, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// Everything a run needs besides the strategy and the bars.
pub struct RunSpec<'a> {
    pub initial_capital: f64,
    pub cost_model: &'a dyn CostModel,
    pub constraints: &'a TradeConstraints,
    pub analytics: AnalyticsConfig,
    /// Hash of the configuration that produced this spec, stamped into
    /// results for provenance.
    pub config_hash: String,
}

/// One strategy queued for a batch run.
pub struct BatchItem {
    pub strategy_id: String,
    pub strategy: Box<dyn Strategy>,
}

/// Per-unit outcome of a batch. `Cancelled` units were never started.
#[derive(Debug)]
pub enum BatchOutcome {
    Completed(Box<BacktestResult>),
    Failed { strategy_id: String, error: String },
    Cancelled { strategy_id: String },
}

impl BatchOutcome {
    pub fn strategy_id(&self) -> &str {
        match self {
            BatchOutcome::Completed(result) => &result.strategy_id,
            BatchOutcome::Failed { strategy_id, .. } => strategy_id,
            BatchOutcome::Cancelled { strategy_id } => strategy_id,
        }
    }
}

/// Runs one strategy over `series` and wraps the simulation in a
/// `BacktestResult` with metrics and provenance.
pub fn run_single(
    spec: &RunSpec<'_>,
    strategy_id: &str,
    strategy: &mut dyn Strategy,
    series: &[Bar],
) -> Result<BacktestResult, RunError> {
    info!(strategy_id, bars = series.len(), "starting run");
    let sim = run_backtest(
        strategy,
        series,
        spec.initial_capital,
        spec.cost_model,
        spec.constraints,
    )?;
    let report =
        PerformanceReport::compute(&sim.trades, &sim.equity_curve, sim.timeframe, &spec.analytics);
    info!(
        strategy_id,
        trades = sim.trades.len(),
        total_return = report.total_return,
        complete = sim.is_complete(),
        "run finished"
    );
    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        strategy_id: strategy_id.to_string(),
        config_hash: spec.config_hash.clone(),
        report,
        sim,
    })
}

/// Runs a batch of strategies over the same series in parallel.
///
/// Outcomes come back in input order. `cancel` is polled before each unit;
/// units not yet started when the flag flips report `Cancelled`.
pub fn run_batch(
    items: Vec<BatchItem>,
    series: &[Bar],
    spec: &RunSpec<'_>,
    cancel: Option<&AtomicBool>,
) -> Vec<BatchOutcome> {
    info!(units = items.len(), bars = series.len(), "starting batch");
    let outcomes: Vec<BatchOutcome> = items
        .into_par_iter()
        .map(|mut item| {
            if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                return BatchOutcome::Cancelled {
                    strategy_id: item.strategy_id,
                };
            }
            match run_single(spec, &item.strategy_id, item.strategy.as_mut(), series) {
                Ok(result) => BatchOutcome::Completed(Box::new(result)),
                Err(err) => {
                    warn!(strategy_id = %item.strategy_id, error = %err, "batch unit failed");
                    BatchOutcome::Failed {
                        strategy_id: item.strategy_id,
                        error: err.to_string(),
                    }
                }
            }
        })
        .collect();
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, BatchOutcome::Completed(_)))
        .count();
    info!(completed, total = outcomes.len(), "batch finished");
    outcomes
}
