//! Walk-forward validation — rolling train/test windows over one series.
//!
//! Each window passes through Training (optimizer sees `[t - train_len, t)`),
//! Testing (a strategy built from the optimized parameters replays
//! `[t, t + test_len)`), and Advancing (`t += step_len`); the run is Done when
//! the next test window would pass the end of the series. Parameters never see
//! the slice they are tested on, so every window result is out-of-sample by
//! construction, and `step_len >= test_len` is enforced up front so test
//! windows can never overlap each other.
//!
//! Equity chains across windows: each test window starts from the previous
//! window's ending equity, and the pooled trades plus chained curve feed one
//! aggregate report that is distinct from any single-window statistic.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use backlab_core::domain::{Bar, Trade};
use backlab_core::sim::constraints::TradeConstraints;
use backlab_core::sim::costs::CostModel;
use backlab_core::sim::strategy::Strategy;
use backlab_core::sim::{run_backtest, EquityPoint, SimError};

use crate::metrics::{AnalyticsConfig, PerformanceReport};

/// Optimized strategy parameters. Sorted keys keep serialized forms (and
/// therefore hashes) canonical.
pub type ParamSet = BTreeMap<String, f64>;

/// Error raised by an optimizer while fitting a training slice. The window
/// is skipped, not the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct OptimizerError(String);

impl OptimizerError {
    pub fn new(message: impl Into<String>) -> Self {
        OptimizerError(message.into())
    }
}

/// Fits strategy parameters to a training slice. The runner only ever passes
/// bars strictly before the test window.
pub trait Optimizer: Send {
    fn optimize(&mut self, train: &[Bar]) -> Result<ParamSet, OptimizerError>;
}

impl<F> Optimizer for F
where
    F: FnMut(&[Bar]) -> Result<ParamSet, OptimizerError> + Send,
{
    fn optimize(&mut self, train: &[Bar]) -> Result<ParamSet, OptimizerError> {
        self(train)
    }
}

/// Window geometry, in bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardConfig {
    pub train_len: usize,
    pub test_len: usize,
    /// How far `t` advances per window; must be at least `test_len`.
    pub step_len: usize,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        WalkForwardConfig {
            train_len: 252,
            test_len: 63,
            step_len: 63,
        }
    }
}

#[derive(Debug, Error)]
pub enum WalkForwardError {
    #[error("train_len and test_len must be positive")]
    ZeroWindow,
    #[error("step_len {step} is smaller than test_len {test}; test windows would overlap")]
    StepTooSmall { step: usize, test: usize },
    #[error("series has {have} bars, need at least {needed} for one window")]
    InsufficientData { needed: usize, have: usize },
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// One completed test window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowRecord {
    pub index: usize,
    pub train_start: NaiveDateTime,
    pub train_end: NaiveDateTime,
    pub test_start: NaiveDateTime,
    pub test_end: NaiveDateTime,
    pub params: ParamSet,
    pub report: PerformanceReport,
    pub trade_count: usize,
    /// `Some` when a strategy fault cut this window's replay short.
    pub failure: Option<String>,
}

/// A window the optimizer could not fit; the runner advanced past it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedWindow {
    pub index: usize,
    pub test_start: NaiveDateTime,
    pub test_end: NaiveDateTime,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub config: WalkForwardConfig,
    pub windows: Vec<WindowRecord>,
    pub skipped: Vec<SkippedWindow>,
    /// Metrics over the chained curve and pooled trades of all test windows.
    pub aggregate: PerformanceReport,
    /// Out-of-sample equity, chained window to window.
    pub equity_curve: Vec<EquityPoint>,
    /// All test-window fills, pooled in time order.
    pub trades: Vec<Trade>,
    pub initial_capital: f64,
    pub final_equity: f64,
    pub cancelled: bool,
}

/// Runs walk-forward validation over `series`.
///
/// `factory` builds a fresh strategy per window from that window's optimized
/// parameters. `cancel` is polled between windows; a cancelled run returns
/// the windows completed so far, marked cancelled.
#[allow(clippy::too_many_arguments)]
pub fn run_walk_forward(
    series: &[Bar],
    config: &WalkForwardConfig,
    optimizer: &mut dyn Optimizer,
    factory: &mut dyn FnMut(&ParamSet) -> Box<dyn Strategy>,
    initial_capital: f64,
    cost_model: &dyn CostModel,
    constraints: &TradeConstraints,
    analytics: &AnalyticsConfig,
    cancel: Option<&AtomicBool>,
) -> Result<WalkForwardReport, WalkForwardError> {
    if config.train_len == 0 || config.test_len == 0 || config.step_len == 0 {
        return Err(WalkForwardError::ZeroWindow);
    }
    if config.step_len < config.test_len {
        return Err(WalkForwardError::StepTooSmall {
            step: config.step_len,
            test: config.test_len,
        });
    }
    let needed = config.train_len + config.test_len;
    if series.len() < needed {
        return Err(WalkForwardError::InsufficientData {
            needed,
            have: series.len(),
        });
    }
    let timeframe = series[0].timeframe;

    info!(
        bars = series.len(),
        train_len = config.train_len,
        test_len = config.test_len,
        step_len = config.step_len,
        "starting walk-forward run"
    );

    let mut windows = Vec::new();
    let mut skipped = Vec::new();
    let mut equity_curve: Vec<EquityPoint> = Vec::new();
    let mut trades: Vec<Trade> = Vec::new();
    let mut capital = initial_capital;
    let mut cancelled = false;

    let mut index = 0usize;
    let mut t = config.train_len;
    while t + config.test_len <= series.len() {
        if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
            warn!(completed = windows.len(), "walk-forward run cancelled");
            cancelled = true;
            break;
        }
        let train = &series[t - config.train_len..t];
        let test = &series[t..t + config.test_len];

        debug!(window = index, bars = train.len(), "training");
        let params = match optimizer.optimize(train) {
            Ok(p) => p,
            Err(err) => {
                warn!(window = index, error = %err, "optimizer failed, skipping window");
                skipped.push(SkippedWindow {
                    index,
                    test_start: test[0].timestamp,
                    test_end: test[test.len() - 1].timestamp,
                    reason: err.to_string(),
                });
                index += 1;
                t += config.step_len;
                continue;
            }
        };

        debug!(window = index, capital, "testing");
        let mut strategy = factory(&params);
        let result = run_backtest(strategy.as_mut(), test, capital, cost_model, constraints)?;
        let report = PerformanceReport::compute(
            &result.trades,
            &result.equity_curve,
            timeframe,
            analytics,
        );
        windows.push(WindowRecord {
            index,
            train_start: train[0].timestamp,
            train_end: train[train.len() - 1].timestamp,
            test_start: test[0].timestamp,
            test_end: test[test.len() - 1].timestamp,
            params,
            report,
            trade_count: result.trades.len(),
            failure: result.failure.as_ref().map(|f| f.message.clone()),
        });
        if let Some(last) = result.equity_curve.last() {
            capital = last.equity;
        }
        equity_curve.extend(result.equity_curve);
        trades.extend(result.trades);

        debug!(window = index, "advancing");
        index += 1;
        t += config.step_len;
    }

    let aggregate = PerformanceReport::compute(&trades, &equity_curve, timeframe, analytics);
    info!(
        windows = windows.len(),
        skipped = skipped.len(),
        final_equity = capital,
        "walk-forward run done"
    );
    Ok(WalkForwardReport {
        config: *config,
        windows,
        skipped,
        aggregate,
        equity_curve,
        trades,
        initial_capital,
        final_equity: capital,
        cancelled,
    })
}
