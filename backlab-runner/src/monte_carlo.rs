//! Monte Carlo robustness — resample the realized trade sequence and measure
//! the dispersion of outcomes.
//!
//! Each simulation reorders (permute) or redraws with replacement (bootstrap)
//! the per-trade returns of the closing fills, then replays them
//! multiplicatively from the starting capital, tracking ending equity, max
//! drawdown, and whether equity ever touched the ruin floor. Simulations run
//! in parallel, but every one derives its generator from
//! `SeedTree(seed, "monte-carlo")` at its own index, so results are identical
//! regardless of thread count or scheduling order.

use rand::seq::SliceRandom;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{info, warn};

use backlab_core::domain::Trade;
use backlab_core::rng::SeedTree;

use crate::metrics::{cvar_below, mean, percentile_sorted};

#[derive(Debug, Error)]
pub enum MonteCarloError {
    #[error("no closing trades to resample")]
    NoClosingTrades,
    #[error("n_simulations must be positive")]
    ZeroSimulations,
    #[error("ruin floor must be in [0, 1), got {0}")]
    BadRuinFloor(f64),
    #[error("initial capital must be positive and finite, got {0}")]
    InvalidCapital(f64),
}

/// How each simulation rearranges the realized trade returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResampleMode {
    /// Shuffle the observed returns; every simulation spends the same P&L in
    /// a different order, isolating path risk.
    Permute,
    /// Draw with replacement; outcomes disperse as well as paths.
    Bootstrap,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloConfig {
    #[serde(default = "default_n_simulations")]
    pub n_simulations: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_mode")]
    pub mode: ResampleMode,
    /// Equity at or below `ruin_floor * initial_capital` counts as ruin.
    #[serde(default)]
    pub ruin_floor: f64,
}

fn default_n_simulations() -> usize {
    1_000
}

fn default_mode() -> ResampleMode {
    ResampleMode::Permute
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        MonteCarloConfig {
            n_simulations: default_n_simulations(),
            seed: 0,
            mode: default_mode(),
            ruin_floor: 0.0,
        }
    }
}

/// Five-point summary of one simulated quantity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

impl Percentiles {
    fn from_sorted(sorted: &[f64]) -> Self {
        Percentiles {
            p5: percentile_sorted(sorted, 5.0),
            p25: percentile_sorted(sorted, 25.0),
            p50: percentile_sorted(sorted, 50.0),
            p75: percentile_sorted(sorted, 75.0),
            p95: percentile_sorted(sorted, 95.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonteCarloReport {
    pub n_requested: usize,
    /// Simulations that actually ran; fewer than requested after a cancel.
    pub n_completed: usize,
    pub seed: u64,
    pub mode: ResampleMode,
    /// 5th percentile of simulated total returns.
    pub var_95: f64,
    /// Mean simulated total return at or below `var_95`.
    pub cvar_95: f64,
    /// Fraction of simulations that touched the ruin floor.
    pub probability_of_ruin: f64,
    pub mean_ending_equity: f64,
    pub ending_equity: Percentiles,
    pub max_drawdown: Percentiles,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
struct SimOutcome {
    ending_equity: f64,
    max_drawdown: f64,
    ruined: bool,
}

/// Runs the Monte Carlo study over the closing-fill returns of `trades`.
///
/// `cancel` is polled at simulation granularity; on cancel the simulations
/// already finished are aggregated and the report is marked `cancelled`.
pub fn run_monte_carlo(
    trades: &[Trade],
    initial_capital: f64,
    config: &MonteCarloConfig,
    cancel: Option<&AtomicBool>,
) -> Result<MonteCarloReport, MonteCarloError> {
    if config.n_simulations == 0 {
        return Err(MonteCarloError::ZeroSimulations);
    }
    if !(0.0..1.0).contains(&config.ruin_floor) {
        return Err(MonteCarloError::BadRuinFloor(config.ruin_floor));
    }
    if !initial_capital.is_finite() || initial_capital <= 0.0 {
        return Err(MonteCarloError::InvalidCapital(initial_capital));
    }
    let returns: Vec<f64> = trades.iter().filter_map(Trade::return_pct).collect();
    if returns.is_empty() {
        return Err(MonteCarloError::NoClosingTrades);
    }

    info!(
        n_simulations = config.n_simulations,
        seed = config.seed,
        mode = ?config.mode,
        trade_returns = returns.len(),
        "starting monte carlo study"
    );

    let tree = SeedTree::new(config.seed, "monte-carlo");
    let floor = initial_capital * config.ruin_floor;
    let outcomes: Vec<Option<SimOutcome>> = (0..config.n_simulations as u64)
        .into_par_iter()
        .map(|i| {
            if cancel.is_some_and(|f| f.load(Ordering::Relaxed)) {
                return None;
            }
            let mut rng = tree.rng("path", i);
            let resampled = match config.mode {
                ResampleMode::Permute => {
                    let mut shuffled = returns.clone();
                    shuffled.shuffle(&mut rng);
                    shuffled
                }
                ResampleMode::Bootstrap => (0..returns.len())
                    .map(|_| returns[rng.gen_range(0..returns.len())])
                    .collect(),
            };
            Some(replay_returns(&resampled, initial_capital, floor))
        })
        .collect();

    let cancelled = outcomes.iter().any(Option::is_none);
    let completed: Vec<SimOutcome> = outcomes.into_iter().flatten().collect();
    if cancelled {
        warn!(
            completed = completed.len(),
            requested = config.n_simulations,
            "monte carlo study cancelled"
        );
    }
    Ok(aggregate(&completed, initial_capital, config, cancelled))
}

/// Multiplicative replay of one resampled return sequence.
fn replay_returns(returns: &[f64], initial_capital: f64, floor: f64) -> SimOutcome {
    let mut equity = initial_capital;
    let mut peak = initial_capital;
    let mut max_dd = 0.0_f64;
    let mut ruined = equity <= floor;
    for &r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
        if equity <= floor {
            ruined = true;
        }
    }
    SimOutcome {
        ending_equity: equity,
        max_drawdown: max_dd,
        ruined,
    }
}

fn aggregate(
    outcomes: &[SimOutcome],
    initial_capital: f64,
    config: &MonteCarloConfig,
    cancelled: bool,
) -> MonteCarloReport {
    let mut equities: Vec<f64> = outcomes.iter().map(|o| o.ending_equity).collect();
    let mut drawdowns: Vec<f64> = outcomes.iter().map(|o| o.max_drawdown).collect();
    let mut sim_returns: Vec<f64> = equities
        .iter()
        .map(|e| e / initial_capital - 1.0)
        .collect();
    equities.sort_by(|a, b| a.total_cmp(b));
    drawdowns.sort_by(|a, b| a.total_cmp(b));
    sim_returns.sort_by(|a, b| a.total_cmp(b));

    let var = percentile_sorted(&sim_returns, 5.0);
    let ruined = outcomes.iter().filter(|o| o.ruined).count();
    MonteCarloReport {
        n_requested: config.n_simulations,
        n_completed: outcomes.len(),
        seed: config.seed,
        mode: config.mode,
        var_95: var,
        cvar_95: cvar_below(&sim_returns, var),
        probability_of_ruin: if outcomes.is_empty() {
            0.0
        } else {
            ruined as f64 / outcomes.len() as f64
        },
        mean_ending_equity: mean(&equities),
        ending_equity: Percentiles::from_sorted(&equities),
        max_drawdown: Percentiles::from_sorted(&drawdowns),
        cancelled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};
    use std::sync::atomic::AtomicBool;

    use backlab_core::domain::Side;

    /// Closing sell whose basis works out so that `return_pct() == ret`.
    fn closing_with_return(ret: f64) -> Trade {
        // basis 1000, pnl = ret * basis, notional = basis + pnl.
        let basis = 1_000.0;
        let pnl = ret * basis;
        Trade {
            timestamp: NaiveDate::from_ymd_opt(2024, 4, 1)
                .unwrap()
                .and_time(NaiveTime::MIN),
            symbol: "MC".into(),
            side: Side::Sell,
            quantity: 10.0,
            fill_price: (basis + pnl) / 10.0,
            commission: 0.0,
            slippage: 0.0,
            realized_pnl: Some(pnl),
            cash_after: 0.0,
            position_after: 0.0,
        }
    }

    fn alternating_ledger() -> Vec<Trade> {
        (0..10)
            .map(|i| closing_with_return(if i % 2 == 0 { 0.05 } else { -0.03 }))
            .collect()
    }

    #[test]
    fn same_seed_same_report() {
        let trades = alternating_ledger();
        let config = MonteCarloConfig {
            n_simulations: 200,
            seed: 42,
            mode: ResampleMode::Bootstrap,
            ruin_floor: 0.0,
        };
        let a = run_monte_carlo(&trades, 10_000.0, &config, None).unwrap();
        let b = run_monte_carlo(&trades, 10_000.0, &config, None).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_seed_different_bootstrap_outcomes() {
        let trades = alternating_ledger();
        let mut config = MonteCarloConfig {
            n_simulations: 200,
            seed: 1,
            mode: ResampleMode::Bootstrap,
            ruin_floor: 0.0,
        };
        let a = run_monte_carlo(&trades, 10_000.0, &config, None).unwrap();
        config.seed = 2;
        let b = run_monte_carlo(&trades, 10_000.0, &config, None).unwrap();
        assert_ne!(a.ending_equity, b.ending_equity);
    }

    #[test]
    fn permutation_preserves_ending_equity() {
        // Multiplication commutes: every permutation of the same returns ends
        // at the same equity, so the distribution is a point mass.
        let trades = alternating_ledger();
        let report = run_monte_carlo(
            &trades,
            10_000.0,
            &MonteCarloConfig {
                n_simulations: 1_000,
                seed: 42,
                mode: ResampleMode::Permute,
                ruin_floor: 0.0,
            },
            None,
        )
        .unwrap();
        let expected = 10_000.0 * 1.05_f64.powi(5) * 0.97_f64.powi(5);
        assert!((report.ending_equity.p5 - expected).abs() < 1e-6);
        assert!((report.ending_equity.p95 - expected).abs() < 1e-6);
        assert!((report.mean_ending_equity - expected).abs() < 1e-6);
        assert!((report.var_95 - (expected / 10_000.0 - 1.0)).abs() < 1e-10);
        assert_eq!(report.n_completed, 1_000);
        assert!(!report.cancelled);
    }

    #[test]
    fn permutation_drawdowns_still_vary() {
        let trades = alternating_ledger();
        let report = run_monte_carlo(
            &trades,
            10_000.0,
            &MonteCarloConfig {
                n_simulations: 500,
                seed: 7,
                mode: ResampleMode::Permute,
                ruin_floor: 0.0,
            },
            None,
        )
        .unwrap();
        // Worst ordering front-loads all five losses; best alternates.
        assert!(report.max_drawdown.p95 > report.max_drawdown.p5);
        assert!(report.max_drawdown.p95 > 0.0);
    }

    #[test]
    fn all_losing_trades_hit_a_high_floor() {
        let trades: Vec<Trade> = (0..8).map(|_| closing_with_return(-0.30)).collect();
        let report = run_monte_carlo(
            &trades,
            10_000.0,
            &MonteCarloConfig {
                n_simulations: 100,
                seed: 3,
                mode: ResampleMode::Permute,
                ruin_floor: 0.5,
            },
            None,
        )
        .unwrap();
        // 0.7^8 of capital is far below half of it, in every ordering.
        assert_eq!(report.probability_of_ruin, 1.0);
    }

    #[test]
    fn winners_never_ruin() {
        let trades: Vec<Trade> = (0..8).map(|_| closing_with_return(0.02)).collect();
        let report =
            run_monte_carlo(&trades, 10_000.0, &MonteCarloConfig::default(), None).unwrap();
        assert_eq!(report.probability_of_ruin, 0.0);
        assert!(report.var_95 > 0.0);
    }

    #[test]
    fn percentiles_are_ordered() {
        let trades = alternating_ledger();
        let report = run_monte_carlo(
            &trades,
            10_000.0,
            &MonteCarloConfig {
                n_simulations: 300,
                seed: 11,
                mode: ResampleMode::Bootstrap,
                ruin_floor: 0.0,
            },
            None,
        )
        .unwrap();
        let p = report.ending_equity;
        assert!(p.p5 <= p.p25 && p.p25 <= p.p50 && p.p50 <= p.p75 && p.p75 <= p.p95);
        assert!(report.cvar_95 <= report.var_95);
    }

    #[test]
    fn entries_are_ignored_and_empty_ledger_rejected() {
        let mut entry = closing_with_return(0.05);
        entry.realized_pnl = None;
        entry.side = Side::Buy;
        let err = run_monte_carlo(&[entry], 10_000.0, &MonteCarloConfig::default(), None).unwrap_err();
        assert!(matches!(err, MonteCarloError::NoClosingTrades));
    }

    #[test]
    fn bad_config_rejected() {
        let trades = alternating_ledger();
        assert!(matches!(
            run_monte_carlo(
                &trades,
                10_000.0,
                &MonteCarloConfig {
                    n_simulations: 0,
                    ..MonteCarloConfig::default()
                },
                None
            ),
            Err(MonteCarloError::ZeroSimulations)
        ));
        assert!(matches!(
            run_monte_carlo(
                &trades,
                10_000.0,
                &MonteCarloConfig {
                    ruin_floor: 1.5,
                    ..MonteCarloConfig::default()
                },
                None
            ),
            Err(MonteCarloError::BadRuinFloor(_))
        ));
        assert!(matches!(
            run_monte_carlo(&trades, 0.0, &MonteCarloConfig::default(), None),
            Err(MonteCarloError::InvalidCapital(_))
        ));
    }

    #[test]
    fn pre_set_cancel_flag_yields_empty_cancelled_report() {
        let trades = alternating_ledger();
        let flag = AtomicBool::new(true);
        let report =
            run_monte_carlo(&trades, 10_000.0, &MonteCarloConfig::default(), Some(&flag)).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.n_completed, 0);
        assert_eq!(report.probability_of_ruin, 0.0);
    }
}
