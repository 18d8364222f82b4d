//! BackLab CLI — run, compare, and validate strategies from CSV data.
//!
//! Commands:
//! - `run` — one backtest from a TOML config and a CSV bar file
//! - `compare` — run a grid of moving-average strategies and rank them
//! - `walk-forward` — rolling train/test validation with a grid optimizer
//! - `monte-carlo` — resample a run's trade ledger for robustness
//!
//! The demo strategy family (moving-average crossover) lives here; the
//! engine crates know nothing about any particular strategy.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use backlab_core::domain::{Bar, Decision, PortfolioSnapshot};
use backlab_core::sim::strategy::{Strategy, StrategyError};
use backlab_core::store::csv::load_bars;
use backlab_core::store::BarStore;
use backlab_runner::{
    compare, run_monte_carlo, run_single, run_walk_forward, BacktestResult, CompareConfig,
    OptimizerError, ParamSet, ResultStore, RunConfig, RunSpec, StoredRecord,
};

#[derive(Parser)]
#[command(
    name = "backlab",
    about = "BackLab — strategy backtesting and validation engine"
)]
struct Cli {
    /// Path to the TOML run configuration.
    #[arg(long, global = true, default_value = "backlab.toml")]
    config: PathBuf,

    /// CSV bar file for the configured symbol/timeframe.
    #[arg(long, global = true, default_value = "bars.csv")]
    data: PathBuf,

    /// Append results to this JSONL history file.
    #[arg(long, global = true)]
    history: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one moving-average crossover backtest.
    Run {
        /// Short moving-average window, in bars.
        #[arg(long, default_value_t = 10)]
        short: usize,

        /// Long moving-average window, in bars.
        #[arg(long, default_value_t = 30)]
        long: usize,
    },
    /// Run the whole crossover grid and rank the results.
    Compare,
    /// Walk-forward validation with a grid-search optimizer.
    WalkForward,
    /// Monte Carlo resampling of one run's trade ledger.
    MonteCarlo {
        #[arg(long, default_value_t = 10)]
        short: usize,

        #[arg(long, default_value_t = 30)]
        long: usize,
    },
}

/// Candidate windows for the compare grid and the walk-forward optimizer.
const MA_GRID: &[(usize, usize)] = &[(5, 20), (10, 30), (20, 50), (50, 200)];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = RunConfig::load(&cli.config)?;
    let series = load_series(&cli.data, &config)?;
    tracing::info!(bars = series.len(), symbol = %config.symbol, "series ready");
    let history = cli.history.map(ResultStore::new);

    match cli.command {
        Commands::Run { short, long } => cmd_run(&config, &series, short, long, history.as_ref()),
        Commands::Compare => cmd_compare(&config, &series),
        Commands::WalkForward => cmd_walk_forward(&config, &series, history.as_ref()),
        Commands::MonteCarlo { short, long } => {
            cmd_monte_carlo(&config, &series, short, long, history.as_ref())
        }
    }
}

// ─── Demo strategy family ───────────────────────────────────────────

/// Moving-average crossover: long while the short average is above the long
/// average, flat otherwise. Holds until both windows are warm.
struct MaCross {
    short: usize,
    long: usize,
    closes: Vec<f64>,
}

impl MaCross {
    fn new(short: usize, long: usize) -> Result<Self> {
        if short == 0 || short >= long {
            bail!("short window {short} must be positive and below long window {long}");
        }
        Ok(MaCross {
            short,
            long,
            closes: Vec::new(),
        })
    }

    fn mean_of_last(&self, n: usize) -> f64 {
        let tail = &self.closes[self.closes.len() - n..];
        tail.iter().sum::<f64>() / n as f64
    }
}

impl Strategy for MaCross {
    fn decide(
        &mut self,
        bar: &Bar,
        portfolio: &PortfolioSnapshot,
    ) -> Result<Decision, StrategyError> {
        self.closes.push(bar.close);
        if self.closes.len() < self.long {
            return Ok(Decision::hold());
        }
        let short_ma = self.mean_of_last(self.short);
        let long_ma = self.mean_of_last(self.long);
        if short_ma > long_ma && portfolio.is_flat() {
            Ok(Decision::buy_all())
        } else if short_ma < long_ma && !portfolio.is_flat() {
            Ok(Decision::close())
        } else {
            Ok(Decision::hold())
        }
    }
}

fn ma_cross_from_params(params: &ParamSet) -> Box<dyn Strategy> {
    // The optimizer only ever emits grid entries, which always validate.
    let short = params.get("short").copied().unwrap_or(10.0) as usize;
    let long = params.get("long").copied().unwrap_or(30.0) as usize;
    Box::new(MaCross::new(short, long).expect("grid windows are valid"))
}

fn strategy_id(short: usize, long: usize) -> String {
    format!("ma-cross-{short}-{long}")
}

// ─── Shared plumbing ────────────────────────────────────────────────

fn load_series(data: &Path, config: &RunConfig) -> Result<Vec<Bar>> {
    let loaded = load_bars(data, &config.symbol, config.timeframe)
        .with_context(|| format!("loading bars from {}", data.display()))?;
    if loaded.skipped_rows > 0 {
        eprintln!("Skipped {} malformed CSV rows", loaded.skipped_rows);
    }
    let store = BarStore::new();
    let report = store.ingest(loaded.bars);
    if report.inserted == 0 {
        bail!("no usable bars in {}", data.display());
    }
    let series = match &config.period {
        Some(period) => store.get_series(
            &config.symbol,
            config.timeframe,
            period.start,
            period.end,
        )?,
        None => store
            .series(&config.symbol, config.timeframe)
            .map(|arc| arc.as_ref().clone())
            .unwrap_or_default(),
    };
    if series.is_empty() {
        bail!("no bars in the configured period");
    }
    Ok(series)
}

fn spec_for<'a>(config: &'a RunConfig) -> RunSpec<'a> {
    RunSpec {
        initial_capital: config.initial_capital,
        cost_model: &config.costs,
        constraints: &config.constraints,
        analytics: config.analytics,
        config_hash: config.config_hash(),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_run_summary(result: &BacktestResult) {
    let r = &result.report;
    eprintln!(
        "{}: return {:+.2}% | sharpe {:.2} | max dd {:.2}% | {} trades ({} closing)",
        result.strategy_id,
        r.total_return * 100.0,
        r.sharpe,
        r.max_drawdown * 100.0,
        r.trade_count,
        r.closing_trades,
    );
}

// ─── Commands ───────────────────────────────────────────────────────

fn cmd_run(
    config: &RunConfig,
    series: &[Bar],
    short: usize,
    long: usize,
    history: Option<&ResultStore>,
) -> Result<()> {
    let spec = spec_for(config);
    let mut strategy = MaCross::new(short, long)?;
    let result = run_single(&spec, &strategy_id(short, long), &mut strategy, series)?;
    print_run_summary(&result);
    print_json(&result)?;
    if let Some(store) = history {
        store.append(&StoredRecord::Backtest(Box::new(result)))?;
    }
    Ok(())
}

fn cmd_compare(config: &RunConfig, series: &[Bar]) -> Result<()> {
    let spec = spec_for(config);
    let mut reports = Vec::new();
    for &(short, long) in MA_GRID {
        let mut strategy = MaCross::new(short, long)?;
        let result = run_single(&spec, &strategy_id(short, long), &mut strategy, series)?;
        print_run_summary(&result);
        reports.push((result.strategy_id, result.report));
    }
    let compare_config = config.compare.clone().unwrap_or_else(CompareConfig::default);
    let rankings = compare(&reports, &compare_config)?;
    print_json(&rankings)
}

fn cmd_walk_forward(
    config: &RunConfig,
    series: &[Bar],
    history: Option<&ResultStore>,
) -> Result<()> {
    let wf_config = config.walk_forward.unwrap_or_default();
    let spec = spec_for(config);

    // Grid optimizer: replay each candidate on the training slice and keep
    // the one with the highest ending equity.
    let mut optimizer = |train: &[Bar]| -> Result<ParamSet, OptimizerError> {
        let mut best: Option<(f64, (usize, usize))> = None;
        for &(short, long) in MA_GRID {
            if train.len() < long {
                continue;
            }
            let mut candidate =
                MaCross::new(short, long).map_err(|e| OptimizerError::new(e.to_string()))?;
            let sim = backlab_core::sim::run_backtest(
                &mut candidate,
                train,
                spec.initial_capital,
                spec.cost_model,
                spec.constraints,
            )
            .map_err(|e| OptimizerError::new(e.to_string()))?;
            let ending = sim.equity_curve.last().map_or(0.0, |p| p.equity);
            if best.map_or(true, |(b, _)| ending > b) {
                best = Some((ending, (short, long)));
            }
        }
        let (_, (short, long)) =
            best.ok_or_else(|| OptimizerError::new("training slice shorter than every window"))?;
        let mut params = ParamSet::new();
        params.insert("short".into(), short as f64);
        params.insert("long".into(), long as f64);
        Ok(params)
    };
    let mut factory = ma_cross_from_params;

    let report = run_walk_forward(
        series,
        &wf_config,
        &mut optimizer,
        &mut factory,
        config.initial_capital,
        &config.costs,
        &config.constraints,
        &config.analytics,
        None,
    )?;
    eprintln!(
        "walk-forward: {} windows ({} skipped) | oos return {:+.2}% | final equity {:.2}",
        report.windows.len(),
        report.skipped.len(),
        report.aggregate.total_return * 100.0,
        report.final_equity,
    );
    if let Some(store) = history {
        store.append(&StoredRecord::walk_forward(spec.config_hash.clone(), report.clone()))?;
    }
    print_json(&report)
}

fn cmd_monte_carlo(
    config: &RunConfig,
    series: &[Bar],
    short: usize,
    long: usize,
    history: Option<&ResultStore>,
) -> Result<()> {
    let mc_config = config.monte_carlo.unwrap_or_default();
    let spec = spec_for(config);
    let mut strategy = MaCross::new(short, long)?;
    let result = run_single(&spec, &strategy_id(short, long), &mut strategy, series)?;
    print_run_summary(&result);

    let report = run_monte_carlo(
        &result.sim.trades,
        config.initial_capital,
        &mc_config,
        None,
    )?;
    eprintln!(
        "monte carlo: {} sims | var95 {:+.2}% | cvar95 {:+.2}% | p(ruin) {:.3}",
        report.n_completed,
        report.var_95 * 100.0,
        report.cvar_95 * 100.0,
        report.probability_of_ruin,
    );
    if let Some(store) = history {
        store.append(&StoredRecord::Backtest(Box::new(result.clone())))?;
        store.append(&StoredRecord::monte_carlo(result.record_id(), report.clone()))?;
    }
    print_json(&report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};

    use backlab_core::domain::Timeframe;

    fn bar(i: usize, close: f64) -> Bar {
        Bar {
            symbol: "SPY".into(),
            timeframe: Timeframe::Day1,
            timestamp: NaiveDate::from_ymd_opt(2024, 1, 2)
                .unwrap()
                .and_time(NaiveTime::MIN)
                + Duration::days(i as i64),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10_000,
        }
    }

    fn snapshot(flat: bool) -> PortfolioSnapshot {
        PortfolioSnapshot {
            cash: if flat { 10_000.0 } else { 0.0 },
            equity: 10_000.0,
            position_qty: if flat { 0.0 } else { 100.0 },
            avg_entry_price: if flat { None } else { Some(100.0) },
            realized_pnl: 0.0,
        }
    }

    #[test]
    fn ma_cross_holds_until_warm() {
        let mut strat = MaCross::new(2, 4).unwrap();
        for i in 0..3 {
            let d = strat.decide(&bar(i, 100.0), &snapshot(true)).unwrap();
            assert_eq!(d, Decision::hold());
        }
    }

    #[test]
    fn ma_cross_buys_on_upward_cross() {
        let mut strat = MaCross::new(2, 4).unwrap();
        // Rising closes: short MA above long MA once warm.
        for (i, close) in [100.0, 101.0, 102.0, 103.0].iter().enumerate() {
            let _ = strat.decide(&bar(i, *close), &snapshot(true)).unwrap();
        }
        let d = strat.decide(&bar(4, 104.0), &snapshot(true)).unwrap();
        assert_eq!(d, Decision::buy_all());
    }

    #[test]
    fn ma_cross_closes_on_downward_cross() {
        let mut strat = MaCross::new(2, 4).unwrap();
        for (i, close) in [104.0, 103.0, 102.0, 101.0].iter().enumerate() {
            let _ = strat.decide(&bar(i, *close), &snapshot(false)).unwrap();
        }
        let d = strat.decide(&bar(4, 100.0), &snapshot(false)).unwrap();
        assert_eq!(d, Decision::close());
    }

    #[test]
    fn ma_cross_rejects_bad_windows() {
        assert!(MaCross::new(0, 10).is_err());
        assert!(MaCross::new(10, 10).is_err());
        assert!(MaCross::new(20, 10).is_err());
    }

    #[test]
    fn params_round_trip_through_factory() {
        let mut params = ParamSet::new();
        params.insert("short".into(), 5.0);
        params.insert("long".into(), 20.0);
        let mut strategy = ma_cross_from_params(&params);
        let d = strategy.decide(&bar(0, 100.0), &snapshot(true)).unwrap();
        assert_eq!(d, Decision::hold());
    }
}
