//! BackLab Runner — analytics and validation on top of `backlab-core`.
//!
//! This crate builds on the execution simulator to provide:
//! - Performance analytics over trade ledgers and equity curves
//! - A multi-metric strategy comparator
//! - Walk-forward validation with an external optimizer seam
//! - Seeded, parallel Monte Carlo resampling of trade outcomes
//! - Single and batch run orchestration with provenance
//! - JSONL result persistence and TOML run configuration

pub mod compare;
pub mod config;
pub mod metrics;
pub mod monte_carlo;
pub mod persist;
pub mod result;
pub mod runner;
pub mod walk_forward;

pub use compare::{compare, CompareConfig, CompareError, MetricScore, StrategyRanking};
pub use config::{ConfigError, PeriodConfig, RunConfig};
pub use metrics::{AnalyticsConfig, PerformanceReport};
pub use monte_carlo::{
    run_monte_carlo, MonteCarloConfig, MonteCarloError, MonteCarloReport, Percentiles,
    ResampleMode,
};
pub use persist::{LoadOutcome, PersistError, ResultStore, StoredRecord};
pub use result::{BacktestResult, ResultKey, SCHEMA_VERSION};
pub use runner::{run_batch, run_single, BatchItem, BatchOutcome, RunError, RunSpec};
pub use walk_forward::{
    run_walk_forward, Optimizer, OptimizerError, ParamSet, SkippedWindow, WalkForwardConfig,
    WalkForwardError, WalkForwardReport, WindowRecord,
};
