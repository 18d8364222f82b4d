//! Strategy comparator — rank completed runs across chosen metrics.
//!
//! Ranking is deterministic: every metric ranks descending by value with
//! `strategy_id` breaking ties, normalized scores are min-max scaled into
//! `[0, 1]` with the highest value at 1, and the composite is the weighted
//! mean of the normalized scores. Callers pick metrics where higher is
//! better (for drawdown-style metrics, weight something like Calmar
//! instead). Configuration problems (unknown metric names, mismatched
//! weights, non-finite values) are rejected eagerly before any ranking
//! happens.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::metrics::PerformanceReport;

/// Metric names the comparator understands, as accepted in configuration.
pub const KNOWN_METRICS: &[&str] = &[
    "total_return",
    "annualized_return",
    "volatility",
    "sharpe",
    "sortino",
    "max_drawdown",
    "calmar",
    "var_95",
    "cvar_95",
    "win_rate",
    "profit_factor",
];

#[derive(Debug, Error)]
pub enum CompareError {
    #[error("no results to compare")]
    EmptyInput,
    #[error("no metrics selected")]
    NoMetrics,
    #[error("unknown metric '{0}'")]
    UnknownMetric(String),
    #[error("duplicate metric '{0}'")]
    DuplicateMetric(String),
    #[error("duplicate strategy id '{0}'")]
    DuplicateStrategy(String),
    #[error("{count} weights given for {metrics} metrics")]
    WeightMismatch { count: usize, metrics: usize },
    #[error("weight for '{metric}' is {value}; weights must be finite and non-negative")]
    BadWeight { metric: String, value: f64 },
    #[error("metric '{metric}' is {value} for strategy '{strategy_id}'")]
    NonFiniteValue {
        metric: String,
        strategy_id: String,
        value: f64,
    },
}

/// Which metrics to rank on, and how to weight them in the composite.
/// Weights default to equal and are normalized to sum to one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareConfig {
    pub metrics: Vec<String>,
    #[serde(default)]
    pub weights: Option<Vec<f64>>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        CompareConfig {
            metrics: vec!["sharpe".into(), "calmar".into(), "total_return".into()],
            weights: None,
        }
    }
}

/// One strategy's standing on one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricScore {
    pub value: f64,
    /// 1 is best.
    pub rank: usize,
    /// Min-max scaled into `[0, 1]`, 1 is best.
    pub normalized: f64,
}

/// Comparator output row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyRanking {
    pub strategy_id: String,
    /// Weighted mean of normalized per-metric scores.
    pub composite: f64,
    pub scores: BTreeMap<String, MetricScore>,
}

/// Ranks `reports` on the configured metrics. Output is sorted by composite
/// score descending, then `strategy_id` ascending.
pub fn compare(
    reports: &[(String, PerformanceReport)],
    config: &CompareConfig,
) -> Result<Vec<StrategyRanking>, CompareError> {
    if reports.is_empty() {
        return Err(CompareError::EmptyInput);
    }
    if config.metrics.is_empty() {
        return Err(CompareError::NoMetrics);
    }
    let mut seen_metrics = HashSet::new();
    for metric in &config.metrics {
        if !KNOWN_METRICS.contains(&metric.as_str()) {
            return Err(CompareError::UnknownMetric(metric.clone()));
        }
        if !seen_metrics.insert(metric.as_str()) {
            return Err(CompareError::DuplicateMetric(metric.clone()));
        }
    }
    let weights = resolve_weights(config)?;
    let mut seen_ids = HashSet::new();
    for (id, report) in reports {
        if !seen_ids.insert(id.as_str()) {
            return Err(CompareError::DuplicateStrategy(id.clone()));
        }
        for metric in &config.metrics {
            let value = metric_value(report, metric);
            if !value.is_finite() {
                return Err(CompareError::NonFiniteValue {
                    metric: metric.clone(),
                    strategy_id: id.clone(),
                    value,
                });
            }
        }
    }

    let mut rankings: Vec<StrategyRanking> = reports
        .iter()
        .map(|(id, _)| StrategyRanking {
            strategy_id: id.clone(),
            composite: 0.0,
            scores: BTreeMap::new(),
        })
        .collect();

    for (metric, weight) in config.metrics.iter().zip(&weights) {
        let values: Vec<f64> = reports
            .iter()
            .map(|(_, r)| metric_value(r, metric))
            .collect();

        // Rank order: highest value first, strategy_id breaks exact ties.
        let mut order: Vec<usize> = (0..reports.len()).collect();
        order.sort_by(|&a, &b| {
            values[b]
                .total_cmp(&values[a])
                .then_with(|| reports[a].0.cmp(&reports[b].0))
        });

        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let span = max - min;

        for (rank0, &idx) in order.iter().enumerate() {
            let normalized = if span < 1e-12 {
                1.0
            } else {
                (values[idx] - min) / span
            };
            rankings[idx].composite += weight * normalized;
            rankings[idx].scores.insert(
                metric.clone(),
                MetricScore {
                    value: values[idx],
                    rank: rank0 + 1,
                    normalized,
                },
            );
        }
    }

    rankings.sort_by(|a, b| {
        b.composite
            .total_cmp(&a.composite)
            .then_with(|| a.strategy_id.cmp(&b.strategy_id))
    });
    Ok(rankings)
}

/// Looks up a report field by its configuration name. Callers must have
/// validated the name against `KNOWN_METRICS`.
pub fn metric_value(report: &PerformanceReport, metric: &str) -> f64 {
    match metric {
        "total_return" => report.total_return,
        "annualized_return" => report.annualized_return,
        "volatility" => report.volatility,
        "sharpe" => report.sharpe,
        "sortino" => report.sortino,
        "max_drawdown" => report.max_drawdown,
        "calmar" => report.calmar,
        "var_95" => report.var_95,
        "cvar_95" => report.cvar_95,
        "win_rate" => report.win_rate,
        "profit_factor" => report.profit_factor,
        _ => f64::NAN,
    }
}

fn resolve_weights(config: &CompareConfig) -> Result<Vec<f64>, CompareError> {
    let n = config.metrics.len();
    let raw = match &config.weights {
        None => vec![1.0; n],
        Some(w) => {
            if w.len() != n {
                return Err(CompareError::WeightMismatch {
                    count: w.len(),
                    metrics: n,
                });
            }
            w.clone()
        }
    };
    for (metric, &value) in config.metrics.iter().zip(&raw) {
        if !value.is_finite() || value < 0.0 {
            return Err(CompareError::BadWeight {
                metric: metric.clone(),
                value,
            });
        }
    }
    let total: f64 = raw.iter().sum();
    if total < 1e-12 {
        return Err(CompareError::BadWeight {
            metric: config.metrics[0].clone(),
            value: 0.0,
        });
    }
    Ok(raw.into_iter().map(|w| w / total).collect())
}
