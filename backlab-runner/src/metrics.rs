//! Performance analytics — pure functions over a trade ledger and equity curve.
//!
//! Every metric is a pure function: equity curve and/or trades in, scalar out.
//! Every ratio has a documented zero-denominator sentinel; nothing here ever
//! returns NaN or infinity, and recomputing on the same inputs is bit-for-bit
//! idempotent.
//!
//! Zero-denominator conventions:
//! - Sharpe, Sortino: 0.0 when the (downside) deviation is zero
//! - Calmar: 0.0 when max drawdown is zero
//! - Profit factor: 0.0 when gross loss is zero
//! - Win rate: 0.0 with no closing trades
//! - CVaR: falls back to VaR when the tail below it is empty

use serde::{Deserialize, Serialize};

use backlab_core::domain::{Timeframe, Trade};
use backlab_core::sim::EquityPoint;

/// Analytics knobs. `periods_per_year` overrides the timeframe-derived
/// default (252 daily, 52 weekly, intraday scaled from a 6.5-hour session).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Annualized risk-free rate used by Sharpe and Sortino.
    #[serde(default)]
    pub risk_free_rate: f64,
    #[serde(default)]
    pub periods_per_year: Option<f64>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        AnalyticsConfig {
            risk_free_rate: 0.0,
            periods_per_year: None,
        }
    }
}

/// Aggregate statistics for one backtest run. Derived once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub total_return: f64,
    pub annualized_return: f64,
    /// Annualized sample standard deviation of periodic returns.
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Largest peak-to-trough decline, as a non-negative fraction.
    pub max_drawdown: f64,
    pub calmar: f64,
    /// 5th percentile of periodic returns (linear interpolation).
    pub var_95: f64,
    /// Mean of periodic returns at or below the 5th percentile.
    pub cvar_95: f64,
    pub win_rate: f64,
    pub profit_factor: f64,
    /// All fills, entries included.
    pub trade_count: usize,
    /// Position-reducing fills, the ones that carry realized P&L.
    pub closing_trades: usize,
}

impl PerformanceReport {
    /// Compute all metrics from a trade ledger and equity curve.
    pub fn compute(
        trades: &[Trade],
        equity_curve: &[EquityPoint],
        timeframe: Timeframe,
        config: &AnalyticsConfig,
    ) -> Self {
        let ppy = config
            .periods_per_year
            .unwrap_or_else(|| timeframe.periods_per_year());
        let equity: Vec<f64> = equity_curve.iter().map(|p| p.equity).collect();
        let returns = periodic_returns(&equity);

        let total = total_return(&equity);
        let annualized = annualized_return(&equity, returns.len(), ppy);
        let vol = sample_std(&returns) * ppy.sqrt();
        let dd = max_drawdown(&equity);
        let var = percentile(&returns, 5.0);

        PerformanceReport {
            total_return: total,
            annualized_return: annualized,
            volatility: vol,
            sharpe: ratio_or_zero(annualized - config.risk_free_rate, vol),
            sortino: ratio_or_zero(
                annualized - config.risk_free_rate,
                downside_std(&returns) * ppy.sqrt(),
            ),
            max_drawdown: dd,
            calmar: ratio_or_zero(annualized, dd),
            var_95: var,
            cvar_95: cvar_below(&returns, var),
            win_rate: win_rate(trades),
            profit_factor: profit_factor(trades),
            trade_count: trades.len(),
            closing_trades: trades.iter().filter(|t| !t.is_entry()).count(),
        }
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Total return as a fraction: `end / start - 1`. 0.0 with fewer than two
/// points or a non-positive start.
pub fn total_return(equity: &[f64]) -> f64 {
    if equity.len() < 2 {
        return 0.0;
    }
    let start = equity[0];
    let end = *equity.last().unwrap();
    if start <= 0.0 {
        return 0.0;
    }
    end / start - 1.0
}

/// Geometric annualization of the whole-period growth over `n_periods`
/// periodic returns. 0.0 when there are no periods or equity went to zero.
pub fn annualized_return(equity: &[f64], n_periods: usize, periods_per_year: f64) -> f64 {
    if n_periods == 0 || periods_per_year <= 0.0 {
        return 0.0;
    }
    let growth = 1.0 + total_return(equity);
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(periods_per_year / n_periods as f64) - 1.0
}

/// Maximum drawdown as a non-negative fraction, single forward pass over the
/// running peak. 0.0 for constant or monotonically rising equity.
pub fn max_drawdown(equity: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0_f64;
    for &eq in equity {
        if eq > peak {
            peak = eq;
        }
        if peak > 0.0 {
            let dd = (peak - eq) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Fraction of closing trades with positive realized P&L. 0.0 with no
/// closing trades; entries never count either way.
pub fn win_rate(trades: &[Trade]) -> f64 {
    let closing: Vec<&Trade> = trades.iter().filter(|t| !t.is_entry()).collect();
    if closing.is_empty() {
        return 0.0;
    }
    let winners = closing.iter().filter(|t| t.is_winner()).count();
    winners as f64 / closing.len() as f64
}

/// Gross profit over gross loss across closing trades. 0.0 when gross loss
/// is zero, including the all-winners case.
pub fn profit_factor(trades: &[Trade]) -> f64 {
    let mut gross_profit = 0.0;
    let mut gross_loss = 0.0;
    for trade in trades {
        match trade.realized_pnl {
            Some(pnl) if pnl > 0.0 => gross_profit += pnl,
            Some(pnl) if pnl < 0.0 => gross_loss += pnl.abs(),
            _ => {}
        }
    }
    if gross_loss < 1e-12 {
        return 0.0;
    }
    gross_profit / gross_loss
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Periodic returns from an equity curve; a non-positive previous equity
/// contributes 0.0 rather than a nonsense ratio.
pub fn periodic_returns(equity: &[f64]) -> Vec<f64> {
    if equity.len() < 2 {
        return Vec::new();
    }
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n - 1 denominator). 0.0 below two values.
pub fn sample_std(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance =
        values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Sample standard deviation of the negative values only. 0.0 when fewer
/// than two values are negative.
pub fn downside_std(returns: &[f64]) -> f64 {
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    sample_std(&downside)
}

/// Percentile with linear interpolation over the sorted sample. 0.0 on an
/// empty slice.
pub fn percentile(values: &[f64], pct: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile_sorted(&sorted, pct)
}

/// Percentile over an already-sorted slice, linear interpolation.
pub fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = (pct / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = rank - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Mean of the returns at or below `var`; `var` itself when that tail is
/// somehow empty.
pub fn cvar_below(returns: &[f64], var: f64) -> f64 {
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();
    if tail.is_empty() {
        return var;
    }
    mean(&tail)
}

fn ratio_or_zero(numerator: f64, denominator: f64) -> f64 {
    if denominator.abs() < 1e-12 {
        return 0.0;
    }
    let ratio = numerator / denominator;
    if ratio.is_finite() {
        ratio
    } else {
        0.0
    }
}
