//! Execution simulator — chronological bar replay with cost-adjusted fills.
//!
//! Replay contract, per bar:
//! 1. snapshot the portfolio, marked at the current close
//! 2. ask the strategy for a decision
//! 3. size, price, and constrain the resulting order
//! 4. apply the fill atomically, or record a rejection
//! 5. record equity after any fill
//!
//! A strategy only ever sees the bar being decided and the pre-fill snapshot,
//! so truncating the series never changes earlier decisions. A strategy fault
//! aborts the replay at that bar and the partial result is returned with a
//! `RunFailure` attached.

pub mod constraints;
pub mod costs;
pub mod strategy;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Action, Bar, Decision, PortfolioState, Side, Symbol, Timeframe, Trade, QTY_EPS};
use constraints::{RejectionReason, TradeConstraints};
use costs::CostModel;
use strategy::Strategy;

// ─── Result types ─────────────────────────────────────────────────────

/// Mark-to-market equity at one bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: NaiveDateTime,
    pub equity: f64,
}

/// A decision that was not filled, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectionNote {
    pub bar_index: usize,
    pub timestamp: NaiveDateTime,
    pub action: Action,
    pub reason: RejectionReason,
    pub context: String,
}

/// Where and why a strategy fault stopped the replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub bar_index: usize,
    pub timestamp: NaiveDateTime,
    pub message: String,
}

/// Output of one simulated run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimResult {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    /// Fills in bar order.
    pub trades: Vec<Trade>,
    /// One point per processed bar.
    pub equity_curve: Vec<EquityPoint>,
    pub rejections: Vec<RejectionNote>,
    /// `Some` when a strategy fault cut the replay short.
    pub failure: Option<RunFailure>,
    pub final_portfolio: PortfolioState,
}

impl SimResult {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

// ─── Errors ────────────────────────────────────────────────────────────

/// Input problems that prevent a replay from starting.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("initial capital must be positive and finite, got {0}")]
    InvalidCapital(f64),
    #[error("bar series is empty")]
    EmptySeries,
    #[error("bars must be strictly increasing in time (violation at index {index})")]
    UnorderedSeries { index: usize },
    #[error("series mixes symbols: expected '{expected}', found '{found}' at index {index}")]
    MixedSymbols {
        expected: String,
        found: String,
        index: usize,
    },
    #[error("invalid constraints: {0}")]
    InvalidConstraints(String),
}

// ─── Replay ────────────────────────────────────────────────────────────

/// Replays `series` through `strategy` and returns the trade ledger, equity
/// curve, and rejection notes.
///
/// The series must be non-empty, single-symbol, and strictly increasing in
/// time. Fills execute at the decision bar close adjusted by the cost model;
/// there is no peeking at later bars.
pub fn run_backtest(
    strategy: &mut dyn Strategy,
    series: &[Bar],
    initial_capital: f64,
    cost_model: &dyn CostModel,
    constraints: &TradeConstraints,
) -> Result<SimResult, SimError> {
    if !initial_capital.is_finite() || initial_capital <= 0.0 {
        return Err(SimError::InvalidCapital(initial_capital));
    }
    constraints
        .check_config()
        .map_err(SimError::InvalidConstraints)?;
    let first = series.first().ok_or(SimError::EmptySeries)?;
    let symbol = first.symbol.clone();
    let timeframe = first.timeframe;
    for (i, pair) in series.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(SimError::UnorderedSeries { index: i + 1 });
        }
    }
    for (i, bar) in series.iter().enumerate() {
        if bar.symbol != symbol {
            return Err(SimError::MixedSymbols {
                expected: symbol,
                found: bar.symbol.clone(),
                index: i,
            });
        }
    }

    let mut portfolio = PortfolioState::new(initial_capital);
    let mut trades: Vec<Trade> = Vec::new();
    let mut equity_curve = Vec::with_capacity(series.len());
    let mut rejections: Vec<RejectionNote> = Vec::new();
    let mut failure = None;

    for (i, bar) in series.iter().enumerate() {
        let snapshot = portfolio.snapshot(&symbol, bar.close);
        let decision = match strategy.decide(bar, &snapshot) {
            Ok(d) => d,
            Err(err) => {
                warn!(
                    bar_index = i,
                    timestamp = %bar.timestamp,
                    error = %err,
                    "strategy fault, stopping replay"
                );
                failure = Some(RunFailure {
                    bar_index: i,
                    timestamp: bar.timestamp,
                    message: err.to_string(),
                });
                break;
            }
        };

        if let Some(side) = decision.action.side() {
            match resolve_fill(&decision, side, bar, i, &portfolio, cost_model, constraints) {
                Ok(fill) => {
                    let realized = portfolio.apply_fill(
                        &symbol,
                        side,
                        fill.quantity,
                        fill.fill_price,
                        fill.commission,
                        fill.slippage_cost,
                    );
                    trades.push(Trade {
                        timestamp: bar.timestamp,
                        symbol: symbol.clone(),
                        side,
                        quantity: fill.quantity,
                        fill_price: fill.fill_price,
                        commission: fill.commission,
                        slippage: fill.slippage_cost,
                        realized_pnl: realized,
                        cash_after: portfolio.cash,
                        position_after: portfolio.position_qty(&symbol),
                    });
                }
                Err(note) => {
                    debug!(
                        bar_index = i,
                        reason = %note.reason,
                        context = %note.context,
                        "decision rejected"
                    );
                    rejections.push(note);
                }
            }
        }

        equity_curve.push(EquityPoint {
            timestamp: bar.timestamp,
            equity: portfolio.equity_single(&symbol, bar.close),
        });
    }

    let period_end = series.last().map_or(first.timestamp, |b| b.timestamp);
    Ok(SimResult {
        symbol,
        timeframe,
        period_start: first.timestamp,
        period_end,
        trades,
        equity_curve,
        rejections,
        failure,
        final_portfolio: portfolio,
    })
}

// ─── Fill resolution ───────────────────────────────────────────────────

struct PricedFill {
    quantity: f64,
    fill_price: f64,
    commission: f64,
    slippage_cost: f64,
}

fn reject(
    bar_index: usize,
    bar: &Bar,
    action: Action,
    reason: RejectionReason,
    context: String,
) -> RejectionNote {
    RejectionNote {
        bar_index,
        timestamp: bar.timestamp,
        action,
        reason,
        context,
    }
}

/// Sizes, prices, and constrains one non-hold decision.
///
/// Default sizing: a buy with no quantity invests the available cash net of
/// estimated costs; a sell with no quantity closes the entire long position.
/// Orders fill fully or not at all.
fn resolve_fill(
    decision: &Decision,
    side: Side,
    bar: &Bar,
    bar_index: usize,
    portfolio: &PortfolioState,
    cost_model: &dyn CostModel,
    constraints: &TradeConstraints,
) -> Result<PricedFill, RejectionNote> {
    let symbol = bar.symbol.as_str();
    let position_qty = portfolio.position_qty(symbol);
    let cash = portfolio.cash;
    let action = decision.action;

    let quantity = match decision.quantity {
        Some(qty) => {
            if !qty.is_finite() || qty <= 0.0 {
                return Err(reject(
                    bar_index,
                    bar,
                    action,
                    RejectionReason::DegenerateFill,
                    format!("quantity must be positive and finite, got {qty}"),
                ));
            }
            qty
        }
        None => match side {
            Side::Buy => {
                if cash <= 0.0 {
                    return Err(reject(
                        bar_index,
                        bar,
                        action,
                        RejectionReason::InsufficientCash,
                        format!("no cash available (cash={cash:.2})"),
                    ));
                }
                let provisional = cash / bar.close;
                let price = costs::fill_price(cost_model, side, provisional, bar);
                if !price.is_finite() || price <= 0.0 {
                    return Err(reject(
                        bar_index,
                        bar,
                        action,
                        RejectionReason::DegenerateFill,
                        format!("fill price {price} from close {}", bar.close),
                    ));
                }
                let fee = cost_model.commission(provisional * price);
                if !fee.is_finite() || fee < 0.0 {
                    return Err(reject(
                        bar_index,
                        bar,
                        action,
                        RejectionReason::DegenerateFill,
                        format!("commission estimate {fee}"),
                    ));
                }
                let qty = (cash - fee) / price;
                if qty <= 0.0 {
                    return Err(reject(
                        bar_index,
                        bar,
                        action,
                        RejectionReason::InsufficientCash,
                        format!("cash {cash:.2} cannot cover estimated costs {fee:.2}"),
                    ));
                }
                qty
            }
            Side::Sell => {
                if position_qty <= QTY_EPS {
                    return Err(reject(
                        bar_index,
                        bar,
                        action,
                        RejectionReason::NoPosition,
                        format!("no long position to close (position={position_qty})"),
                    ));
                }
                position_qty
            }
        },
    };

    let adjustment = cost_model.slippage(side, quantity, bar);
    if !adjustment.is_finite() || adjustment < 0.0 {
        return Err(reject(
            bar_index,
            bar,
            action,
            RejectionReason::DegenerateFill,
            format!("slippage adjustment {adjustment}"),
        ));
    }
    let fill_price = match side {
        Side::Buy => bar.close + adjustment,
        Side::Sell => bar.close - adjustment,
    };
    if !fill_price.is_finite() || fill_price <= 0.0 {
        return Err(reject(
            bar_index,
            bar,
            action,
            RejectionReason::DegenerateFill,
            format!("fill price {fill_price} after slippage {adjustment}"),
        ));
    }

    if let Some(limit) = decision.limit_price {
        let violated = match side {
            Side::Buy => fill_price > limit,
            Side::Sell => fill_price < limit,
        };
        if violated {
            return Err(reject(
                bar_index,
                bar,
                action,
                RejectionReason::LimitPrice,
                format!("fill {fill_price:.4} outside limit {limit:.4}"),
            ));
        }
    }

    let commission = cost_model.commission(quantity * fill_price);
    if !commission.is_finite() || commission < 0.0 {
        return Err(reject(
            bar_index,
            bar,
            action,
            RejectionReason::DegenerateFill,
            format!("commission {commission}"),
        ));
    }

    let equity = portfolio.equity_single(symbol, bar.close);
    if let Some(reason) = constraints.check_fill(
        side,
        quantity,
        fill_price,
        commission,
        cash,
        position_qty,
        equity,
    ) {
        return Err(reject(
            bar_index,
            bar,
            action,
            reason,
            format!(
                "side={side} qty={quantity:.4} fill={fill_price:.4} cash={cash:.2} position={position_qty:.4}"
            ),
        ));
    }

    Ok(PricedFill {
        quantity,
        fill_price,
        commission,
        slippage_cost: adjustment * quantity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate, NaiveTime};

    use costs::{Frictionless, LinearCostModel};
    use strategy::StrategyError;

    fn make_series(closes: &[f64]) -> Vec<Bar> {
        let base = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_time(NaiveTime::MIN);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                symbol: "TEST".into(),
                timeframe: Timeframe::Day1,
                timestamp: base + Duration::days(i as i64),
                open: close,
                high: close + 1.0,
                low: (close - 1.0).max(0.01),
                close,
                volume: 10_000,
            })
            .collect()
    }

    fn hold_strategy() -> impl Strategy {
        |_bar: &Bar, _snap: &crate::domain::PortfolioSnapshot| -> Result<Decision, StrategyError> {
            Ok(Decision::hold())
        }
    }

    #[test]
    fn empty_series_is_an_error() {
        let mut strat = hold_strategy();
        let err = run_backtest(
            &mut strat,
            &[],
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        );
        assert!(matches!(err, Err(SimError::EmptySeries)));
    }

    #[test]
    fn bad_capital_is_an_error() {
        let series = make_series(&[100.0]);
        let mut strat = hold_strategy();
        let err = run_backtest(
            &mut strat,
            &series,
            0.0,
            &Frictionless,
            &TradeConstraints::default(),
        );
        assert!(matches!(err, Err(SimError::InvalidCapital(_))));
    }

    #[test]
    fn unordered_series_is_an_error() {
        let mut series = make_series(&[100.0, 101.0, 102.0]);
        series[2].timestamp = series[0].timestamp;
        let mut strat = hold_strategy();
        let err = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        );
        assert!(matches!(err, Err(SimError::UnorderedSeries { index: 2 })));
    }

    #[test]
    fn mixed_symbols_is_an_error() {
        let mut series = make_series(&[100.0, 101.0]);
        series[1].symbol = "OTHER".into();
        let mut strat = hold_strategy();
        let err = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        );
        assert!(matches!(err, Err(SimError::MixedSymbols { index: 1, .. })));
    }

    #[test]
    fn hold_forever_preserves_capital() {
        let series = make_series(&[100.0, 101.0, 99.0, 100.0]);
        let mut strat = hold_strategy();
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        )
        .unwrap();
        assert!(result.is_complete());
        assert!(result.trades.is_empty());
        assert_eq!(result.equity_curve.len(), 4);
        for point in &result.equity_curve {
            assert!((point.equity - 10_000.0).abs() < 1e-10);
        }
    }

    #[test]
    fn buy_and_close_round_trip_doubles_equity() {
        // Close rises 100 → 200; buy 1 unit at the first close, sell at the last.
        let closes: Vec<f64> = (0..100).map(|i| 100.0 + i as f64 * (100.0 / 99.0)).collect();
        let series = make_series(&closes);
        let last_index = series.len() - 1;
        let mut bar_no = 0usize;
        let mut strat = move |_bar: &Bar,
                              _snap: &crate::domain::PortfolioSnapshot|
              -> Result<Decision, StrategyError> {
            let decision = if bar_no == 0 {
                Decision::buy(1.0)
            } else if bar_no == last_index {
                Decision::close()
            } else {
                Decision::hold()
            };
            bar_no += 1;
            Ok(decision)
        };
        let result = run_backtest(
            &mut strat,
            &series,
            100.0,
            &Frictionless,
            &TradeConstraints::default(),
        )
        .unwrap();

        assert_eq!(result.trades.len(), 2);
        assert!(result.rejections.is_empty());
        assert!(result.trades[0].is_entry());
        let exit = &result.trades[1];
        assert!((exit.fill_price - 200.0).abs() < 1e-9);
        assert!((exit.realized_pnl.unwrap() - 100.0).abs() < 1e-9);
        let final_equity = result.equity_curve.last().unwrap().equity;
        assert!((final_equity - 200.0).abs() < 1e-9);
    }

    #[test]
    fn default_buy_invests_cash_net_of_commission() {
        let series = make_series(&[100.0, 101.0]);
        let model = LinearCostModel::new(0.0, 10.0); // 10 bps commission
        let mut first = true;
        let mut strat = move |_bar: &Bar,
                              _snap: &crate::domain::PortfolioSnapshot|
              -> Result<Decision, StrategyError> {
            let decision = if first { Decision::buy_all() } else { Decision::hold() };
            first = false;
            Ok(decision)
        };
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &model,
            &TradeConstraints::default(),
        )
        .unwrap();

        assert_eq!(result.trades.len(), 1);
        let trade = &result.trades[0];
        let cost = trade.quantity * trade.fill_price + trade.commission;
        assert!(cost <= 10_000.0 + 1e-6, "cost {cost} exceeds cash");
        // Nearly fully invested: residual cash under a tenth of a percent.
        assert!(trade.cash_after < 10.0, "cash_after = {}", trade.cash_after);
    }

    #[test]
    fn insufficient_cash_is_rejected_not_fatal() {
        let series = make_series(&[100.0, 101.0]);
        let mut first = true;
        let mut strat = move |_bar: &Bar,
                              _snap: &crate::domain::PortfolioSnapshot|
              -> Result<Decision, StrategyError> {
            let decision = if first { Decision::buy(1_000.0) } else { Decision::hold() };
            first = false;
            Ok(decision)
        };
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        )
        .unwrap();

        assert!(result.trades.is_empty());
        assert_eq!(result.rejections.len(), 1);
        assert_eq!(
            result.rejections[0].reason,
            RejectionReason::InsufficientCash
        );
        assert!(result.is_complete());
    }

    #[test]
    fn sell_without_position_is_rejected() {
        let series = make_series(&[100.0]);
        let mut strat = |_bar: &Bar,
                         _snap: &crate::domain::PortfolioSnapshot|
         -> Result<Decision, StrategyError> { Ok(Decision::close()) };
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        )
        .unwrap();
        assert_eq!(result.rejections.len(), 1);
        assert_eq!(result.rejections[0].reason, RejectionReason::NoPosition);
    }

    #[test]
    fn zero_volume_bar_rejects_fill() {
        let mut series = make_series(&[100.0, 101.0]);
        series[0].volume = 0;
        let model = LinearCostModel::default();
        let mut first = true;
        let mut strat = move |_bar: &Bar,
                              _snap: &crate::domain::PortfolioSnapshot|
              -> Result<Decision, StrategyError> {
            let decision = if first { Decision::buy(1.0) } else { Decision::hold() };
            first = false;
            Ok(decision)
        };
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &model,
            &TradeConstraints::default(),
        )
        .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.rejections[0].reason, RejectionReason::DegenerateFill);
    }

    #[test]
    fn limit_price_bounds_the_fill() {
        let series = make_series(&[100.0, 101.0]);
        let model = LinearCostModel::new(10.0, 0.0); // fills at 100.10
        let mut first = true;
        let mut strat = move |_bar: &Bar,
                              _snap: &crate::domain::PortfolioSnapshot|
              -> Result<Decision, StrategyError> {
            let decision = if first {
                Decision::buy(1.0).with_limit(100.05)
            } else {
                Decision::hold()
            };
            first = false;
            Ok(decision)
        };
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &model,
            &TradeConstraints::default(),
        )
        .unwrap();
        assert!(result.trades.is_empty());
        assert_eq!(result.rejections[0].reason, RejectionReason::LimitPrice);
    }

    #[test]
    fn strategy_fault_reports_partial_result() {
        let series = make_series(&[100.0, 101.0, 102.0, 103.0]);
        let mut bar_no = 0usize;
        let mut strat = move |_bar: &Bar,
                              _snap: &crate::domain::PortfolioSnapshot|
              -> Result<Decision, StrategyError> {
            bar_no += 1;
            if bar_no == 3 {
                Err(StrategyError::new("boom"))
            } else {
                Ok(Decision::hold())
            }
        };
        let result = run_backtest(
            &mut strat,
            &series,
            10_000.0,
            &Frictionless,
            &TradeConstraints::default(),
        )
        .unwrap();

        assert!(!result.is_complete());
        let failure = result.failure.unwrap();
        assert_eq!(failure.bar_index, 2);
        assert_eq!(failure.message, "boom");
        // Equity recorded only for the bars before the fault.
        assert_eq!(result.equity_curve.len(), 2);
    }

    #[test]
    fn replay_is_deterministic() {
        let closes: Vec<f64> = (0..200)
            .map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0)
            .collect();
        let series = make_series(&closes);

        let run = || {
            let mut strat = |bar: &Bar,
                             snap: &crate::domain::PortfolioSnapshot|
             -> Result<Decision, StrategyError> {
                if snap.is_flat() && bar.close < 98.0 {
                    Ok(Decision::buy_all())
                } else if !snap.is_flat() && bar.close > 102.0 {
                    Ok(Decision::close())
                } else {
                    Ok(Decision::hold())
                }
            };
            run_backtest(
                &mut strat,
                &series,
                10_000.0,
                &LinearCostModel::default(),
                &TradeConstraints::default(),
            )
            .unwrap()
        };

        let a = run();
        let b = run();
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn truncating_the_series_preserves_the_prefix() {
        let closes: Vec<f64> = (0..120)
            .map(|i| 100.0 + (i as f64 * 0.25).sin() * 4.0)
            .collect();
        let series = make_series(&closes);

        let make_strat = || {
            |bar: &Bar,
             snap: &crate::domain::PortfolioSnapshot|
             -> Result<Decision, StrategyError> {
                if snap.is_flat() && bar.close < 98.5 {
                    Ok(Decision::buy_all())
                } else if !snap.is_flat() && bar.close > 101.5 {
                    Ok(Decision::close())
                } else {
                    Ok(Decision::hold())
                }
            }
        };

        let mut full_strat = make_strat();
        let full = run_backtest(
            &mut full_strat,
            &series,
            10_000.0,
            &LinearCostModel::default(),
            &TradeConstraints::default(),
        )
        .unwrap();

        let cut = 70;
        let mut trunc_strat = make_strat();
        let truncated = run_backtest(
            &mut trunc_strat,
            &series[..cut],
            10_000.0,
            &LinearCostModel::default(),
            &TradeConstraints::default(),
        )
        .unwrap();

        assert_eq!(truncated.equity_curve, full.equity_curve[..cut]);
        let cutoff = series[cut].timestamp;
        let full_prefix: Vec<_> = full
            .trades
            .iter()
            .filter(|t| t.timestamp < cutoff)
            .cloned()
            .collect();
        assert_eq!(truncated.trades, full_prefix);
    }
}
