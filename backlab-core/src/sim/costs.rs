//! Cost models — slippage and commission applied to every fill.

use serde::{Deserialize, Serialize};

use crate::domain::{Bar, Side};

/// Execution cost model.
///
/// `slippage` returns a non-negative per-unit price adjustment: buys fill
/// above the bar close, sells below it. `commission` is a fee on the fill
/// notional and must be non-decreasing in notional, which lets the simulator
/// size cash-constrained buys without overshooting. A model may return a
/// non-finite adjustment to veto the fill (e.g. no liquidity).
pub trait CostModel: Send + Sync {
    fn slippage(&self, side: Side, quantity: f64, bar: &Bar) -> f64;
    fn commission(&self, notional: f64) -> f64;
}

/// Adjusted fill price for an order at the bar close.
pub fn fill_price(model: &dyn CostModel, side: Side, quantity: f64, bar: &Bar) -> f64 {
    let adjustment = model.slippage(side, quantity, bar);
    match side {
        Side::Buy => bar.close + adjustment,
        Side::Sell => bar.close - adjustment,
    }
}

/// Proportional costs: slippage and commission in basis points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearCostModel {
    pub slippage_bps: f64,
    pub commission_bps: f64,
}

impl LinearCostModel {
    pub fn new(slippage_bps: f64, commission_bps: f64) -> Self {
        LinearCostModel {
            slippage_bps,
            commission_bps,
        }
    }
}

impl Default for LinearCostModel {
    fn default() -> Self {
        LinearCostModel {
            slippage_bps: 5.0,
            commission_bps: 1.0,
        }
    }
}

impl CostModel for LinearCostModel {
    fn slippage(&self, _side: Side, _quantity: f64, bar: &Bar) -> f64 {
        // A zero-volume bar has no liquidity to fill against.
        if bar.volume == 0 {
            return f64::INFINITY;
        }
        bar.close * self.slippage_bps / 10_000.0
    }

    fn commission(&self, notional: f64) -> f64 {
        notional.abs() * self.commission_bps / 10_000.0
    }
}

/// Zero-cost model for controlled experiments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frictionless;

impl CostModel for Frictionless {
    fn slippage(&self, _side: Side, _quantity: f64, _bar: &Bar) -> f64 {
        0.0
    }

    fn commission(&self, _notional: f64) -> f64 {
        0.0
    }
}
