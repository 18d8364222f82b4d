//! Trade constraints — pre-fill checks that turn intents into rejections.
//!
//! Constraints implement the canonical rejection reasons:
//! - InsufficientCash: buy cost exceeds available cash
//! - MaxPositionSize: resulting position would exceed the quantity cap
//! - MaxLeverage: resulting exposure would exceed the leverage cap
//! - ShortingDisabled: sell would leave a net short position
//!
//! The remaining reasons (LimitPrice, DegenerateFill, NoPosition) are raised
//! by the simulator itself before the constraint pass.

use serde::{Deserialize, Serialize};

use crate::domain::{Side, QTY_EPS};

const CASH_EPS: f64 = 1e-6;

/// Why a decision was not filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    InsufficientCash,
    MaxPositionSize,
    MaxLeverage,
    ShortingDisabled,
    LimitPrice,
    DegenerateFill,
    NoPosition,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RejectionReason::InsufficientCash => write!(f, "InsufficientCash"),
            RejectionReason::MaxPositionSize => write!(f, "MaxPositionSize"),
            RejectionReason::MaxLeverage => write!(f, "MaxLeverage"),
            RejectionReason::ShortingDisabled => write!(f, "ShortingDisabled"),
            RejectionReason::LimitPrice => write!(f, "LimitPrice"),
            RejectionReason::DegenerateFill => write!(f, "DegenerateFill"),
            RejectionReason::NoPosition => write!(f, "NoPosition"),
        }
    }
}

/// Per-run execution limits.
///
/// Defaults are conservative: no quantity cap, leverage 1.0 (fully invested,
/// no margin), shorting off.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeConstraints {
    /// Cap on absolute position quantity after the fill.
    #[serde(default)]
    pub max_position_qty: Option<f64>,
    /// Cap on gross exposure as a multiple of equity.
    #[serde(default = "default_max_leverage")]
    pub max_leverage: f64,
    #[serde(default)]
    pub allow_short: bool,
}

fn default_max_leverage() -> f64 {
    1.0
}

impl Default for TradeConstraints {
    fn default() -> Self {
        TradeConstraints {
            max_position_qty: None,
            max_leverage: 1.0,
            allow_short: false,
        }
    }
}

impl TradeConstraints {
    /// Validates the constraint values themselves, not a fill.
    pub fn check_config(&self) -> Result<(), String> {
        if !self.max_leverage.is_finite() || self.max_leverage <= 0.0 {
            return Err(format!(
                "max_leverage must be positive and finite, got {}",
                self.max_leverage
            ));
        }
        if let Some(cap) = self.max_position_qty {
            if !cap.is_finite() || cap <= 0.0 {
                return Err(format!(
                    "max_position_qty must be positive and finite, got {cap}"
                ));
            }
        }
        Ok(())
    }

    /// First violated constraint for a prospective fill, or `None` if the
    /// fill passes. `position_qty` and `equity` describe the portfolio
    /// before the fill, with equity marked at the decision bar close.
    #[allow(clippy::too_many_arguments)]
    pub fn check_fill(
        &self,
        side: Side,
        quantity: f64,
        fill_price: f64,
        commission: f64,
        cash: f64,
        position_qty: f64,
        equity: f64,
    ) -> Option<RejectionReason> {
        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        let new_qty = position_qty + signed;

        if !self.allow_short && new_qty < -QTY_EPS {
            return Some(RejectionReason::ShortingDisabled);
        }
        if let Some(cap) = self.max_position_qty {
            if new_qty.abs() > cap + QTY_EPS {
                return Some(RejectionReason::MaxPositionSize);
            }
        }
        if side == Side::Buy {
            let cost = quantity * fill_price + commission;
            if cost > cash + CASH_EPS {
                return Some(RejectionReason::InsufficientCash);
            }
        }
        let exposure = new_qty.abs() * fill_price;
        if exposure > self.max_leverage * equity.max(0.0) + CASH_EPS {
            return Some(RejectionReason::MaxLeverage);
        }
        None
    }
}
