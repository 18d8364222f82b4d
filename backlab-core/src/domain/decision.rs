//! Strategy decisions — what a strategy asks the simulator to do on a bar.

use serde::{Deserialize, Serialize};

/// Direction of an executed fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "buy"),
            Side::Sell => write!(f, "sell"),
        }
    }
}

/// Requested action for the current bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Buy,
    Sell,
    Hold,
}

impl Action {
    pub fn is_hold(&self) -> bool {
        matches!(self, Action::Hold)
    }

    /// Trade direction for this action; `Hold` has none.
    pub fn side(&self) -> Option<Side> {
        match self {
            Action::Buy => Some(Side::Buy),
            Action::Sell => Some(Side::Sell),
            Action::Hold => None,
        }
    }
}

/// One decision per bar, returned by a strategy.
///
/// `quantity` of `None` delegates sizing to the simulator: buys invest the
/// available cash, sells close the entire position. `limit_price` bounds the
/// acceptable fill price after costs; a fill outside the bound is rejected,
/// never partially filled. `confidence` is carried through untouched for
/// downstream analysis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl Decision {
    pub fn hold() -> Self {
        Decision {
            action: Action::Hold,
            quantity: None,
            limit_price: None,
            confidence: None,
        }
    }

    /// Buy a specific quantity of units.
    pub fn buy(quantity: f64) -> Self {
        Decision {
            action: Action::Buy,
            quantity: Some(quantity),
            limit_price: None,
            confidence: None,
        }
    }

    /// Buy with simulator-sized quantity (invest available cash).
    pub fn buy_all() -> Self {
        Decision {
            action: Action::Buy,
            quantity: None,
            limit_price: None,
            confidence: None,
        }
    }

    /// Sell a specific quantity of units.
    pub fn sell(quantity: f64) -> Self {
        Decision {
            action: Action::Sell,
            quantity: Some(quantity),
            limit_price: None,
            confidence: None,
        }
    }

    /// Sell with simulator-sized quantity (close the entire position).
    pub fn close() -> Self {
        Decision {
            action: Action::Sell,
            quantity: None,
            limit_price: None,
            confidence: None,
        }
    }

    pub fn with_limit(mut self, price: f64) -> Self {
        self.limit_price = Some(price);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence);
        self
    }
}
