//! Portfolio state — cash, positions, and fill accounting.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::decision::Side;

/// Quantities below this are treated as flat.
pub(crate) const QTY_EPS: f64 = 1e-9;

/// Holding in a single symbol. Negative quantity is a short.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionState {
    pub quantity: f64,
    pub avg_entry_price: f64,
}

impl PositionState {
    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn market_value(&self, price: f64) -> f64 {
        self.quantity * price
    }

    pub fn unrealized_pnl(&self, price: f64) -> f64 {
        (price - self.avg_entry_price) * self.quantity
    }
}

/// Read-only view handed to strategies on every bar.
///
/// `equity` and `position_qty` are marked against the close of the bar being
/// decided, before any fill from the current decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub cash: f64,
    pub equity: f64,
    pub position_qty: f64,
    pub avg_entry_price: Option<f64>,
    pub realized_pnl: f64,
}

impl PortfolioSnapshot {
    pub fn is_flat(&self) -> bool {
        self.position_qty.abs() < QTY_EPS
    }
}

/// Full portfolio state maintained by the simulator.
///
/// Invariant: equity = cash + sum of position quantity times current price.
/// Fills are applied atomically; commissions and slippage leave through cash
/// at fill time and accumulate in the totals for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub cash: f64,
    pub initial_capital: f64,
    pub positions: HashMap<String, PositionState>,
    pub realized_pnl: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
}

impl PortfolioState {
    pub fn new(initial_capital: f64) -> Self {
        PortfolioState {
            cash: initial_capital,
            initial_capital,
            positions: HashMap::new(),
            realized_pnl: 0.0,
            total_commission: 0.0,
            total_slippage: 0.0,
        }
    }

    pub fn position(&self, symbol: &str) -> Option<&PositionState> {
        self.positions.get(symbol)
    }

    /// Signed position quantity, 0.0 when flat.
    pub fn position_qty(&self, symbol: &str) -> f64 {
        self.positions.get(symbol).map_or(0.0, |p| p.quantity)
    }

    /// Mark-to-market equity against a price per symbol. Symbols without a
    /// quote are marked at their average entry price. Iterates in sorted
    /// symbol order so the sum is reproducible.
    pub fn equity(&self, prices: &HashMap<String, f64>) -> f64 {
        let mut symbols: Vec<&String> = self.positions.keys().collect();
        symbols.sort();
        let mut total = self.cash;
        for sym in symbols {
            if let Some(pos) = self.positions.get(sym.as_str()) {
                let mark = prices.get(sym.as_str()).copied().unwrap_or(pos.avg_entry_price);
                total += pos.market_value(mark);
            }
        }
        total
    }

    /// Mark-to-market equity when `symbol` is the only held position.
    pub fn equity_single(&self, symbol: &str, price: f64) -> f64 {
        self.cash + self.position_qty(symbol) * price
    }

    pub fn snapshot(&self, symbol: &str, mark_price: f64) -> PortfolioSnapshot {
        let pos = self.positions.get(symbol);
        PortfolioSnapshot {
            cash: self.cash,
            equity: self.equity_single(symbol, mark_price),
            position_qty: pos.map_or(0.0, |p| p.quantity),
            avg_entry_price: pos.map(|p| p.avg_entry_price),
            realized_pnl: self.realized_pnl,
        }
    }

    /// Applies a fill atomically: position, average entry, realized P&L, and
    /// cash move together. Returns the realized P&L when the fill reduced an
    /// existing position.
    ///
    /// The caller validates the fill first; this method assumes quantity and
    /// prices are finite and positive.
    pub fn apply_fill(
        &mut self,
        symbol: &str,
        side: Side,
        quantity: f64,
        fill_price: f64,
        commission: f64,
        slippage_cost: f64,
    ) -> Option<f64> {
        let signed = match side {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        };
        let pos = self
            .positions
            .entry(symbol.to_string())
            .or_insert(PositionState {
                quantity: 0.0,
                avg_entry_price: 0.0,
            });
        let old_qty = pos.quantity;
        let new_qty = old_qty + signed;
        let mut realized = None;

        if old_qty.abs() < QTY_EPS || old_qty.signum() == signed.signum() {
            // Opening or adding in the same direction: blend the entry price.
            let old_notional = pos.avg_entry_price * old_qty.abs();
            let add_notional = fill_price * quantity;
            pos.avg_entry_price = (old_notional + add_notional) / (old_qty.abs() + quantity);
            pos.quantity = new_qty;
        } else {
            // Reducing, possibly flipping through zero.
            let closed = quantity.min(old_qty.abs());
            let pnl = if old_qty > 0.0 {
                (fill_price - pos.avg_entry_price) * closed
            } else {
                (pos.avg_entry_price - fill_price) * closed
            };
            pos.quantity = new_qty;
            if quantity > closed {
                // Flipped: the remainder opens fresh at the fill price.
                pos.avg_entry_price = fill_price;
            } else if new_qty.abs() < QTY_EPS {
                pos.avg_entry_price = 0.0;
            }
            self.realized_pnl += pnl;
            realized = Some(pnl);
        }

        match side {
            Side::Buy => self.cash -= quantity * fill_price + commission,
            Side::Sell => self.cash += quantity * fill_price - commission,
        }
        self.total_commission += commission;
        self.total_slippage += slippage_cost;

        let flat = self
            .positions
            .get(symbol)
            .is_some_and(|p| p.quantity.abs() < QTY_EPS);
        if flat {
            self.positions.remove(symbol);
        }
        realized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buy_then_sell_round_trip() {
        let mut pf = PortfolioState::new(10_000.0);
        let opened = pf.apply_fill("SPY", Side::Buy, 10.0, 100.0, 1.0, 0.5);
        assert_eq!(opened, None);
        assert!((pf.cash - 8_999.0).abs() < 1e-10);
        assert!((pf.position_qty("SPY") - 10.0).abs() < 1e-10);

        let realized = pf.apply_fill("SPY", Side::Sell, 10.0, 110.0, 1.0, 0.5);
        assert_eq!(realized, Some(100.0));
        assert!((pf.cash - 10_098.0).abs() < 1e-10);
        assert!(pf.position("SPY").is_none());
        assert!((pf.realized_pnl - 100.0).abs() < 1e-10);
        assert!((pf.total_commission - 2.0).abs() < 1e-10);
        assert!((pf.total_slippage - 1.0).abs() < 1e-10);
    }

    #[test]
    fn adding_blends_average_entry() {
        let mut pf = PortfolioState::new(10_000.0);
        pf.apply_fill("SPY", Side::Buy, 10.0, 100.0, 0.0, 0.0);
        pf.apply_fill("SPY", Side::Buy, 10.0, 110.0, 0.0, 0.0);
        let pos = pf.position("SPY").unwrap();
        assert!((pos.quantity - 20.0).abs() < 1e-10);
        assert!((pos.avg_entry_price - 105.0).abs() < 1e-10);
    }

    #[test]
    fn partial_close_keeps_entry_price() {
        let mut pf = PortfolioState::new(10_000.0);
        pf.apply_fill("SPY", Side::Buy, 10.0, 100.0, 0.0, 0.0);
        let realized = pf.apply_fill("SPY", Side::Sell, 4.0, 105.0, 0.0, 0.0);
        assert_eq!(realized, Some(20.0));
        let pos = pf.position("SPY").unwrap();
        assert!((pos.quantity - 6.0).abs() < 1e-10);
        assert!((pos.avg_entry_price - 100.0).abs() < 1e-10);
    }

    #[test]
    fn flip_through_zero_resets_entry() {
        let mut pf = PortfolioState::new(10_000.0);
        pf.apply_fill("SPY", Side::Buy, 10.0, 100.0, 0.0, 0.0);
        // Sell 15: closes 10 at a gain, opens a 5-unit short at 105.
        let realized = pf.apply_fill("SPY", Side::Sell, 15.0, 105.0, 0.0, 0.0);
        assert_eq!(realized, Some(50.0));
        let pos = pf.position("SPY").unwrap();
        assert!((pos.quantity + 5.0).abs() < 1e-10);
        assert!((pos.avg_entry_price - 105.0).abs() < 1e-10);
    }

    #[test]
    fn short_cover_realizes_inverse_pnl() {
        let mut pf = PortfolioState::new(10_000.0);
        pf.apply_fill("SPY", Side::Sell, 10.0, 100.0, 0.0, 0.0);
        let realized = pf.apply_fill("SPY", Side::Buy, 10.0, 95.0, 0.0, 0.0);
        assert_eq!(realized, Some(50.0));
        assert!(pf.position("SPY").is_none());
    }

    #[test]
    fn equity_identity_holds() {
        let mut pf = PortfolioState::new(10_000.0);
        pf.apply_fill("SPY", Side::Buy, 10.0, 100.0, 2.0, 0.0);
        let equity = pf.equity_single("SPY", 103.0);
        assert!((equity - (pf.cash + 10.0 * 103.0)).abs() < 1e-10);

        let mut prices = HashMap::new();
        prices.insert("SPY".to_string(), 103.0);
        assert!((pf.equity(&prices) - equity).abs() < 1e-10);
    }

    #[test]
    fn snapshot_reflects_state() {
        let mut pf = PortfolioState::new(10_000.0);
        pf.apply_fill("SPY", Side::Buy, 10.0, 100.0, 0.0, 0.0);
        let snap = pf.snapshot("SPY", 102.0);
        assert!(!snap.is_flat());
        assert!((snap.position_qty - 10.0).abs() < 1e-10);
        assert_eq!(snap.avg_entry_price, Some(100.0));
        assert!((snap.equity - (9_000.0 + 1_020.0)).abs() < 1e-10);

        let flat = PortfolioState::new(500.0).snapshot("SPY", 102.0);
        assert!(flat.is_flat());
        assert_eq!(flat.avg_entry_price, None);
    }
}
