//! Trade — one executed fill in the ledger.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::decision::Side;
use super::Symbol;

/// An executed fill, recorded in bar order.
///
/// `realized_pnl` is `Some` only when the fill reduced an existing position,
/// and holds the price P&L of the closed quantity against its average entry
/// price. Commissions are tracked on the portfolio, not folded into this
/// number. `cash_after` and `position_after` snapshot the portfolio
/// immediately after the fill was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub timestamp: NaiveDateTime,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub fill_price: f64,
    pub commission: f64,
    /// Cash cost of the slippage adjustment, `adjustment * quantity`.
    pub slippage: f64,
    pub realized_pnl: Option<f64>,
    pub cash_after: f64,
    pub position_after: f64,
}

impl Trade {
    /// A fill that opened or added to a position.
    pub fn is_entry(&self) -> bool {
        self.realized_pnl.is_none()
    }

    /// A position-reducing fill that closed at a profit.
    pub fn is_winner(&self) -> bool {
        matches!(self.realized_pnl, Some(pnl) if pnl > 0.0)
    }

    /// Return of the closed quantity relative to its entry cost basis, or
    /// `None` for entries. A degenerate zero basis yields `Some(0.0)`.
    pub fn return_pct(&self) -> Option<f64> {
        let pnl = self.realized_pnl?;
        let notional = self.quantity * self.fill_price;
        // Selling closed a long (basis below the fill by pnl); buying covered
        // a short (basis above the fill by pnl).
        let basis = match self.side {
            Side::Sell => notional - pnl,
            Side::Buy => notional + pnl,
        };
        if basis.abs() < f64::EPSILON {
            return Some(0.0);
        }
        Some(pnl / basis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn sample_exit(side: Side, quantity: f64, fill_price: f64, pnl: f64) -> Trade {
        Trade {
            timestamp: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_time(NaiveTime::MIN),
            symbol: "SPY".into(),
            side,
            quantity,
            fill_price,
            commission: 0.0,
            slippage: 0.0,
            realized_pnl: Some(pnl),
            cash_after: 0.0,
            position_after: 0.0,
        }
    }

    #[test]
    fn entry_has_no_return() {
        let mut trade = sample_exit(Side::Buy, 10.0, 100.0, 0.0);
        trade.realized_pnl = None;
        assert!(trade.is_entry());
        assert_eq!(trade.return_pct(), None);
    }

    #[test]
    fn long_exit_return_uses_entry_basis() {
        // Bought 10 @ 100, sold 10 @ 105: pnl 50 on basis 1000 = 5%.
        let trade = sample_exit(Side::Sell, 10.0, 105.0, 50.0);
        let ret = trade.return_pct().unwrap();
        assert!((ret - 0.05).abs() < 1e-10);
        assert!(trade.is_winner());
    }

    #[test]
    fn short_cover_return_uses_entry_basis() {
        // Shorted 10 @ 100, covered 10 @ 97: pnl 30 on basis 1000 = 3%.
        let trade = sample_exit(Side::Buy, 10.0, 97.0, 30.0);
        let ret = trade.return_pct().unwrap();
        assert!((ret - 0.03).abs() < 1e-10);
    }

    #[test]
    fn losing_exit_is_negative() {
        let trade = sample_exit(Side::Sell, 10.0, 95.0, -50.0);
        let ret = trade.return_pct().unwrap();
        assert!((ret + 0.05).abs() < 1e-10);
        assert!(!trade.is_winner());
    }
}
