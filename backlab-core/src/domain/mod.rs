//! Domain types for BackLab

pub mod bar;
pub mod decision;
pub mod portfolio;
pub mod trade;

pub use bar::{Bar, Timeframe};
pub use decision::{Action, Decision, Side};
pub use portfolio::{PortfolioSnapshot, PortfolioState, PositionState};
pub use trade::Trade;

pub(crate) use portfolio::QTY_EPS;

/// Ticker symbol, as carried on bars, trades, and store keys.
pub type Symbol = String;
