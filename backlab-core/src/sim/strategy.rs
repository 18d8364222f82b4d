//! Strategy trait — the seam between user code and the simulator.

use thiserror::Error;

use crate::domain::{Bar, Decision, PortfolioSnapshot};

/// Error raised by a strategy while deciding on a bar.
///
/// A strategy fault aborts the replay at that bar; the simulator reports the
/// partial run rather than discarding it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct StrategyError(String);

impl StrategyError {
    pub fn new(message: impl Into<String>) -> Self {
        StrategyError(message.into())
    }
}

/// A trading strategy driven bar by bar.
///
/// The simulator calls `decide` once per bar in chronological order. The bar
/// is the one being decided; the snapshot reflects the portfolio before any
/// fill from this decision. Implementations that need history must carry it
/// themselves; only data at or before the current bar is ever passed in.
pub trait Strategy: Send {
    fn decide(
        &mut self,
        bar: &Bar,
        portfolio: &PortfolioSnapshot,
    ) -> Result<Decision, StrategyError>;
}

impl<F> Strategy for F
where
    F: FnMut(&Bar, &PortfolioSnapshot) -> Result<Decision, StrategyError> + Send,
{
    fn decide(
        &mut self,
        bar: &Bar,
        portfolio: &PortfolioSnapshot,
    ) -> Result<Decision, StrategyError> {
        self(bar, portfolio)
    }
}
