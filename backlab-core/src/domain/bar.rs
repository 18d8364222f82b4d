//! Bar — the fundamental market data unit.

use chrono::{Datelike, Duration, NaiveDateTime, Weekday};
use serde::{Deserialize, Serialize};

use super::Symbol;

/// Sampling interval of a bar series.
///
/// The interval drives two things: the expected spacing between consecutive
/// bars (gap detection) and the number of periods in a trading year
/// (annualization). Intraday counts assume a 6.5-hour (390-minute) session
/// over 252 trading days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Minute1,
    Minute5,
    Minute15,
    Minute30,
    Hour1,
    Day1,
    Week1,
}

impl Timeframe {
    /// Nominal distance between consecutive bars.
    pub fn spacing(&self) -> Duration {
        match self {
            Timeframe::Minute1 => Duration::minutes(1),
            Timeframe::Minute5 => Duration::minutes(5),
            Timeframe::Minute15 => Duration::minutes(15),
            Timeframe::Minute30 => Duration::minutes(30),
            Timeframe::Hour1 => Duration::hours(1),
            Timeframe::Day1 => Duration::days(1),
            Timeframe::Week1 => Duration::weeks(1),
        }
    }

    /// Bars per trading year at this interval, used to annualize returns
    /// and volatility.
    pub fn periods_per_year(&self) -> f64 {
        match self {
            Timeframe::Minute1 => 252.0 * 390.0,
            Timeframe::Minute5 => 252.0 * 78.0,
            Timeframe::Minute15 => 252.0 * 26.0,
            Timeframe::Minute30 => 252.0 * 13.0,
            Timeframe::Hour1 => 252.0 * 6.5,
            Timeframe::Day1 => 252.0,
            Timeframe::Week1 => 52.0,
        }
    }

    /// Timestamp where the bar after `ts` is expected, or `None` when no
    /// expectation holds (intraday series crossing a session boundary).
    ///
    /// Daily series skip weekends; weekly series advance exactly seven days.
    pub fn next_expected(&self, ts: NaiveDateTime) -> Option<NaiveDateTime> {
        match self {
            Timeframe::Day1 => {
                let mut next = ts + Duration::days(1);
                while matches!(next.weekday(), Weekday::Sat | Weekday::Sun) {
                    next += Duration::days(1);
                }
                Some(next)
            }
            Timeframe::Week1 => Some(ts + Duration::weeks(1)),
            _ => {
                let next = ts + self.spacing();
                if next.date() == ts.date() {
                    Some(next)
                } else {
                    None
                }
            }
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Minute30 => "30m",
            Timeframe::Hour1 => "1h",
            Timeframe::Day1 => "1d",
            Timeframe::Week1 => "1w",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// OHLCV bar for a single symbol at a single timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
    pub timestamp: NaiveDateTime,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
}

impl Bar {
    /// Returns true if any price field is NaN or infinite.
    pub fn has_bad_price(&self) -> bool {
        !self.open.is_finite()
            || !self.high.is_finite()
            || !self.low.is_finite()
            || !self.close.is_finite()
    }

    /// Basic OHLCV sanity check: positive prices, high >= low, and the
    /// high/low bracketing open and close.
    pub fn is_sane(&self) -> bool {
        if self.has_bad_price() {
            return false;
        }
        self.high >= self.low
            && self.high >= self.open
            && self.high >= self.close
            && self.low <= self.open
            && self.low <= self.close
            && self.open > 0.0
            && self.low > 0.0
            && self.close > 0.0
    }
}
