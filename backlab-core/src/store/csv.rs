//! CSV bar loader — reads OHLCV rows into bars for `BarStore::ingest`.
//!
//! Expected header: `timestamp,open,high,low,close,volume`. Timestamps parse
//! as `YYYY-MM-DD HH:MM:SS` or bare `YYYY-MM-DD` (midnight). Symbol and
//! timeframe come from the caller, not the file. Malformed rows are skipped
//! and counted, matching the store's partial-success ingest posture.

use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Bar, Timeframe};

/// Errors that abort a CSV load outright. Row-level problems never abort;
/// they are counted in the report instead.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("csv format error: {0}")]
    Format(#[from] ::csv::Error),
}

/// Bars parsed from a file plus the rows that did not make it.
#[derive(Debug)]
pub struct CsvLoad {
    pub bars: Vec<Bar>,
    pub skipped_rows: usize,
}

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: u64,
}

/// Reads OHLCV bars for one (symbol, timeframe) from a headered CSV file.
///
/// Rows with unparseable fields or timestamps are skipped and counted; the
/// returned bars are not sanity-checked here since `BarStore::ingest` does
/// that on its own.
pub fn load_bars(
    path: &Path,
    symbol: &str,
    timeframe: Timeframe,
) -> Result<CsvLoad, CsvError> {
    let file = std::fs::File::open(path).map_err(|source| CsvError::Open {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = ::csv::Reader::from_reader(file);

    let mut bars = Vec::new();
    let mut skipped_rows = 0usize;
    for (row_no, record) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match record {
            Ok(row) => row,
            Err(err) => {
                debug!(row = row_no + 1, error = %err, "skipping unparseable csv row");
                skipped_rows += 1;
                continue;
            }
        };
        let Some(timestamp) = parse_timestamp(&row.timestamp) else {
            debug!(row = row_no + 1, value = %row.timestamp, "skipping row with bad timestamp");
            skipped_rows += 1;
            continue;
        };
        bars.push(Bar {
            symbol: symbol.to_string(),
            timeframe,
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(CsvLoad { bars, skipped_rows })
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Some(ts);
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}
