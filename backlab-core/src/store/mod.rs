//! Historical data store — validated, deduplicated bar series.
//!
//! Series are keyed by (symbol, timeframe) and kept sorted by timestamp.
//! Ingest merges a batch into the existing series off to the side and swaps
//! the finished vector in, so concurrent readers never observe a partially
//! ingested batch. The store flags anomalies (gaps, outliers, zero volume)
//! but never repairs them: interpolated bars are fabricated data, and it is
//! the caller's call whether flagged bars stay in a backtest.

pub mod csv;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::domain::{Bar, Symbol, Timeframe};

/// Errors from store lookups.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("no series stored for {symbol} @ {timeframe}")]
    SeriesNotFound { symbol: Symbol, timeframe: Timeframe },
    #[error("range start {start} is after end {end}")]
    InvalidRange {
        start: NaiveDateTime,
        end: NaiveDateTime,
    },
}

/// Outcome of one ingest batch. Malformed records are skipped and counted,
/// never fatal; a batch always partially succeeds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// New (symbol, timeframe, timestamp) slots filled.
    pub inserted: usize,
    /// Collisions resolved last-write-wins, each logged at WARN.
    pub replaced: usize,
    /// Records dropped for failing the bar sanity check.
    pub skipped: usize,
}

/// How serious an anomaly is for downstream consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
}

/// One flagged irregularity in a stored series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnomalyKind {
    /// Expected timestamps missing between two stored bars. Daily series
    /// skip weekends, so exchange holidays surface here by design.
    Gap {
        after: NaiveDateTime,
        first_missing: NaiveDateTime,
        missing: usize,
    },
    /// Close deviates from the trailing-window mean by more than the
    /// configured number of standard deviations.
    Outlier {
        timestamp: NaiveDateTime,
        close: f64,
        window_mean: f64,
        deviations: f64,
    },
    /// Bar with no traded volume; cost models may refuse to fill on it.
    ZeroVolume { timestamp: NaiveDateTime },
}

/// Anomaly with its severity. The store only ever flags; callers decide
/// whether to exclude the bars involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub severity: Severity,
    #[serde(flatten)]
    pub kind: AnomalyKind,
}

/// Knobs for `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Trailing window length for the outlier statistic.
    pub outlier_window: usize,
    /// Flag closes more than this many standard deviations from the
    /// trailing-window mean.
    pub outlier_sigma: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            outlier_window: 20,
            outlier_sigma: 4.0,
        }
    }
}

type SeriesKey = (Symbol, Timeframe);

/// In-memory bar store, read-shared across simulation workers.
///
/// Readers take `Arc` clones of whole series, so an ingest that swaps a
/// series in never invalidates a reader mid-scan.
#[derive(Debug, Default)]
pub struct BarStore {
    series: RwLock<HashMap<SeriesKey, Arc<Vec<Bar>>>>,
}

impl BarStore {
    pub fn new() -> Self {
        BarStore::default()
    }

    /// Merges a batch of records into the store.
    ///
    /// Records failing the bar sanity check are skipped and counted. Within
    /// a key, identical timestamps resolve last-write-wins by batch order;
    /// each collision (against the store or within the batch) is logged.
    /// The merged series is built aside and swapped in whole.
    pub fn ingest(&self, records: Vec<Bar>) -> IngestReport {
        let mut report = IngestReport::default();
        let mut batches: HashMap<SeriesKey, Vec<Bar>> = HashMap::new();
        for bar in records {
            if !bar.is_sane() {
                debug!(
                    symbol = %bar.symbol,
                    timestamp = %bar.timestamp,
                    "skipping malformed bar"
                );
                report.skipped += 1;
                continue;
            }
            batches
                .entry((bar.symbol.clone(), bar.timeframe))
                .or_default()
                .push(bar);
        }

        let mut guard = self.series.write().expect("bar store lock poisoned");
        for ((symbol, timeframe), batch) in batches {
            let mut merged: BTreeMap<NaiveDateTime, Bar> = guard
                .get(&(symbol.clone(), timeframe))
                .map(|existing| {
                    existing
                        .iter()
                        .map(|b| (b.timestamp, b.clone()))
                        .collect()
                })
                .unwrap_or_default();
            for bar in batch {
                if merged.insert(bar.timestamp, bar.clone()).is_some() {
                    warn!(
                        symbol = %symbol,
                        timeframe = %timeframe,
                        timestamp = %bar.timestamp,
                        "duplicate bar replaced, last write wins"
                    );
                    report.replaced += 1;
                } else {
                    report.inserted += 1;
                }
            }
            let rebuilt: Vec<Bar> = merged.into_values().collect();
            guard.insert((symbol, timeframe), Arc::new(rebuilt));
        }
        report
    }

    /// Whole stored series, shared without copying. `None` when nothing has
    /// been ingested for the key.
    pub fn series(&self, symbol: &str, timeframe: Timeframe) -> Option<Arc<Vec<Bar>>> {
        self.series
            .read()
            .expect("bar store lock poisoned")
            .get(&(symbol.to_string(), timeframe))
            .cloned()
    }

    /// Bars in `[start, end]`, ordered by timestamp.
    pub fn get_series(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<Bar>, DataError> {
        if start > end {
            return Err(DataError::InvalidRange { start, end });
        }
        let series = self
            .series(symbol, timeframe)
            .ok_or_else(|| DataError::SeriesNotFound {
                symbol: symbol.to_string(),
                timeframe,
            })?;
        let lo = series.partition_point(|b| b.timestamp < start);
        let hi = series.partition_point(|b| b.timestamp <= end);
        Ok(series[lo..hi].to_vec())
    }

    /// Scans a stored series for gaps, outliers, and zero-volume bars.
    pub fn validate(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        config: &ValidationConfig,
    ) -> Result<Vec<Anomaly>, DataError> {
        let series = self
            .series(symbol, timeframe)
            .ok_or_else(|| DataError::SeriesNotFound {
                symbol: symbol.to_string(),
                timeframe,
            })?;
        Ok(scan_anomalies(&series, timeframe, config))
    }

    /// Deterministic BLAKE3 fingerprint of a stored series, hashing each
    /// bar's timestamp and OHLCV fields as little-endian bytes in order.
    pub fn series_hash(&self, symbol: &str, timeframe: Timeframe) -> Option<String> {
        let series = self.series(symbol, timeframe)?;
        Some(hash_series(&series))
    }
}

/// BLAKE3 content hash of a bar slice, for reproducibility audits.
pub fn hash_series(series: &[Bar]) -> String {
    let mut hasher = blake3::Hasher::new();
    for bar in series {
        hasher.update(&bar.timestamp.and_utc().timestamp().to_le_bytes());
        hasher.update(&bar.open.to_le_bytes());
        hasher.update(&bar.high.to_le_bytes());
        hasher.update(&bar.low.to_le_bytes());
        hasher.update(&bar.close.to_le_bytes());
        hasher.update(&bar.volume.to_le_bytes());
    }
    hasher.finalize().to_hex().to_string()
}

fn scan_anomalies(series: &[Bar], timeframe: Timeframe, config: &ValidationConfig) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for pair in series.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        let Some(mut expected) = timeframe.next_expected(prev.timestamp) else {
            continue;
        };
        if expected >= cur.timestamp {
            continue;
        }
        let first_missing = expected;
        let mut missing = 0usize;
        while expected < cur.timestamp {
            missing += 1;
            match timeframe.next_expected(expected) {
                Some(next) => expected = next,
                None => break,
            }
        }
        anomalies.push(Anomaly {
            severity: Severity::Warning,
            kind: AnomalyKind::Gap {
                after: prev.timestamp,
                first_missing,
                missing,
            },
        });
    }

    let window = config.outlier_window;
    if window >= 2 {
        for i in window..series.len() {
            let closes: Vec<f64> = series[i - window..i].iter().map(|b| b.close).collect();
            let mean = closes.iter().sum::<f64>() / window as f64;
            let variance = closes.iter().map(|c| (c - mean).powi(2)).sum::<f64>()
                / (window - 1) as f64;
            let std = variance.sqrt();
            if std < 1e-12 {
                continue;
            }
            let deviations = (series[i].close - mean).abs() / std;
            if deviations > config.outlier_sigma {
                anomalies.push(Anomaly {
                    severity: Severity::Warning,
                    kind: AnomalyKind::Outlier {
                        timestamp: series[i].timestamp,
                        close: series[i].close,
                        window_mean: mean,
                        deviations,
                    },
                });
            }
        }
    }

    for bar in series {
        if bar.volume == 0 {
            anomalies.push(Anomaly {
                severity: Severity::Info,
                kind: AnomalyKind::ZeroVolume {
                    timestamp: bar.timestamp,
                },
            });
        }
    }

    anomalies
}
