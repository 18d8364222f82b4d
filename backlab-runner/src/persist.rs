//! JSONL result store — append-only history of completed runs.
//!
//! One JSON record per line. Appends never rewrite existing lines, so a
//! crash mid-write can corrupt at most the final line; loads skip lines that
//! fail to parse (with a warning) instead of refusing the whole file.
//! Records written by a newer schema than this build understands are
//! rejected on load, never silently reinterpreted.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::monte_carlo::MonteCarloReport;
use crate::result::{BacktestResult, ResultKey, SCHEMA_VERSION};
use crate::walk_forward::WalkForwardReport;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("failed to open {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One line in the store. Monte Carlo and walk-forward records carry the
/// record id of the run they derive from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoredRecord {
    Backtest(Box<BacktestResult>),
    MonteCarlo {
        #[serde(default)]
        schema_version: u32,
        source_id: String,
        report: MonteCarloReport,
    },
    WalkForward {
        #[serde(default)]
        schema_version: u32,
        source_id: String,
        report: WalkForwardReport,
    },
}

impl StoredRecord {
    pub fn monte_carlo(source_id: impl Into<String>, report: MonteCarloReport) -> Self {
        StoredRecord::MonteCarlo {
            schema_version: SCHEMA_VERSION,
            source_id: source_id.into(),
            report,
        }
    }

    pub fn walk_forward(source_id: impl Into<String>, report: WalkForwardReport) -> Self {
        StoredRecord::WalkForward {
            schema_version: SCHEMA_VERSION,
            source_id: source_id.into(),
            report,
        }
    }

    fn schema_version(&self) -> u32 {
        match self {
            StoredRecord::Backtest(result) => result.schema_version,
            StoredRecord::MonteCarlo { schema_version, .. } => *schema_version,
            StoredRecord::WalkForward { schema_version, .. } => *schema_version,
        }
    }
}

/// What a load actually recovered.
#[derive(Debug, Default)]
pub struct LoadOutcome {
    pub records: Vec<StoredRecord>,
    pub corrupt_lines: usize,
    pub rejected_newer: usize,
}

/// Append-only JSONL store at a fixed path.
#[derive(Debug, Clone)]
pub struct ResultStore {
    path: PathBuf,
}

impl ResultStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ResultStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record as a single JSON line.
    pub fn append(&self, record: &StoredRecord) -> Result<(), PersistError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| PersistError::Io {
                path: self.path.clone(),
                source,
            })?;
        let json = serde_json::to_string(record)?;
        writeln!(file, "{json}").map_err(|source| PersistError::Io {
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), "appended record");
        Ok(())
    }

    /// Loads every readable record. A missing file is an empty store.
    /// Unparseable lines and records from a newer schema are counted and
    /// skipped.
    pub fn load_all(&self) -> Result<LoadOutcome, PersistError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LoadOutcome::default())
            }
            Err(source) => {
                return Err(PersistError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let mut outcome = LoadOutcome::default();
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| PersistError::Io {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<StoredRecord>(&line) {
                Ok(record) if record.schema_version() > SCHEMA_VERSION => {
                    warn!(
                        line = line_no + 1,
                        found = record.schema_version(),
                        supported = SCHEMA_VERSION,
                        "skipping record from a newer schema"
                    );
                    outcome.rejected_newer += 1;
                }
                Ok(record) => outcome.records.push(record),
                Err(err) => {
                    warn!(line = line_no + 1, error = %err, "skipping corrupt record");
                    outcome.corrupt_lines += 1;
                }
            }
        }
        Ok(outcome)
    }

    /// Latest stored backtest matching `key`, if any.
    pub fn find_backtest(&self, key: &ResultKey) -> Result<Option<BacktestResult>, PersistError> {
        let outcome = self.load_all()?;
        Ok(outcome
            .records
            .into_iter()
            .rev()
            .find_map(|record| match record {
                StoredRecord::Backtest(result) if result.key() == *key => Some(*result),
                _ => None,
            }))
    }
}
