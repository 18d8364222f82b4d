//! Completed-run envelope — simulation output plus analytics and provenance.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use backlab_core::sim::SimResult;

use crate::metrics::PerformanceReport;

/// Version stamped into every persisted result. Loads reject records written
/// by a newer schema.
pub const SCHEMA_VERSION: u32 = 1;

/// One finished backtest: the raw simulation, its metrics, and enough
/// provenance (config hash, schema version) to identify the run later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Defaults to 0 when absent so pre-versioning records still load.
    #[serde(default)]
    pub schema_version: u32,
    pub strategy_id: String,
    /// BLAKE3 of the run configuration that produced this result.
    pub config_hash: String,
    pub report: PerformanceReport,
    pub sim: SimResult,
}

impl BacktestResult {
    pub fn key(&self) -> ResultKey {
        ResultKey {
            strategy_id: self.strategy_id.clone(),
            period_start: self.sim.period_start,
            period_end: self.sim.period_end,
            config_hash: self.config_hash.clone(),
        }
    }

    pub fn record_id(&self) -> String {
        self.key().record_id()
    }
}

/// Identity of a stored result. Two runs with the same strategy, period, and
/// configuration are the same run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResultKey {
    pub strategy_id: String,
    pub period_start: NaiveDateTime,
    pub period_end: NaiveDateTime,
    pub config_hash: String,
}

impl ResultKey {
    /// Deterministic record id: BLAKE3 over the canonical JSON of the key.
    pub fn record_id(&self) -> String {
        let json = serde_json::to_string(self).expect("ResultKey serialization failed");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn key() -> ResultKey {
        ResultKey {
            strategy_id: "ma-cross".into(),
            period_start: NaiveDate::from_ymd_opt(2023, 1, 2)
                .unwrap()
                .and_time(NaiveTime::MIN),
            period_end: NaiveDate::from_ymd_opt(2023, 12, 29)
                .unwrap()
                .and_time(NaiveTime::MIN),
            config_hash: "abc123".into(),
        }
    }

    #[test]
    fn record_id_is_deterministic() {
        assert_eq!(key().record_id(), key().record_id());
        assert_eq!(key().record_id().len(), 64);
    }

    #[test]
    fn record_id_changes_with_every_field() {
        let base = key().record_id();
        let mut k = key();
        k.strategy_id = "other".into();
        assert_ne!(k.record_id(), base);
        let mut k = key();
        k.config_hash = "def456".into();
        assert_ne!(k.record_id(), base);
        let mut k = key();
        k.period_end += chrono::Duration::days(1);
        assert_ne!(k.record_id(), base);
    }

    #[test]
    fn result_key_round_trips() {
        let json = serde_json::to_string(&key()).unwrap();
        let back: ResultKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key());
    }
}
