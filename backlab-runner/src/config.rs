//! Run configuration — TOML file in, validated settings and a canonical
//! hash out.
//!
//! The hash covers every field through the canonical JSON form, so two runs
//! share a `config_hash` exactly when their configurations are identical.

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use backlab_core::domain::Timeframe;
use backlab_core::sim::constraints::TradeConstraints;
use backlab_core::sim::costs::LinearCostModel;

use crate::compare::CompareConfig;
use crate::metrics::AnalyticsConfig;
use crate::monte_carlo::MonteCarloConfig;
use crate::walk_forward::WalkForwardConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Optional date bounds on the series pulled from the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodConfig {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

/// Complete run configuration, loadable from TOML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub symbol: String,
    pub timeframe: Timeframe,
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    #[serde(default)]
    pub period: Option<PeriodConfig>,
    #[serde(default)]
    pub costs: LinearCostModel,
    #[serde(default)]
    pub constraints: TradeConstraints,
    #[serde(default)]
    pub analytics: AnalyticsConfig,
    #[serde(default)]
    pub compare: Option<CompareConfig>,
    #[serde(default)]
    pub walk_forward: Option<WalkForwardConfig>,
    #[serde(default)]
    pub monte_carlo: Option<MonteCarloConfig>,
}

fn default_capital() -> f64 {
    100_000.0
}

impl RunConfig {
    /// Reads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: RunConfig = toml::from_str(&text)?;
        config.validate()?;
        info!(path = %path.display(), hash = %config.config_hash(), "loaded run config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("symbol is empty".into()));
        }
        if !self.initial_capital.is_finite() || self.initial_capital <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "initial_capital must be positive and finite, got {}",
                self.initial_capital
            )));
        }
        if let Some(period) = &self.period {
            if period.end < period.start {
                return Err(ConfigError::Invalid(format!(
                    "period end {} precedes start {}",
                    period.end, period.start
                )));
            }
        }
        if let Some(wf) = &self.walk_forward {
            if wf.train_len == 0 || wf.test_len == 0 || wf.step_len == 0 {
                return Err(ConfigError::Invalid(
                    "walk_forward window lengths must be positive".into(),
                ));
            }
            if wf.step_len < wf.test_len {
                return Err(ConfigError::Invalid(format!(
                    "walk_forward step_len {} is smaller than test_len {}",
                    wf.step_len, wf.test_len
                )));
            }
        }
        if let Some(mc) = &self.monte_carlo {
            if mc.n_simulations == 0 {
                return Err(ConfigError::Invalid(
                    "monte_carlo n_simulations must be positive".into(),
                ));
            }
            if !(0.0..1.0).contains(&mc.ruin_floor) {
                return Err(ConfigError::Invalid(format!(
                    "monte_carlo ruin_floor must be in [0, 1), got {}",
                    mc.ruin_floor
                )));
            }
        }
        Ok(())
    }

    /// Deterministic BLAKE3 hash over the canonical JSON form.
    pub fn config_hash(&self) -> String {
        let json = serde_json::to_string(self).expect("RunConfig serialization failed");
        blake3::hash(json.as_bytes()).to_hex().to_string()
    }
}
