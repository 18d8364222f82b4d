//! BackLab Core — domain types, historical store, and execution simulator.
//!
//! This crate contains the engine half of the backtesting system:
//! - Domain types (bars, decisions, trades, portfolio state)
//! - Historical data store with validation, dedup, and gap detection
//! - Single-pass chronological execution simulator
//! - Pluggable cost models and trade constraints
//! - Deterministic seeded RNG hierarchy for randomized consumers
//!
//! Analytics, walk-forward validation, Monte Carlo, and persistence live in
//! `backlab-runner`; this crate stays strategy-free and I/O-light (the CSV
//! loader under `store::csv` is the only file reader).

pub mod domain;
pub mod rng;
pub mod sim;
pub mod store;
