//! ReplayLab Runner: file-driven replays on top of `replaylab-core`.
//!
//! This crate provides:
//! - TOML replay configuration (sources, feed modes, scheduled orders)
//! - CSV loading for bar and tick sources
//! - The replay loop: merge, submit, match, value, fingerprint

pub mod config;
pub mod loader;
pub mod runner;

pub use config::{ConfigError, OrderConfig, ReplayConfig, SourceConfig, SourceKind};
pub use loader::{load_batch, write_bars_csv, LoadError};
pub use runner::{run_replay, run_replay_on, Rejection, ReplayReport, RunError};
