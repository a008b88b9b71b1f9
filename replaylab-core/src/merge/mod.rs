//! Chronological multi-source merge.
//!
//! [`MergeScheduler`] owns a set of named [`SourceAdapter`]s and yields one
//! [`Snapshot`] per distinct timestamp, strictly increasing. Ties are resolved
//! by timestamp equality alone: every source with rows at the current time
//! contributes to the same snapshot.
//!
//! [`SourceAdapter`]: crate::source::SourceAdapter

pub mod fingerprint;
pub mod scheduler;
pub mod snapshot;

pub use fingerprint::{replay_fingerprint, FingerprintBuilder, ReplayFingerprint};
pub use scheduler::MergeScheduler;
pub use snapshot::Snapshot;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MergeError {
    #[error("duplicate source name '{0}'")]
    DuplicateSource(String),
}

/// A source retired because a pull failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFault {
    pub source: String,
    pub reason: String,
}

/// Running counters for one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeStats {
    pub snapshots: u64,
    pub rows_emitted: u64,
    pub stale_rows_dropped: u64,
    pub pulls: u64,
    pub faults: Vec<SourceFault>,
}
