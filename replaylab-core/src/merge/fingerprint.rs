//! Replay fingerprinting: a BLAKE3 digest over the serialized snapshot sequence.
//!
//! Two replays with the same fingerprint emitted the same snapshots in the same
//! order. Used to check determinism across runs and equivalence between sync,
//! async and mixed source configurations.

use super::Snapshot;
use serde::{Deserialize, Serialize};
use std::fmt;

/// BLAKE3 digest of a snapshot sequence, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReplayFingerprint(pub String);

impl fmt::Display for ReplayFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Incremental fingerprint, fed one snapshot at a time.
pub struct FingerprintBuilder {
    hasher: blake3::Hasher,
    count: u64,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self {
            hasher: blake3::Hasher::new(),
            count: 0,
        }
    }

    /// Mix one snapshot into the digest.
    ///
    /// Serialization goes straight into the hasher. A record type whose
    /// `Serialize` impl fails is hashed up to the failure point.
    pub fn push<R: Serialize>(&mut self, snapshot: &Snapshot<R>) {
        // BTreeMap entries give a stable key order.
        if serde_json::to_writer(&mut self.hasher, snapshot).is_err() {
            tracing::warn!(timestamp = %snapshot.timestamp, "snapshot failed to serialize for fingerprint");
        }
        self.hasher.update(b"\n");
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn finish(&self) -> ReplayFingerprint {
        ReplayFingerprint(self.hasher.finalize().to_hex().to_string())
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub fn replay_fingerprint<R: Serialize>(snapshots: &[Snapshot<R>]) -> ReplayFingerprint {
    let mut builder = FingerprintBuilder::new();
    for snapshot in snapshots {
        builder.push(snapshot);
    }
    builder.finish()
}
