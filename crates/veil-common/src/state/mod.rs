mod id;
mod key_index;

pub use id::{RoundId, WorkerId};
pub use key_index::KeyIndexEntry;

use serde::{Deserialize, Serialize};

/// The two storage backend variants of §4.1. Fixed for the lifetime of a
/// server process and must match across every node in the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::AsRefStr)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// RB-OKVS: encoding hides key membership, requires `N >= 100` and
    /// 8-byte values.
    Oblivious,
    /// Plain serialized map: no obliviousness, no size floor.
    Plain,
}

impl std::str::FromStr for StorageBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "oblivious" => Ok(Self::Oblivious),
            "plain" => Ok(Self::Plain),
            other => Err(format!(
                "invalid storage backend `{other}`, expected `oblivious` or `plain`"
            )),
        }
    }
}

impl std::fmt::Display for StorageBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A single `(key, value)` pair as published by a worker. Grouped in lists
/// rather than a map on the wire since a worker's `PublishValues` batch may
/// legally contain duplicate keys (last one in the batch wins, per §4.3
/// step 1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvPair {
    pub key: String,
    pub value: Vec<u8>,
}
