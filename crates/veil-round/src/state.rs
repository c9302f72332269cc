use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use veil_common::state::{KeyIndexEntry, KvPair, WorkerId};
use veil_pir::PirShard;

/// What actually gets proposed through consensus for one round: the
/// storage blob plus the key-index list it was built against. The spec's
/// `SET(round_{id}_results, blob)` step (§4.3 step 9) is read here as
/// shorthand for committing the pair this module needs to answer
/// `GetKeyMapping` and to rebuild a PIR shard lazily on any node without
/// re-deriving the original key list, which an OKVS blob alone does not
/// carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundCommitment {
    pub blob: Vec<u8>,
    pub key_index: Vec<KeyIndexEntry>,
}

/// In-memory state for one round (§4.3). Everything but `expected_workers`
/// and the accumulation fields is `None` until the barrier fires.
pub struct RoundState {
    pub expected_workers: u32,
    /// Publish batches in arrival order, so merge-by-overwrite at barrier
    /// time reproduces "later-arriving workers win" (§4.3 step 1).
    pub batches: Vec<(WorkerId, Vec<KvPair>)>,
    pub complete: bool,
    pub key_index: Option<Vec<KeyIndexEntry>>,
    pub base_params: Option<Vec<u8>>,
    pub shard: Option<Arc<PirShard>>,
}

impl RoundState {
    pub fn new(expected_workers: u32) -> Self {
        Self {
            expected_workers,
            batches: Vec::new(),
            complete: false,
            key_index: None,
            base_params: None,
            shard: None,
        }
    }

    pub fn has_published(&self, worker_id: &WorkerId) -> bool {
        self.batches.iter().any(|(w, _)| w == worker_id)
    }
}

/// A round's mutable state plus the `Notify` every blocked
/// `PublishValues` caller waits on until the barrier fires.
pub struct RoundEntry {
    pub state: Mutex<RoundState>,
    pub notify: Notify,
}

impl RoundEntry {
    pub fn new(expected_workers: u32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RoundState::new(expected_workers)),
            notify: Notify::new(),
        })
    }
}
