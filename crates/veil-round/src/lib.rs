//! The Round Manager and Aggregation Protocol (§4.3): owns one
//! `RoundState` per `round_id`, the multi-writer barrier that releases
//! every `PublishValues` caller together once a round's commitment is
//! durably replicated, and the lazy shard-rebuild path a freshly-elected
//! leader takes the first time a PIR request lands on a round it never
//! aggregated itself.
//!
//! Grounded on `controlplane/src/state/global.rs`'s
//! `DashMap`-of-entities-behind-`Arc<GlobalState>` pattern: one concurrent
//! map keyed by id, each entry independently locked, rather than one
//! global lock serializing unrelated rounds.

mod aggregate;
mod error;
mod state;

pub use error::RoundError;
pub use state::RoundCommitment;

use std::sync::Arc;

use dashmap::DashMap;
use veil_common::state::{KeyIndexEntry, KvPair, RoundId, StorageBackendKind, WorkerId};
use veil_consensus::{AppRequest, ConsensusNode};

use aggregate::{build_commitment, merge_batches, rebuild_shard};
use state::{RoundEntry, RoundState};

pub struct RoundManager {
    rounds: DashMap<RoundId, Arc<RoundEntry>>,
    consensus: Arc<ConsensusNode>,
    backend_kind: StorageBackendKind,
    plaintext_bits: u8,
}

impl RoundManager {
    pub fn new(
        consensus: Arc<ConsensusNode>,
        backend_kind: StorageBackendKind,
        plaintext_bits: u8,
    ) -> Self {
        Self {
            rounds: DashMap::new(),
            consensus,
            backend_kind,
            plaintext_bits,
        }
    }

    /// The node id this coordinator currently believes is leading, if any
    /// — used to enrich `NotLeader` responses with a `LeaderHint`.
    pub fn current_leader_hint(&self) -> Option<u64> {
        self.consensus.current_leader_hint()
    }

    async fn require_leader(&self) -> Result<(), RoundError> {
        if self.consensus.is_leader().await {
            Ok(())
        } else {
            Err(RoundError::NotLeader)
        }
    }

    /// §4.3 `StartRound`.
    pub async fn start_round(
        &self,
        round_id: RoundId,
        expected_workers: u32,
    ) -> Result<(), RoundError> {
        self.require_leader().await?;

        if round_id.get() == 0 {
            return Err(RoundError::InvalidRoundId);
        }
        if expected_workers < 1 {
            return Err(RoundError::InvalidExpectedWorkers);
        }

        if let Some(entry) = self.rounds.get(&round_id) {
            let state = entry.state.lock().await;
            return if state.expected_workers == expected_workers {
                Ok(())
            } else {
                Err(RoundError::RoundParameterConflict(round_id))
            };
        }

        self.rounds
            .entry(round_id)
            .or_insert_with(|| RoundEntry::new(expected_workers));
        Ok(())
    }

    /// §4.3 `PublishValues` + the barrier/aggregation procedure. Resolves
    /// only once the round's commitment has been durably replicated (or
    /// returns an error immediately if this worker's own call was
    /// rejected before ever being recorded).
    pub async fn publish_values(
        &self,
        round_id: RoundId,
        worker_id: WorkerId,
        pairs: Vec<KvPair>,
    ) -> Result<(), RoundError> {
        self.require_leader().await?;

        let entry = self
            .rounds
            .get(&round_id)
            .map(|e| e.clone())
            .ok_or(RoundError::UnknownRound(round_id))?;

        {
            let mut state = entry.state.lock().await;
            if state.has_published(&worker_id) {
                return Err(RoundError::WorkerAlreadyPublished {
                    round: round_id,
                    worker: worker_id.to_string(),
                });
            }
            state.batches.push((worker_id, pairs));

            if state.batches.len() as u32 == state.expected_workers {
                self.aggregate(round_id, &mut state).await?;
                entry.notify.notify_waiters();
                return Ok(());
            }
        }

        loop {
            let notified = entry.notify.notified();
            {
                let state = entry.state.lock().await;
                if state.complete {
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Runs exactly once per round, called with the round's lock held
    /// (§5: "aggregation is serialized by the round's lock").
    async fn aggregate(
        &self,
        round_id: RoundId,
        state: &mut RoundState,
    ) -> Result<(), RoundError> {
        let merged = merge_batches(&state.batches);
        let aggregated = build_commitment(merged, self.backend_kind, self.plaintext_bits)?;

        let commitment_bytes = bincode::serialize(&aggregated.commitment)
            .map_err(|e| RoundError::StorageEncodeFailed(e.to_string()))?;

        self.consensus
            .propose(AppRequest::Set {
                key: round_id.commitment_key(),
                value: commitment_bytes,
            })
            .await
            .map_err(|e| match e {
                veil_consensus::ConsensusError::NotLeader => RoundError::NotLeader,
                other => RoundError::ConsensusApplyFailed(other.to_string()),
            })?;

        state.key_index = Some(aggregated.commitment.key_index);
        state.base_params = aggregated.base_params;
        state.shard = aggregated.shard.map(Arc::new);
        state.complete = true;
        Ok(())
    }

    /// Fetch (and commit to memory) the `RoundCommitment` for a round
    /// that completed on a previous leader term, if this node hasn't seen
    /// it yet. Reads bypass consensus (§4.2) and serve straight from the
    /// local applied state machine, so this works on any node.
    fn read_commitment(&self, round_id: RoundId) -> Option<RoundCommitment> {
        self.consensus
            .get(&round_id.commitment_key())
            .and_then(|bytes| bincode::deserialize(&bytes).ok())
    }

    /// §4.5 `GetKeyMapping`. Not leader-only: the key index is fully
    /// determined by the committed commitment, which every node can read.
    pub async fn get_key_mapping(
        &self,
        round_id: RoundId,
    ) -> Result<Vec<KeyIndexEntry>, RoundError> {
        if let Some(entry) = self.rounds.get(&round_id) {
            let state = entry.state.lock().await;
            if let Some(key_index) = &state.key_index {
                return Ok(key_index.clone());
            }
        }
        self.read_commitment(round_id)
            .map(|c| c.key_index)
            .ok_or(RoundError::UnknownRound(round_id))
    }

    /// §4.5 `GetBaseParams` / `GetValue` share the same leader-only,
    /// lazy-rebuild precondition: the round must be `COMPLETE` and
    /// non-empty, and this node must have (or be able to rebuild) the
    /// in-memory shard.
    async fn ensure_shard(&self, round_id: RoundId) -> Result<Arc<RoundEntry>, RoundError> {
        self.require_leader().await?;

        let entry = match self.rounds.get(&round_id) {
            Some(entry) => entry.clone(),
            None => {
                let commitment = self
                    .read_commitment(round_id)
                    .ok_or(RoundError::UnknownRound(round_id))?;
                let entry = RoundEntry::new(0);
                {
                    let mut state = entry.state.lock().await;
                    state.complete = true;
                    state.key_index = Some(commitment.key_index.clone());
                    if !commitment.blob.is_empty() {
                        let (shard, base_params) =
                            rebuild_shard(&commitment, self.backend_kind, self.plaintext_bits)?;
                        state.shard = Some(Arc::new(shard));
                        state.base_params = Some(base_params);
                    }
                }
                self.rounds
                    .entry(round_id)
                    .or_insert_with(|| entry.clone());
                self.rounds.get(&round_id).unwrap().clone()
            }
        };

        {
            let mut state = entry.state.lock().await;
            if !state.complete {
                return Err(RoundError::UnknownRound(round_id));
            }
            if state.shard.is_none() {
                if let Some(commitment) = self.read_commitment(round_id) {
                    if commitment.blob.is_empty() {
                        return Err(RoundError::EmptyRound(round_id));
                    }
                    let (shard, base_params) =
                        rebuild_shard(&commitment, self.backend_kind, self.plaintext_bits)?;
                    state.shard = Some(Arc::new(shard));
                    state.base_params = Some(base_params);
                } else {
                    return Err(RoundError::EmptyRound(round_id));
                }
            }
        }

        Ok(entry)
    }

    pub async fn get_base_params(&self, round_id: RoundId) -> Result<Vec<u8>, RoundError> {
        let entry = self.ensure_shard(round_id).await?;
        let state = entry.state.lock().await;
        state
            .base_params
            .clone()
            .ok_or(RoundError::EmptyRound(round_id))
    }

    pub async fn get_value(
        &self,
        round_id: RoundId,
        pir_query: Vec<u8>,
    ) -> Result<Vec<u8>, RoundError> {
        let entry = self.ensure_shard(round_id).await?;
        let shard = {
            let state = entry.state.lock().await;
            state.shard.clone().ok_or(RoundError::EmptyRound(round_id))?
        };
        shard
            .process_query(&pir_query)
            .map_err(|e| RoundError::PirShardBuildFailed(e.to_string()))
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use openraft::BasicNode;
    use veil_consensus::ConsensusNode;

    use super::*;

    async fn leading_manager() -> (RoundManager, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut peers = BTreeMap::new();
        peers.insert(1, BasicNode::new("127.0.0.1:9200".to_string()));
        let consensus = ConsensusNode::start(1, "127.0.0.1:9200".to_string(), &db, peers, true)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(consensus.is_leader().await);

        (
            RoundManager::new(Arc::new(consensus), StorageBackendKind::Plain, 9),
            dir,
        )
    }

    #[tokio::test]
    async fn start_round_rejects_zero_round_id() {
        let (manager, _dir) = leading_manager().await;
        let err = manager.start_round(RoundId::new(0), 1).await.unwrap_err();
        assert!(matches!(err, RoundError::InvalidRoundId));
    }

    #[tokio::test]
    async fn start_round_rejects_zero_expected_workers() {
        let (manager, _dir) = leading_manager().await;
        let err = manager
            .start_round(RoundId::new(1), 0)
            .await
            .unwrap_err();
        assert!(matches!(err, RoundError::InvalidExpectedWorkers));
    }

    #[tokio::test]
    async fn start_round_accepts_valid_parameters() {
        let (manager, _dir) = leading_manager().await;
        manager.start_round(RoundId::new(1), 2).await.unwrap();
    }
}
