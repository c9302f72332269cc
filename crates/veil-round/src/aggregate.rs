use std::collections::BTreeMap;

use veil_common::state::{KeyIndexEntry, StorageBackendKind};
use veil_pir::PirShard;
use veil_storage::{ObliviousBackend, PlainBackend, StorageBackend, StorageError};

use crate::{error::RoundError, state::RoundCommitment};

/// Lower bound on PIR element width, in bytes (§4.4: `elem_size_bits ∈
/// [512, 8192]`, so the byte width floor is `512 / 8`).
const MIN_ELEM_SIZE_BYTES: usize = 64;

fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

fn backend_for(kind: StorageBackendKind) -> Box<dyn StorageBackend + Send + Sync> {
    match kind {
        StorageBackendKind::Oblivious => Box::new(ObliviousBackend),
        StorageBackendKind::Plain => Box::new(PlainBackend),
    }
}

fn map_storage_err(e: StorageError) -> RoundError {
    match e {
        StorageError::PreconditionFailed(msg) => RoundError::BackendPreconditionFailed(msg),
        other => RoundError::StorageEncodeFailed(other.to_string()),
    }
}

/// Merge every worker's batch into one sorted map. Later batches (by
/// publish-completion order) overwrite earlier ones on key collision; a
/// batch that repeats a key internally lets its own later entry win, since
/// both are just sequential `BTreeMap::insert` calls (§4.3 step 1).
pub fn merge_batches(batches: &[(veil_common::state::WorkerId, Vec<veil_common::state::KvPair>)]) -> BTreeMap<String, Vec<u8>> {
    let mut merged = BTreeMap::new();
    for (_, pairs) in batches {
        for kv in pairs {
            merged.insert(kv.key.clone(), kv.value.clone());
        }
    }
    merged
}

/// The result of running the full barrier/aggregation procedure (§4.3
/// steps 2-8) or the lazy shard-rebuild procedure (§4.5 `GetValue`, which
/// is the same steps 3-8 run against a recovered commitment instead of a
/// freshly merged `all_pairs`).
pub struct Aggregated {
    pub commitment: RoundCommitment,
    pub base_params: Option<Vec<u8>>,
    pub shard: Option<PirShard>,
}

/// Steps 2-8: turn a merged key/value map into a commitment plus PIR
/// shard. Returns `commitment.blob.is_empty()` with `shard: None` for a
/// synchronization-only round (step 2).
pub fn build_commitment(
    merged: BTreeMap<String, Vec<u8>>,
    backend_kind: StorageBackendKind,
    plaintext_bits: u8,
) -> Result<Aggregated, RoundError> {
    if merged.is_empty() {
        return Ok(Aggregated {
            commitment: RoundCommitment {
                blob: Vec::new(),
                key_index: Vec::new(),
            },
            base_params: None,
            shard: None,
        });
    }

    let keys: Vec<String> = merged.keys().cloned().collect();
    let key_index: Vec<KeyIndexEntry> = keys
        .iter()
        .enumerate()
        .map(|(i, key)| KeyIndexEntry {
            key: key.clone(),
            index: i as i32,
        })
        .collect();

    let pairs: Vec<(String, Vec<u8>)> = keys
        .iter()
        .map(|key| (key.clone(), merged[key].clone()))
        .collect();

    let (commitment, shard, base_params) =
        rebuild_from_pairs(pairs, key_index, backend_kind, plaintext_bits)?;
    Ok(Aggregated {
        commitment,
        base_params: Some(base_params),
        shard: Some(shard),
    })
}

/// Re-derive a shard from a committed commitment, used both for the
/// initial build (fed with the freshly merged pairs) and for lazy rebuild
/// after a leadership change (fed with the pairs recovered by decoding the
/// committed blob against its own key index).
fn rebuild_from_pairs(
    pairs: Vec<(String, Vec<u8>)>,
    key_index: Vec<KeyIndexEntry>,
    backend_kind: StorageBackendKind,
    plaintext_bits: u8,
) -> Result<(RoundCommitment, PirShard, Vec<u8>), RoundError> {
    let backend = backend_for(backend_kind);

    let blob = backend.encode(&pairs).map_err(map_storage_err)?;

    let mut decoded_values = Vec::with_capacity(key_index.len());
    for entry in &key_index {
        let value = backend
            .decode(&blob, &entry.key)
            .map_err(map_storage_err)?;
        decoded_values.push(value);
    }

    let elem_size = next_pow2(decoded_values.iter().map(Vec::len).max().unwrap_or(1))
        .max(MIN_ELEM_SIZE_BYTES);
    let padded: Vec<Vec<u8>> = decoded_values
        .into_iter()
        .map(|mut v| {
            v.resize(elem_size, 0);
            v
        })
        .collect();

    let lwe_dim = veil_pir::lwe_dim_for(padded.len());
    let shard = PirShard::build(&padded, lwe_dim, plaintext_bits)
        .map_err(|e| RoundError::PirShardBuildFailed(e.to_string()))?;
    let base_params = shard
        .base_params_bytes()
        .map_err(|e| RoundError::PirShardBuildFailed(e.to_string()))?;

    Ok((RoundCommitment { blob, key_index }, shard, base_params))
}

/// Lazy rebuild (§4.5 `GetValue`): given a previously-committed
/// `RoundCommitment`, re-decode every key out of its own blob and rebuild
/// the shard. This is steps 5-8 run backwards from an already-encoded
/// blob instead of a fresh `all_pairs` map.
pub fn rebuild_shard(
    commitment: &RoundCommitment,
    backend_kind: StorageBackendKind,
    plaintext_bits: u8,
) -> Result<(PirShard, Vec<u8>), RoundError> {
    let backend = backend_for(backend_kind);
    let mut decoded_values = Vec::with_capacity(commitment.key_index.len());
    for entry in &commitment.key_index {
        let value = backend
            .decode(&commitment.blob, &entry.key)
            .map_err(map_storage_err)?;
        decoded_values.push(value);
    }

    let elem_size = next_pow2(decoded_values.iter().map(Vec::len).max().unwrap_or(1))
        .max(MIN_ELEM_SIZE_BYTES);
    let padded: Vec<Vec<u8>> = decoded_values
        .into_iter()
        .map(|mut v| {
            v.resize(elem_size, 0);
            v
        })
        .collect();

    let lwe_dim = veil_pir::lwe_dim_for(padded.len());
    let shard = PirShard::build(&padded, lwe_dim, plaintext_bits)
        .map_err(|e| RoundError::PirShardBuildFailed(e.to_string()))?;
    let base_params = shard
        .base_params_bytes()
        .map_err(|e| RoundError::PirShardBuildFailed(e.to_string()))?;
    Ok((shard, base_params))
}

#[cfg(test)]
mod test {
    use super::*;
    use veil_common::state::{KvPair, WorkerId};

    fn pairs_for(n: usize) -> Vec<KvPair> {
        (0..n)
            .map(|i| KvPair {
                key: format!("k{i:04}"),
                value: (i as u64).to_le_bytes().to_vec(),
            })
            .collect()
    }

    #[test]
    fn merge_is_last_write_wins() {
        let batches = vec![
            (
                WorkerId::new("w1"),
                vec![KvPair {
                    key: "a".into(),
                    value: vec![1],
                }],
            ),
            (
                WorkerId::new("w2"),
                vec![KvPair {
                    key: "a".into(),
                    value: vec![2],
                }],
            ),
        ];
        let merged = merge_batches(&batches);
        assert_eq!(merged.get("a"), Some(&vec![2]));
    }

    #[test]
    fn empty_merge_produces_empty_commitment_and_no_shard() {
        let merged = BTreeMap::new();
        let aggregated = build_commitment(merged, StorageBackendKind::Plain, 9).unwrap();
        assert!(aggregated.commitment.blob.is_empty());
        assert!(aggregated.shard.is_none());
    }

    #[test]
    fn non_empty_merge_builds_shard_with_plain_backend() {
        let batches = vec![(WorkerId::new("w1"), pairs_for(10))];
        let merged = merge_batches(&batches);
        let aggregated = build_commitment(merged, StorageBackendKind::Plain, 9).unwrap();
        assert!(!aggregated.commitment.blob.is_empty());
        assert_eq!(aggregated.commitment.key_index.len(), 10);
        assert!(aggregated.shard.is_some());
    }

    #[test]
    fn oblivious_backend_rejects_small_rounds() {
        let batches = vec![(WorkerId::new("w1"), pairs_for(5))];
        let merged = merge_batches(&batches);
        let err = build_commitment(merged, StorageBackendKind::Oblivious, 9).unwrap_err();
        assert!(matches!(err, RoundError::BackendPreconditionFailed(_)));
    }
}
