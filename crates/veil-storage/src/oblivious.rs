//! RB-OKVS: a banded oblivious key-value store, built as a sparse linear
//! system over GF(2) with 8-byte-lane values.
//!
//! Each key deterministically selects a "band" — a contiguous run of `w`
//! output columns, plus a `w`-bit coefficient mask picking which columns in
//! that run participate in its equation — via a key-seeded `ChaCha8Rng`.
//! Solving `encode` means finding column values `x_0..x_{m-1}` (each an
//! 8-byte lane) such that for every key, XORing together the columns its
//! mask selects (starting at its band) reproduces that key's value. This is
//! the standard OKVS construction used for e.g. PSI and PIR key mapping
//! (Garimella et al., "Oblivious Key-Value Stores and Amplification for
//! Private Set Intersection"), solved here via banded Gaussian elimination
//! over a pivot table keyed by each row's leading column.
//!
//! `decode` recomputes the same band/mask for a key and XORs the
//! corresponding columns out of the blob. Querying a key that was never
//! encoded is well-defined but meaningless — it returns whatever those
//! columns happen to XOR to, which is exactly the scheme's obliviousness
//! property: the blob does not distinguish present keys from absent ones.

use std::collections::{BTreeSet, HashMap};

use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use sha2::{Digest, Sha256};

use crate::{error::StorageError, StorageBackend, MIN_OBLIVIOUS_PAIRS, OBLIVIOUS_VALUE_WIDTH};

/// Band width in bits/columns. Capped at 64 so a row's coefficient mask fits
/// in one `u64`.
const BAND_WIDTH: usize = 64;

/// Fractional overhead of output columns over input keys, plus a fixed
/// minimum slack so band placement has room to vary even for small rounds.
fn column_count(n: usize) -> usize {
    let overhead = (n / 5).max(32);
    n + overhead
}

fn band_for(key: &str, m: usize, w: usize) -> (usize, u64) {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let seed: [u8; 32] = hasher.finalize().into();
    let mut rng = ChaCha8Rng::from_seed(seed);

    let start = rng.gen_range(0..=(m - w));
    let mask = if w == 64 {
        rng.next_u64()
    } else {
        rng.next_u64() & ((1u64 << w) - 1)
    };
    let mask = if mask == 0 { 1 } else { mask };
    (start, mask)
}

fn row_columns(start: usize, mask: u64) -> BTreeSet<usize> {
    (0..BAND_WIDTH)
        .filter(|bit| mask & (1 << bit) != 0)
        .map(|bit| start + bit)
        .collect()
}

fn xor_rows(a: &BTreeSet<usize>, b: &BTreeSet<usize>) -> BTreeSet<usize> {
    a.symmetric_difference(b).copied().collect()
}

/// The `Oblivious` variant (§4.1): requires at least `MIN_OBLIVIOUS_PAIRS`
/// pairs, each with an exactly-8-byte value, per the spec's backend
/// precondition.
#[derive(Debug, Default, Clone, Copy)]
pub struct ObliviousBackend;

impl ObliviousBackend {
    fn check_preconditions(pairs: &[(String, Vec<u8>)]) -> Result<(), StorageError> {
        if pairs.len() < MIN_OBLIVIOUS_PAIRS {
            return Err(StorageError::PreconditionFailed(format!(
                "oblivious backend requires at least {MIN_OBLIVIOUS_PAIRS} pairs, got {}",
                pairs.len()
            )));
        }
        if let Some((key, value)) = pairs.iter().find(|(_, v)| v.len() != OBLIVIOUS_VALUE_WIDTH) {
            return Err(StorageError::PreconditionFailed(format!(
                "oblivious backend requires {OBLIVIOUS_VALUE_WIDTH}-byte values, key `{key}` has {}",
                value.len()
            )));
        }
        Ok(())
    }
}

impl StorageBackend for ObliviousBackend {
    fn encode(&self, pairs: &[(String, Vec<u8>)]) -> Result<Vec<u8>, StorageError> {
        Self::check_preconditions(pairs)?;

        let n = pairs.len();
        let m = column_count(n);
        let w = BAND_WIDTH.min(m.saturating_sub(1)).max(1);

        let mut pivots: HashMap<usize, (BTreeSet<usize>, u64)> = HashMap::with_capacity(n);

        for (key, value) in pairs {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(value);
            let mut val = u64::from_le_bytes(bytes);

            let (start, mask) = band_for(key, m, w);
            let mut row = row_columns(start, mask);

            loop {
                let Some(&leading) = row.iter().next() else {
                    if val != 0 {
                        return Err(StorageError::EncodeFailed(format!(
                            "inconsistent band system at key `{key}`, retry encode"
                        )));
                    }
                    break;
                };
                match pivots.get(&leading) {
                    Some((prow, pval)) => {
                        row = xor_rows(&row, prow);
                        val ^= pval;
                    }
                    None => {
                        pivots.insert(leading, (row, val));
                        break;
                    }
                }
            }
        }

        let mut x = vec![0u64; m];
        let mut leadings: Vec<usize> = pivots.keys().copied().collect();
        leadings.sort_unstable_by(|a, b| b.cmp(a));
        for leading in leadings {
            let (row, val) = &pivots[&leading];
            let mut v = *val;
            for &j in row.iter() {
                if j != leading {
                    v ^= x[j];
                }
            }
            x[leading] = v;
        }

        let mut blob = Vec::with_capacity(8 + m * 8);
        blob.extend_from_slice(&(m as u64).to_le_bytes());
        for lane in &x {
            blob.extend_from_slice(&lane.to_le_bytes());
        }
        Ok(blob)
    }

    fn decode(&self, blob: &[u8], key: &str) -> Result<Vec<u8>, StorageError> {
        if blob.len() < 8 {
            return Err(StorageError::DecodeFailed("blob too short".into()));
        }
        let m = u64::from_le_bytes(blob[0..8].try_into().unwrap()) as usize;
        if blob.len() != 8 + m * 8 {
            return Err(StorageError::DecodeFailed(
                "blob length inconsistent with column count".into(),
            ));
        }

        let w = BAND_WIDTH.min(m.saturating_sub(1)).max(1);
        let (start, mask) = band_for(key, m, w);

        let mut value = 0u64;
        for bit in 0..BAND_WIDTH {
            if mask & (1 << bit) == 0 {
                continue;
            }
            let col = start + bit;
            let offset = 8 + col * 8;
            let lane = u64::from_le_bytes(blob[offset..offset + 8].try_into().unwrap());
            value ^= lane;
        }
        Ok(value.to_le_bytes().to_vec())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sample_pairs;

    #[test]
    fn roundtrips_every_key() {
        let backend = ObliviousBackend;
        let pairs = sample_pairs(200);
        let blob = backend.encode(&pairs).unwrap();

        for (key, value) in &pairs {
            assert_eq!(backend.decode(&blob, key).unwrap(), *value);
        }
    }

    #[test]
    fn rejects_too_few_pairs() {
        let backend = ObliviousBackend;
        let pairs = sample_pairs(MIN_OBLIVIOUS_PAIRS - 1);
        assert!(matches!(
            backend.encode(&pairs),
            Err(StorageError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn rejects_values_not_eight_bytes() {
        let backend = ObliviousBackend;
        let mut pairs = sample_pairs(MIN_OBLIVIOUS_PAIRS);
        pairs[0].1 = vec![1, 2, 3];
        assert!(matches!(
            backend.encode(&pairs),
            Err(StorageError::PreconditionFailed(_))
        ));
    }

    #[test]
    fn encoding_is_order_independent() {
        let backend = ObliviousBackend;
        let mut pairs = sample_pairs(150);
        let blob_a = backend.encode(&pairs).unwrap();
        pairs.reverse();
        let blob_b = backend.encode(&pairs).unwrap();

        for (key, _) in &pairs {
            assert_eq!(
                backend.decode(&blob_a, key).unwrap(),
                backend.decode(&blob_b, key).unwrap()
            );
        }
    }

    #[test]
    fn exactly_minimum_pairs_encodes() {
        let backend = ObliviousBackend;
        let pairs = sample_pairs(MIN_OBLIVIOUS_PAIRS);
        let blob = backend.encode(&pairs).unwrap();
        for (key, value) in &pairs {
            assert_eq!(backend.decode(&blob, key).unwrap(), *value);
        }
    }
}
