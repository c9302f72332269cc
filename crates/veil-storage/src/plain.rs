use std::collections::BTreeMap;

use crate::{error::StorageError, StorageBackend};

/// The non-oblivious `Plain` variant (§4.1): a sorted map, bincode-encoded.
/// No PIR obliviousness guarantee is made — any party holding the blob can
/// recover the full key set. Used when a round is configured with
/// `StorageBackendKind::Plain`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainBackend;

impl StorageBackend for PlainBackend {
    fn encode(&self, pairs: &[(String, Vec<u8>)]) -> Result<Vec<u8>, StorageError> {
        let map: BTreeMap<&str, &[u8]> = pairs
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_slice()))
            .collect();
        bincode::serialize(&map).map_err(|e| StorageError::EncodeFailed(e.to_string()))
    }

    fn decode(&self, blob: &[u8], key: &str) -> Result<Vec<u8>, StorageError> {
        let map: BTreeMap<String, Vec<u8>> =
            bincode::deserialize(blob).map_err(|e| StorageError::DecodeFailed(e.to_string()))?;
        map.get(key).cloned().ok_or(StorageError::KeyNotFound)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sample_pairs;

    #[test]
    fn roundtrips_every_key() {
        let backend = PlainBackend;
        let pairs = sample_pairs(10);
        let blob = backend.encode(&pairs).unwrap();

        for (key, value) in &pairs {
            assert_eq!(backend.decode(&blob, key).unwrap(), *value);
        }
    }

    #[test]
    fn unknown_key_is_an_error() {
        let backend = PlainBackend;
        let blob = backend.encode(&sample_pairs(5)).unwrap();
        assert!(matches!(
            backend.decode(&blob, "not-a-key"),
            Err(StorageError::KeyNotFound)
        ));
    }

    #[test]
    fn encoding_is_order_independent() {
        let backend = PlainBackend;
        let mut pairs = sample_pairs(20);
        let blob_a = backend.encode(&pairs).unwrap();
        pairs.reverse();
        let blob_b = backend.encode(&pairs).unwrap();
        assert_eq!(blob_a, blob_b);
    }
}
