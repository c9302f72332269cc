//! The Storage Backend abstraction (§4.1): an immutable encoding of a
//! round's key/value pairs into a single opaque blob, queryable by a PIR
//! server without revealing which key a client asked for.
//!
//! Two variants share one `StorageBackend` trait: `Plain`, a bincode-encoded
//! sorted map used for rounds where PIR obliviousness isn't required, and
//! `Oblivious`, a from-scratch RB-OKVS (banded oblivious key-value store)
//! encoder/decoder. Neither has a teacher counterpart — this abstraction and
//! its preconditions are specified directly, so the implementation is
//! original, built on the workspace's existing `sha2`/`rand` dependencies.

mod error;
mod oblivious;
mod plain;

pub use error::StorageError;
pub use oblivious::ObliviousBackend;
pub use plain::PlainBackend;

/// Minimum number of pairs a round must have before it may be encoded with
/// the oblivious backend (§4.1 precondition, §7 `BackendPreconditionFailed`).
pub const MIN_OBLIVIOUS_PAIRS: usize = 100;

/// Fixed value width required by the oblivious backend. RB-OKVS solves one
/// linear system per output bit-lane; this implementation treats each value
/// as a single 8-byte lane (§4.1: "values in the oblivious backend MUST be
/// exactly 8 bytes").
pub const OBLIVIOUS_VALUE_WIDTH: usize = 8;

/// A storage backend encodes a round's key/value pairs into one blob and
/// later decodes a single key back out of that blob. Implementations MUST be
/// deterministic: encoding the same pairs twice (in any order) produces
/// blobs that decode identically, since the blob is the thing actually
/// queried by the PIR server.
pub trait StorageBackend {
    /// Encode `pairs` into one opaque blob suitable for PIR (or plain)
    /// serving. `pairs` need not be sorted; implementations are responsible
    /// for any canonicalization they require.
    fn encode(&self, pairs: &[(String, Vec<u8>)]) -> Result<Vec<u8>, StorageError>;

    /// Decode the value bound to `key` out of a previously-encoded `blob`.
    /// For the oblivious backend, querying a key that was never encoded is
    /// well-defined (it returns an unpredictable but deterministic value, by
    /// construction of the scheme) and is the caller's responsibility to
    /// guard against via the Key–Index Map; for the plain backend it is an
    /// explicit `StorageError::KeyNotFound`.
    fn decode(&self, blob: &[u8], key: &str) -> Result<Vec<u8>, StorageError>;
}

#[cfg(test)]
pub(crate) fn sample_pairs(n: usize) -> Vec<(String, Vec<u8>)> {
    (0..n)
        .map(|i| (format!("key-{i:06}"), (i as u64).to_le_bytes().to_vec()))
        .collect()
}
