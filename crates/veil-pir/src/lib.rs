//! The PIR Engine (§4.4): wraps the `frodo-pir` crate (the FrodoPIR
//! reference implementation named directly in the spec) behind a pair of
//! server/client types scoped to this workspace's wire format — bincode
//! over the opaque `Vec<u8>` blobs the `CoordinationService` RPCs pass
//! around, rather than `frodo-pir`'s native types leaking into
//! `veil-common`.
//!
//! No teacher crate does anything PIR-shaped, so there's nothing to
//! generalize from; the shape here (a `PirShard` built once per completed
//! round, a `PirClient` built once per round a caller wants to query) is
//! dictated directly by spec.md §4.4's server/client operation list.

mod client;
mod error;
mod server;

pub use client::PirClient;
pub use error::PirError;
pub use server::PirShard;

/// Default plaintext modulus width in bits (§6 "PIR parameter defaults").
/// FrodoPIR encodes each database element as a vector of small-modulus
/// entries; `9` or `10` are the documented choices (§4.4).
pub const DEFAULT_PLAINTEXT_BITS: u8 = 9;

/// The LWE dimension scaling rule from §4.4/§9: larger rounds get a larger
/// lattice dimension to keep the noise/security tradeoff stable as the
/// number of encoded elements grows.
pub fn lwe_dim_for(element_count: usize) -> usize {
    if element_count < 1024 {
        512
    } else if element_count < 100_000 {
        1024
    } else {
        1572
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lwe_dim_scales_with_round_size() {
        assert_eq!(lwe_dim_for(10), 512);
        assert_eq!(lwe_dim_for(1023), 512);
        assert_eq!(lwe_dim_for(1024), 1024);
        assert_eq!(lwe_dim_for(99_999), 1024);
        assert_eq!(lwe_dim_for(100_000), 1572);
        assert_eq!(lwe_dim_for(5_000_000), 1572);
    }
}
