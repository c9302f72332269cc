use thiserror::Error;
use veil_common::rpc::CoordinationError;
use veil_pir::PirError;

/// Errors the Client Library can surface. Grounded on
/// `common/src/rpc/error.rs`'s small per-concern `thiserror` enum style;
/// wraps rather than flattens `CoordinationError`/`PirError` since both
/// already carry the full taxonomy from spec §7.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to coordinator: {0}")]
    Connect(#[from] std::io::Error),
    #[error("RPC call failed: {0}")]
    Rpc(String),
    #[error(transparent)]
    Coordination(#[from] CoordinationError),
    #[error(transparent)]
    Pir(#[from] PirError),
}

impl ClientError {
    /// Whether the Client Library's own retry loop (§4.6, §7) should
    /// retry `get_value` with fresh randomness.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Pir(PirError::ArithmeticOverflow) => true,
            ClientError::Coordination(e) => e.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn overflow_is_retryable() {
        let e = ClientError::Pir(PirError::ArithmeticOverflow);
        assert!(e.is_retryable());
    }

    #[test]
    fn decode_failure_is_not_retryable() {
        let e = ClientError::Pir(PirError::DecodeFailed("bad response".into()));
        assert!(!e.is_retryable());
    }

    #[test]
    fn not_leader_is_retryable_via_coordination_error() {
        let e = ClientError::Coordination(CoordinationError::NotLeader(None));
        assert!(e.is_retryable());
    }
}
