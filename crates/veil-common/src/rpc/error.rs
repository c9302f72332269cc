use serde::{Deserialize, Serialize};
use strum_macros::AsRefStr;
use thiserror::Error;

use crate::state::RoundId;

/// The last known leader, returned alongside `NotLeader` so a caller can
/// redirect without a second round-trip (§9 "Supplemented detail").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderHint {
    pub node_id: u64,
    pub client_listen_addr: Option<String>,
}

/// Precondition / transient / fatal / cryptographic-misuse errors
/// surfaced by the five coordination RPCs, per the taxonomy in spec §7.
#[derive(Debug, Clone, Error, Serialize, Deserialize, AsRefStr)]
pub enum CoordinationError {
    // -- precondition errors --
    #[error("this node is not the leader")]
    NotLeader(Option<LeaderHint>),
    #[error("round {0} does not exist")]
    UnknownRound(RoundId),
    #[error("round id must be strictly positive")]
    InvalidRoundId,
    #[error("expected_workers must be at least 1")]
    InvalidExpectedWorkers,
    #[error("round {0} already started with a different `expected_workers`")]
    RoundParameterConflict(RoundId),
    #[error("worker `{worker}` already published for round {round}")]
    WorkerAlreadyPublished { round: RoundId, worker: String },
    #[error("round {0} completed with an empty aggregated pair set")]
    EmptyRound(RoundId),
    #[error("storage backend precondition failed: {0}")]
    BackendPreconditionFailed(String),
    #[error("key not present in this round's key-index map")]
    KeyNotInMap,

    // -- transient errors (retryable) --
    #[error("PIR query generation overflowed, retry with fresh randomness")]
    ArithmeticOverflow,
    #[error("consensus propose timed out before commit")]
    ProposeTimeout,

    // -- fatal errors --
    #[error("failed to build PIR shard: {0}")]
    PirShardBuildFailed(String),
    #[error("failed to encode storage blob: {0}")]
    StorageEncodeFailed(String),
    #[error("consensus apply failed: {0}")]
    ConsensusApplyFailed(String),
    #[error("snapshot restore failed: {0}")]
    SnapshotRestoreFailed(String),

    // -- cryptographic misuse (never retry) --
    #[error("query params were already consumed by a prior decode_response call")]
    QueryParamsAlreadyUsed,
    #[error("PIR response failed to decode: {0}")]
    PirDecodeError(String),
}

impl CoordinationError {
    /// Whether the Client Library's retry policy (§4.6, §7) should retry
    /// this error with fresh randomness.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoordinationError::ArithmeticOverflow
                | CoordinationError::ProposeTimeout
                | CoordinationError::NotLeader(_)
        )
    }
}
