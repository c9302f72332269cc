use thiserror::Error;
use veil_common::{rpc::CoordinationError, state::RoundId};

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("this node is not the leader")]
    NotLeader,
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
    #[error("failed to encode storage blob: {0}")]
    StorageEncodeFailed(String),
    #[error("failed to build PIR shard: {0}")]
    PirShardBuildFailed(String),
    #[error("consensus propose timed out before commit")]
    ProposeTimeout,
    #[error("consensus apply failed: {0}")]
    ConsensusApplyFailed(String),
}

impl From<RoundError> for CoordinationError {
    fn from(e: RoundError) -> Self {
        match e {
            RoundError::NotLeader => CoordinationError::NotLeader(None),
            RoundError::UnknownRound(id) => CoordinationError::UnknownRound(id),
            RoundError::InvalidRoundId => CoordinationError::InvalidRoundId,
            RoundError::InvalidExpectedWorkers => CoordinationError::InvalidExpectedWorkers,
            RoundError::RoundParameterConflict(id) => CoordinationError::RoundParameterConflict(id),
            RoundError::WorkerAlreadyPublished { round, worker } => {
                CoordinationError::WorkerAlreadyPublished { round, worker }
            }
            RoundError::EmptyRound(id) => CoordinationError::EmptyRound(id),
            RoundError::BackendPreconditionFailed(msg) => {
                CoordinationError::BackendPreconditionFailed(msg)
            }
            RoundError::StorageEncodeFailed(msg) => CoordinationError::StorageEncodeFailed(msg),
            RoundError::PirShardBuildFailed(msg) => CoordinationError::PirShardBuildFailed(msg),
            RoundError::ProposeTimeout => CoordinationError::ProposeTimeout,
            RoundError::ConsensusApplyFailed(msg) => CoordinationError::ConsensusApplyFailed(msg),
        }
    }
}
