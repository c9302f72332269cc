use crate::{
    rpc::error::CoordinationError,
    state::{KeyIndexEntry, KvPair, RoundId},
};

/// The Coordination RPC Surface (§4.5). Every node exposes this service;
/// write and PIR-handling operations are leader-only and a follower
/// answers with `CoordinationError::NotLeader`.
///
/// Grounded on `common/src/rpc/control/agent.rs`'s
/// `#[tarpc::service] trait AgentService` pattern: one flat trait, async
/// methods returning `Result<_, SomeErrorEnum>`.
#[tarpc::service]
pub trait CoordinationService {
    /// Create round `round_id` expecting `expected_workers` publishers.
    /// Idempotent-compatible: a second call with a matching
    /// `expected_workers` succeeds.
    async fn start_round(round_id: RoundId, expected_workers: u32)
        -> Result<(), CoordinationError>;

    /// Publish one worker's pair batch for a round. Blocks (from the
    /// caller's point of view — the underlying tarpc call simply doesn't
    /// resolve) until the barrier fires for this round, i.e. until every
    /// expected worker has published *and* the resulting commitment has
    /// been durably replicated.
    async fn publish_values(
        round_id: RoundId,
        worker_id: String,
        pairs: Vec<KvPair>,
    ) -> Result<(), CoordinationError>;

    /// Submit a PIR query for round `round_id` and receive the server's
    /// response. The server learns nothing about which index the query
    /// targets beyond the PIR scheme's own statistical guarantees.
    async fn get_value(round_id: RoundId, pir_query: Vec<u8>)
        -> Result<Vec<u8>, CoordinationError>;

    /// Fetch the round's public PIR base parameters.
    async fn get_base_params(round_id: RoundId) -> Result<Vec<u8>, CoordinationError>;

    /// Fetch the round's key-index mapping (§3, `Key–Index Map`).
    async fn get_key_mapping(round_id: RoundId)
        -> Result<Vec<KeyIndexEntry>, CoordinationError>;
}
