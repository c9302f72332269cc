//! The client-facing half of the coordinator's tarpc surface:
//! `CoordinationService` (§4.5), delegating every RPC straight into the
//! `RoundManager`. Grounded on `agent/src/rpc/control.rs`'s
//! `impl AgentService for AgentRpcServer { async fn foo(self, ctx, ...) }`
//! pattern — the server struct is cheap to clone (just an `Arc`) and a
//! fresh clone is handed to each inbound tarpc channel.

use std::sync::Arc;

use tarpc::context::Context;
use veil_common::{
    rpc::{CoordinationError, CoordinationService, LeaderHint},
    state::{KeyIndexEntry, KvPair, RoundId},
};
use veil_round::RoundManager;

#[derive(Clone)]
pub struct CoordinationRpcServer {
    pub round_manager: Arc<RoundManager>,
}

/// Fill in a `LeaderHint` on `NotLeader` responses. No directory maps node
/// ids to other nodes' `client_listen_addr`s in this configuration surface
/// (there is no `--peers` flag), so the hint always carries `None` for the
/// address half; a caller still learns which node id to retry against.
fn not_leader(round_manager: &RoundManager) -> CoordinationError {
    CoordinationError::NotLeader(round_manager.current_leader_hint().map(|node_id| {
        LeaderHint {
            node_id,
            client_listen_addr: None,
        }
    }))
}

impl CoordinationService for CoordinationRpcServer {
    async fn start_round(
        self,
        _: Context,
        round_id: RoundId,
        expected_workers: u32,
    ) -> Result<(), CoordinationError> {
        self.round_manager
            .start_round(round_id, expected_workers)
            .await
            .map_err(|e| enrich(e, &self.round_manager))
    }

    async fn publish_values(
        self,
        _: Context,
        round_id: RoundId,
        worker_id: String,
        pairs: Vec<KvPair>,
    ) -> Result<(), CoordinationError> {
        self.round_manager
            .publish_values(round_id, worker_id.into(), pairs)
            .await
            .map_err(|e| enrich(e, &self.round_manager))
    }

    async fn get_value(
        self,
        _: Context,
        round_id: RoundId,
        pir_query: Vec<u8>,
    ) -> Result<Vec<u8>, CoordinationError> {
        self.round_manager
            .get_value(round_id, pir_query)
            .await
            .map_err(|e| enrich(e, &self.round_manager))
    }

    async fn get_base_params(self, _: Context, round_id: RoundId) -> Result<Vec<u8>, CoordinationError> {
        self.round_manager
            .get_base_params(round_id)
            .await
            .map_err(|e| enrich(e, &self.round_manager))
    }

    async fn get_key_mapping(
        self,
        _: Context,
        round_id: RoundId,
    ) -> Result<Vec<KeyIndexEntry>, CoordinationError> {
        self.round_manager
            .get_key_mapping(round_id)
            .await
            .map_err(|e| enrich(e, &self.round_manager))
    }
}

/// Convert a `RoundError` into its wire `CoordinationError`, replacing a
/// bare `NotLeader` with one carrying the freshest leader hint this node
/// knows about.
fn enrich(e: veil_round::RoundError, round_manager: &RoundManager) -> CoordinationError {
    match e.into() {
        CoordinationError::NotLeader(_) => not_leader(round_manager),
        other => other,
    }
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use futures_util::StreamExt;
    use openraft::BasicNode;
    use tarpc::{client, context, server::Channel};
    use veil_common::{rpc::CoordinationServiceClient, state::StorageBackendKind};
    use veil_consensus::ConsensusNode;

    use super::*;

    /// Build a single-node, self-leading coordinator backed by a
    /// `tempfile` sled database, and a tarpc client wired to it over an
    /// in-process channel pair — no real socket needed for this test.
    /// Grounded on `veil-consensus`'s own `single_node_bootstrap_becomes_leader`
    /// test for the bootstrap shape.
    async fn harness() -> (CoordinationServiceClient, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut peers = BTreeMap::new();
        peers.insert(1, BasicNode::new("127.0.0.1:9100".to_string()));

        let consensus = ConsensusNode::start(1, "127.0.0.1:9100".to_string(), &db, peers, true)
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(consensus.is_leader().await);

        let round_manager = Arc::new(RoundManager::new(Arc::new(consensus), StorageBackendKind::Plain, 9));
        let server = CoordinationRpcServer { round_manager };

        let (client_transport, server_transport) = tarpc::transport::channel::unbounded();
        tokio::spawn(
            tarpc::server::BaseChannel::with_defaults(server_transport)
                .execute(server.serve())
                .for_each(|r| async move {
                    tokio::spawn(r);
                }),
        );
        let client = CoordinationServiceClient::new(client::Config::default(), client_transport).spawn();

        (client, dir)
    }

    #[tokio::test]
    async fn start_round_then_publish_completes_the_barrier() {
        let (client, _dir) = harness().await;

        client
            .start_round(context::current(), RoundId::new(1), 1)
            .await
            .unwrap()
            .unwrap();

        client
            .publish_values(
                context::current(),
                RoundId::new(1),
                "worker-a".to_string(),
                vec![KvPair {
                    key: "alice".to_string(),
                    value: b"hello".to_vec(),
                }],
            )
            .await
            .unwrap()
            .unwrap();

        let mapping = client
            .get_key_mapping(context::current(), RoundId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[0].key, "alice");
    }

    #[tokio::test]
    async fn publish_before_start_round_is_unknown_round() {
        let (client, _dir) = harness().await;

        let err = client
            .publish_values(
                context::current(),
                RoundId::new(42),
                "worker-a".to_string(),
                vec![],
            )
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CoordinationError::UnknownRound(_)));
    }

    #[tokio::test]
    async fn second_start_round_with_same_expected_workers_is_idempotent() {
        let (client, _dir) = harness().await;

        client
            .start_round(context::current(), RoundId::new(1), 2)
            .await
            .unwrap()
            .unwrap();
        client
            .start_round(context::current(), RoundId::new(1), 2)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn second_start_round_with_different_expected_workers_conflicts() {
        let (client, _dir) = harness().await;

        client
            .start_round(context::current(), RoundId::new(1), 2)
            .await
            .unwrap()
            .unwrap();
        let err = client
            .start_round(context::current(), RoundId::new(1), 3)
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, CoordinationError::RoundParameterConflict(_)));
    }
}
