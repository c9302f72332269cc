//! The Replicated Log & State Machine (§4.2): a small `openraft` cluster,
//! one voter per coordinator node, backed by sled for both the log and the
//! applied key/value state. `veil-round` proposes round commitments
//! through `ConsensusNode::propose` and reads them back (on any node, not
//! just the leader) through `ConsensusNode::get`.
//!
//! No teacher crate runs consensus — `openraft` isn't in the example pack
//! at all — so this module is modeled directly on openraft's own
//! `memstore` reference implementation (same `RaftLogStorage` /
//! `RaftStateMachine` split, same snapshot shape), with sled swapped in for
//! persistence and a tarpc-based `RaftNetwork` in place of the in-process
//! loopback network the reference example uses for tests.

mod log_store;
mod network;
mod state_machine;
mod types;

pub use network::{NetworkFactory, RaftTransport, RaftTransportClient, RaftTransportServer};
pub use types::{AppRequest, AppResponse, NodeId, TypeConfig};

use std::{collections::BTreeMap, sync::Arc};

use openraft::{BasicNode, Config, Raft};
use thiserror::Error;
use tokio::sync::watch;

use log_store::LogStore;
use state_machine::StateMachineStore;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("this node is not the leader")]
    NotLeader,
    #[error(transparent)]
    Raft(#[from] openraft::error::RaftError<NodeId>),
    #[error("consensus initialization failed: {0}")]
    InitFailed(String),
    #[error("storage error: {0}")]
    Storage(#[from] openraft::StorageError<NodeId>),
}

/// Handle to this node's Raft instance, its sled-backed stores, and a
/// leader-change watch channel the coordinator's server loop subscribes to
/// (so it can answer `NotLeader` with a fresh `LeaderHint` without polling).
#[derive(Clone)]
pub struct ConsensusNode {
    raft: Raft<TypeConfig>,
    state_machine: Arc<StateMachineStore>,
    leader_watch: watch::Receiver<Option<NodeId>>,
    node_id: NodeId,
}

impl ConsensusNode {
    /// Start this node's Raft instance against its sled database. `peers`
    /// is this node's static view of every node id in the cluster,
    /// including itself; `bootstrap` initializes a brand-new single-node
    /// cluster, while a non-bootstrap node waits to be added via
    /// `propose_membership` from an existing leader (§6 `--bootstrap`,
    /// `--join`).
    pub async fn start(
        node_id: NodeId,
        listen_addr: String,
        db: &sled::Db,
        peers: BTreeMap<NodeId, BasicNode>,
        bootstrap: bool,
    ) -> Result<Self, ConsensusError> {
        let config = Arc::new(
            Config {
                heartbeat_interval: 250,
                election_timeout_min: 800,
                election_timeout_max: 1500,
                ..Default::default()
            }
            .validate()
            .map_err(|e| ConsensusError::InitFailed(e.to_string()))?,
        );

        let log_store =
            LogStore::new(db).map_err(|e| ConsensusError::InitFailed(e.to_string()))?;

        // Two independent handles onto the same sled tree: one is moved
        // into `Raft` to receive applied writes, the other stays here so
        // reads (§4.2: reads bypass consensus) never have to go through
        // the `Raft` handle at all.
        let sm_for_raft =
            StateMachineStore::new(db).map_err(|e| ConsensusError::InitFailed(e.to_string()))?;
        let state_machine = Arc::new(
            StateMachineStore::new(db).map_err(|e| ConsensusError::InitFailed(e.to_string()))?,
        );
        let network = NetworkFactory::new();

        let raft = Raft::new(node_id, config, network, log_store, sm_for_raft)
            .await
            .map_err(|e| ConsensusError::InitFailed(e.to_string()))?;

        if bootstrap {
            let members = if peers.is_empty() {
                let mut members = BTreeMap::new();
                members.insert(node_id, BasicNode::new(listen_addr));
                members
            } else {
                peers
            };
            if let Err(e) = raft.initialize(members).await {
                tracing::warn!("raft initialize() failed, cluster may already be initialized: {e}");
            }
        }

        // Forward `RaftMetrics::current_leader` into a `watch` channel of
        // our own so `current_leader_hint`/`on_leader_change` don't have to
        // go through `Raft::metrics()` on every call. The sender lives only
        // in this task; it's kept alive by the loop running forever.
        let (leader_tx, leader_rx) = watch::channel(None);
        let mut metrics_rx = raft.metrics();
        tokio::spawn(async move {
            loop {
                let current = metrics_rx.borrow_and_update().current_leader;
                if leader_tx.send(current).is_err() {
                    break;
                }
                if metrics_rx.changed().await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            raft,
            state_machine,
            leader_watch: leader_rx,
            node_id,
        })
    }

    /// Propose a durable write (§4.2: `propose(command)`, `command ∈
    /// {SET(key, bytes), DELETE(key)}`). Returns once the entry is
    /// committed to a majority; only the leader can make progress, so a
    /// follower returns `ConsensusError::NotLeader` immediately rather than
    /// blocking.
    pub async fn propose(&self, command: AppRequest) -> Result<(), ConsensusError> {
        self.raft
            .client_write(command)
            .await
            .map_err(|e| match e {
                openraft::error::RaftError::APIError(
                    openraft::error::ClientWriteError::ForwardToLeader(_),
                ) => ConsensusError::NotLeader,
                other => ConsensusError::InitFailed(other.to_string()),
            })?;
        Ok(())
    }

    /// Read a committed key directly out of the local applied state. Any
    /// node can serve reads (§4.2: reads bypass consensus), which is what
    /// lets followers answer `get_value`/`get_key_mapping` without
    /// forwarding to the leader.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.state_machine.get(key)
    }

    pub async fn is_leader(&self) -> bool {
        self.raft.current_leader().await == Some(self.node_id)
    }

    /// The node id this instance currently believes is leading, if any.
    /// Subscribers that need a `LeaderHint` for `NotLeader` responses read
    /// this rather than calling into Raft on every RPC.
    pub fn current_leader_hint(&self) -> Option<NodeId> {
        *self.leader_watch.borrow()
    }

    /// §4.2 `on_leader_change(callback)`: invoke `callback` with the
    /// current leader immediately, then again every time it changes, for
    /// as long as this `ConsensusNode` (and the task that feeds its
    /// leader-watch channel) is alive. Runs on a detached task so the
    /// caller doesn't block waiting for the next change.
    pub fn on_leader_change<F>(&self, mut callback: F)
    where
        F: FnMut(Option<NodeId>) + Send + 'static,
    {
        let mut rx = self.leader_watch.clone();
        tokio::spawn(async move {
            loop {
                callback(*rx.borrow_and_update());
                if rx.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    /// A cloned handle to the underlying `Raft` instance, used to build the
    /// peer-listen `RaftTransportServer` that forwards incoming peer RPCs
    /// into this node's consensus driver (`openraft::Raft` is itself a
    /// cheap `Arc`-backed handle, so cloning it does not duplicate state).
    pub fn raft_handle(&self) -> Raft<TypeConfig> {
        self.raft.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn single_node_bootstrap_becomes_leader() {
        let dir = tempfile::tempdir().unwrap();
        let db = sled::open(dir.path()).unwrap();
        let mut peers = BTreeMap::new();
        peers.insert(1, BasicNode::new("127.0.0.1:9000".to_string()));

        let node = ConsensusNode::start(1, "127.0.0.1:9000".to_string(), &db, peers, true)
            .await
            .unwrap();

        // Raft elections are async; give the single voter a moment to
        // convert its own initialize() into a leadership term.
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        assert!(node.is_leader().await);
    }
}
