//! The peer-to-peer transport Raft uses to replicate entries, ask for
//! votes, and stream snapshots. Grounded on the teacher's own tarpc usage
//! (`common/src/rpc/control/agent.rs`'s `#[tarpc::service]` pattern) rather
//! than openraft's own `memstore` example, which only ships an in-process
//! loopback network — this system's nodes are separate OS processes, so
//! the three Raft RPCs are carried over the same tarpc/JSON transport as
//! the `CoordinationService`, just on the peer-listen port instead of the
//! client-listen port.

use std::{collections::HashMap, sync::Arc};

use openraft::{
    error::{InstallSnapshotError, NetworkError, RPCError, RaftError, RemoteError, Unreachable},
    network::{RPCOption, RaftNetwork, RaftNetworkFactory},
    raft::{
        AppendEntriesRequest, AppendEntriesResponse, InstallSnapshotRequest,
        InstallSnapshotResponse, VoteRequest, VoteResponse,
    },
    BasicNode, Raft,
};
use tarpc::{client, context, tokio_serde::formats::Json};
use tokio::sync::RwLock;

use crate::types::{NodeId, TypeConfig};

#[tarpc::service]
pub trait RaftTransport {
    async fn append_entries(rpc: Vec<u8>) -> Vec<u8>;
    async fn install_snapshot(rpc: Vec<u8>) -> Vec<u8>;
    async fn vote(rpc: Vec<u8>) -> Vec<u8>;
}

/// Lazily-connected, cached tarpc clients to every peer this node has
/// ever needed to reach. Mirrors the agent's own `RpcClient` lazy-connect
/// pattern in `agent/src/client.rs`.
#[derive(Clone, Default)]
pub struct NetworkFactory {
    clients: Arc<RwLock<HashMap<NodeId, RaftTransportClient>>>,
}

impl NetworkFactory {
    pub fn new() -> Self {
        Self::default()
    }

    async fn client_for(
        &self,
        target: NodeId,
        node: &BasicNode,
    ) -> Result<RaftTransportClient, std::io::Error> {
        if let Some(client) = self.clients.read().await.get(&target) {
            return Ok(client.clone());
        }
        let mut transport = tarpc::serde_transport::tcp::connect(&node.addr, Json::default);
        transport.config_mut().max_frame_length(usize::MAX);
        let transport = transport.await?;
        let client = RaftTransportClient::new(client::Config::default(), transport).spawn();
        self.clients.write().await.insert(target, client.clone());
        Ok(client)
    }
}

impl RaftNetworkFactory<TypeConfig> for NetworkFactory {
    type Network = Network;

    async fn new_client(&mut self, target: NodeId, node: &BasicNode) -> Self::Network {
        Network {
            target,
            node: node.clone(),
            factory: self.clone(),
        }
    }
}

pub struct Network {
    target: NodeId,
    node: BasicNode,
    factory: NetworkFactory,
}

impl Network {
    fn unreachable<E: std::fmt::Display>(&self, e: E) -> RPCError<NodeId, BasicNode, RaftError<NodeId>> {
        RPCError::Unreachable(Unreachable::new(&std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            e.to_string(),
        )))
    }

    /// Unwrap the `Result<Response, RaftError<..>>` the server actually
    /// serialized (see `RaftTransportServer`'s impl below) into an RPC
    /// result, carrying a genuine `RaftError` back as `RPCError::RemoteError`
    /// rather than discarding it.
    fn decode_response<Resp, E>(
        &self,
        bytes: &[u8],
    ) -> Result<Resp, RPCError<NodeId, BasicNode, E>>
    where
        Resp: serde::de::DeserializeOwned,
        E: std::error::Error + serde::de::DeserializeOwned,
    {
        let result: Result<Resp, E> = bincode::deserialize(bytes)
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;
        result.map_err(|e| RPCError::RemoteError(RemoteError::new(self.target, e)))
    }
}

impl RaftNetwork<TypeConfig> for Network {
    async fn append_entries(
        &mut self,
        rpc: AppendEntriesRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<AppendEntriesResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let client = self
            .factory
            .client_for(self.target, &self.node)
            .await
            .map_err(|e| self.unreachable(e))?;
        let request = bincode::serialize(&rpc).map_err(|e| self.unreachable(e))?;
        let response = client
            .append_entries(context::current(), request)
            .await
            .map_err(|e| self.unreachable(e))?;
        self.decode_response(&response)
    }

    async fn install_snapshot(
        &mut self,
        rpc: InstallSnapshotRequest<TypeConfig>,
        _option: RPCOption,
    ) -> Result<
        InstallSnapshotResponse<NodeId>,
        RPCError<NodeId, BasicNode, RaftError<NodeId, InstallSnapshotError>>,
    > {
        let client = self
            .factory
            .client_for(self.target, &self.node)
            .await
            .map_err(|e| RPCError::Unreachable(Unreachable::new(&e)))?;
        let request = bincode::serialize(&rpc)
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;
        let response = client
            .install_snapshot(context::current(), request)
            .await
            .map_err(|e| RPCError::Network(NetworkError::new(&e)))?;
        self.decode_response(&response)
    }

    async fn vote(
        &mut self,
        rpc: VoteRequest<NodeId>,
        _option: RPCOption,
    ) -> Result<VoteResponse<NodeId>, RPCError<NodeId, BasicNode, RaftError<NodeId>>> {
        let client = self
            .factory
            .client_for(self.target, &self.node)
            .await
            .map_err(|e| self.unreachable(e))?;
        let request = bincode::serialize(&rpc).map_err(|e| self.unreachable(e))?;
        let response = client
            .vote(context::current(), request)
            .await
            .map_err(|e| self.unreachable(e))?;
        self.decode_response(&response)
    }
}

/// Server-side `RaftTransport`: the peer-listen half of the coordinator's
/// tarpc server (§6 `--peer-listen-addr`) forwards incoming Raft RPCs
/// straight into the local `Raft` instance, exactly the way
/// `CoordinationService` forwards client RPCs into the round manager.
#[derive(Clone)]
pub struct RaftTransportServer {
    raft: Raft<TypeConfig>,
}

impl RaftTransportServer {
    pub fn new(raft: Raft<TypeConfig>) -> Self {
        Self { raft }
    }
}

impl RaftTransport for RaftTransportServer {
    async fn append_entries(self, _ctx: context::Context, rpc: Vec<u8>) -> Vec<u8> {
        let request = match bincode::deserialize(&rpc) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("malformed append_entries payload: {e}");
                return Vec::new();
            }
        };
        let response = self.raft.append_entries(request).await;
        bincode::serialize(&response).unwrap_or_default()
    }

    async fn install_snapshot(self, _ctx: context::Context, rpc: Vec<u8>) -> Vec<u8> {
        let request = match bincode::deserialize(&rpc) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("malformed install_snapshot payload: {e}");
                return Vec::new();
            }
        };
        let response = self.raft.install_snapshot(request).await;
        bincode::serialize(&response).unwrap_or_default()
    }

    async fn vote(self, _ctx: context::Context, rpc: Vec<u8>) -> Vec<u8> {
        let request = match bincode::deserialize(&rpc) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!("malformed vote payload: {e}");
                return Vec::new();
            }
        };
        let response = self.raft.vote(request).await;
        bincode::serialize(&response).unwrap_or_default()
    }
}
