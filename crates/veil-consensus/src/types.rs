use std::io::Cursor;

use openraft::BasicNode;
use serde::{Deserialize, Serialize};

/// The write operations this cluster replicates (§4.2: `propose(command)`,
/// `command ∈ {SET(key, bytes), DELETE(key)}`). `veil-round` uses `Set` to
/// durably publish a round's aggregated commitment blob under
/// `RoundId::commitment_key()` (§4.2, §4.3 step 9).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AppRequest {
    Set { key: String, value: Vec<u8> },
    Delete { key: String },
}

/// Applying an `AppRequest` echoes back the key it wrote or deleted;
/// callers that need the previous value use `ConsensusNode::get` before
/// proposing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppResponse {
    pub key: String,
}

pub type NodeId = u64;

openraft::declare_raft_types!(
    /// The concrete Raft type parameters for this cluster: `u64` node ids,
    /// `BasicNode` (a bare listen address) for cluster membership, and an
    /// in-memory `Cursor<Vec<u8>>` for snapshot transfer.
    pub TypeConfig:
        D = AppRequest,
        R = AppResponse,
        NodeId = NodeId,
        Node = BasicNode,
        Entry = openraft::Entry<TypeConfig>,
        SnapshotData = Cursor<Vec<u8>>,
);
