use std::{net::SocketAddr, path::PathBuf};

use clap::Parser;
use veil_common::state::StorageBackendKind;

/// The coordinator node's configuration surface (§6 "Configuration
/// surface"). Grounded on `agent/src/cli.rs`'s `clap::Parser` derive with
/// `env` fallbacks on every flag that has an obvious cluster-wide env var
/// equivalent.
#[derive(Debug, Parser)]
#[command(name = "veil-coordinator", version)]
pub struct Cli {
    /// Unique identifier within the cluster.
    #[clap(long, env = "VEIL_NODE_ID")]
    pub node_id: u64,

    /// Address used for intra-cluster consensus traffic.
    #[clap(long, env = "VEIL_PEER_LISTEN_ADDR", default_value = "127.0.0.1:7000")]
    pub peer_listen_addr: SocketAddr,

    /// Address used for worker RPCs (`CoordinationService`).
    #[clap(
        long,
        env = "VEIL_CLIENT_LISTEN_ADDR",
        default_value = "127.0.0.1:7001"
    )]
    pub client_listen_addr: SocketAddr,

    /// Filesystem path for the consensus log, stable store, and snapshots.
    #[clap(long, env = "VEIL_DATA_DIR", default_value = "./veil-data")]
    pub data_dir: PathBuf,

    /// Form a brand-new single-node cluster instead of joining one.
    /// Set on exactly one initial node.
    #[clap(long, env = "VEIL_BOOTSTRAP", default_value_t = false)]
    pub bootstrap: bool,

    /// Address of an existing cluster member to contact when not
    /// bootstrapping.
    #[clap(long, env = "VEIL_JOIN_ADDR")]
    pub join_addr: Option<SocketAddr>,

    /// `oblivious` or `plain`. Fixed for the process lifetime and MUST
    /// match across every cluster member.
    #[clap(long, env = "VEIL_STORAGE_BACKEND", default_value = "oblivious")]
    pub storage_backend: StorageBackendKind,

    /// Default PIR plaintext modulus width in bits (§4.4: `{9, 10}`).
    /// `lwe_dim` is not independently configurable — it is picked per
    /// round from the round's own size (§4.4, §9).
    #[clap(long, env = "VEIL_PIR_PLAINTEXT_BITS", default_value_t = 9)]
    pub pir_plaintext_bits: u8,
}
