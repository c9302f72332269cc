use std::{collections::BTreeMap, io, sync::Arc};

use clap::Parser;
use futures_util::{future, StreamExt};
use tarpc::{
    server::{BaseChannel, Channel},
    tokio_serde::formats::Json,
};
use tokio::select;
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{prelude::*, reload, EnvFilter};
use veil_common::rpc::CoordinationService as _;
use veil_consensus::{ConsensusNode, RaftTransport as _, RaftTransportServer};
use veil_round::RoundManager;

mod cli;
mod server;

use cli::Cli;
use server::CoordinationRpcServer;

type ReloadHandler = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

fn make_env_filter(level: LevelFilter) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var("VEIL_LOG")
        .with_default_directive(level.into())
        .from_env_lossy()
        .add_directive("tarpc::client=ERROR".parse().unwrap())
        .add_directive("tarpc::server=ERROR".parse().unwrap())
}

#[tokio::main]
async fn main() {
    let filter_level = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let (env_filter, _reload_handler): (_, ReloadHandler) =
        reload::Layer::new(make_env_filter(filter_level));
    let (stdout, _guard) = tracing_appender::non_blocking(io::stdout());
    let output = tracing_subscriber::fmt::layer().with_writer(stdout);
    let output = if cfg!(debug_assertions) {
        output.with_file(true).with_line_number(true)
    } else {
        output
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(output)
        .try_init()
        .unwrap();

    let cli = Cli::parse();

    trace!("opening store at {}", cli.data_dir.display());
    let db = sled::open(&cli.data_dir).expect("open sled database");

    info!(node_id = cli.node_id, "starting consensus node");
    let consensus = ConsensusNode::start(
        cli.node_id,
        cli.peer_listen_addr.to_string(),
        &db,
        BTreeMap::new(),
        cli.bootstrap,
    )
    .await
    .expect("start consensus node");
    let consensus = Arc::new(consensus);

    let round_manager = Arc::new(RoundManager::new(
        consensus.clone(),
        cli.storage_backend,
        cli.pir_plaintext_bits,
    ));

    let raft_server = RaftTransportServer::new(consensus.raft_handle());
    let coordination_server = CoordinationRpcServer { round_manager };

    info!("peer transport listening on {}", cli.peer_listen_addr);
    info!("client RPC listening on {}", cli.client_listen_addr);

    select! {
        Err(err) = serve_raft_transport(raft_server, cli.peer_listen_addr) => {
            error!("peer transport server failed: {err:?}");
        }
        Err(err) = serve_coordination(coordination_server, cli.client_listen_addr) => {
            error!("coordination RPC server failed: {err:?}");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received ctrl-c, shutting down");
        }
    }
}

/// Accept every inbound peer connection and hand it a fresh
/// `RaftTransport` channel. Mirrors `agent/src/rpc/control.rs`'s
/// per-connection `BaseChannel::with_defaults(...).execute(...).for_each`
/// spawn loop, but over a real multi-connection TCP listener (this
/// workspace's plain-TCP tarpc transport, not the teacher's single
/// long-lived websocket channel).
async fn serve_raft_transport(
    server: RaftTransportServer,
    addr: std::net::SocketAddr,
) -> io::Result<()> {
    let mut listener = tarpc::serde_transport::tcp::listen(addr, Json::default).await?;
    listener.config_mut().max_frame_length(usize::MAX);
    listener
        .filter_map(|r| future::ready(r.ok()))
        .map(BaseChannel::with_defaults)
        .for_each(|channel| {
            let server = server.clone();
            async move {
                tokio::spawn(channel.execute(server.serve()).for_each(|r| async move {
                    tokio::spawn(r);
                }));
            }
        })
        .await;
    Ok(())
}

/// Same shape as `serve_raft_transport`, for the worker-facing
/// `CoordinationService` on `--client-listen-addr`.
async fn serve_coordination(
    server: CoordinationRpcServer,
    addr: std::net::SocketAddr,
) -> io::Result<()> {
    let mut listener = tarpc::serde_transport::tcp::listen(addr, Json::default).await?;
    listener.config_mut().max_frame_length(usize::MAX);
    listener
        .filter_map(|r| future::ready(r.ok()))
        .map(BaseChannel::with_defaults)
        .for_each(|channel| {
            let server = server.clone();
            async move {
                tokio::spawn(channel.execute(server.serve()).for_each(|r| async move {
                    tokio::spawn(r);
                }));
            }
        })
        .await;
    Ok(())
}
