mod cli;

use clap::Parser;
use cli::{Cli, Command};
use tracing::{error, info};
use veil_common::state::{KvPair, RoundId};
use veil_client::VeilClient;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("VEIL_LOG"))
        .init();

    let cli = Cli::parse();

    let client = match VeilClient::connect(cli.coordinator).await {
        Ok(client) => client,
        Err(e) => {
            error!("failed to connect to {}: {e}", cli.coordinator);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::StartRound {
            round_id,
            expected_workers,
        } => client
            .start_round(RoundId::new(round_id), expected_workers)
            .await
            .map(|()| info!("round {round_id} started")),
        Command::Publish {
            round_id,
            worker_id,
            pairs,
        } => {
            let pairs = pairs
                .into_iter()
                .map(|(key, value)| KvPair {
                    key,
                    value: value.into_bytes(),
                })
                .collect();
            client
                .publish_values(RoundId::new(round_id), worker_id, pairs)
                .await
                .map(|()| info!("round {round_id} published; barrier released"))
        }
        Command::Get { round_id, key } => client
            .get_value(RoundId::new(round_id), &key)
            .await
            .map(|value| info!("{key} = {value:?}")),
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }

    client.close();
}
