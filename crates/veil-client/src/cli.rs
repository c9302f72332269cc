use std::net::SocketAddr;

use clap::{Parser, Subcommand};

/// A thin command-line wrapper over the Client Library, letting an
/// operator drive one worker action at a time without writing Rust.
/// Grounded on `agent/src/cli.rs`'s `clap::Parser` derive with `env`
/// fallbacks.
#[derive(Debug, Parser)]
#[command(name = "veil-client", version)]
pub struct Cli {
    /// The coordinator node's `--client-listen-addr` to connect to.
    #[clap(long, env = "VEIL_COORDINATOR_ADDR")]
    pub coordinator: SocketAddr,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// §4.3/§4.6 `StartRound`.
    StartRound {
        #[clap(long)]
        round_id: u64,
        #[clap(long)]
        expected_workers: u32,
    },
    /// §4.3/§4.6 `PublishValues`. Pairs are given as repeated `key=value`
    /// strings; the value is taken as the pair's raw UTF-8 bytes.
    Publish {
        #[clap(long)]
        round_id: u64,
        #[clap(long)]
        worker_id: String,
        #[clap(long = "pair", value_parser = parse_kv_pair, num_args = 1..)]
        pairs: Vec<(String, String)>,
    },
    /// §4.6 `get_value`.
    Get {
        #[clap(long)]
        round_id: u64,
        #[clap(long)]
        key: String,
    },
}

fn parse_kv_pair(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected `key=value`, got `{s}`"))?;
    Ok((key.to_owned(), value.to_owned()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_key_equals_value() {
        assert_eq!(
            parse_kv_pair("alice=42").unwrap(),
            ("alice".to_owned(), "42".to_owned())
        );
    }

    #[test]
    fn rejects_missing_equals() {
        assert!(parse_kv_pair("no-equals-sign").is_err());
    }

    #[test]
    fn splits_on_first_equals_only() {
        assert_eq!(
            parse_kv_pair("a=b=c").unwrap(),
            ("a".to_owned(), "b=c".to_owned())
        );
    }
}
