//! Command-line client for a paxoskv cluster.
//!
//! Wraps the client library in put/get/delete/status subcommands:
//!
//! ```text
//! paxoskv --proposers p1:6001,p2:6002 --learners l1:7001,l2:7002 put greeting '"hello"'
//! paxoskv --proposers p1:6001 --learners l1:7001 get greeting --consistency strong
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use paxoskv_client::PaxosClient;
use paxoskv_core::config::parse_hosts;
use paxoskv_core::messages::{ConsistencyLevel, ReadQuery};

#[derive(Parser)]
#[command(name = "paxoskv", about = "Client for a paxoskv cluster", version)]
struct Cli {
    /// Proposer addresses, host:port comma separated.
    #[arg(long, default_value = "localhost:6001,localhost:6002")]
    proposers: String,

    /// Learner addresses, host:port comma separated.
    #[arg(long, default_value = "localhost:7001,localhost:7002")]
    learners: String,

    /// Client id used for request correlation.
    #[arg(long, default_value = "cli")]
    client_id: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, ValueEnum)]
enum Consistency {
    Eventual,
    Session,
    Strong,
}

impl From<Consistency> for ConsistencyLevel {
    fn from(level: Consistency) -> Self {
        match level {
            Consistency::Eventual => ConsistencyLevel::Eventual,
            Consistency::Session => ConsistencyLevel::Session,
            Consistency::Strong => ConsistencyLevel::Strong,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Write a key-value pair. The value is parsed as JSON, falling back to
    /// a plain string.
    Put { key: String, value: String },

    /// Read one key.
    Get {
        key: String,
        #[arg(long, value_enum, default_value = "eventual")]
        consistency: Consistency,
    },

    /// Delete a key.
    Delete { key: String },

    /// Dump every key, or only those under a prefix.
    List {
        #[arg(long)]
        prefix: Option<String>,
        #[arg(long, value_enum, default_value = "eventual")]
        consistency: Consistency,
    },

    /// Show the status of every configured node.
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let proposers = parse_hosts(&cli.proposers).context("bad --proposers list")?;
    let learners = parse_hosts(&cli.learners).context("bad --learners list")?;
    let client = PaxosClient::new(cli.client_id, proposers, learners)?;

    match cli.command {
        Command::Put { key, value } => {
            let value: Value =
                serde_json::from_str(&value).unwrap_or_else(|_| Value::String(value));
            let receipt = client.put(key, value).await?;
            println!(
                "{}",
                serde_json::json!({
                    "status": "queued",
                    "request_id": receipt.request_id,
                    "leader_id": receipt.leader_id,
                })
            );
        }
        Command::Get { key, consistency } => {
            let outcome = client.read(ReadQuery::key(key), consistency.into()).await?;
            println!(
                "{}",
                serde_json::json!({
                    "result": outcome.result,
                    "sequence_number": outcome.sequence_number,
                })
            );
        }
        Command::Delete { key } => {
            let receipt = client.delete(key).await?;
            println!(
                "{}",
                serde_json::json!({
                    "status": "queued",
                    "request_id": receipt.request_id,
                    "leader_id": receipt.leader_id,
                })
            );
        }
        Command::List { prefix, consistency } => {
            let query = match prefix {
                Some(prefix) => ReadQuery::prefix(prefix),
                None => ReadQuery::all(),
            };
            let outcome = client.read(query, consistency.into()).await?;
            println!("{}", serde_json::to_string_pretty(&outcome.result)?);
        }
        Command::Status => {
            let status = client.cluster_status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
