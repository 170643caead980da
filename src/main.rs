// paxoskv-node - one process per consensus role.
//
// Boots a single role (acceptor, proposer, or learner) from environment
// configuration, serves its HTTP surface, and runs until a shutdown signal.
// A three-acceptor, two-proposer, two-learner cluster is seven of these
// processes wired together by their peer host lists.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use paxoskv_api::{acceptor_router, learner_router, proposer_router, spawn_server};
use paxoskv_consensus::{Acceptor, Learner, Proposer};
use paxoskv_core::config::{AcceptorConfig, LearnerConfig, ProposerConfig};

#[derive(Parser)]
#[command(name = "paxoskv-node", about = "A paxoskv cluster node", version)]
struct Cli {
    #[command(subcommand)]
    role: RoleCommand,
}

#[derive(Subcommand)]
enum RoleCommand {
    /// Run an acceptor (configured via ACCEPTOR_ID, ACCEPTOR_PORT,
    /// LEARNER_HOSTS, DATA_DIR, …).
    Acceptor,
    /// Run a proposer (configured via PROPOSER_ID, PROPOSER_PORT,
    /// ACCEPTOR_HOSTS, LEARNER_HOSTS, OTHER_PROPOSERS, HEARTBEAT_INTERVAL,
    /// LEADER_TIMEOUT, …).
    Proposer,
    /// Run a learner (configured via LEARNER_ID, LEARNER_PORT,
    /// OTHER_LEARNERS, QUORUM_SIZE, DATA_DIR, …).
    Learner,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.role {
        RoleCommand::Acceptor => {
            let config = AcceptorConfig::from_env().context("invalid acceptor configuration")?;
            let bind = format!("{}:{}", config.bind_address, config.port);
            let acceptor = Arc::new(Acceptor::new(&config).await?);
            let addr = spawn_server(&bind, acceptor_router(acceptor)).await?;
            info!(acceptor_id = config.acceptor_id, %addr, "acceptor running");
        }
        RoleCommand::Proposer => {
            let config = ProposerConfig::from_env().context("invalid proposer configuration")?;
            let bind = format!("{}:{}", config.bind_address, config.port);
            let proposer = Arc::new(Proposer::new(config.clone())?);
            Arc::clone(&proposer).start();
            let addr = spawn_server(&bind, proposer_router(proposer)).await?;
            info!(proposer_id = config.proposer_id, %addr, "proposer running");
        }
        RoleCommand::Learner => {
            let config = LearnerConfig::from_env().context("invalid learner configuration")?;
            let bind = format!("{}:{}", config.bind_address, config.port);
            let learner = Arc::new(Learner::new(&config).await?);
            Arc::clone(&learner).start().await;
            let addr = spawn_server(&bind, learner_router(learner)).await?;
            info!(learner_id = config.learner_id, %addr, "learner running");
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received; exiting"),
        Err(err) => error!(error = %err, "could not listen for shutdown signal"),
    }
    Ok(())
}
