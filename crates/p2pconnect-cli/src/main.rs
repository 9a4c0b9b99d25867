//! p2pconnect: start a node, discover LAN peers, and exchange identities.
//!
//! Runs until SIGINT or SIGTERM. Exits non-zero when the node cannot start or
//! the peer given with `-peer-address` cannot be reached.

mod cli;

use crate::cli::Cli;
use clap::Parser;
use p2pconnect_wire::{Lifecycle, Node, NodeConfig, StartupError, TransportBinding};
use std::process::ExitCode;
use tracing::{error, info};

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

/// Resolves on Ctrl+C, or SIGTERM on Unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_from(cli::normalize_args(std::env::args_os()));
    init_tracing_stderr();

    let config = NodeConfig::default();
    let node = match Node::start(config.clone()).await {
        Ok(node) => node,
        Err(e) => {
            error!(error = %StartupError::from_node(e), "Fatal error");
            return ExitCode::FAILURE;
        }
    };

    println!("Node ID: {}", node.local_peer_id());
    for addr in node.listen_addrs() {
        println!("Listening on: {addr}");
    }
    for addr in node.p2p_addrs() {
        println!("Peer address: {addr}");
    }

    let lifecycle = Lifecycle::new(node, config);
    match lifecycle
        .run(cli.peer_address.as_deref(), shutdown_signal())
        .await
    {
        Ok(()) => {
            info!("Goodbye");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
