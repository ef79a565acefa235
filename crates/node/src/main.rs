//! Bridge Operator Node
//!
//! Main entry point for a bridge operator. Serves the gossip WebSocket and
//! the status API on one listener, watches the configured chains and co-signs
//! mints, redemptions and governance proposals with the other operators.

use anyhow::{bail, Result};
use bridge_api::{StatusContext, StatusServer};
use bridge_chain::{Authority, AuthorityMember, ChainId, MemoryLedger, OperatorCredential};
use bridge_consensus::{EngineKind, OperatorNodeBuilder};
use bridge_gossip::HttpProbe;
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod public_ip;

use config::NodeConfig;

/// Where chain events and submissions go
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ChainBackend {
    /// In-process ledgers, for local operator networks
    Memory,
}

/// Bridge operator node
#[derive(Parser, Debug)]
#[command(name = "bridge-node")]
#[command(about = "Threshold-signing operator node for the Hive bridge", long_about = None)]
struct Args {
    /// Listen port for gossip and the status API
    #[arg(long, env = "PORT", default_value = "3018")]
    port: u16,

    /// Listen host
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    /// Known peers (host:port), comma separated
    #[arg(long, env = "PEERS", value_delimiter = ',')]
    peers: Vec<String>,

    /// Operator account this node signs for
    #[arg(long, env = "OPERATOR_USERNAME")]
    operator_username: Option<String>,

    /// Hex encoded secp256k1 secret of the operator
    #[arg(long, env = "OPERATOR_KEY", hide_env_values = true)]
    operator_key: Option<String>,

    /// Publicly reachable host:port announced to peers
    #[arg(long, env = "PUBLIC_ADDRESS")]
    public_address: Option<String>,

    /// Detect the public address through an IP echo service
    #[arg(long, env = "DETECT_PUBLIC_IP")]
    detect_public_ip: bool,

    /// JSON config file
    #[arg(long, env = "NODE_CONFIG")]
    config: Option<PathBuf>,

    /// Chain backend
    #[arg(long, value_enum, default_value = "memory")]
    chain_backend: ChainBackend,

    /// Settlement chain treasury account
    #[arg(long, env = "TREASURY", default_value = "bridge-treasury")]
    treasury: String,

    /// Wrapped HIVE token contract
    #[arg(long, env = "ETHHIVE_CONTRACT")]
    eth_hive_contract: Option<String>,

    /// Wrapped HBD token contract
    #[arg(long, env = "ETHHBD_CONTRACT")]
    eth_hbd_contract: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

fn load_credential(args: &Args) -> Result<Option<OperatorCredential>> {
    match (&args.operator_username, &args.operator_key) {
        (Some(username), Some(key)) => Ok(Some(OperatorCredential::from_hex(username.clone(), key)?)),
        (None, None) => Ok(None),
        _ => bail!("OPERATOR_USERNAME and OPERATOR_KEY must be set together"),
    }
}

/// Signer set for the in-memory backend: configured, else just ourselves
fn seed_authority(config: &NodeConfig, credential: Option<&OperatorCredential>) -> Authority {
    if let Some(authority) = &config.authority {
        return authority.clone();
    }
    match credential {
        Some(credential) => Authority {
            threshold: 1,
            members: vec![AuthorityMember {
                username: credential.username().to_string(),
                public_key: credential.public_key(),
            }],
        },
        None => Authority::default(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    let credential = load_credential(&args)?;

    let public_address = match (&args.public_address, args.detect_public_ip) {
        (Some(address), _) => Some(address.clone()),
        (None, true) => public_ip::detect_public_address(args.port).await,
        (None, false) => None,
    };

    tracing::info!("Starting bridge operator node");
    tracing::info!("  Listen: {}:{}", args.host, args.port);
    tracing::info!("  Public address: {}", public_address.as_deref().unwrap_or("none (private)"));
    tracing::info!("  Known peers: {:?}", args.peers);
    tracing::info!("  Operator: {}", args.operator_username.as_deref().unwrap_or("none (observer)"));
    tracing::info!("  Chain backend: {:?}", args.chain_backend);

    let mut builder = OperatorNodeBuilder::new()
        .gossip(config.gossip_config(public_address, args.peers.clone()))
        .registry(config.registry_config())
        .heartbeat_interval(config.heartbeat_interval())
        .probe(Arc::new(HttpProbe::new(config.probe_timeout())))
        .treasury(args.treasury.clone());
    for kind in [EngineKind::Mint, EngineKind::Redemption, EngineKind::Governance] {
        builder = builder.engine(kind, config.engine_config(kind));
    }

    match args.chain_backend {
        ChainBackend::Memory => {
            let authority = seed_authority(&config, credential.as_ref());
            let hive = Arc::new(
                MemoryLedger::new(ChainId::Hive, args.treasury.clone()).with_authority(authority.clone()),
            );
            builder = builder.chain(hive.clone()).authority(hive);
            for (chain, contract) in [
                (ChainId::EthHive, &args.eth_hive_contract),
                (ChainId::EthHbd, &args.eth_hbd_contract),
            ] {
                if let Some(contract) = contract {
                    let ledger = MemoryLedger::new(chain, contract.to_lowercase())
                        .with_authority(authority.clone());
                    builder = builder.chain(Arc::new(ledger));
                }
            }
        }
    }
    if let Some(credential) = credential {
        builder = builder.credential(credential);
    }

    let node = Arc::new(builder.build()?);
    node.start().await?;

    // Gossip and status share one listener so probes reach /status
    let router = node
        .transport()
        .router()
        .merge(StatusServer::new(StatusContext::new(node.clone())).router());
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Listening on {}", addr);

    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!("Server error: {}", e);
        }
    });

    tracing::info!("Operator node running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    let stats = node.stats();
    tracing::info!(
        "{} peers, {} pending mints, {} pending redemptions, {} open proposals",
        stats.peers,
        stats.pending_mints,
        stats.pending_redemptions,
        stats.open_proposals
    );

    node.shutdown();
    server.abort();

    tracing::info!("Operator node stopped");

    Ok(())
}
