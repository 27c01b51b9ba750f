// crates/permgate-daemon/src/main.rs
//
// Binary entrypoint for the permgate daemon.
//
// Parses CLI arguments, loads configuration, initializes tracing, wires the
// in-memory backend through the lookup engine and the interceptor chain,
// and serves the gateway until Ctrl-C.

mod config;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use config::DaemonConfig;
use prometheus::Registry;

use permgate_core::traits::RelationshipRepository;
use permgate_query::LookupEngine;
use permgate_rpc::handlers::Services;
use permgate_rpc::interceptors::RpcMetrics;
use permgate_rpc::{ChainConfig, Gateway, InterceptorChain, PermgateRpcServer};
use permgate_store::MemoryRepository;

/// Permissions gateway daemon.
#[derive(Parser, Debug)]
#[command(name = "permgate-daemon", version = "0.1.0", about = "Permissions gateway daemon")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, default_value = "permgate.toml")]
    config: String,

    /// Override the configured RPC host.
    #[arg(long)]
    host: Option<String>,

    /// Override the configured RPC port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // The subscriber needs the configured level, so the config is read
    // before anything is logged.
    let loaded = DaemonConfig::load_optional(&args.config)?;
    let mut daemon_config = loaded.clone().unwrap_or_default();
    if let Some(host) = args.host.clone() {
        daemon_config.rpc_host = host;
    }
    if let Some(port) = args.port {
        daemon_config.rpc_port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&daemon_config.log_level)),
        )
        .init();

    match loaded {
        Some(_) => tracing::info!("Loaded configuration from {}", args.config),
        None => tracing::warn!("Config file {} not found. Using defaults.", args.config),
    }

    tracing::info!("permgate daemon v0.1.0");
    tracing::info!(
        "RPC endpoint: {}:{}",
        daemon_config.rpc_host,
        daemon_config.rpc_port
    );
    tracing::info!(
        "Lookup ceiling: {}, channel capacity: {}",
        daemon_config.lookup.max_limit,
        daemon_config.lookup.channel_capacity
    );

    // ---------------------------------------------------------------
    // Backend and query layer.
    // ---------------------------------------------------------------
    let repo: Arc<dyn RelationshipRepository> = Arc::new(MemoryRepository::new());
    let engine = LookupEngine::new(repo.clone(), daemon_config.engine_config());
    let services = Services::new(repo, engine, daemon_config.readiness.sticky);

    // ---------------------------------------------------------------
    // Interceptors.
    // ---------------------------------------------------------------
    let registry = Registry::new();
    let metrics = RpcMetrics::register(&registry)?;
    let auth = daemon_config.auth_config()?;
    match &auth {
        Some(auth) => tracing::info!("Bearer-token auth enabled ({:?})", auth.algorithm),
        None => tracing::warn!("Bearer-token auth disabled"),
    }
    let chain = InterceptorChain::standard(ChainConfig {
        metrics: Some(metrics),
        auth,
    });

    let rpc_config = daemon_config.rpc_config();
    let gateway = Gateway::new(
        &services,
        chain,
        Duration::from_millis(rpc_config.request_timeout_ms),
    );
    let server = PermgateRpcServer::new(rpc_config, gateway, registry);

    server
        .serve_with_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Could not listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!("permgate daemon shut down gracefully");
    Ok(())
}
