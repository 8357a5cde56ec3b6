//! termgate gateway daemon
//!
//! Boots trust material, the enrollment SSH server, the outbound
//! connection pool, and the worker RPC client, then serves until
//! interrupted.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tg_core::config::{self, GatewayConfig};
use tg_core::events::TracingSink;

use tg_gateway::connection::ConnectionManager;
use tg_gateway::enroll::EnrollServer;
use tg_gateway::registry::{spawn_tunnel_closer, MemoryStore, SessionRegistry};
use tg_gateway::state::GatewayState;
use tg_gateway::trust::{self, HostKeyAlgorithm};
use tg_gateway::worker::{tls, WorkerClient};

#[derive(Parser)]
#[command(name = "tg-gateway")]
#[command(about = "termgate session gateway daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address for the enrollment listener (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Worker RPC endpoint, host:port (overrides config)
    #[arg(short, long)]
    worker: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("termgate gateway starting");

    // Load configuration, with environment overrides applied on top.
    let mut cfg = if let Some(config_path) = &args.config {
        GatewayConfig::load(config_path)
            .with_context(|| format!("failed to load config from {config_path:?}"))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            GatewayConfig::load(&default_path)
                .with_context(|| format!("failed to load config from {default_path:?}"))?
        } else {
            GatewayConfig::from_env().context("configuration invalid")?
        }
    };
    if let Some(bind) = args.bind {
        cfg.bind_address = bind;
    }

    // Trust material: host key for the enrollment server, certificate
    // bundle for worker RPC.
    let algorithm = HostKeyAlgorithm::from_str(&cfg.host_key_algorithm)?;
    let host_key = trust::load_or_generate_host_key(&cfg.host_key_path, algorithm)?;
    tracing::info!(
        "host key fingerprint: {}",
        trust::hostkey::fingerprint(&host_key)?
    );

    let bundle = trust::generate_certificate_bundle(&cfg.cert_dir)?;
    let tls_config = tls::client_tls_config(&bundle)?;

    let worker_addr = args
        .worker
        .unwrap_or_else(|| format!("127.0.0.1:{}", cfg.worker_port));
    let worker = Arc::new(WorkerClient::new(
        worker_addr.clone(),
        tls_config,
        cfg.rpc_timeout,
    )?);
    tracing::info!(%worker_addr, "worker RPC client ready");

    // State shared across the gateway.
    let store = Arc::new(MemoryStore::new());
    let events = Arc::new(TracingSink);
    let state = Arc::new(GatewayState::new(
        cfg.clone(),
        store.clone(),
        events.clone(),
    ));

    let connections = Arc::new(ConnectionManager::new(store.clone(), cfg.connect_timeout));
    let registry = Arc::new(SessionRegistry::new(
        store,
        connections,
        worker,
        events,
        cfg.namespace.clone(),
    ));

    let cancel = CancellationToken::new();

    // Signal handlers for graceful shutdown.
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("received Ctrl+C, shutting down");
            }
            _ = terminate => {
                tracing::info!("received SIGTERM, shutting down");
            }
        }

        cancel_clone.cancel();
    });

    let closer = spawn_tunnel_closer(Arc::clone(&registry), cancel.clone());

    let server = EnrollServer::new(&host_key, Arc::clone(&state), cancel.clone())?;
    tracing::info!("starting enrollment server on {}", cfg.bind_address);
    server.run(&cfg.bind_address).await?;

    let _ = closer.await;
    let status = state.status().await;
    tracing::info!(
        uptime_s = status.uptime_s,
        enrolled = status.enrolled_connections,
        "gateway shutdown complete"
    );
    Ok(())
}
