use anyhow::{Context, Result};
use clap::Parser;
use envoy_api::{ApiServer, AppState};
use envoy_core::broadcast::StatusBroadcaster;
use envoy_core::creds::CredentialStore;
use envoy_core::host_stats::HostStatsCollector;
use envoy_core::hub::EventHub;
use envoy_core::runtime::DockerRuntime;
use envoy_core::sidecar::SidecarClient;
use envoy_core::sleeve::SleeveManager;
use envoy_core::workspace::WorkspaceManager;
use envoy_core::EnvoyConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "envoy-daemon")]
#[command(author, version, about = "Container-backed agent orchestrator", long_about = None)]
struct DaemonArgs {
    /// TCP port for the API (overrides configuration).
    #[arg(long)]
    port: Option<u16>,

    /// Workspace root directory (overrides configuration).
    #[arg(long)]
    workspace_root: Option<PathBuf>,

    /// Sleeve network name (overrides configuration).
    #[arg(long)]
    network: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "envoy=info,envoy_daemon=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    run(DaemonArgs::parse()).await
}

async fn run(args: DaemonArgs) -> Result<()> {
    info!("starting envoy daemon...");

    let mut config = EnvoyConfig::load().context("failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(root) = args.workspace_root {
        config.runtime.workspace_root = root;
    }
    if let Some(network) = args.network {
        config.runtime.network = network;
    }

    let runtime =
        Arc::new(DockerRuntime::connect().context("failed to create runtime client")?);

    let creds = Arc::new(CredentialStore::new(config.runtime.creds_root.clone()));
    if let Err(err) = creds.load_state() {
        warn!("failed to load auth state: {err}");
    }
    creds.startup_check();

    let sleeves = Arc::new(SleeveManager::new(runtime.clone(), config.clone()));
    let recovered = sleeves
        .recover()
        .await
        .context("failed to recover sleeves")?;
    if recovered > 0 {
        info!("resumed {recovered} sleeve(s)");
    }

    let workspaces = Arc::new(WorkspaceManager::new(config.clone(), sleeves.clone()));
    workspaces.start_sweeper();

    let sidecar = Arc::new(SidecarClient::new().context("failed to create sidecar client")?);
    let host_stats = Arc::new(HostStatsCollector::new(
        runtime.clone(),
        config.runtime.workspace_root.clone(),
        config.sleeves.max,
    ));

    let hub = Arc::new(EventHub::new());
    hub.start();

    let broadcaster = Arc::new(StatusBroadcaster::new(
        hub.clone(),
        sleeves.clone(),
        sidecar,
        runtime.clone(),
        host_stats.clone(),
    ));
    broadcaster.start();

    {
        let broadcaster = broadcaster.clone();
        workspaces.set_on_clone_progress(Box::new(move |id, status, progress, error| {
            broadcaster.clone_progress(id, status, progress, error);
        }));
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let state = AppState {
        config: Arc::new(RwLock::new(config)),
        sleeves,
        workspaces,
        creds,
        host_stats,
        hub,
        broadcaster,
        exec: runtime.clone(),
        containers: runtime.clone(),
        inventory: runtime,
    };

    let server = ApiServer::new(addr, state);

    tokio::select! {
        result = server.run() => {
            result.context("server error")?;
        }
        _ = signal::ctrl_c() => {
            info!("received shutdown signal, exiting");
        }
    }

    Ok(())
}
