//! jouled - the Joule control-plane daemon.
//!
//! Wires the adapters, starts the orchestrator and its strategies, and
//! serves the dashboard API (`:8080`) and the metrics exposition (`:2112`)
//! until an OS signal asks for shutdown.

mod config;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use joule_api::{create_router, metrics_router, ApiState};
use joule_bmc::{IpmiConnector, ServerSwitch};
use joule_cluster::{ClusterOps, KubeCluster};
use joule_metrics::{MetricsHub, STATIC_ENERGY_SEED};
use joule_orchestrator::{Orchestrator, OrchestratorConfig};
use joule_prom::{MetricsSource, PromClient};
use joule_pyzhm::{Predictor, PyzhmClient};
use kube::config::{KubeConfigOptions, Kubeconfig};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::BootConfig;

const API_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 8080);
const METRICS_ADDR: ([u8; 4], u16) = ([0, 0, 0, 0], 2112);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);
const MANAGED_NAMESPACE: &str = "default";

#[derive(Parser)]
#[command(name = "jouled")]
#[command(about = "Energy-aware CPU-target control plane")]
#[command(version)]
struct Cli {
    /// Configuration file location.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Debug logging.
    #[arg(long)]
    debug: bool,

    /// Disable CORS restrictions for local dashboard development.
    #[arg(long)]
    cors_disabled: bool,

    /// Absolute path to the kubeconfig file.
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Prometheus address for querying.
    #[arg(long = "promclient-address", default_value = "http://localhost:9090")]
    promclient_address: String,

    /// pyzhm predictor address.
    #[arg(long = "pyzhm-address", default_value = "http://localhost:5001")]
    pyzhm_address: String,
}

fn default_kubeconfig() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_default()
        .join(".kube")
        .join("config")
}

async fn build_kube_client(path: &PathBuf) -> anyhow::Result<kube::Client> {
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("error reading kubeconfig {}", path.display()))?;
    let config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("error building kubernetes client configuration")?;
    kube::Client::try_from(config).context("error building kubernetes client")
}

/// Every configured node must exist in the cluster; a typo in the boot
/// config would otherwise silently orphan its control loops.
async fn check_node_names(cluster: &KubeCluster, cfg: &BootConfig) -> anyhow::Result<()> {
    let mut invalid = Vec::new();
    for node in cfg.targets.keys() {
        match cluster.is_node_name_valid(node).await {
            Ok(true) => {}
            Ok(false) => invalid.push(node.clone()),
            Err(e) => bail!("error validating node {node}: {e}"),
        }
    }
    if !invalid.is_empty() {
        bail!(
            "the following node names are not valid: {}. Are they reachable from jouled?",
            invalid.join(", ")
        );
    }
    Ok(())
}

async fn build_switches(cfg: &BootConfig) -> HashMap<String, Arc<ServerSwitch>> {
    let mut switches = HashMap::new();
    for (node, endpoint) in &cfg.bmc_node_mappings {
        let connector =
            IpmiConnector::new(endpoint.clone(), &cfg.bmc_username, &cfg.bmc_password);
        let switch = Arc::new(ServerSwitch::new(endpoint.clone(), Box::new(connector)));
        if let Err(e) = switch.connect().await {
            // The switch stays registered; the power strategy surfaces the
            // missing session until the BMC becomes reachable.
            warn!(node = %node, endpoint = %endpoint, error = %e, "bmc unreachable at boot");
        }
        switches.insert(node.clone(), switch);
    }
    switches
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };
    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let cfg = BootConfig::load(&cli.config)?;
    info!(config = %cli.config.display(), nodes = cfg.targets.len(), "configuration loaded");

    let kubeconfig = cli.kubeconfig.unwrap_or_else(default_kubeconfig);
    let kube_client = build_kube_client(&kubeconfig).await?;
    let cluster = KubeCluster::new(kube_client, MANAGED_NAMESPACE);
    check_node_names(&cluster, &cfg).await?;

    let prom = PromClient::new(&cli.promclient_address)?;
    prom.probe()
        .await
        .context("error querying prometheus during init")?;

    let pyzhm = PyzhmClient::new(&cli.pyzhm_address)?;

    let hub = Arc::new(MetricsHub::new(&cfg.target_metric_name, &cfg.targets));
    hub.energy().seed(STATIC_ENERGY_SEED);

    let switches = build_switches(&cfg).await;

    let orchestrator = Orchestrator::new(
        Arc::new(cluster) as Arc<dyn ClusterOps>,
        Arc::new(prom) as Arc<dyn MetricsSource>,
        Arc::new(pyzhm) as Arc<dyn Predictor>,
        hub.targets(),
        hub.schedulable(),
        switches,
        OrchestratorConfig {
            pyzhm_node_mappings: cfg.pyzhm_node_mappings.clone(),
            setpoints: cfg.setpoints.clone(),
        },
    );
    orchestrator.bootstrap().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let api_router = create_router(ApiState::new(orchestrator.clone()), cli.cors_disabled);
    let api_task = {
        let mut rx = shutdown_rx.clone();
        tokio::spawn(joule_api::serve(
            api_router,
            SocketAddr::from(API_ADDR),
            async move {
                let _ = rx.changed().await;
            },
        ))
    };
    let metrics_task = {
        let mut rx = shutdown_rx;
        tokio::spawn(joule_api::serve(
            metrics_router(hub),
            SocketAddr::from(METRICS_ADDR),
            async move {
                let _ = rx.changed().await;
            },
        ))
    };

    shutdown_signal().await;
    info!("shutting down gracefully, press Ctrl+C again to force");
    orchestrator.stop_housekeeping().await;
    let _ = shutdown_tx.send(());

    let drain = async {
        match api_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "api server error"),
            Err(e) => error!(error = %e, "api server task panicked"),
        }
        match metrics_task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "metrics server error"),
            Err(e) => error!(error = %e, "metrics server task panicked"),
        }
    };
    if tokio::time::timeout(SHUTDOWN_DEADLINE, drain).await.is_err() {
        bail!("servers forced to shutdown after {SHUTDOWN_DEADLINE:?}");
    }

    info!("joule exiting");
    Ok(())
}
