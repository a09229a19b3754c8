//! pve-balancer - workload placement and load balancing daemon
//!
//! Samples node utilization from a Proxmox VE cluster, migrates workloads off
//! overloaded nodes on a fixed interval, and serves health, metrics and a
//! small control API.

use anyhow::{Context, Result};
use balancer_lib::{
    health::HealthRegistry,
    observability::StructuredLogger,
    BalanceLoopBuilder, ClusterClient, LoadBalancer, ProxmoxClient,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

const BALANCER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "pve-balancer", version, about = "Proxmox VE workload balancer")]
struct Args {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "BALANCER_CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Run one balance cycle, print the report and exit
    #[arg(long)]
    once: bool,

    /// Print the migrations a cycle would issue and exit
    #[arg(long, conflicts_with = "once")]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let args = Args::parse();

    let config = config::DaemonConfig::load(args.config.as_deref())?;
    info!(
        cluster = %config.cluster_name,
        proxmox_url = %config.proxmox.url,
        "Balancer configured"
    );

    let cluster: Arc<dyn ClusterClient> = Arc::new(ProxmoxClient::new(&config.proxmox)?);

    let health_registry = HealthRegistry::new();
    health_registry.register_all().await;

    let logger = StructuredLogger::new(&config.cluster_name);

    let balancer = Arc::new(
        LoadBalancer::new(cluster, config.balancing.clone())?
            .with_health(health_registry.clone())
            .with_logger(logger.clone()),
    );

    if args.dry_run {
        let preview = balancer.recommend_migrations().await?;
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(());
    }

    if args.once {
        let report = balancer.run_balance_cycle().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    logger.log_startup(BALANCER_VERSION, balancer.config().check_interval_secs);

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        Arc::clone(&balancer),
    ));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let balance_loop = BalanceLoopBuilder::new()
        .balancer(Arc::clone(&balancer))
        .build()
        .context("Failed to build balance loop")?;
    let loop_handle = tokio::spawn(balance_loop.run(shutdown_rx));

    health_registry.set_ready(true).await;

    let mut api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            "SIGINT received"
        }
        result = &mut api_handle => {
            match result {
                Ok(Ok(())) => warn!("API server exited"),
                Ok(Err(e)) => warn!(error = %e, "API server failed"),
                Err(e) => warn!(error = %e, "API server task aborted"),
            }
            "API server stopped"
        }
    };

    logger.log_shutdown(reason);
    health_registry.set_ready(false).await;
    balancer.request_stop();
    let _ = shutdown_tx.send(());

    match loop_handle.await {
        Ok(cycles) => info!(cycles = cycles, "Balance loop stopped"),
        Err(e) => warn!(error = %e, "Balance loop task failed"),
    }
    api_handle.abort();

    Ok(())
}
