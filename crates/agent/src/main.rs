//! Eviction Agent - node pressure watchdog
//!
//! This binary runs as a DaemonSet on each Kubernetes node, watching
//! memory, disk, inode, and pid pressure and evicting pods when node
//! stability requires it.

use anyhow::Result;
use eviction_lib::health::HealthTracker;
use eviction_lib::manager::EvictionManagerBuilder;
use eviction_lib::observability::EvictionMetrics;
use eviction_lib::types::ObjectRef;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod providers;

const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!(version = AGENT_VERSION, "Starting eviction-agent");

    // Load configuration
    let config = config::AgentConfig::load()?;
    let manager_config = config.manager_config()?;
    info!(
        node_name = %config.node_name,
        thresholds = manager_config.thresholds.len(),
        "Agent configured"
    );

    // Probe outcomes recorded by the manager loop feed the health and
    // readiness endpoints.
    let health = Arc::new(HealthTracker::new());

    // Initialize metrics
    let metrics = EvictionMetrics::new();

    // Wire providers: the kubelet serves stats and pods, the API server
    // carries out evictions.
    let kubelet = Arc::new(providers::KubeletClient::new(
        &config.kubelet_endpoint,
        config.insecure_tls,
    )?);
    let api_server = Arc::new(providers::ApiServerClient::new(
        &config.api_server_endpoint,
        &config.token_path,
        config.insecure_tls,
    )?);

    let (manager, _admission_gate) = EvictionManagerBuilder::new()
        .config(manager_config)
        .node_ref(ObjectRef::node(&config.node_name))
        .summary_provider(kubelet.clone())
        .disk_info_provider(kubelet.clone())
        .active_pods_provider(kubelet.clone())
        .pod_killer(api_server.clone())
        .cleanup_checker(api_server)
        .image_gc(Arc::new(providers::CrictlGc::new(&config.crictl_path)))
        .container_gc(Arc::new(providers::CrictlGc::new(&config.crictl_path)))
        .event_recorder(Arc::new(providers::LogEventRecorder))
        .health_tracker(health.clone())
        .build()?;

    // Start the pressure monitoring loop
    let (shutdown_tx, _) = broadcast::channel(1);
    let manager_handle = manager.clone().start(config.monitoring_interval(), &shutdown_tx);

    // Create shared application state and serve the HTTP API
    let app_state = Arc::new(api::AppState::new(
        health.clone(),
        metrics.clone(),
        manager.clone(),
    ));
    health.set_ready(true);
    let api_handle = tokio::spawn(api::serve(config.api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("SIGINT received, shutting down");
    let _ = shutdown_tx.send(());
    let _ = manager_handle.await;
    api_handle.abort();

    Ok(())
}
