//! QoS advisor - node-local CPU provisioning controller
//!
//! Runs on each node, adjusting how much CPU every QoS region guarantees to
//! its non-reclaimed workloads from pushed performance indicators.

use advisor_lib::{
    health::{components, HealthRegistry},
    observability::{AdvisorMetrics, StructuredLogger},
    ControlLoop, IndicatorStore, MetaCache,
};
use anyhow::Result;
use qos_advisor::{api, config::AdvisorConfig};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const ADVISOR_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting qos-advisor");

    let config = AdvisorConfig::load()?;
    info!(
        node_name = %config.node_name,
        control_interval_secs = config.provision.control_interval_secs,
        "Advisor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::CONTROL_LOOP).await;
    health_registry.register(components::INDICATOR_STORE).await;
    health_registry.register(components::REGISTRY).await;
    health_registry.register(components::API).await;

    let metrics = AdvisorMetrics::new();
    let logger = StructuredLogger::new(&config.node_name);

    let provision = Arc::new(config.provision.clone());
    let registry = Arc::new(MetaCache::new());
    let store = Arc::new(IndicatorStore::new(config.indicator_staleness()));
    logger.log_startup(ADVISOR_VERSION, registry.len());

    let (shutdown_tx, _) = broadcast::channel(1);
    let control_loop = ControlLoop::new(
        provision.clone(),
        registry.clone(),
        store.clone(),
        metrics.clone(),
        logger.clone(),
    )
    .with_health(health_registry.clone());
    let loop_handle = tokio::spawn(control_loop.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState::new(
        health_registry.clone(),
        metrics,
        provision,
        registry,
        store,
    ));

    health_registry.set_ready(true);

    let api_port = config.api_port;
    let api_health = health_registry.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::serve(api_port, app_state).await {
            error!(error = %e, "API server failed");
            api_health
                .set_unhealthy(components::API, e.to_string())
                .await;
        }
    });

    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");

    let _ = shutdown_tx.send(());
    if let Err(e) = loop_handle.await {
        error!(error = %e, "Control loop task failed");
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
