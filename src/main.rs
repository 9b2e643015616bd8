//! Greenlight Operator Entry Point
//!
//! Starts the dry-run admission controller and the metrics endpoint.

use std::sync::Arc;

use clap::Parser;
use greenlight_k8s::carbon::{CarbonClient, IntensityCache, SampleCache};
use greenlight_k8s::config::Config;
use greenlight_k8s::controller::{self, CompletionConfig, CompletionTracker, ControllerState};
use greenlight_k8s::evaluator::Evaluator;
use greenlight_k8s::power::PowerEstimator;
use greenlight_k8s::store::EvaluationStore;
use greenlight_k8s::Error;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    info!(
        "Starting Greenlight Operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = Config::parse();
    config.validate()?;

    let pricing = config.load_pricing()?.map(Arc::new);
    let node_power = Config::node_power_overrides()?;

    // Initialize Kubernetes client
    let client = kube::Client::try_default().await.map_err(Error::KubeError)?;
    info!("Connected to Kubernetes cluster");

    let cache = Arc::new(IntensityCache::new(config.cache_ttl, config.cache_max_age));
    let carbon = CarbonClient::new(
        config.carbon_api_config(),
        Some(cache.clone() as Arc<dyn SampleCache>),
    )?;

    let evaluator = Arc::new(Evaluator::new(
        config.evaluator_config(),
        Some(Arc::new(carbon)),
        pricing,
        PowerEstimator::new(node_power),
    ));

    let store = Arc::new(EvaluationStore::new());
    let tracker = CompletionTracker::new(
        store.clone(),
        CompletionConfig {
            watch_namespaces: config.namespaces(),
        },
    );

    let state = Arc::new(ControllerState {
        client,
        evaluator,
        store,
        tracker,
        annotate: config.annotate,
        watch_namespaces: config.namespaces(),
    });

    // Serve metrics next to the controller loop
    let metrics_addr = config.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = greenlight_k8s::server::run_metrics_server(metrics_addr).await {
            tracing::error!("Metrics server error: {:?}", e);
        }
    });

    // Run the main controller loop
    controller::run_controller(state).await?;

    Ok(())
}
