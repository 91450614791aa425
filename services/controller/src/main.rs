//! PodSet Controller
//!
//! Reconciles every PodSet workload in the store toward its desired replica
//! count. The store is in-memory, optionally seeded from `PODSET_SEED_FILE`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use podset_controller::config::{self, Config};
use podset_controller::{
    ClusterStore, ControllerWorker, InMemoryStore, Reconciler, TracingRecorder,
};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        resync_interval_secs = config.resync_interval.as_secs(),
        burst_replicas = config.burst_replicas,
        victim_policy = %config.victim_policy,
        "Starting podset controller"
    );

    // Seed the store
    let workloads = match &config.seed_file {
        Some(path) => config::load_seed_workloads(path)?,
        None => Vec::new(),
    };
    info!(workloads = workloads.len(), "Store seeded");
    let store: Arc<dyn ClusterStore> = Arc::new(InMemoryStore::with_workloads(workloads));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let reconciler = Reconciler::new(
        Arc::clone(&store),
        Arc::new(TracingRecorder),
        config.reconciler_config(),
        shutdown_rx.clone(),
    );
    let mut worker = ControllerWorker::new(reconciler, store, config.worker_config());
    let mut worker_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { worker.run(shutdown_rx).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = &mut worker_handle => {
            if let Err(e) = result {
                error!(error = %e, "Controller worker panicked");
            }
            info!("Controller worker exited");
            return Ok(());
        }
    }

    // Signal shutdown to the worker
    let _ = shutdown_tx.send(true);

    info!("Waiting for worker to shut down...");
    if tokio::time::timeout(Duration::from_secs(5), worker_handle)
        .await
        .is_err()
    {
        error!("Controller worker did not stop in time");
    }

    info!("Controller shutdown complete");
    Ok(())
}
