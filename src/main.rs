//! Token Deployer - token configuration, deployment and stuck-transaction rescue
//!
//! Validates token and extension-module configurations, prices and submits
//! deployments to EVM networks, and watches the deployer wallet for stuck
//! transactions, locking deployments until they are cleared.

use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, warn};

mod api;
mod chain;
mod config;
mod deploy;
mod error;
mod gas;
mod metrics;
mod state;
mod token;
mod tx;

use chain::ChainManager;
use config::Settings;
use deploy::{DeploymentOrchestrator, HttpDeploymentService};
use gas::GasEstimator;
use metrics::MetricsServer;
use state::{DeploymentStore, StateManager};
use tx::{MonitorRegistry, TransactionRescue, TransactionSender};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting Token Deployer v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration for {} networks",
        settings.enabled_networks().len()
    );

    // Initialize database connection
    let state_manager = Arc::new(StateManager::new(&settings.database).await?);
    info!("Database connection established");

    state_manager.run_migrations().await?;
    info!("Database migrations complete");
    let store: Arc<dyn DeploymentStore> = state_manager.clone();

    let chain_manager = Arc::new(ChainManager::new(&settings)?);
    info!(
        "Connected networks: {}",
        chain_manager.connected_networks().join(", ")
    );

    let wallet = TransactionSender::load_wallet(&settings.wallet.private_key_env)?;
    let sender = Arc::new(TransactionSender::new(wallet, &settings.deployer));

    let monitors = Arc::new(MonitorRegistry::new(
        &chain_manager,
        sender.address(),
        &settings.monitor,
    ));

    let rescue = Arc::new(TransactionRescue::new(
        chain_manager.clone(),
        monitors.clone(),
        sender.clone(),
        store.clone(),
        settings.monitor.clone(),
    ));

    let service = Arc::new(HttpDeploymentService::new(&settings.deployment)?);
    let orchestrator = Arc::new(DeploymentOrchestrator::new(
        chain_manager.clone(),
        monitors.clone(),
        sender.clone(),
        service,
        store.clone(),
        settings.deployment.clone(),
    ));
    info!(
        "Deployment backend: {} (factory: {}, optimized: {})",
        settings.deployment.backend_url,
        settings.deployment.features.factory_deployment,
        settings.deployment.features.optimized_deployment
    );

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let state = api::AppState {
            chain_manager: chain_manager.clone(),
            monitors: monitors.clone(),
            rescue,
            orchestrator,
            store: store.clone(),
            estimator: Arc::new(GasEstimator::new()),
            started_at: Instant::now(),
        };
        async move {
            if let Err(e) = api::run_server(api_config, state).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start stuck transaction monitors
    let monitor_handle = if settings.monitor.enabled {
        let monitors = monitors.clone();
        Some(tokio::spawn(async move { monitors.run_all().await }))
    } else {
        warn!("Stuck transaction monitoring disabled; deployments will never be locked");
        None
    };

    // Health check loop
    let health_handle = tokio::spawn({
        let chain_manager = chain_manager.clone();
        let store = store.clone();
        let sender = sender.clone();
        let interval = settings.deployer.health_check_interval_secs;
        async move {
            loop {
                tokio::time::sleep(tokio::time::Duration::from_secs(interval)).await;
                let mut healthy = true;

                for (network, ok) in chain_manager.health_check().await {
                    if !ok {
                        warn!("Network {} health check failed", network);
                        healthy = false;
                        continue;
                    }
                    record_wallet_balance(&chain_manager, &sender, &network).await;
                }

                if let Err(e) = store.health_check().await {
                    warn!("Database health check failed: {}", e);
                    healthy = false;
                }

                if healthy {
                    metrics::record_health_check();
                } else {
                    metrics::record_health_check_failure();
                }
            }
        }
    });

    info!("Token Deployer is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    monitors.stop().await;

    // Abort background tasks
    api_handle.abort();
    health_handle.abort();
    if let Some(h) = monitor_handle {
        h.abort();
    }
    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!("Token Deployer stopped");
    Ok(())
}

async fn record_wallet_balance(chains: &ChainManager, sender: &TransactionSender, network: &str) {
    let rpc = match chains.get_provider(network) {
        Ok(rpc) => rpc,
        Err(_) => return,
    };

    match sender.balance(rpc.as_ref()).await {
        Ok(balance) => {
            let native = ethers::utils::format_ether(balance)
                .parse::<f64>()
                .unwrap_or(0.0);
            metrics::record_wallet_balance(network, native);
        }
        Err(e) => warn!("Balance check on {} failed: {}", network, e),
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,token_deployer=debug,sqlx=warn,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
