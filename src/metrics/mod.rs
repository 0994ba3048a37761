//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Network connection status and wallet balance
//! - Stuck transactions and deployment locks
//! - Rescue and deployment outcomes
//! - Error rates

use crate::error::{DeployerError, DeployerResult};

use axum::{http::StatusCode, routing::get, Router};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    // Network metrics
    pub static ref CHAIN_CONNECTED: GaugeVec = register_gauge_vec!(
        "token_deployer_chain_connected",
        "Network connection status (1=connected, 0=disconnected)",
        &["network"]
    ).unwrap();

    pub static ref WALLET_BALANCE: GaugeVec = register_gauge_vec!(
        "token_deployer_wallet_balance",
        "Deployer wallet balance in native units",
        &["network"]
    ).unwrap();

    // Stuck transaction metrics
    pub static ref STUCK_TRANSACTIONS: GaugeVec = register_gauge_vec!(
        "token_deployer_stuck_transactions",
        "Stuck nonces of the deployer wallet at the last check",
        &["network"]
    ).unwrap();

    pub static ref DEPLOYMENTS_LOCKED: GaugeVec = register_gauge_vec!(
        "token_deployer_deployments_locked",
        "Deployment lock status (1=locked, 0=open)",
        &["network"]
    ).unwrap();

    pub static ref RESCUE_TRANSACTIONS: CounterVec = register_counter_vec!(
        "token_deployer_rescue_transactions_total",
        "Cancellation transactions by outcome",
        &["network", "outcome"]
    ).unwrap();

    // Deployment metrics
    pub static ref DEPLOYMENTS: CounterVec = register_counter_vec!(
        "token_deployer_deployments_total",
        "Token deployments by strategy and outcome",
        &["network", "strategy", "outcome"]
    ).unwrap();

    pub static ref DEPLOYMENT_DURATION: HistogramVec = register_histogram_vec!(
        "token_deployer_deployment_duration_seconds",
        "Time spent in the deployment backend",
        &["network", "strategy"],
        vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();

    // Health and errors
    pub static ref HEALTH_CHECK_SUCCESS: CounterVec = register_counter_vec!(
        "token_deployer_health_check_success_total",
        "Total successful health checks",
        &[]
    ).unwrap();

    pub static ref HEALTH_CHECK_FAILURE: CounterVec = register_counter_vec!(
        "token_deployer_health_check_failure_total",
        "Total failed health checks",
        &[]
    ).unwrap();

    pub static ref API_ERRORS: CounterVec = register_counter_vec!(
        "token_deployer_api_errors_total",
        "API errors by kind",
        &["kind"]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> DeployerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| DeployerError::Config(format!("metrics bind {}: {}", addr, e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| DeployerError::Internal(format!("metrics server: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> Result<String, StatusCode> {
    render().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Text exposition of every registered metric
pub fn render() -> DeployerResult<String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| DeployerError::Internal(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| DeployerError::Internal(e.to_string()))
}

// Helper functions to record metrics

pub fn record_chain_health(network: &str, healthy: bool) {
    CHAIN_CONNECTED
        .with_label_values(&[network])
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn record_wallet_balance(network: &str, balance: f64) {
    WALLET_BALANCE.with_label_values(&[network]).set(balance);
}

pub fn record_stuck_transactions(network: &str, count: u64) {
    STUCK_TRANSACTIONS
        .with_label_values(&[network])
        .set(count as f64);
}

pub fn record_deployments_locked(network: &str, locked: bool) {
    DEPLOYMENTS_LOCKED
        .with_label_values(&[network])
        .set(if locked { 1.0 } else { 0.0 });
}

pub fn record_rescue_transaction(network: &str, outcome: &str) {
    RESCUE_TRANSACTIONS
        .with_label_values(&[network, outcome])
        .inc();
}

pub fn record_deployment(network: &str, strategy: &str, outcome: &str, duration_secs: f64) {
    DEPLOYMENTS
        .with_label_values(&[network, strategy, outcome])
        .inc();
    DEPLOYMENT_DURATION
        .with_label_values(&[network, strategy])
        .observe(duration_secs);
}

pub fn record_health_check() {
    HEALTH_CHECK_SUCCESS.with_label_values(&[]).inc();
}

pub fn record_health_check_failure() {
    HEALTH_CHECK_FAILURE.with_label_values(&[]).inc();
}

pub fn record_api_error(kind: &str) {
    API_ERRORS.with_label_values(&[kind]).inc();
}
