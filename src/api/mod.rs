//! HTTP API for token deployment, gas estimation and stuck transaction rescue

use crate::chain::{Blockchain, ChainManager, NetworkEnvironment};
use crate::config::{ApiConfig, GasPriceStrategy};
use crate::deploy::{DeploymentOrchestrator, DeploymentPlan, DeploymentRequest, DeploymentResult};
use crate::error::{DeployerError, DeployerResult};
use crate::gas::{units::wei_to_gwei, FeePriority, GasEstimator, GasPriceView};
use crate::state::{DeploymentRecord, DeploymentStats, DeploymentStore};
use crate::token::{catalog, ModuleInfo};
use crate::tx::{MonitorRegistry, MonitorSnapshot, RescueReport, TransactionRescue};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const DEFAULT_HISTORY_LIMIT: i64 = 50;
const MAX_HISTORY_LIMIT: i64 = 500;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub chain_manager: Arc<ChainManager>,
    pub monitors: Arc<MonitorRegistry>,
    pub rescue: Arc<TransactionRescue>,
    pub orchestrator: Arc<DeploymentOrchestrator>,
    pub store: Arc<dyn DeploymentStore>,
    pub estimator: Arc<GasEstimator>,
    pub started_at: Instant,
}

/// Build the API routes
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/networks", get(get_networks))
        .route("/networks/:network/gas", get(estimate_gas))
        .route("/networks/:network/stuck", get(get_stuck))
        .route("/networks/:network/stuck/clear", post(clear_stuck))
        .route("/modules", get(get_modules))
        .route("/deployments/preview", post(preview_deployment))
        .route("/deployments", post(create_deployment).get(list_deployments))
        .route("/stats", get(get_stats))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the HTTP API server
pub async fn run_server(config: ApiConfig, state: AppState) -> DeployerResult<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting API server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| DeployerError::Config(format!("API bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| DeployerError::Internal(format!("API server: {}", e)))?;

    Ok(())
}

/// JSON error body with a status code per error kind
pub struct ApiError(DeployerError);

impl From<DeployerError> for ApiError {
    fn from(err: DeployerError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            DeployerError::Validation { .. } | DeployerError::InvalidGasConfig(_) => {
                StatusCode::BAD_REQUEST
            }
            DeployerError::NetworkNotFound { .. } => StatusCode::NOT_FOUND,
            DeployerError::DeploymentLocked { .. }
            | DeployerError::RescueInProgress { .. }
            | DeployerError::DeploymentInProgress { .. } => StatusCode::CONFLICT,
            DeployerError::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            DeployerError::ChainConnection { .. } | DeployerError::Deployment(_) => {
                StatusCode::BAD_GATEWAY
            }
            DeployerError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        crate::metrics::record_api_error(self.0.kind());
        if self.0.should_alert() {
            error!("Request failed, operator action needed: {}", self.0);
        } else if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }

        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: self.0.kind(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Health check endpoint - basic liveness
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Readiness check - verify all dependencies
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.store.health_check().await.is_ok();

    let chain_health = state.chain_manager.health_check().await;
    let chains_ok = chain_health.iter().all(|(_, healthy)| *healthy);
    let ready = db_ok && chains_ok;

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            ready,
            database: db_ok,
            networks: chains_ok,
            details: chain_health
                .into_iter()
                .map(|(network, healthy)| NetworkHealth { network, healthy })
                .collect(),
        }),
    )
}

/// Connected networks with their fee model and lock state
async fn get_networks(State(state): State<AppState>) -> ApiResult<Vec<NetworkResponse>> {
    let mut networks = Vec::new();

    for key in state.chain_manager.connected_networks() {
        let handle = state.chain_manager.get(&key)?;
        let settings = &handle.settings;
        let network = settings.network();
        let locked = match state.monitors.get(&key) {
            Ok(monitor) => monitor.is_locked().await,
            Err(_) => false,
        };

        networks.push(NetworkResponse {
            key,
            blockchain: settings.blockchain,
            environment: settings.environment,
            chain_id: settings.chain_id(),
            explorer_url: settings.explorer().base_url().to_string(),
            supports_eip1559: network.supports_eip1559(),
            gas_price_strategy: settings.gas_price_strategy,
            max_gas_price_gwei: settings.max_gas_price_gwei,
            factory_deployment: settings.factory_address.is_some(),
            recommended_confirmations: network.recommended_confirmations(),
            deployments_locked: locked,
        });
    }

    Ok(Json(networks))
}

#[derive(Debug, Deserialize)]
struct GasQuery {
    priority: Option<String>,
}

async fn estimate_gas(
    State(state): State<AppState>,
    Path(network): Path<String>,
    Query(query): Query<GasQuery>,
) -> ApiResult<GasEstimateResponse> {
    let priority = match query.priority.as_deref() {
        Some(p) => p.parse::<FeePriority>()?,
        None => FeePriority::default(),
    };

    let handle = state.chain_manager.get(&network)?;
    let estimate = state
        .estimator
        .estimate(handle.rpc.as_ref(), &handle.settings, priority)
        .await?;

    Ok(Json(GasEstimateResponse {
        network,
        priority,
        fee: GasPriceView::from(&estimate.price),
        base_fee_gwei: estimate.base_fee.map(wei_to_gwei),
        capped: estimate.capped,
    }))
}

#[derive(Debug, Deserialize)]
struct StuckQuery {
    #[serde(default)]
    refresh: bool,
}

/// Last stuck-transaction reading; `?refresh=true` polls the network first
async fn get_stuck(
    State(state): State<AppState>,
    Path(network): Path<String>,
    Query(query): Query<StuckQuery>,
) -> ApiResult<MonitorSnapshot> {
    let monitor = state.monitors.get(&network)?;
    if query.refresh {
        return Ok(Json(monitor.check().await?));
    }
    Ok(Json(monitor.snapshot().await))
}

async fn clear_stuck(
    State(state): State<AppState>,
    Path(network): Path<String>,
) -> ApiResult<RescueReport> {
    Ok(Json(state.rescue.clear_all(&network).await?))
}

async fn get_modules() -> Json<Vec<ModuleInfo>> {
    Json(catalog())
}

async fn preview_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeploymentRequest>,
) -> ApiResult<DeploymentPlan> {
    Ok(Json(state.orchestrator.plan(&request).await?))
}

async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeploymentRequest>,
) -> Result<(StatusCode, Json<DeploymentResult>), ApiError> {
    let result = state.orchestrator.deploy(&request).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    limit: Option<i64>,
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<DeploymentRecord>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.store.list_deployments(limit).await?))
}

/// Get deployment statistics
async fn get_stats(State(state): State<AppState>) -> ApiResult<DeploymentStats> {
    Ok(Json(state.store.stats().await?))
}

// Response types

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_seconds: u64,
}

#[derive(Serialize)]
struct ReadinessResponse {
    ready: bool,
    database: bool,
    networks: bool,
    details: Vec<NetworkHealth>,
}

#[derive(Serialize)]
struct NetworkHealth {
    network: String,
    healthy: bool,
}

#[derive(Serialize)]
struct NetworkResponse {
    key: String,
    blockchain: Blockchain,
    environment: NetworkEnvironment,
    chain_id: u64,
    explorer_url: String,
    supports_eip1559: bool,
    gas_price_strategy: GasPriceStrategy,
    max_gas_price_gwei: u64,
    factory_deployment: bool,
    recommended_confirmations: u64,
    deployments_locked: bool,
}

#[derive(Serialize)]
struct GasEstimateResponse {
    network: String,
    priority: FeePriority,
    fee: GasPriceView,
    base_fee_gwei: Option<String>,
    capped: bool,
}
