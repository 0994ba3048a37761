//! Deployment orchestration: validate, price, choose a strategy, submit

use super::payload::{DeploymentPayload, DeploymentPlan, DeploymentRequest, DeploymentResult};
use super::service::DeploymentService;
use super::strategy::select_strategy;
use crate::chain::{ChainManager, NetworkHandle};
use crate::config::DeploymentConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::gas::{GasEstimator, GasMode, GasPriceView};
use crate::state::{DeploymentRecord, DeploymentStatus, DeploymentStore, DeploymentUpdate};
use crate::tx::{MonitorRegistry, TransactionSender};

use chrono::Utc;
use ethers::utils::format_ether;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Drives a token deployment from request to recorded result
pub struct DeploymentOrchestrator {
    chains: Arc<ChainManager>,
    monitors: Arc<MonitorRegistry>,
    sender: Arc<TransactionSender>,
    service: Arc<dyn DeploymentService>,
    store: Arc<dyn DeploymentStore>,
    estimator: GasEstimator,
    config: DeploymentConfig,
}

impl DeploymentOrchestrator {
    pub fn new(
        chains: Arc<ChainManager>,
        monitors: Arc<MonitorRegistry>,
        sender: Arc<TransactionSender>,
        service: Arc<dyn DeploymentService>,
        store: Arc<dyn DeploymentStore>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            chains,
            monitors,
            sender,
            service,
            store,
            estimator: GasEstimator::new(),
            config,
        }
    }

    /// Validate a request and work out everything a deployment would send
    pub async fn plan(&self, request: &DeploymentRequest) -> DeployerResult<DeploymentPlan> {
        self.prepare(request).await.map(|(plan, _)| plan)
    }

    async fn prepare(
        &self,
        request: &DeploymentRequest,
    ) -> DeployerResult<(DeploymentPlan, NetworkHandle)> {
        request.token.validate()?;
        request.modules.validate()?;
        request.modules.check_applicable(request.token.standard)?;

        let handle = self.chains.get(&request.network)?;
        let settings = &handle.settings;

        let mut gas_configuration = request.gas.clone();
        let estimate = match gas_configuration.mode {
            GasMode::Estimator => {
                let estimate = self
                    .estimator
                    .estimate(handle.rpc.as_ref(), settings, request.priority)
                    .await?;
                gas_configuration.apply_estimate(&estimate);
                Some(estimate)
            }
            GasMode::Manual => None,
        };

        let resolved = gas_configuration.resolve(
            settings.network().supports_eip1559(),
            estimate.as_ref(),
            self.config.default_gas_limit,
        )?;

        let selection = select_strategy(
            request.strategy,
            &request.token,
            &request.modules,
            settings,
            &self.config,
        )?;

        let payload = DeploymentPayload::new(
            &request.token,
            &request.modules,
            settings,
            self.sender.address(),
            selection.strategy,
            &resolved,
        )?;

        let cost = GasEstimator::calculate_cost(resolved.gas_limit, &resolved.price)?;

        let plan = DeploymentPlan {
            network: handle.key(),
            chain_id: handle.chain_id(),
            strategy: selection,
            priority: request.priority,
            gas_configuration,
            gas_limit: resolved.gas_limit.low_u64(),
            fee: GasPriceView::from(&resolved.price),
            estimated_cost_wei: cost.to_string(),
            estimated_cost: format_ether(cost),
            fee_capped: estimate.map(|e| e.capped).unwrap_or(false),
            payload,
            cost_wei: cost,
        };
        Ok((plan, handle))
    }

    /// Deploy a token. Refused while the network has stuck transactions;
    /// holds off rescues on the network until it returns.
    pub async fn deploy(&self, request: &DeploymentRequest) -> DeployerResult<DeploymentResult> {
        let _in_flight = match self.monitors.get(&request.network) {
            Ok(monitor) => Some(monitor.begin_deployment().await?),
            Err(_) => None,
        };

        let (plan, handle) = self.prepare(request).await?;

        let balance = self.sender.balance(handle.rpc.as_ref()).await?;
        if balance < plan.cost_wei {
            return Err(DeployerError::InsufficientBalance {
                chain_id: plan.chain_id,
                have: format_ether(balance),
                need: format_ether(plan.cost_wei),
            });
        }

        let record = DeploymentRecord {
            id: Uuid::new_v4(),
            token_name: plan.payload.name.clone(),
            token_symbol: plan.payload.symbol.clone(),
            standard: plan.payload.standard.to_string(),
            network: plan.network.clone(),
            chain_id: plan.chain_id,
            strategy: plan.strategy.strategy.to_string(),
            deployer_address: format!("{:?}", self.sender.address()),
            status: DeploymentStatus::Pending,
            contract_address: None,
            tx_hash: None,
            error: None,
            payload: serde_json::to_value(&plan.payload)
                .map_err(|e| DeployerError::Internal(format!("serializing payload: {}", e)))?,
            created_at: Utc::now(),
        };
        self.store.record_deployment(&record).await?;

        info!(
            "Deploying {} ({}) on {} via {} [{}]",
            record.token_name, record.token_symbol, plan.network, record.strategy, record.id
        );

        let started = Instant::now();
        let outcome = self.service.deploy(&plan.payload).await;
        let elapsed = started.elapsed().as_secs_f64();

        match outcome {
            Ok(deployed) => {
                crate::metrics::record_deployment(&plan.network, &record.strategy, "deployed", elapsed);

                let contract_address = format!("{:?}", deployed.contract_address);
                let tx_hash = format!("{:?}", deployed.tx_hash);
                let update = DeploymentUpdate {
                    id: record.id,
                    status: DeploymentStatus::Deployed,
                    contract_address: Some(contract_address.clone()),
                    tx_hash: Some(tx_hash.clone()),
                    error: None,
                };
                if let Err(e) = self.store.update_deployment(&update).await {
                    // The contract exists on chain; losing the record must not hide that
                    error!("Deployment {} succeeded but could not be recorded: {}", record.id, e);
                }

                info!(
                    "Deployed {} on {} at {} (tx {})",
                    record.token_symbol, plan.network, contract_address, tx_hash
                );

                let explorer = handle.settings.explorer();
                Ok(DeploymentResult {
                    deployment_id: record.id,
                    network: plan.network,
                    chain_id: plan.chain_id,
                    strategy: plan.strategy.strategy,
                    contract_address: deployed.contract_address,
                    tx_hash: deployed.tx_hash,
                    block_number: deployed.block_number,
                    module_addresses: deployed.module_addresses,
                    contract_url: explorer.address_url(&contract_address),
                    tx_url: explorer.tx_url(&tx_hash),
                })
            }
            Err(e) => {
                crate::metrics::record_deployment(&plan.network, &record.strategy, "failed", elapsed);
                warn!("Deployment {} failed: {}", record.id, e);

                let update = DeploymentUpdate {
                    id: record.id,
                    status: DeploymentStatus::Failed,
                    contract_address: None,
                    tx_hash: None,
                    error: Some(e.to_string()),
                };
                if let Err(store_err) = self.store.update_deployment(&update).await {
                    error!("Could not record failure of {}: {}", record.id, store_err);
                }
                Err(e)
            }
        }
    }
}
