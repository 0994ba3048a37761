//! Requests, plans and results of a token deployment

use super::strategy::{DeploymentStrategy, StrategySelection};
use crate::chain::{Blockchain, NetworkEnvironment};
use crate::config::NetworkSettings;
use crate::error::DeployerResult;
use crate::gas::{FeePriority, GasConfiguration, GasPrice, GasPriceView, ResolvedGas};
use crate::token::{ExtensionModuleConfigs, TokenConfig, TokenFeatures, TokenStandard};

use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// A token deployment as submitted by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRequest {
    pub token: TokenConfig,
    #[serde(default)]
    pub modules: ExtensionModuleConfigs,
    /// Network key, e.g. `ethereum-testnet`
    pub network: String,
    #[serde(default)]
    pub gas: GasConfiguration,
    #[serde(default)]
    pub priority: FeePriority,
    #[serde(default)]
    pub strategy: Option<DeploymentStrategy>,
}

/// The single flat document handed to the deployment backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentPayload {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub total_supply: String,
    /// Supply scaled by decimals, as a decimal string
    pub initial_supply_base_units: String,
    pub standard: TokenStandard,
    #[serde(flatten)]
    pub features: TokenFeatures,
    pub description: Option<String>,
    pub base_uri: Option<String>,
    pub asset_address: Option<String>,
    pub value_decimals: Option<u8>,

    pub network: String,
    pub blockchain: Blockchain,
    pub environment: NetworkEnvironment,
    pub chain_id: u64,
    pub deployer_address: Address,
    pub strategy: DeploymentStrategy,
    pub factory_address: Option<String>,

    pub gas_limit: u64,
    pub is_eip1559: bool,
    /// Fees in wei, as decimal strings
    pub gas_price: Option<String>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,

    #[serde(flatten)]
    pub modules: BTreeMap<String, Value>,
}

impl DeploymentPayload {
    /// Assemble the backend document from validated parts
    pub fn new(
        token: &TokenConfig,
        modules: &ExtensionModuleConfigs,
        network: &NetworkSettings,
        deployer_address: Address,
        strategy: DeploymentStrategy,
        gas: &ResolvedGas,
    ) -> DeployerResult<Self> {
        let (gas_price, max_fee_per_gas, max_priority_fee_per_gas) = match gas.price {
            GasPrice::Legacy(price) => (Some(price.to_string()), None, None),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => (
                None,
                Some(max_fee_per_gas.to_string()),
                Some(max_priority_fee_per_gas.to_string()),
            ),
        };
        let factory_address = match strategy {
            DeploymentStrategy::FactoryClone => network.factory_address.clone(),
            _ => None,
        };

        Ok(Self {
            name: token.name.trim().to_string(),
            symbol: token.symbol.clone(),
            decimals: token.decimals,
            total_supply: token.total_supply.trim().to_string(),
            initial_supply_base_units: token.total_supply_base_units()?.to_string(),
            standard: token.standard,
            features: token.features,
            description: token.metadata.description.clone(),
            base_uri: token.metadata.base_uri.clone(),
            asset_address: token.metadata.asset_address.clone(),
            value_decimals: token.metadata.value_decimals,
            network: network.network().key(),
            blockchain: network.blockchain,
            environment: network.environment,
            chain_id: network.chain_id(),
            deployer_address,
            strategy,
            factory_address,
            gas_limit: gas.gas_limit.low_u64(),
            is_eip1559: gas.price.is_eip1559(),
            gas_price,
            max_fee_per_gas,
            max_priority_fee_per_gas,
            modules: modules.flatten()?,
        })
    }
}

/// Preview of a deployment; nothing has been sent
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentPlan {
    pub network: String,
    pub chain_id: u64,
    pub strategy: StrategySelection,
    pub priority: FeePriority,
    /// Gas settings after the fee estimate was applied
    pub gas_configuration: GasConfiguration,
    pub gas_limit: u64,
    pub fee: GasPriceView,
    /// Upper bound: gas limit times the fee cap
    pub estimated_cost_wei: String,
    pub estimated_cost: String,
    pub fee_capped: bool,
    pub payload: DeploymentPayload,
    #[serde(skip)]
    pub(crate) cost_wei: U256,
}

/// What the deployment backend reports back
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendDeployment {
    pub contract_address: Address,
    pub tx_hash: H256,
    #[serde(default)]
    pub block_number: Option<u64>,
    /// Module name to module contract, for split deployments
    #[serde(default)]
    pub module_addresses: BTreeMap<String, Address>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeploymentResult {
    pub deployment_id: Uuid,
    pub network: String,
    pub chain_id: u64,
    pub strategy: DeploymentStrategy,
    pub contract_address: Address,
    pub tx_hash: H256,
    pub block_number: Option<u64>,
    pub module_addresses: BTreeMap<String, Address>,
    pub contract_url: String,
    pub tx_url: String,
}
