//! Chain module - network resolution and provider access
//!
//! This module provides:
//! - Blockchain/environment resolution to chain IDs and explorer links
//! - Multi-RPC provider management with automatic failover
//! - Confirmation waiting for submitted transactions

pub mod confirmations;
pub mod network;
pub mod provider;

pub use confirmations::ConfirmationWaiter;
pub use network::{Blockchain, Explorer, NetworkConfiguration, NetworkEnvironment};
pub use provider::{BlockTag, ChainProvider, ChainRpc, PoolTransaction};

use crate::config::{NetworkSettings, Settings};
use crate::error::{DeployerError, DeployerResult};

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A connected network: its settings plus a provider
#[derive(Clone)]
pub struct NetworkHandle {
    pub settings: NetworkSettings,
    pub rpc: Arc<dyn ChainRpc>,
}

impl NetworkHandle {
    pub fn key(&self) -> String {
        self.settings.network().key()
    }

    pub fn chain_id(&self) -> u64 {
        self.settings.chain_id()
    }
}

/// Manages connections to all configured networks
pub struct ChainManager {
    /// Networks indexed by `<blockchain>-<environment>` key
    networks: DashMap<String, NetworkHandle>,
}

impl ChainManager {
    /// Create a chain manager with providers for all enabled networks
    pub fn new(settings: &Settings) -> DeployerResult<Self> {
        let networks = DashMap::new();

        for (key, network) in settings.enabled_networks() {
            info!(
                "Initializing network {} (chain ID: {})",
                key,
                network.chain_id()
            );

            match ChainProvider::new(network) {
                Ok(provider) => {
                    networks.insert(
                        key.clone(),
                        NetworkHandle {
                            settings: network.clone(),
                            rpc: Arc::new(provider),
                        },
                    );
                }
                Err(e) => warn!("Skipping network {}: {}", key, e),
            }
        }

        if networks.is_empty() {
            return Err(DeployerError::Config(
                "No network could be initialized".to_string(),
            ));
        }

        Ok(Self { networks })
    }

    /// Build a manager from already constructed clients
    pub fn from_handles(handles: Vec<NetworkHandle>) -> Self {
        let networks = DashMap::new();
        for handle in handles {
            networks.insert(handle.key(), handle);
        }
        Self { networks }
    }

    /// Get the handle for a network key
    pub fn get(&self, network: &str) -> DeployerResult<NetworkHandle> {
        self.networks
            .get(network)
            .map(|n| n.clone())
            .ok_or_else(|| DeployerError::NetworkNotFound {
                network: network.to_string(),
            })
    }

    /// Get provider for a specific network
    pub fn get_provider(&self, network: &str) -> DeployerResult<Arc<dyn ChainRpc>> {
        self.get(network).map(|n| n.rpc)
    }

    /// All connected network keys, sorted
    pub fn connected_networks(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.networks.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Health check for all networks
    pub async fn health_check(&self) -> Vec<(String, bool)> {
        let handles: Vec<NetworkHandle> = self.networks.iter().map(|e| e.value().clone()).collect();
        let mut results = Vec::new();

        for handle in handles {
            let healthy = provider::health_check(handle.rpc.as_ref()).await;
            crate::metrics::record_chain_health(&handle.key(), healthy);
            results.push((handle.key(), healthy));
        }

        results.sort();
        results
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::GasPriceStrategy;
    use crate::chain::provider::MockChainRpc;

    pub(crate) fn network_settings(
        blockchain: Blockchain,
        strategy: GasPriceStrategy,
    ) -> NetworkSettings {
        NetworkSettings {
            blockchain,
            environment: NetworkEnvironment::Testnet,
            chain_id: None,
            rpc_urls: vec!["http://localhost:8545".to_string()],
            explorer_url: None,
            factory_address: None,
            gas_price_strategy: strategy,
            max_gas_price_gwei: 500,
            enabled: true,
        }
    }

    pub(crate) fn handle(settings: NetworkSettings, rpc: MockChainRpc) -> NetworkHandle {
        NetworkHandle {
            settings,
            rpc: Arc::new(rpc),
        }
    }

    #[tokio::test]
    async fn health_check_reports_each_network() {
        let mut healthy = MockChainRpc::new();
        healthy.expect_block_number().returning(|| Ok(100));
        healthy.expect_chain_id().return_const(11155111u64);

        let mut broken = MockChainRpc::new();
        broken.expect_block_number().returning(|| {
            Err(DeployerError::ChainConnection {
                chain_id: 80002,
                message: "connection refused".to_string(),
            })
        });
        broken.expect_chain_id().return_const(80002u64);

        let manager = ChainManager::from_handles(vec![
            handle(
                network_settings(Blockchain::Ethereum, GasPriceStrategy::Eip1559),
                healthy,
            ),
            handle(
                network_settings(Blockchain::Polygon, GasPriceStrategy::Eip1559),
                broken,
            ),
        ]);

        assert_eq!(
            manager.connected_networks(),
            vec!["ethereum-testnet".to_string(), "polygon-testnet".to_string()]
        );

        let health = manager.health_check().await;
        assert_eq!(
            health,
            vec![
                ("ethereum-testnet".to_string(), true),
                ("polygon-testnet".to_string(), false)
            ]
        );
    }

    #[test]
    fn unknown_network_is_an_error() {
        let manager = ChainManager::from_handles(Vec::new());
        assert!(matches!(
            manager.get("base-mainnet"),
            Err(DeployerError::NetworkNotFound { .. })
        ));
    }
}
