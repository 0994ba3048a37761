//! Chain provider with multi-RPC support and automatic failover

use crate::config::NetworkSettings;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Which block state a nonce query reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockTag {
    Latest,
    Pending,
}

impl From<BlockTag> for BlockId {
    fn from(tag: BlockTag) -> Self {
        match tag {
            BlockTag::Latest => BlockNumber::Latest.into(),
            BlockTag::Pending => BlockNumber::Pending.into(),
        }
    }
}

/// A transaction from the node's pending pool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolTransaction {
    pub hash: H256,
    pub nonce: u64,
    pub to: Option<Address>,
    pub value: U256,
    pub gas_price: Option<U256>,
    pub max_fee_per_gas: Option<U256>,
    pub max_priority_fee_per_gas: Option<U256>,
}

impl PoolTransaction {
    /// Highest fee per gas this transaction may pay
    pub fn effective_fee_cap(&self) -> U256 {
        self.max_fee_per_gas
            .or(self.gas_price)
            .unwrap_or_default()
    }
}

impl From<&Transaction> for PoolTransaction {
    fn from(tx: &Transaction) -> Self {
        Self {
            hash: tx.hash,
            nonce: tx.nonce.low_u64(),
            to: tx.to,
            value: tx.value,
            gas_price: tx.gas_price,
            max_fee_per_gas: tx.max_fee_per_gas,
            max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        }
    }
}

/// Pool entries sent from `address`, ordered by nonce
///
/// Queued entries sit above a nonce gap and are just as stuck as pending
/// ones. Where both sections hold the same nonce the pending entry wins.
pub(crate) fn pool_entries(content: &TxpoolContent, address: Address) -> Vec<PoolTransaction> {
    let mut by_nonce: BTreeMap<u64, PoolTransaction> = BTreeMap::new();
    for section in [&content.queued, &content.pending] {
        if let Some(txs) = section.get(&address) {
            for tx in txs.values() {
                let entry = PoolTransaction::from(tx);
                by_nonce.insert(entry.nonce, entry);
            }
        }
    }
    by_nonce.into_values().collect()
}

/// Read/write access to one chain, as needed by gas estimation, stuck
/// transaction monitoring and rescue.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainRpc: Send + Sync {
    fn chain_id(&self) -> u64;

    async fn block_number(&self) -> DeployerResult<u64>;

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> DeployerResult<u64>;

    async fn gas_price(&self) -> DeployerResult<U256>;

    /// Base fee of the latest block, `None` on chains without EIP-1559
    async fn latest_base_fee(&self) -> DeployerResult<Option<U256>>;

    async fn balance(&self, address: Address) -> DeployerResult<U256>;

    /// Pool entries sent from `address`; empty when the node hides its txpool
    async fn pending_transactions(&self, address: Address) -> DeployerResult<Vec<PoolTransaction>>;

    async fn send_raw_transaction(&self, raw: Bytes) -> DeployerResult<H256>;

    async fn transaction_receipt(&self, tx_hash: H256)
        -> DeployerResult<Option<TransactionReceipt>>;
}

/// Multi-provider wrapper with automatic failover
pub struct ChainProvider {
    chain_id: u64,
    network_key: String,
    /// HTTP providers (multiple for failover)
    http_providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
}

impl ChainProvider {
    /// Create a new chain provider
    pub fn new(settings: &NetworkSettings) -> DeployerResult<Self> {
        let chain_id = settings.chain_id();
        let mut http_providers = Vec::new();

        for url in &settings.rpc_urls {
            match Provider::<Http>::try_from(url.as_str()) {
                Ok(provider) => {
                    let provider = provider.interval(Duration::from_millis(500));
                    http_providers.push(provider);
                    debug!("Added HTTP provider for chain {}: {}", chain_id, url);
                }
                Err(e) => {
                    warn!("Failed to create provider for {}: {}", url, e);
                }
            }
        }

        if http_providers.is_empty() {
            return Err(DeployerError::ChainConnection {
                chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            chain_id,
            network_key: settings.network().key(),
            http_providers,
            current_provider: AtomicUsize::new(0),
        })
    }

    /// Get the active HTTP provider
    pub fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.http_providers[idx % self.http_providers.len()]
    }

    /// Switch to next available provider
    pub fn failover(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.http_providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!("Network {} failover to provider {}", self.network_key, next);
    }

    /// Run a read against each provider in turn until one succeeds
    async fn with_failover<T, F, Fut>(&self, operation: &str, call: F) -> DeployerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = String::new();

        for _ in 0..self.http_providers.len() {
            match call(self.http().clone()).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(
                        "{} failed on network {}: {}",
                        operation, self.network_key, e
                    );
                    last_error = e.to_string();
                    self.failover();
                }
            }
        }

        Err(DeployerError::ChainConnection {
            chain_id: self.chain_id,
            message: format!("All providers failed {}: {}", operation, last_error),
        })
    }
}

#[async_trait]
impl ChainRpc for ChainProvider {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn block_number(&self) -> DeployerResult<u64> {
        self.with_failover("get_block_number", |p| async move {
            p.get_block_number().await.map(|b| b.as_u64())
        })
        .await
    }

    async fn transaction_count(&self, address: Address, tag: BlockTag) -> DeployerResult<u64> {
        self.with_failover("get_transaction_count", |p| async move {
            p.get_transaction_count(address, Some(tag.into())).await
        })
        .await
        .map(|n| n.as_u64())
        .map_err(|e| DeployerError::Nonce {
            chain_id: self.chain_id,
            message: e.to_string(),
        })
    }

    async fn gas_price(&self) -> DeployerResult<U256> {
        self.with_failover("get_gas_price", |p| async move { p.get_gas_price().await })
            .await
            .map_err(|e| DeployerError::GasEstimation(e.to_string()))
    }

    async fn latest_base_fee(&self) -> DeployerResult<Option<U256>> {
        let block = self
            .with_failover("get_block", |p| async move {
                p.get_block(BlockNumber::Latest).await
            })
            .await
            .map_err(|e| DeployerError::GasEstimation(e.to_string()))?
            .ok_or_else(|| DeployerError::GasEstimation("No latest block".to_string()))?;

        Ok(block.base_fee_per_gas)
    }

    async fn balance(&self, address: Address) -> DeployerResult<U256> {
        self.with_failover("get_balance", |p| async move {
            p.get_balance(address, None).await
        })
        .await
    }

    async fn pending_transactions(&self, address: Address) -> DeployerResult<Vec<PoolTransaction>> {
        // Public RPCs commonly disable the txpool namespace; treat that as "unknown"
        match self.http().txpool_content().await {
            Ok(content) => Ok(pool_entries(&content, address)),
            Err(e) => {
                debug!(
                    "txpool_content unavailable on network {}: {}",
                    self.network_key, e
                );
                Ok(Vec::new())
            }
        }
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> DeployerResult<H256> {
        // Not retried across providers: a resend could be mistaken for a replacement
        self.http()
            .send_raw_transaction(raw)
            .await
            .map(|pending| pending.tx_hash())
            .map_err(|e| DeployerError::Transaction(e.to_string()))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: H256,
    ) -> DeployerResult<Option<TransactionReceipt>> {
        self.with_failover("get_transaction_receipt", |p| async move {
            p.get_transaction_receipt(tx_hash).await
        })
        .await
    }
}

/// Health check for any chain client
pub async fn health_check(rpc: &dyn ChainRpc) -> bool {
    match rpc.block_number().await {
        Ok(_) => true,
        Err(e) => {
            error!("Health check failed for chain {}: {}", rpc.chain_id(), e);
            false
        }
    }
}
