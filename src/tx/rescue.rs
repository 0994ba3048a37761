//! Replace stuck transactions with zero-value self-transfers
//!
//! Each stuck nonce gets a cancellation at a bumped fee. Cancellations are
//! sent concurrently and then awaited concurrently.

use super::monitor::MonitorRegistry;
use super::sender::TransactionSender;
use super::stuck::{self, StuckTransactionInfo};
use crate::chain::{BlockTag, ChainManager, ConfirmationWaiter, NetworkHandle};
use crate::config::MonitorConfig;
use crate::error::DeployerResult;
use crate::gas::units::GWEI;
use crate::gas::{FeePriority, GasEstimator, GasPrice, GasPriceView};
use crate::state::{DeploymentStore, RescueRecord};

use ethers::types::{H256, U256};
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Percentage a replacement must pay over the transaction it replaces
const REPLACEMENT_MIN_PERCENT: u64 = 110;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplacedTransaction {
    pub nonce: u64,
    pub tx_hash: H256,
    pub explorer_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedReplacement {
    pub nonce: u64,
    pub error: String,
}

/// Outcome of a rescue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RescueReport {
    pub network: String,
    pub attempted: u64,
    pub replaced: Vec<ReplacedTransaction>,
    pub failed: Vec<FailedReplacement>,
    /// Nonces no longer pending after the wait
    pub confirmed: Vec<u64>,
    pub unconfirmed: Vec<u64>,
    pub replacement_fee: Option<GasPriceView>,
}

impl RescueReport {
    fn empty(network: &str) -> Self {
        Self {
            network: network.to_string(),
            attempted: 0,
            replaced: Vec::new(),
            failed: Vec::new(),
            confirmed: Vec::new(),
            unconfirmed: Vec::new(),
            replacement_fee: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty() && self.unconfirmed.is_empty()
    }
}

/// Clears stuck transactions of the deployer wallet
pub struct TransactionRescue {
    chains: Arc<ChainManager>,
    monitors: Arc<MonitorRegistry>,
    sender: Arc<TransactionSender>,
    store: Arc<dyn DeploymentStore>,
    estimator: GasEstimator,
    config: MonitorConfig,
}

impl TransactionRescue {
    pub fn new(
        chains: Arc<ChainManager>,
        monitors: Arc<MonitorRegistry>,
        sender: Arc<TransactionSender>,
        store: Arc<dyn DeploymentStore>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            chains,
            monitors,
            sender,
            store,
            estimator: GasEstimator::new(),
            config,
        }
    }

    /// Replace every stuck transaction on `network` and wait for the results.
    ///
    /// Only one rescue per network runs at a time. Deployments on the network
    /// stay locked until it finishes.
    pub async fn clear_all(&self, network: &str) -> DeployerResult<RescueReport> {
        let handle = self.chains.get(network)?;
        let monitor = self.monitors.get(network)?;

        monitor.begin_rescue().await?;
        info!("Rescue started on {}", network);

        let result = self.rescue(&handle, network).await;
        monitor.end_rescue().await;

        if let Err(e) = monitor.check().await {
            warn!("Post-rescue check on {} failed: {}", network, e);
        }

        match &result {
            Ok(report) => info!(
                "Rescue on {} finished: {} replaced, {} failed, {} confirmed, {} unconfirmed",
                network,
                report.replaced.len(),
                report.failed.len(),
                report.confirmed.len(),
                report.unconfirmed.len()
            ),
            Err(e) => error!("Rescue on {} failed: {}", network, e),
        }
        result
    }

    async fn rescue(&self, handle: &NetworkHandle, network: &str) -> DeployerResult<RescueReport> {
        let rpc = handle.rpc.clone();
        let address = self.sender.address();

        let info = stuck::detect(rpc.as_ref(), address).await?;
        if !info.has_stuck() {
            info!("No stuck transactions on {}", network);
            return Ok(RescueReport::empty(network));
        }

        let fee = self.replacement_fee(handle, &info).await?;
        let chain_id = handle.chain_id();
        let explorer = handle.settings.explorer();

        let sends = info.stuck_nonces.iter().map(|&nonce| {
            let tx = self.sender.build_cancellation(chain_id, nonce, &fee);
            let rpc = rpc.clone();
            async move { (nonce, self.sender.send(rpc.as_ref(), &tx).await) }
        });
        let results = join_all(sends).await;

        let mut report = RescueReport {
            attempted: info.stuck_count,
            replacement_fee: Some(GasPriceView::from(&fee)),
            ..RescueReport::empty(network)
        };

        for (nonce, result) in results {
            let record = match &result {
                Ok(hash) => {
                    crate::metrics::record_rescue_transaction(network, "submitted");
                    report.replaced.push(ReplacedTransaction {
                        nonce,
                        tx_hash: *hash,
                        explorer_url: explorer.tx_url(&format!("{:?}", hash)),
                    });
                    RescueRecord {
                        network: network.to_string(),
                        nonce,
                        tx_hash: Some(format!("{:?}", hash)),
                        status: "submitted".to_string(),
                    }
                }
                Err(e) => {
                    crate::metrics::record_rescue_transaction(network, "failed");
                    warn!("Cancellation for nonce {} on {} failed: {}", nonce, network, e);
                    report.failed.push(FailedReplacement {
                        nonce,
                        error: e.to_string(),
                    });
                    RescueRecord {
                        network: network.to_string(),
                        nonce,
                        tx_hash: None,
                        status: "failed".to_string(),
                    }
                }
            };

            if let Err(e) = self.store.record_rescue(&record).await {
                warn!("Failed to record rescue of nonce {}: {}", nonce, e);
            }
        }

        let hashes: Vec<H256> = report.replaced.iter().map(|r| r.tx_hash).collect();
        let waiter = ConfirmationWaiter::new(
            rpc.clone(),
            1,
            Duration::from_millis(self.config.confirmation_poll_ms),
            Duration::from_secs(self.config.confirmation_timeout_secs),
        );
        let receipts: HashMap<H256, bool> = waiter
            .wait_for_all(&hashes)
            .await
            .into_iter()
            .map(|(hash, result)| (hash, result.is_ok()))
            .collect();

        // A nonce is cleared once the chain moves past it, whichever
        // transaction ended up taking it
        match rpc.transaction_count(address, BlockTag::Latest).await {
            Ok(latest) => {
                for &nonce in &info.stuck_nonces {
                    if nonce < latest {
                        report.confirmed.push(nonce);
                    } else {
                        report.unconfirmed.push(nonce);
                    }
                }
            }
            Err(e) => {
                warn!("Could not re-read nonce on {}: {}", network, e);
                for &nonce in &info.stuck_nonces {
                    let confirmed = report
                        .replaced
                        .iter()
                        .find(|r| r.nonce == nonce)
                        .and_then(|r| receipts.get(&r.tx_hash))
                        .copied()
                        .unwrap_or(false);
                    if confirmed {
                        report.confirmed.push(nonce);
                    } else {
                        report.unconfirmed.push(nonce);
                    }
                }
            }
        }

        Ok(report)
    }

    /// Current High-priority fee bumped by `gas_bump_percent`, and never
    /// below what a node accepts as a replacement of the stuck entries
    async fn replacement_fee(
        &self,
        handle: &NetworkHandle,
        info: &StuckTransactionInfo,
    ) -> DeployerResult<GasPrice> {
        let settings = &handle.settings;
        let estimate = self
            .estimator
            .estimate(handle.rpc.as_ref(), settings, FeePriority::High)
            .await?;

        let mut fee = GasEstimator::speed_up_gas_price(&estimate.price, self.config.gas_bump_percent)
            .for_network(settings.network().supports_eip1559());

        if let Some(highest) = info.highest_pool_price() {
            fee = fee.at_least(&replacement_floor(&highest));
        }

        let cap = U256::from(settings.max_gas_price_gwei) * GWEI;
        if fee.fee_cap() > cap {
            // Clearing the account matters more than the cap here
            warn!(
                "Replacement fee on {} exceeds the {} gwei cap",
                handle.key(),
                settings.max_gas_price_gwei
            );
        }
        Ok(fee)
    }
}

/// Smallest fee a node accepts as a replacement of `price`
pub fn replacement_floor(price: &GasPrice) -> GasPrice {
    let bump = |value: U256| (value * REPLACEMENT_MIN_PERCENT + 99) / 100;
    match price {
        GasPrice::Legacy(p) => GasPrice::Legacy(bump(*p)),
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => GasPrice::Eip1559 {
            max_fee_per_gas: bump(*max_fee_per_gas),
            max_priority_fee_per_gas: bump(*max_priority_fee_per_gas),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::MockChainRpc;
    use crate::chain::tests::{handle, network_settings};
    use crate::chain::Blockchain;
    use crate::config::GasPriceStrategy;
    use crate::error::DeployerError;
    use crate::state::MockDeploymentStore;
    use crate::tx::sender::tests::test_sender;
    use crate::tx::stuck::tests::pool_tx;
    use ethers::types::{TransactionReceipt, U64};
    use ethers::utils::keccak256;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn gwei(n: u64) -> U256 {
        U256::from(n) * GWEI
    }

    fn monitor_config() -> MonitorConfig {
        MonitorConfig {
            debounce_ms: 0,
            release_after_ms: 0,
            confirmation_timeout_secs: 2,
            confirmation_poll_ms: 5,
            ..MonitorConfig::default()
        }
    }

    fn rescue(rpc: MockChainRpc, store: MockDeploymentStore) -> TransactionRescue {
        let sender = Arc::new(test_sender());
        let chains = Arc::new(ChainManager::from_handles(vec![handle(
            network_settings(Blockchain::Ethereum, GasPriceStrategy::Eip1559),
            rpc,
        )]));
        let config = monitor_config();
        let monitors = Arc::new(MonitorRegistry::new(&chains, sender.address(), &config));
        TransactionRescue::new(chains, monitors, sender, Arc::new(store), config)
    }

    #[test]
    fn floor_is_ten_percent_rounded_up() {
        assert_eq!(
            replacement_floor(&GasPrice::Legacy(U256::from(101))),
            GasPrice::Legacy(U256::from(112))
        );
        assert_eq!(
            replacement_floor(&GasPrice::Eip1559 {
                max_fee_per_gas: gwei(40),
                max_priority_fee_per_gas: gwei(2),
            }),
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(44),
                max_priority_fee_per_gas: U256::from(2_200_000_000u64),
            }
        );
    }

    #[tokio::test]
    async fn nothing_stuck_sends_nothing() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(11155111u64);
        rpc.expect_transaction_count().returning(|_, _| Ok(9));
        rpc.expect_pending_transactions().returning(|_| Ok(Vec::new()));
        rpc.expect_send_raw_transaction().never();

        let report = rescue(rpc, MockDeploymentStore::new())
            .clear_all("ethereum-testnet")
            .await
            .unwrap();

        assert_eq!(report.attempted, 0);
        assert!(report.replaced.is_empty());
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn replaces_every_stuck_nonce() {
        let latest_reads = Arc::new(AtomicUsize::new(0));
        let reads = latest_reads.clone();
        let sent = Arc::new(AtomicUsize::new(0));
        let sent_counter = sent.clone();

        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(11155111u64);
        rpc.expect_transaction_count().returning(move |_, tag| match tag {
            // The first read sees the gap, later reads see it cleared
            BlockTag::Latest if reads.fetch_add(1, Ordering::SeqCst) == 0 => Ok(5),
            _ => Ok(7),
        });
        rpc.expect_pending_transactions()
            .returning(|_| Ok(vec![pool_tx(5, 40_000_000_000, Some(2_000_000_000))]));
        rpc.expect_latest_base_fee().returning(|| Ok(Some(gwei(10))));
        rpc.expect_send_raw_transaction().returning(move |raw| {
            sent_counter.fetch_add(1, Ordering::SeqCst);
            Ok(H256::from(keccak256(&raw)))
        });
        rpc.expect_transaction_receipt().returning(|_| {
            Ok(Some(TransactionReceipt {
                block_number: Some(U64::from(100)),
                status: Some(U64::from(1)),
                ..Default::default()
            }))
        });
        rpc.expect_block_number().returning(|| Ok(101));

        let mut store = MockDeploymentStore::new();
        store
            .expect_record_rescue()
            .times(2)
            .returning(|_| Ok(()));

        let rescue = rescue(rpc, store);
        let report = rescue.clear_all("ethereum-testnet").await.unwrap();

        assert_eq!(sent.load(Ordering::SeqCst), 2);
        assert_eq!(report.attempted, 2);
        assert_eq!(
            report.replaced.iter().map(|r| r.nonce).collect::<Vec<_>>(),
            vec![5, 6]
        );
        assert!(report.replaced[0]
            .explorer_url
            .starts_with("https://sepolia.etherscan.io/tx/0x"));
        assert_eq!(report.confirmed, vec![5, 6]);
        assert!(report.is_complete());

        // High estimate is 25.3 gwei max / 3 gwei tip, bumped 150%, then
        // floored at 110% of the 40 gwei pool entry
        let fee = report.replacement_fee.unwrap();
        assert_eq!(fee.max_fee_per_gas_gwei.as_deref(), Some("44"));
        assert_eq!(fee.max_priority_fee_per_gas_gwei.as_deref(), Some("4.5"));

        let monitor = rescue.monitors.get("ethereum-testnet").unwrap();
        assert!(!monitor.is_locked().await);
    }

    #[tokio::test]
    async fn failed_sends_are_reported() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(11155111u64);
        rpc.expect_transaction_count()
            .returning(|_, tag| Ok(if tag == BlockTag::Latest { 3 } else { 4 }));
        rpc.expect_pending_transactions().returning(|_| Ok(Vec::new()));
        rpc.expect_latest_base_fee().returning(|| Ok(Some(gwei(10))));
        rpc.expect_send_raw_transaction()
            .returning(|_| Err(DeployerError::Transaction("insufficient funds".to_string())));

        let mut store = MockDeploymentStore::new();
        store
            .expect_record_rescue()
            .withf(|r| r.status == "failed" && r.tx_hash.is_none())
            .times(1)
            .returning(|_| Ok(()));

        let report = rescue(rpc, store)
            .clear_all("ethereum-testnet")
            .await
            .unwrap();

        assert!(report.replaced.is_empty());
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].nonce, 3);
        assert_eq!(report.unconfirmed, vec![3]);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn concurrent_rescue_is_rejected() {
        let rescue = rescue(MockChainRpc::new(), MockDeploymentStore::new());
        let monitor = rescue.monitors.get("ethereum-testnet").unwrap();
        monitor.begin_rescue().await.unwrap();

        assert!(matches!(
            rescue.clear_all("ethereum-testnet").await,
            Err(DeployerError::RescueInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn unknown_network_is_rejected() {
        let rescue = rescue(MockChainRpc::new(), MockDeploymentStore::new());
        assert!(matches!(
            rescue.clear_all("base-mainnet").await,
            Err(DeployerError::NetworkNotFound { .. })
        ));
    }
}
