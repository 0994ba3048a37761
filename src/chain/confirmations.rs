//! Waiting for submitted transactions to be mined and confirmed

use crate::chain::ChainRpc;
use crate::error::{DeployerError, DeployerResult};

use ethers::types::{TransactionReceipt, H256, U64};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

/// Polls receipts until a transaction has enough confirmations
pub struct ConfirmationWaiter {
    rpc: Arc<dyn ChainRpc>,
    /// Blocks including the receipt's own block
    required_confirmations: u64,
    poll_interval: Duration,
    timeout: Duration,
}

impl ConfirmationWaiter {
    pub fn new(
        rpc: Arc<dyn ChainRpc>,
        required_confirmations: u64,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            required_confirmations: required_confirmations.max(1),
            poll_interval,
            timeout,
        }
    }

    /// Wait for a single transaction; fails with `Timeout` when it never confirms
    pub async fn wait_for(&self, tx_hash: H256) -> DeployerResult<TransactionReceipt> {
        match timeout(self.timeout, self.poll_until_confirmed(tx_hash)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Transaction {:?} not confirmed on chain {} within {:?}",
                    tx_hash,
                    self.rpc.chain_id(),
                    self.timeout
                );
                Err(DeployerError::Timeout {
                    operation: format!("confirmation of {:?}", tx_hash),
                })
            }
        }
    }

    /// Wait for many transactions concurrently, sharing one deadline
    pub async fn wait_for_all(
        &self,
        tx_hashes: &[H256],
    ) -> Vec<(H256, DeployerResult<TransactionReceipt>)> {
        let waits = tx_hashes.iter().map(|hash| async move {
            let result = self.wait_for(*hash).await;
            (*hash, result)
        });
        join_all(waits).await
    }

    async fn poll_until_confirmed(&self, tx_hash: H256) -> DeployerResult<TransactionReceipt> {
        loop {
            match self.rpc.transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if let Some(block) = receipt.block_number {
                        let current = self.rpc.block_number().await?;
                        let confirmations = confirmations_at(block, current);

                        if confirmations >= self.required_confirmations {
                            if receipt.status == Some(U64::from(1)) {
                                info!(
                                    "Transaction {:?} confirmed on chain {} ({} confirmations)",
                                    tx_hash,
                                    self.rpc.chain_id(),
                                    confirmations
                                );
                                return Ok(receipt);
                            }
                            return Err(DeployerError::Transaction(format!(
                                "transaction {:?} reverted",
                                tx_hash
                            )));
                        }

                        debug!(
                            "Transaction {:?} has {} / {} confirmations",
                            tx_hash, confirmations, self.required_confirmations
                        );
                    }
                }
                Ok(None) => {
                    debug!("Transaction {:?} not yet mined", tx_hash);
                }
                Err(e) if e.is_retryable() => {
                    warn!("Receipt lookup for {:?} failed: {}", tx_hash, e);
                }
                Err(e) => return Err(e),
            }

            sleep(self.poll_interval).await;
        }
    }
}

/// Confirmations of a receipt mined in `block` when the chain head is `current`
fn confirmations_at(block: U64, current: u64) -> u64 {
    current.saturating_sub(block.as_u64()) + 1
}
