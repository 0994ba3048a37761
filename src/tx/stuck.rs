//! Nonce-gap analysis for stuck transaction detection
//!
//! A wallet's confirmed nonce (`latest`) trailing its pending nonce means
//! transactions were accepted by the pool but not mined. Those nonces block
//! every later transaction from the same account.

use crate::chain::{BlockTag, ChainRpc, PoolTransaction};
use crate::error::DeployerResult;
use crate::gas::GasPrice;

use ethers::types::Address;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::debug;

/// Snapshot of an account's nonce state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StuckTransactionInfo {
    pub latest_nonce: u64,
    pub pending_nonce: u64,
    pub stuck_count: u64,
    pub stuck_nonces: Vec<u64>,
    pub pending_txs: Vec<PoolTransaction>,
}

impl StuckTransactionInfo {
    /// Compute the gap between the confirmed and pending nonce
    pub fn analyze(latest_nonce: u64, pending_nonce: u64, pool: Vec<PoolTransaction>) -> Self {
        // Entries below `latest` were mined between the two reads
        let pending_txs: Vec<PoolTransaction> = pool
            .into_iter()
            .filter(|tx| tx.nonce >= latest_nonce)
            .collect();

        let mut nonces: BTreeSet<u64> = (latest_nonce..pending_nonce.max(latest_nonce)).collect();
        nonces.extend(pending_txs.iter().map(|tx| tx.nonce));
        let stuck_nonces: Vec<u64> = nonces.into_iter().collect();

        Self {
            latest_nonce,
            pending_nonce,
            stuck_count: stuck_nonces.len() as u64,
            stuck_nonces,
            pending_txs,
        }
    }

    pub fn has_stuck(&self) -> bool {
        self.stuck_count > 0
    }

    /// Highest fee among the pool entries, the floor a replacement must beat
    pub fn highest_pool_price(&self) -> Option<GasPrice> {
        self.pending_txs
            .iter()
            .map(|tx| match (tx.max_fee_per_gas, tx.max_priority_fee_per_gas) {
                (Some(max_fee), Some(tip)) => GasPrice::Eip1559 {
                    max_fee_per_gas: max_fee,
                    max_priority_fee_per_gas: tip,
                },
                _ => GasPrice::Legacy(tx.effective_fee_cap()),
            })
            .max_by_key(|price| (price.fee_cap(), price.priority_fee().unwrap_or_default()))
    }
}

/// Read the nonce state of `address` from the chain
pub async fn detect(rpc: &dyn ChainRpc, address: Address) -> DeployerResult<StuckTransactionInfo> {
    let latest = rpc.transaction_count(address, BlockTag::Latest).await?;
    let pending = rpc.transaction_count(address, BlockTag::Pending).await?;
    let pool = rpc.pending_transactions(address).await?;

    let info = StuckTransactionInfo::analyze(latest, pending, pool);
    debug!(
        "Chain {} nonce state for {:?}: latest={} pending={} stuck={}",
        rpc.chain_id(),
        address,
        info.latest_nonce,
        info.pending_nonce,
        info.stuck_count
    );
    Ok(info)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::provider::MockChainRpc;
    use ethers::types::{H256, U256};

    pub(crate) fn pool_tx(nonce: u64, max_fee: u64, tip: Option<u64>) -> PoolTransaction {
        PoolTransaction {
            hash: H256::from_low_u64_be(1000 + nonce),
            nonce,
            to: None,
            value: U256::zero(),
            gas_price: if tip.is_none() { Some(U256::from(max_fee)) } else { None },
            max_fee_per_gas: tip.map(|_| U256::from(max_fee)),
            max_priority_fee_per_gas: tip.map(U256::from),
        }
    }

    #[test]
    fn no_gap_means_nothing_stuck() {
        let info = StuckTransactionInfo::analyze(7, 7, Vec::new());
        assert!(!info.has_stuck());
        assert!(info.stuck_nonces.is_empty());
        assert_eq!(info.highest_pool_price(), None);
    }

    #[test]
    fn gap_lists_every_missing_nonce() {
        let info = StuckTransactionInfo::analyze(4, 7, Vec::new());
        assert_eq!(info.stuck_count, 3);
        assert_eq!(info.stuck_nonces, vec![4, 5, 6]);
    }

    #[test]
    fn pending_below_latest_is_not_a_gap() {
        // Reads raced a block: pending was read from an older state
        let info = StuckTransactionInfo::analyze(9, 8, Vec::new());
        assert_eq!(info.stuck_count, 0);
    }

    #[test]
    fn pool_entries_extend_and_filter() {
        let pool = vec![pool_tx(3, 50, None), pool_tx(5, 40, Some(2)), pool_tx(8, 90, None)];
        let info = StuckTransactionInfo::analyze(4, 6, pool);

        assert_eq!(info.stuck_nonces, vec![4, 5, 8]);
        assert_eq!(info.stuck_count, 3);
        assert_eq!(info.pending_txs.len(), 2);
        assert_eq!(
            info.highest_pool_price(),
            Some(GasPrice::Legacy(U256::from(90)))
        );
    }

    #[tokio::test]
    async fn detect_reads_both_nonces() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(1u64);
        rpc.expect_transaction_count()
            .returning(|_, tag| Ok(if tag == BlockTag::Latest { 10 } else { 12 }));
        rpc.expect_pending_transactions()
            .returning(|_| Ok(vec![pool_tx(10, 30, Some(1))]));

        let info = detect(&rpc, Address::zero()).await.unwrap();
        assert_eq!(info.latest_nonce, 10);
        assert_eq!(info.pending_nonce, 12);
        assert_eq!(info.stuck_nonces, vec![10, 11]);
        assert_eq!(
            info.highest_pool_price(),
            Some(GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(30),
                max_priority_fee_per_gas: U256::from(1),
            })
        );
    }
}
