//! Transaction signing and submission with retry

use crate::chain::ChainRpc;
use crate::config::DeployerConfig;
use crate::error::{DeployerError, DeployerResult};
use crate::gas::{GasPrice, MIN_GAS_LIMIT};

use ethers::prelude::*;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::utils::keccak256;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

/// Signs with the deployer wallet and submits through a chain client
pub struct TransactionSender {
    /// Wallet for signing
    wallet: LocalWallet,
    max_retries: u32,
    retry_delay: Duration,
    send_timeout: Duration,
}

impl TransactionSender {
    pub fn new(wallet: LocalWallet, config: &DeployerConfig) -> Self {
        info!("Transaction sender initialized with wallet: {:?}", wallet.address());
        Self {
            wallet,
            max_retries: config.max_retries.max(1),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            send_timeout: Duration::from_secs(30),
        }
    }

    /// Load wallet from the configured environment variable
    pub fn load_wallet(private_key_env: &str) -> DeployerResult<LocalWallet> {
        let key = std::env::var(private_key_env).map_err(|_| {
            DeployerError::Wallet(format!(
                "No wallet configured. Set {} to a hex private key",
                private_key_env
            ))
        })?;

        key.trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| DeployerError::Wallet(format!("Invalid private key: {}", e)))
    }

    /// Get wallet address
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Zero-value transfer to our own address; replaces whatever holds `nonce`
    pub fn build_cancellation(
        &self,
        chain_id: u64,
        nonce: u64,
        gas_price: &GasPrice,
    ) -> TypedTransaction {
        let address = self.address();
        let gas_limit = U256::from(MIN_GAS_LIMIT);

        let mut tx: TypedTransaction = match gas_price {
            GasPrice::Legacy(price) => TransactionRequest::new()
                .from(address)
                .to(address)
                .value(U256::zero())
                .nonce(nonce)
                .gas(gas_limit)
                .gas_price(*price)
                .into(),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Eip1559TransactionRequest::new()
                .from(address)
                .to(address)
                .value(U256::zero())
                .nonce(nonce)
                .gas(gas_limit)
                .max_fee_per_gas(*max_fee_per_gas)
                .max_priority_fee_per_gas(*max_priority_fee_per_gas)
                .into(),
        };
        tx.set_chain_id(chain_id);
        tx
    }

    /// Sign and send with retry
    pub async fn send(&self, rpc: &dyn ChainRpc, tx: &TypedTransaction) -> DeployerResult<H256> {
        let chain_id = rpc.chain_id();
        let wallet = self.wallet.clone().with_chain_id(chain_id);

        let signature = wallet
            .sign_transaction(tx)
            .await
            .map_err(|e| DeployerError::Wallet(e.to_string()))?;
        let raw = tx.rlp_signed(&signature);
        let local_hash = H256::from(keccak256(&raw));

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.max_retries {
            attempts += 1;

            match timeout(self.send_timeout, rpc.send_raw_transaction(raw.clone())).await {
                Ok(Ok(tx_hash)) => {
                    info!(
                        "Transaction sent on chain {}: {:?} (attempt {}/{})",
                        chain_id, tx_hash, attempts, self.max_retries
                    );
                    return Ok(tx_hash);
                }
                Ok(Err(e)) => {
                    let error_msg = e.to_string().to_lowercase();

                    if error_msg.contains("already known") {
                        // An earlier attempt reached the pool
                        return Ok(local_hash);
                    } else if error_msg.contains("nonce too low") {
                        return Err(DeployerError::Nonce {
                            chain_id,
                            message: "nonce already used".to_string(),
                        });
                    } else if error_msg.contains("insufficient funds") {
                        return Err(DeployerError::InsufficientBalance {
                            chain_id,
                            have: "unknown".to_string(),
                            need: "unknown".to_string(),
                        });
                    } else if error_msg.contains("replacement transaction underpriced") {
                        return Err(DeployerError::Transaction(
                            "replacement transaction underpriced".to_string(),
                        ));
                    }

                    warn!("Send failed on chain {} (attempt {}): {}", chain_id, attempts, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!("Transaction send timeout (attempt {})", attempts);
                    last_error = Some(DeployerError::Timeout {
                        operation: "send transaction".to_string(),
                    });
                }
            }

            if attempts < self.max_retries {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        let err = last_error
            .unwrap_or_else(|| DeployerError::Transaction("Unknown error".to_string()));
        error!("Giving up on transaction for chain {}: {}", chain_id, err);
        Err(err)
    }

    /// Get wallet balance on a chain
    pub async fn balance(&self, rpc: &dyn ChainRpc) -> DeployerResult<U256> {
        rpc.balance(self.address()).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::chain::provider::MockChainRpc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Well-known test key (do not fund)
    pub(crate) const TEST_KEY: &str =
        "4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    pub(crate) fn test_sender() -> TransactionSender {
        let config = DeployerConfig {
            max_retries: 3,
            retry_delay_ms: 1,
            health_check_interval_secs: 30,
        };
        TransactionSender::new(TEST_KEY.parse().unwrap(), &config)
    }

    #[test]
    fn cancellation_is_zero_value_self_transfer() {
        let sender = test_sender();
        let tx = sender.build_cancellation(
            11155111,
            42,
            &GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(50),
                max_priority_fee_per_gas: U256::from(3),
            },
        );

        assert!(matches!(tx, TypedTransaction::Eip1559(_)));
        assert_eq!(tx.to_addr(), Some(&sender.address()));
        assert_eq!(tx.value(), Some(&U256::zero()));
        assert_eq!(tx.nonce(), Some(&U256::from(42)));
        assert_eq!(tx.gas(), Some(&U256::from(21_000)));
        assert_eq!(tx.chain_id(), Some(U64::from(11155111)));

        let legacy = sender.build_cancellation(97, 1, &GasPrice::Legacy(U256::from(7)));
        assert!(matches!(legacy, TypedTransaction::Legacy(_)));
        assert_eq!(legacy.gas_price(), Some(U256::from(7)));
    }

    #[test]
    fn missing_key_env_is_a_wallet_error() {
        let result = TransactionSender::load_wallet("TOKEN_DEPLOYER_TEST_UNSET_KEY");
        assert!(matches!(result, Err(DeployerError::Wallet(_))));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(1u64);
        rpc.expect_send_raw_transaction().returning(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DeployerError::Transaction("connection reset".to_string()))
            } else {
                Ok(H256::from_low_u64_be(7))
            }
        });

        let sender = test_sender();
        let tx = sender.build_cancellation(1, 0, &GasPrice::Legacy(U256::from(1)));
        let hash = sender.send(&rpc, &tx).await.unwrap();

        assert_eq!(hash, H256::from_low_u64_be(7));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn nonce_too_low_is_terminal() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(1u64);
        rpc.expect_send_raw_transaction()
            .times(1)
            .returning(|_| Err(DeployerError::Transaction("nonce too low".to_string())));

        let sender = test_sender();
        let tx = sender.build_cancellation(1, 0, &GasPrice::Legacy(U256::from(1)));
        assert!(matches!(
            sender.send(&rpc, &tx).await,
            Err(DeployerError::Nonce { .. })
        ));
    }

    #[tokio::test]
    async fn already_known_returns_local_hash() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(1u64);
        rpc.expect_send_raw_transaction()
            .returning(|_| Err(DeployerError::Transaction("already known".to_string())));

        let sender = test_sender();
        let tx = sender.build_cancellation(1, 0, &GasPrice::Legacy(U256::from(1)));
        let hash = sender.send(&rpc, &tx).await.unwrap();
        assert_ne!(hash, H256::zero());
    }
}
