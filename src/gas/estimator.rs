//! Fee estimation for the different network fee models

use super::{units::GWEI, GasPrice};
use crate::chain::ChainRpc;
use crate::config::{GasPriceStrategy, NetworkSettings};
use crate::error::{DeployerError, DeployerResult};

use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// How aggressively to bid for inclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeePriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl FeePriority {
    /// Multiplier applied to the priority fee (or legacy gas price), in percent
    pub fn multiplier_percent(&self) -> u64 {
        match self {
            FeePriority::Low => 80,
            FeePriority::Medium => 100,
            FeePriority::High => 150,
            FeePriority::Urgent => 200,
        }
    }
}

impl fmt::Display for FeePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FeePriority::Low => "low",
            FeePriority::Medium => "medium",
            FeePriority::High => "high",
            FeePriority::Urgent => "urgent",
        };
        f.write_str(s)
    }
}

impl FromStr for FeePriority {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(FeePriority::Low),
            "medium" => Ok(FeePriority::Medium),
            "high" => Ok(FeePriority::High),
            "urgent" => Ok(FeePriority::Urgent),
            other => Err(DeployerError::validation(
                "priority",
                format!("unknown fee priority '{}'", other),
            )),
        }
    }
}

/// Result of a fee estimation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeeEstimate {
    pub priority: FeePriority,
    pub price: GasPrice,
    pub base_fee: Option<U256>,
    /// The configured gas-price cap lowered the estimate
    pub capped: bool,
}

impl FeeEstimate {
    pub fn is_eip1559(&self) -> bool {
        self.price.is_eip1559()
    }
}

/// Gas estimator for deployments and replacement transactions
pub struct GasEstimator {
    /// Buffer percentage for gas price
    gas_price_buffer_percent: u64,
    /// Priority fee before the priority multiplier
    base_priority_fee: U256,
}

impl GasEstimator {
    /// Create a new gas estimator
    pub fn new() -> Self {
        Self {
            gas_price_buffer_percent: 10,
            base_priority_fee: U256::from(2) * GWEI,
        }
    }

    /// Estimate fees for a network at the given priority
    pub async fn estimate(
        &self,
        rpc: &dyn ChainRpc,
        network: &NetworkSettings,
        priority: FeePriority,
    ) -> DeployerResult<FeeEstimate> {
        let cap = U256::from(network.max_gas_price_gwei) * GWEI;
        let wants_eip1559 = matches!(
            network.gas_price_strategy,
            GasPriceStrategy::Eip1559 | GasPriceStrategy::Optimism
        ) && network.network().supports_eip1559();

        let base_fee = if wants_eip1559 {
            rpc.latest_base_fee().await?
        } else {
            None
        };

        let estimate = match base_fee {
            Some(base_fee) => self.eip1559_from_base_fee(base_fee, priority, cap),
            None => {
                // Arbitrum uses L1 + L2 gas model; its node-reported price is authoritative
                let network_price = rpc.gas_price().await?;
                self.legacy_from_network_price(network_price, priority, cap)
            }
        };

        debug!(
            "Fee estimate for chain {} ({}): {:?}",
            rpc.chain_id(),
            priority,
            estimate.price
        );
        Ok(estimate)
    }

    /// max_fee = 2 * base_fee + priority_fee, buffered, then capped
    pub fn eip1559_from_base_fee(
        &self,
        base_fee: U256,
        priority: FeePriority,
        cap: U256,
    ) -> FeeEstimate {
        let priority_fee = self.base_priority_fee * priority.multiplier_percent() / 100;
        let max_fee = self.buffered(base_fee * 2 + priority_fee);

        let capped = max_fee > cap;
        let max_fee = std::cmp::min(max_fee, cap);
        let priority_fee = std::cmp::min(priority_fee, max_fee);

        FeeEstimate {
            priority,
            price: GasPrice::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority_fee,
            },
            base_fee: Some(base_fee),
            capped,
        }
    }

    pub fn legacy_from_network_price(
        &self,
        network_price: U256,
        priority: FeePriority,
        cap: U256,
    ) -> FeeEstimate {
        let price = self.buffered(network_price * priority.multiplier_percent() / 100);
        let capped = price > cap;

        FeeEstimate {
            priority,
            price: GasPrice::Legacy(std::cmp::min(price, cap)),
            base_fee: None,
            capped,
        }
    }

    fn buffered(&self, value: U256) -> U256 {
        value + value * self.gas_price_buffer_percent / 100
    }

    /// Calculate speed-up gas price for stuck transaction
    pub fn speed_up_gas_price(current: &GasPrice, factor: u64) -> GasPrice {
        match current {
            GasPrice::Legacy(price) => GasPrice::Legacy(*price * factor / 100),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => GasPrice::Eip1559 {
                max_fee_per_gas: *max_fee_per_gas * factor / 100,
                max_priority_fee_per_gas: *max_priority_fee_per_gas * factor / 100,
            },
        }
    }

    /// Calculate total cost in wei
    pub fn calculate_cost(gas_limit: U256, gas_price: &GasPrice) -> DeployerResult<U256> {
        gas_limit.checked_mul(gas_price.fee_cap()).ok_or_else(|| {
            DeployerError::InvalidGasConfig(format!(
                "gas limit {} at {} wei per gas overflows the cost",
                gas_limit,
                gas_price.fee_cap()
            ))
        })
    }
}

impl Default for GasEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::network::Blockchain;
    use crate::chain::provider::MockChainRpc;
    use crate::chain::tests::network_settings;

    fn gwei(n: u64) -> U256 {
        U256::from(n) * GWEI
    }

    #[test]
    fn eip1559_formula_applies_buffer_and_priority() {
        let estimator = GasEstimator::new();
        let estimate = estimator.eip1559_from_base_fee(gwei(10), FeePriority::Medium, gwei(500));

        // (2 * 10 + 2) * 1.1 = 24.2 gwei
        assert_eq!(
            estimate.price,
            GasPrice::Eip1559 {
                max_fee_per_gas: U256::from(24_200_000_000u64),
                max_priority_fee_per_gas: gwei(2),
            }
        );
        assert!(!estimate.capped);

        let urgent = estimator.eip1559_from_base_fee(gwei(10), FeePriority::Urgent, gwei(500));
        assert_eq!(
            urgent.price.priority_fee(),
            Some(gwei(4)),
        );
    }

    #[test]
    fn estimates_respect_cap() {
        let estimator = GasEstimator::new();
        let estimate = estimator.eip1559_from_base_fee(gwei(300), FeePriority::High, gwei(100));
        assert!(estimate.capped);
        assert_eq!(estimate.price.fee_cap(), gwei(100));

        let legacy = estimator.legacy_from_network_price(gwei(100), FeePriority::Low, gwei(50));
        assert!(legacy.capped);
        assert_eq!(legacy.price, GasPrice::Legacy(gwei(50)));
    }

    #[tokio::test]
    async fn falls_back_to_legacy_without_base_fee() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(11155111u64);
        rpc.expect_latest_base_fee().returning(|| Ok(None));
        rpc.expect_gas_price().returning(|| Ok(U256::from(20) * GWEI));

        let network = network_settings(Blockchain::Ethereum, GasPriceStrategy::Eip1559);
        let estimate = GasEstimator::new()
            .estimate(&rpc, &network, FeePriority::Medium)
            .await
            .unwrap();

        assert!(!estimate.is_eip1559());
        assert_eq!(estimate.price, GasPrice::Legacy(gwei(22)));
    }

    #[tokio::test]
    async fn legacy_networks_never_query_base_fee() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(97u64);
        rpc.expect_latest_base_fee().never();
        rpc.expect_gas_price().returning(|| Ok(U256::from(5) * GWEI));

        // BSC ignores an eip1559 strategy
        let network = network_settings(Blockchain::Bsc, GasPriceStrategy::Eip1559);
        let estimate = GasEstimator::new()
            .estimate(&rpc, &network, FeePriority::Medium)
            .await
            .unwrap();

        assert_eq!(estimate.price, GasPrice::Legacy(U256::from(5_500_000_000u64)));
    }

    #[test]
    fn speed_up_scales_both_fees() {
        let price = GasPrice::Eip1559 {
            max_fee_per_gas: gwei(40),
            max_priority_fee_per_gas: gwei(2),
        };
        assert_eq!(
            GasEstimator::speed_up_gas_price(&price, 150),
            GasPrice::Eip1559 {
                max_fee_per_gas: gwei(60),
                max_priority_fee_per_gas: gwei(3),
            }
        );
        assert_eq!(
            GasEstimator::calculate_cost(U256::from(21_000), &GasPrice::Legacy(gwei(10)))
                .unwrap(),
            U256::from(210_000_000_000_000u64)
        );
    }

    #[test]
    fn cost_overflow_is_an_error() {
        let price = GasPrice::Eip1559 {
            max_fee_per_gas: U256::exp10(74),
            max_priority_fee_per_gas: gwei(1),
        };
        assert!(matches!(
            GasEstimator::calculate_cost(U256::from(3_000_000), &price),
            Err(DeployerError::InvalidGasConfig(_))
        ));
    }
}
