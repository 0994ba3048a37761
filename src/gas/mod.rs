//! Gas and fee configuration
//!
//! Handles:
//! - Fee estimation per network fee model (legacy vs EIP-1559)
//! - Reconciliation of estimator and manual fee entry
//! - gwei/wei unit conversion

mod configuration;
mod estimator;
pub mod units;

pub use configuration::{GasConfiguration, GasMode, ResolvedGas, DEFAULT_PRIORITY_FEE, MIN_GAS_LIMIT};
pub use estimator::{FeeEstimate, FeePriority, GasEstimator};

use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Gas price types, in wei
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GasPrice {
    Legacy(U256),
    Eip1559 {
        max_fee_per_gas: U256,
        max_priority_fee_per_gas: U256,
    },
}

impl GasPrice {
    pub fn is_eip1559(&self) -> bool {
        matches!(self, GasPrice::Eip1559 { .. })
    }

    /// Highest fee per gas the transaction may pay
    pub fn fee_cap(&self) -> U256 {
        match self {
            GasPrice::Legacy(price) => *price,
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } => *max_fee_per_gas,
        }
    }

    pub fn priority_fee(&self) -> Option<U256> {
        match self {
            GasPrice::Legacy(_) => None,
            GasPrice::Eip1559 {
                max_priority_fee_per_gas,
                ..
            } => Some(*max_priority_fee_per_gas),
        }
    }

    /// Express the price in the fee model a network supports
    pub fn for_network(self, supports_eip1559: bool) -> GasPrice {
        match self {
            GasPrice::Eip1559 {
                max_fee_per_gas, ..
            } if !supports_eip1559 => GasPrice::Legacy(max_fee_per_gas),
            other => other,
        }
    }

    /// Raise each component to at least the matching component of `floor`.
    /// A legacy floor bounds both EIP-1559 components, as nodes compare a
    /// legacy gas price against both when judging a replacement.
    pub fn at_least(self, floor: &GasPrice) -> GasPrice {
        let floor_tip = floor.priority_fee().unwrap_or_else(|| floor.fee_cap());
        match self {
            GasPrice::Legacy(price) => GasPrice::Legacy(std::cmp::max(price, floor.fee_cap())),
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                let max_fee_per_gas = std::cmp::max(max_fee_per_gas, floor.fee_cap());
                GasPrice::Eip1559 {
                    max_fee_per_gas,
                    max_priority_fee_per_gas: std::cmp::min(
                        std::cmp::max(max_priority_fee_per_gas, floor_tip),
                        max_fee_per_gas,
                    ),
                }
            }
        }
    }
}

/// Serialize a [`GasPrice`] as gwei strings for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GasPriceView {
    pub is_eip1559: bool,
    pub gas_price_gwei: Option<String>,
    pub max_fee_per_gas_gwei: Option<String>,
    pub max_priority_fee_per_gas_gwei: Option<String>,
}

impl From<&GasPrice> for GasPriceView {
    fn from(price: &GasPrice) -> Self {
        match price {
            GasPrice::Legacy(p) => Self {
                is_eip1559: false,
                gas_price_gwei: Some(units::wei_to_gwei(*p)),
                max_fee_per_gas_gwei: None,
                max_priority_fee_per_gas_gwei: None,
            },
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => Self {
                is_eip1559: true,
                gas_price_gwei: None,
                max_fee_per_gas_gwei: Some(units::wei_to_gwei(*max_fee_per_gas)),
                max_priority_fee_per_gas_gwei: Some(units::wei_to_gwei(
                    *max_priority_fee_per_gas,
                )),
            },
        }
    }
}
