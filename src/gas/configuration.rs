//! User-facing gas configuration and its reconciliation into a concrete fee

use super::units::{gwei_to_wei, non_blank, wei_to_gwei};
use super::{FeeEstimate, GasPrice};
use crate::error::{DeployerError, DeployerResult};

use ethers::types::U256;
use serde::{Deserialize, Serialize};

/// Intrinsic gas of a plain transfer; nothing can use less
pub const MIN_GAS_LIMIT: u64 = 21_000;

/// Priority fee used when a manual entry only gives a single price (1.5 gwei)
pub const DEFAULT_PRIORITY_FEE: U256 = U256([1_500_000_000, 0, 0, 0]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GasMode {
    #[default]
    Estimator,
    Manual,
}

/// Gas settings as entered by a user; fees are decimal gwei strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasConfiguration {
    pub mode: GasMode,
    pub gas_price: Option<String>,
    pub gas_limit: Option<u64>,
    pub max_fee_per_gas: Option<String>,
    pub max_priority_fee_per_gas: Option<String>,
    pub is_eip1559: bool,
}

impl Default for GasConfiguration {
    fn default() -> Self {
        Self {
            mode: GasMode::Estimator,
            gas_price: None,
            gas_limit: None,
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            is_eip1559: true,
        }
    }
}

/// Fee and limit ready to be put on a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedGas {
    pub gas_limit: U256,
    pub price: GasPrice,
}

impl GasConfiguration {
    /// Accept a fee estimate from the estimator. Only estimator mode takes
    /// it; manual entries are never overwritten. Returns whether anything
    /// changed.
    pub fn apply_estimate(&mut self, estimate: &FeeEstimate) -> bool {
        if self.mode != GasMode::Estimator {
            return false;
        }

        let before = self.clone();
        match estimate.price {
            GasPrice::Legacy(price) => {
                self.gas_price = Some(wei_to_gwei(price));
                self.max_fee_per_gas = None;
                self.max_priority_fee_per_gas = None;
                self.is_eip1559 = false;
            }
            GasPrice::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            } => {
                self.gas_price = None;
                self.max_fee_per_gas = Some(wei_to_gwei(max_fee_per_gas));
                self.max_priority_fee_per_gas = Some(wei_to_gwei(max_priority_fee_per_gas));
                self.is_eip1559 = true;
            }
        }
        *self != before
    }

    /// Switch between estimator and manual entry. Switching to manual keeps
    /// the last estimate as the starting point; switching back drops it.
    pub fn set_mode(&mut self, mode: GasMode) {
        if self.mode == mode {
            return;
        }
        if mode == GasMode::Estimator {
            self.gas_price = None;
            self.max_fee_per_gas = None;
            self.max_priority_fee_per_gas = None;
        }
        self.mode = mode;
    }

    /// Reconcile the configuration against a network's fee model.
    ///
    /// `estimate` is required in estimator mode and ignored otherwise.
    pub fn resolve(
        &self,
        supports_eip1559: bool,
        estimate: Option<&FeeEstimate>,
        default_gas_limit: u64,
    ) -> DeployerResult<ResolvedGas> {
        let gas_limit = self.gas_limit.unwrap_or(default_gas_limit);
        if gas_limit < MIN_GAS_LIMIT {
            return Err(DeployerError::InvalidGasConfig(format!(
                "gas limit {} is below the {} minimum",
                gas_limit, MIN_GAS_LIMIT
            )));
        }

        let price = match self.mode {
            GasMode::Estimator => estimate
                .ok_or_else(|| {
                    DeployerError::InvalidGasConfig(
                        "estimator mode requires a fee estimate".to_string(),
                    )
                })?
                .price
                .for_network(supports_eip1559),
            GasMode::Manual => self.manual_price(supports_eip1559)?,
        };

        validate_price(&price)?;

        Ok(ResolvedGas {
            gas_limit: U256::from(gas_limit),
            price,
        })
    }

    fn manual_price(&self, supports_eip1559: bool) -> DeployerResult<GasPrice> {
        let gas_price = non_blank(&self.gas_price).map(gwei_to_wei).transpose()?;
        let max_fee = non_blank(&self.max_fee_per_gas).map(gwei_to_wei).transpose()?;
        let priority = non_blank(&self.max_priority_fee_per_gas)
            .map(gwei_to_wei)
            .transpose()?;

        if supports_eip1559 && self.is_eip1559 {
            let max_fee = max_fee.or(gas_price).ok_or_else(|| {
                DeployerError::InvalidGasConfig(
                    "max fee per gas is required for EIP-1559 transactions".to_string(),
                )
            })?;
            let priority =
                priority.unwrap_or_else(|| std::cmp::min(max_fee, DEFAULT_PRIORITY_FEE));

            Ok(GasPrice::Eip1559 {
                max_fee_per_gas: max_fee,
                max_priority_fee_per_gas: priority,
            })
        } else {
            let price = gas_price.or(max_fee).ok_or_else(|| {
                DeployerError::InvalidGasConfig(
                    "gas price is required for legacy transactions".to_string(),
                )
            })?;
            Ok(GasPrice::Legacy(price))
        }
    }
}

fn validate_price(price: &GasPrice) -> DeployerResult<()> {
    match price {
        GasPrice::Legacy(p) if p.is_zero() => Err(DeployerError::InvalidGasConfig(
            "gas price must be greater than zero".to_string(),
        )),
        GasPrice::Eip1559 {
            max_fee_per_gas,
            max_priority_fee_per_gas,
        } => {
            if max_fee_per_gas.is_zero() {
                return Err(DeployerError::InvalidGasConfig(
                    "max fee per gas must be greater than zero".to_string(),
                ));
            }
            if max_priority_fee_per_gas > max_fee_per_gas {
                return Err(DeployerError::InvalidGasConfig(format!(
                    "priority fee {} gwei exceeds max fee {} gwei",
                    wei_to_gwei(*max_priority_fee_per_gas),
                    wei_to_gwei(*max_fee_per_gas)
                )));
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
