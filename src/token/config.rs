//! Token definition and its validation

use crate::error::{DeployerError, DeployerResult};
use crate::gas::units::check_scalable;

use ethers::types::{Address, U256};
use ethers::utils::parse_units;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Highest decimals an ERC-20 style token may declare
pub const MAX_DECIMALS: u8 = 18;

lazy_static! {
    static ref NAME_RE: Regex = Regex::new(r"^[A-Za-z0-9 ._-]{1,64}$").unwrap();
    static ref SYMBOL_RE: Regex = Regex::new(r"^[A-Z][A-Z0-9]{0,10}$").unwrap();
    static ref AMOUNT_RE: Regex = Regex::new(r"^\d+(\.\d+)?$").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStandard {
    Erc20,
    Erc721,
    Erc1155,
    Erc1400,
    Erc3525,
    Erc4626,
}

impl TokenStandard {
    pub const ALL: [TokenStandard; 6] = [
        TokenStandard::Erc20,
        TokenStandard::Erc721,
        TokenStandard::Erc1155,
        TokenStandard::Erc1400,
        TokenStandard::Erc3525,
        TokenStandard::Erc4626,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStandard::Erc20 => "erc20",
            TokenStandard::Erc721 => "erc721",
            TokenStandard::Erc1155 => "erc1155",
            TokenStandard::Erc1400 => "erc1400",
            TokenStandard::Erc3525 => "erc3525",
            TokenStandard::Erc4626 => "erc4626",
        }
    }

    /// Interchangeable balances (ERC-20 and its extensions)
    pub fn is_fungible(&self) -> bool {
        matches!(
            self,
            TokenStandard::Erc20 | TokenStandard::Erc1400 | TokenStandard::Erc4626
        )
    }

    /// Standards whose supply is counted in whole items
    pub fn is_non_fungible(&self) -> bool {
        matches!(self, TokenStandard::Erc721 | TokenStandard::Erc1155)
    }

    /// Contract weight used when choosing a deployment strategy
    pub fn complexity_weight(&self) -> u32 {
        match self {
            TokenStandard::Erc3525 | TokenStandard::Erc1400 => 3,
            TokenStandard::Erc1155 | TokenStandard::Erc4626 => 2,
            TokenStandard::Erc20 | TokenStandard::Erc721 => 1,
        }
    }
}

impl fmt::Display for TokenStandard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TokenStandard {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['-', '_'], "");
        TokenStandard::ALL
            .into_iter()
            .find(|standard| standard.as_str() == normalized)
            .ok_or_else(|| {
                DeployerError::validation("standard", format!("unknown token standard '{}'", s))
            })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenFeatures {
    pub burnable: bool,
    pub mintable: bool,
    pub pausable: bool,
    pub upgradeable: bool,
}

/// Standard-specific and descriptive fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenMetadata {
    pub description: Option<String>,
    pub base_uri: Option<String>,
    /// Underlying asset of an ERC-4626 vault
    pub asset_address: Option<String>,
    /// Decimals of ERC-3525 slot values
    pub value_decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    #[serde(default = "default_decimals")]
    pub decimals: u8,
    /// Decimal string in whole tokens
    #[serde(default)]
    pub total_supply: String,
    pub standard: TokenStandard,
    #[serde(default)]
    pub features: TokenFeatures,
    #[serde(default)]
    pub metadata: TokenMetadata,
}

fn default_decimals() -> u8 {
    MAX_DECIMALS
}

impl TokenConfig {
    pub fn validate(&self) -> DeployerResult<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(DeployerError::validation("name", "name is required"));
        }
        if !NAME_RE.is_match(name) {
            return Err(DeployerError::validation(
                "name",
                "use up to 64 letters, digits, spaces, '-', '_' or '.'",
            ));
        }

        if !SYMBOL_RE.is_match(&self.symbol) {
            return Err(DeployerError::validation(
                "symbol",
                "use 1-11 uppercase letters or digits, starting with a letter",
            ));
        }

        if self.decimals > MAX_DECIMALS {
            return Err(DeployerError::validation(
                "decimals",
                format!("at most {} decimals are supported", MAX_DECIMALS),
            ));
        }
        if self.standard.is_non_fungible() && self.decimals != 0 {
            return Err(DeployerError::validation(
                "decimals",
                format!("{} tokens must use 0 decimals", self.standard),
            ));
        }

        self.validate_supply()?;

        match self.standard {
            TokenStandard::Erc4626 => {
                let asset = self
                    .metadata
                    .asset_address
                    .as_deref()
                    .map(str::trim)
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        DeployerError::validation(
                            "asset_address",
                            "an ERC-4626 vault needs an underlying asset",
                        )
                    })?;
                let parsed = asset.parse::<Address>().map_err(|_| {
                    DeployerError::validation("asset_address", format!("'{}' is not an address", asset))
                })?;
                if parsed.is_zero() {
                    return Err(DeployerError::validation(
                        "asset_address",
                        "the zero address cannot be a vault asset",
                    ));
                }
            }
            TokenStandard::Erc3525 => {
                let value_decimals = self.metadata.value_decimals.ok_or_else(|| {
                    DeployerError::validation("value_decimals", "required for ERC-3525 tokens")
                })?;
                if value_decimals > MAX_DECIMALS {
                    return Err(DeployerError::validation(
                        "value_decimals",
                        format!("at most {} decimals are supported", MAX_DECIMALS),
                    ));
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn validate_supply(&self) -> DeployerResult<()> {
        let supply = self.total_supply.trim();
        let requires_supply = matches!(self.standard, TokenStandard::Erc20 | TokenStandard::Erc1400)
            && !self.features.mintable;

        if supply.is_empty() {
            if requires_supply {
                return Err(DeployerError::validation(
                    "total_supply",
                    "a fixed-supply token needs an initial supply",
                ));
            }
            return Ok(());
        }

        if !AMOUNT_RE.is_match(supply) {
            return Err(DeployerError::validation(
                "total_supply",
                format!("'{}' is not a non-negative decimal number", supply),
            ));
        }

        let fraction_digits = supply.split_once('.').map(|(_, f)| f.len()).unwrap_or(0);
        if fraction_digits > self.decimals as usize {
            return Err(DeployerError::validation(
                "total_supply",
                format!(
                    "{} fractional digits exceed the token's {} decimals",
                    fraction_digits, self.decimals
                ),
            ));
        }

        let base_units = self.total_supply_base_units()?;
        if requires_supply && base_units.is_zero() {
            return Err(DeployerError::validation(
                "total_supply",
                "must be greater than zero unless the token is mintable",
            ));
        }
        Ok(())
    }

    /// Initial supply scaled by `decimals`; zero when none was given
    pub fn total_supply_base_units(&self) -> DeployerResult<U256> {
        let supply = self.total_supply.trim();
        if supply.is_empty() {
            return Ok(U256::zero());
        }
        check_scalable(supply, self.decimals as u32)
            .map_err(|e| DeployerError::validation("total_supply", e))?;
        parse_units(supply, self.decimals as u32)
            .map(Into::into)
            .map_err(|e| DeployerError::validation("total_supply", e.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn erc20() -> TokenConfig {
        TokenConfig {
            name: "Harbor Credit".to_string(),
            symbol: "HBC".to_string(),
            decimals: 18,
            total_supply: "1000000".to_string(),
            standard: TokenStandard::Erc20,
            features: TokenFeatures::default(),
            metadata: TokenMetadata::default(),
        }
    }

    fn field_of(result: DeployerResult<()>) -> String {
        match result {
            Err(DeployerError::Validation { field, .. }) => field,
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[test]
    fn accepts_a_plain_erc20() {
        let token = erc20();
        token.validate().unwrap();
        assert_eq!(
            token.total_supply_base_units().unwrap(),
            U256::from(1_000_000u64) * U256::exp10(18)
        );
    }

    #[test]
    fn parses_standards_leniently() {
        assert_eq!("ERC-20".parse::<TokenStandard>().unwrap(), TokenStandard::Erc20);
        assert_eq!("erc_4626".parse::<TokenStandard>().unwrap(), TokenStandard::Erc4626);
        assert!("erc777".parse::<TokenStandard>().is_err());
    }

    #[test]
    fn rejects_bad_names_and_symbols() {
        let blank = TokenConfig {
            name: "   ".to_string(),
            ..erc20()
        };
        assert_eq!(field_of(blank.validate()), "name");

        let emoji = TokenConfig {
            name: "Rocket 🚀".to_string(),
            ..erc20()
        };
        assert_eq!(field_of(emoji.validate()), "name");

        for symbol in ["hbc", "1HB", "", "ABCDEFGHIJKL"] {
            let token = TokenConfig {
                symbol: symbol.to_string(),
                ..erc20()
            };
            assert_eq!(field_of(token.validate()), "symbol", "symbol {:?}", symbol);
        }
    }

    #[test]
    fn decimals_rules() {
        let too_many = TokenConfig {
            decimals: 19,
            ..erc20()
        };
        assert_eq!(field_of(too_many.validate()), "decimals");

        let nft = TokenConfig {
            standard: TokenStandard::Erc721,
            decimals: 18,
            total_supply: String::new(),
            ..erc20()
        };
        assert_eq!(field_of(nft.validate()), "decimals");

        let nft = TokenConfig { decimals: 0, ..nft };
        nft.validate().unwrap();
    }

    #[test]
    fn supply_rules() {
        let fractional = TokenConfig {
            decimals: 2,
            total_supply: "10.125".to_string(),
            ..erc20()
        };
        assert_eq!(field_of(fractional.validate()), "total_supply");

        let negative = TokenConfig {
            total_supply: "-5".to_string(),
            ..erc20()
        };
        assert_eq!(field_of(negative.validate()), "total_supply");

        let zero = TokenConfig {
            total_supply: "0".to_string(),
            ..erc20()
        };
        assert_eq!(field_of(zero.validate()), "total_supply");

        // Mintable tokens may start empty
        let mintable = TokenConfig {
            total_supply: String::new(),
            features: TokenFeatures {
                mintable: true,
                ..TokenFeatures::default()
            },
            ..erc20()
        };
        mintable.validate().unwrap();
        assert!(mintable.total_supply_base_units().unwrap().is_zero());

        let cents = TokenConfig {
            decimals: 2,
            total_supply: "10.5".to_string(),
            ..erc20()
        };
        assert_eq!(cents.total_supply_base_units().unwrap(), U256::from(1050));
    }

    #[test]
    fn oversized_supply_is_a_validation_error() {
        let huge = TokenConfig {
            total_supply: format!("1{}", "0".repeat(70)),
            ..erc20()
        };
        assert_eq!(field_of(huge.validate()), "total_supply");
        assert!(huge.total_supply_base_units().is_err());

        let mintable = TokenConfig {
            features: TokenFeatures {
                mintable: true,
                ..TokenFeatures::default()
            },
            ..huge
        };
        assert_eq!(field_of(mintable.validate()), "total_supply");

        let largest = TokenConfig {
            total_supply: "9".repeat(59),
            ..erc20()
        };
        largest.validate().unwrap();
    }

    #[test]
    fn vault_needs_an_asset() {
        let vault = TokenConfig {
            standard: TokenStandard::Erc4626,
            ..erc20()
        };
        assert_eq!(field_of(vault.validate()), "asset_address");

        let mut vault = vault;
        vault.metadata.asset_address = Some("0x1234".to_string());
        assert_eq!(field_of(vault.validate()), "asset_address");

        vault.metadata.asset_address =
            Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string());
        vault.validate().unwrap();
    }

    #[test]
    fn semi_fungible_needs_value_decimals() {
        let mut sft = TokenConfig {
            standard: TokenStandard::Erc3525,
            ..erc20()
        };
        assert_eq!(field_of(sft.validate()), "value_decimals");

        sft.metadata.value_decimals = Some(19);
        assert_eq!(field_of(sft.validate()), "value_decimals");

        sft.metadata.value_decimals = Some(6);
        sft.validate().unwrap();
    }
}
