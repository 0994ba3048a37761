//! Network identification: blockchain + environment to chain ID and explorer URLs

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supported EVM blockchains
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Blockchain {
    Ethereum,
    Polygon,
    Arbitrum,
    Optimism,
    Base,
    Avalanche,
    Bsc,
}

impl Blockchain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Blockchain::Ethereum => "ethereum",
            Blockchain::Polygon => "polygon",
            Blockchain::Arbitrum => "arbitrum",
            Blockchain::Optimism => "optimism",
            Blockchain::Base => "base",
            Blockchain::Avalanche => "avalanche",
            Blockchain::Bsc => "bsc",
        }
    }
}

impl fmt::Display for Blockchain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkEnvironment {
    Testnet,
    Mainnet,
}

impl fmt::Display for NetworkEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkEnvironment::Testnet => f.write_str("testnet"),
            NetworkEnvironment::Mainnet => f.write_str("mainnet"),
        }
    }
}

/// A blockchain in a specific environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkConfiguration {
    pub blockchain: Blockchain,
    pub environment: NetworkEnvironment,
}

impl NetworkConfiguration {
    pub fn new(blockchain: Blockchain, environment: NetworkEnvironment) -> Self {
        Self {
            blockchain,
            environment,
        }
    }

    /// Lookup key used for providers and monitors, e.g. `polygon-testnet`
    pub fn key(&self) -> String {
        format!("{}-{}", self.blockchain, self.environment)
    }

    /// Default chain ID (testnets are the current public test networks)
    pub fn chain_id(&self) -> u64 {
        use Blockchain::*;
        use NetworkEnvironment::*;
        match (self.blockchain, self.environment) {
            (Ethereum, Mainnet) => 1,
            (Ethereum, Testnet) => 11155111,
            (Polygon, Mainnet) => 137,
            (Polygon, Testnet) => 80002,
            (Arbitrum, Mainnet) => 42161,
            (Arbitrum, Testnet) => 421614,
            (Optimism, Mainnet) => 10,
            (Optimism, Testnet) => 11155420,
            (Base, Mainnet) => 8453,
            (Base, Testnet) => 84532,
            (Avalanche, Mainnet) => 43114,
            (Avalanche, Testnet) => 43113,
            (Bsc, Mainnet) => 56,
            (Bsc, Testnet) => 97,
        }
    }

    /// Default block explorer base URL
    pub fn explorer_url(&self) -> &'static str {
        use Blockchain::*;
        use NetworkEnvironment::*;
        match (self.blockchain, self.environment) {
            (Ethereum, Mainnet) => "https://etherscan.io",
            (Ethereum, Testnet) => "https://sepolia.etherscan.io",
            (Polygon, Mainnet) => "https://polygonscan.com",
            (Polygon, Testnet) => "https://amoy.polygonscan.com",
            (Arbitrum, Mainnet) => "https://arbiscan.io",
            (Arbitrum, Testnet) => "https://sepolia.arbiscan.io",
            (Optimism, Mainnet) => "https://optimistic.etherscan.io",
            (Optimism, Testnet) => "https://sepolia-optimism.etherscan.io",
            (Base, Mainnet) => "https://basescan.org",
            (Base, Testnet) => "https://sepolia.basescan.org",
            (Avalanche, Mainnet) => "https://snowtrace.io",
            (Avalanche, Testnet) => "https://testnet.snowtrace.io",
            (Bsc, Mainnet) => "https://bscscan.com",
            (Bsc, Testnet) => "https://testnet.bscscan.com",
        }
    }

    /// BSC is the only supported chain without a base-fee market
    pub fn supports_eip1559(&self) -> bool {
        !matches!(self.blockchain, Blockchain::Bsc)
    }

    /// Recommended confirmation blocks before a deployment counts as final
    pub fn recommended_confirmations(&self) -> u64 {
        match (self.blockchain, self.environment) {
            (Blockchain::Ethereum, NetworkEnvironment::Mainnet) => 32,
            (Blockchain::Ethereum, NetworkEnvironment::Testnet) => 12,
            (Blockchain::Polygon, NetworkEnvironment::Mainnet) => 128,
            (Blockchain::Polygon, NetworkEnvironment::Testnet) => 32,
            (Blockchain::Avalanche, _) => 1,
            (Blockchain::Bsc, _) => 15,
            _ => 64,
        }
    }
}

impl fmt::Display for NetworkConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.blockchain, self.environment)
    }
}

/// Explorer link builder bound to a (possibly overridden) base URL
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Explorer {
    base_url: String,
}

impl Explorer {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.base_url, tx_hash)
    }

    pub fn address_url(&self, address: &str) -> String {
        format!("{}/address/{}", self.base_url, address)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_chain_ids() {
        let sepolia = NetworkConfiguration::new(Blockchain::Ethereum, NetworkEnvironment::Testnet);
        assert_eq!(sepolia.chain_id(), 11155111);
        assert_eq!(sepolia.key(), "ethereum-testnet");

        let bsc = NetworkConfiguration::new(Blockchain::Bsc, NetworkEnvironment::Mainnet);
        assert_eq!(bsc.chain_id(), 56);
        assert!(!bsc.supports_eip1559());
    }

    #[test]
    fn builds_explorer_links() {
        let net = NetworkConfiguration::new(Blockchain::Base, NetworkEnvironment::Testnet);
        let explorer = Explorer::new(format!("{}/", net.explorer_url()));
        assert_eq!(
            explorer.tx_url("0xabc"),
            "https://sepolia.basescan.org/tx/0xabc"
        );
        assert_eq!(
            explorer.address_url("0xdef"),
            "https://sepolia.basescan.org/address/0xdef"
        );
    }
}
