//! Configuration management for the token deployer
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::chain::network::{Blockchain, Explorer, NetworkConfiguration, NetworkEnvironment};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub deployer: DeployerConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub wallet: WalletConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    pub deployment: DeploymentConfig,
    pub networks: HashMap<String, NetworkSettings>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeployerConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub health_check_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Environment variable holding the hex private key
    pub private_key_env: String,
}

/// Stuck-transaction monitoring and rescue
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub poll_interval_ms: u64,
    /// How long a nonce gap must persist before deployments are locked
    pub debounce_ms: u64,
    /// How long the gap must stay closed before deployments are unlocked
    pub release_after_ms: u64,
    /// Replacement fee as a percentage of the current network fee
    pub gas_bump_percent: u64,
    pub confirmation_timeout_secs: u64,
    pub confirmation_poll_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 15_000,
            debounce_ms: 30_000,
            release_after_ms: 10_000,
            gas_bump_percent: 150,
            confirmation_timeout_secs: 180,
            confirmation_poll_ms: 3_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Base URL of the deployment backend
    pub backend_url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub features: FeatureFlags,
    /// Complexity score at which the optimized strategy is chosen
    #[serde(default = "default_optimization_threshold")]
    pub optimization_threshold: u32,
    /// Default gas limit when a request does not carry one
    #[serde(default = "default_gas_limit")]
    pub default_gas_limit: u64,
}

fn default_request_timeout() -> u64 {
    120
}

fn default_optimization_threshold() -> u32 {
    5
}

fn default_gas_limit() -> u64 {
    3_000_000
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeatureFlags {
    pub factory_deployment: bool,
    pub optimized_deployment: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    pub blockchain: Blockchain,
    pub environment: NetworkEnvironment,
    /// Overrides the well-known chain ID (private networks, forks)
    pub chain_id: Option<u64>,
    pub rpc_urls: Vec<String>,
    pub explorer_url: Option<String>,
    /// Factory used for clone deployments
    pub factory_address: Option<String>,
    pub gas_price_strategy: GasPriceStrategy,
    pub max_gas_price_gwei: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NetworkSettings {
    pub fn network(&self) -> NetworkConfiguration {
        NetworkConfiguration::new(self.blockchain, self.environment)
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id.unwrap_or_else(|| self.network().chain_id())
    }

    pub fn explorer(&self) -> Explorer {
        match &self.explorer_url {
            Some(url) => Explorer::new(url.clone()),
            None => Explorer::new(self.network().explorer_url()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    Eip1559,
    Arbitrum,
    Optimism,
}

impl Settings {
    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = env::var("TOKEN_DEPLOYER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from a specific file
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml_str(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml_str(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_networks().is_empty() {
            anyhow::bail!("At least one network must be enabled");
        }

        for (name, network) in &self.networks {
            if !network.enabled {
                continue;
            }
            if network.rpc_urls.is_empty() {
                anyhow::bail!("Network {} has no RPC URLs configured", name);
            }
            let expected = network.network().key();
            if name != &expected {
                anyhow::bail!(
                    "Network entry '{}' must be named '{}' to match its blockchain and environment",
                    name,
                    expected
                );
            }
            if network.factory_address.is_none() && self.deployment.features.factory_deployment {
                tracing::warn!(
                    "Network {} has no factory address - factory deployment disabled there",
                    name
                );
            }
        }

        if self.monitor.gas_bump_percent <= 100 {
            anyhow::bail!("monitor.gas_bump_percent must be above 100");
        }

        Ok(())
    }

    /// Get list of enabled networks
    pub fn enabled_networks(&self) -> Vec<(&String, &NetworkSettings)> {
        self.networks.iter().filter(|(_, n)| n.enabled).collect()
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |caps: &regex::Captures| {
            env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) const SAMPLE: &str = r#"
[deployer]
max_retries = 3
retry_delay_ms = 10
health_check_interval_secs = 30

[database]
url = "postgres://localhost/deployer"
max_connections = 5
min_connections = 1

[api]
host = "127.0.0.1"
port = 8080

[metrics]
enabled = false
port = 9090

[wallet]
private_key_env = "DEPLOYER_PRIVATE_KEY"

[monitor]
poll_interval_ms = 1000
debounce_ms = 2000

[deployment]
backend_url = "http://localhost:3001"

[deployment.features]
factory_deployment = true

[networks.ethereum-testnet]
blockchain = "ethereum"
environment = "testnet"
rpc_urls = ["http://localhost:8545"]
factory_address = "0x5FbDB2315678afecb367f032d93F642f64180aa3"
gas_price_strategy = "eip1559"
max_gas_price_gwei = 200

[networks.bsc-testnet]
blockchain = "bsc"
environment = "testnet"
rpc_urls = ["http://localhost:8546"]
gas_price_strategy = "legacy"
max_gas_price_gwei = 50
enabled = false
"#;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn test_parse_sample_settings() {
        let settings = Settings::from_toml_str(SAMPLE).unwrap();

        assert_eq!(settings.enabled_networks().len(), 1);
        assert!(!settings.networks["bsc-testnet"].enabled);

        let sepolia = &settings.networks["ethereum-testnet"];
        assert_eq!(sepolia.chain_id(), 11155111);
        assert_eq!(sepolia.gas_price_strategy, GasPriceStrategy::Eip1559);
        assert!(settings.deployment.features.factory_deployment);
        assert!(!settings.deployment.features.optimized_deployment);

        // Partially specified sections keep their defaults
        assert_eq!(settings.monitor.poll_interval_ms, 1000);
        assert_eq!(settings.monitor.gas_bump_percent, 150);
        assert_eq!(settings.deployment.default_gas_limit, 3_000_000);
    }

    #[test]
    fn test_rejects_mismatched_network_key() {
        let broken = SAMPLE.replace("[networks.ethereum-testnet]", "[networks.sepolia]");
        let err = Settings::from_toml_str(&broken).unwrap_err();
        assert!(err.to_string().contains("must be named 'ethereum-testnet'"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.deployer.max_retries, 3);
    }
}
