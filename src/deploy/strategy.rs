//! Deployment strategy selection

use crate::config::{DeploymentConfig, NetworkSettings};
use crate::error::{DeployerError, DeployerResult};
use crate::gas::units::non_blank;
use crate::token::{ExtensionModuleConfigs, TokenConfig};

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStrategy {
    /// Clone a template through the network's factory contract
    FactoryClone,
    /// Split deployment of the token and its modules, batched
    Optimized,
    Standard,
}

impl DeploymentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStrategy::FactoryClone => "factory_clone",
            DeploymentStrategy::Optimized => "optimized",
            DeploymentStrategy::Standard => "standard",
        }
    }
}

impl fmt::Display for DeploymentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategySelection {
    pub strategy: DeploymentStrategy,
    pub complexity_score: u32,
    pub reason: String,
}

/// Enabled modules plus the weight of the token standard
pub fn complexity_score(token: &TokenConfig, modules: &ExtensionModuleConfigs) -> u32 {
    modules.enabled_modules().len() as u32 + token.standard.complexity_weight()
}

/// Pick how a token is deployed, honoring a pinned strategy when one is given
pub fn select_strategy(
    requested: Option<DeploymentStrategy>,
    token: &TokenConfig,
    modules: &ExtensionModuleConfigs,
    network: &NetworkSettings,
    config: &DeploymentConfig,
) -> DeployerResult<StrategySelection> {
    let score = complexity_score(token, modules);
    let has_factory = non_blank(&network.factory_address).is_some();

    let selection = |strategy, reason: String| StrategySelection {
        strategy,
        complexity_score: score,
        reason,
    };

    if let Some(strategy) = requested {
        if strategy == DeploymentStrategy::FactoryClone && !has_factory {
            return Err(DeployerError::validation(
                "strategy",
                format!("{} has no factory contract configured", network.network()),
            ));
        }
        return Ok(selection(strategy, "requested".to_string()));
    }

    if config.features.factory_deployment && has_factory {
        return Ok(selection(
            DeploymentStrategy::FactoryClone,
            "factory deployment enabled and a factory is configured".to_string(),
        ));
    }

    if config.features.optimized_deployment && score >= config.optimization_threshold {
        return Ok(selection(
            DeploymentStrategy::Optimized,
            format!(
                "complexity {} reaches the optimization threshold {}",
                score, config.optimization_threshold
            ),
        ));
    }

    Ok(selection(
        DeploymentStrategy::Standard,
        "default".to_string(),
    ))
}
