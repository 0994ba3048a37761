//! Client for the external deployment backend

use super::payload::{BackendDeployment, DeploymentPayload};
use crate::config::DeploymentConfig;
use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, error};

/// Compiles and broadcasts the token contracts described by a payload
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentService: Send + Sync {
    async fn deploy(&self, payload: &DeploymentPayload) -> DeployerResult<BackendDeployment>;
}

/// Posts payloads to the backend's REST API
pub struct HttpDeploymentService {
    base_url: String,
    client: reqwest::Client,
}

impl HttpDeploymentService {
    pub fn new(config: &DeploymentConfig) -> DeployerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| DeployerError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.backend_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/deployments", self.base_url)
    }
}

#[async_trait]
impl DeploymentService for HttpDeploymentService {
    async fn deploy(&self, payload: &DeploymentPayload) -> DeployerResult<BackendDeployment> {
        let url = self.endpoint();
        debug!("POST {} ({} on {})", url, payload.symbol, payload.network);

        let response = self
            .client
            .post(&url)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeployerError::Timeout {
                        operation: "deployment backend".to_string(),
                    }
                } else {
                    DeployerError::Deployment(format!("backend unreachable: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Deployment backend returned {}: {}", status, body);
            return Err(DeployerError::Deployment(format!(
                "backend returned {}: {}",
                status, body
            )));
        }

        response
            .json::<BackendDeployment>()
            .await
            .map_err(|e| DeployerError::Deployment(format!("invalid backend response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureFlags;

    #[test]
    fn endpoint_ignores_trailing_slash() {
        let service = HttpDeploymentService::new(&DeploymentConfig {
            backend_url: "http://deployer.internal:9000/".to_string(),
            request_timeout_secs: 5,
            features: FeatureFlags::default(),
            optimization_threshold: 5,
            default_gas_limit: 3_000_000,
        })
        .unwrap();
        assert_eq!(service.endpoint(), "http://deployer.internal:9000/deployments");
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_deployment_error() {
        let service = HttpDeploymentService::new(&DeploymentConfig {
            backend_url: "http://127.0.0.1:1".to_string(),
            request_timeout_secs: 5,
            features: FeatureFlags::default(),
            optimization_threshold: 5,
            default_gas_limit: 3_000_000,
        })
        .unwrap();

        let payload: DeploymentPayload = serde_json::from_value(serde_json::json!({
            "name": "Harbor Credit",
            "symbol": "HBC",
            "decimals": 18,
            "total_supply": "1",
            "initial_supply_base_units": "1000000000000000000",
            "standard": "erc20",
            "description": null,
            "base_uri": null,
            "asset_address": null,
            "value_decimals": null,
            "network": "ethereum-testnet",
            "blockchain": "ethereum",
            "environment": "testnet",
            "chain_id": 11155111,
            "deployer_address": "0x0000000000000000000000000000000000000000",
            "strategy": "standard",
            "factory_address": null,
            "gas_limit": 3000000,
            "is_eip1559": false,
            "gas_price": "1000000000",
            "max_fee_per_gas": null,
            "max_priority_fee_per_gas": null
        }))
        .unwrap();

        assert!(matches!(
            service.deploy(&payload).await,
            Err(DeployerError::Deployment(_))
        ));
    }
}
