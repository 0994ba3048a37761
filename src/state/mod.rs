//! Deployment records with PostgreSQL persistence
//!
//! Handles:
//! - Deployment history and status
//! - Rescue (cancellation) submissions

mod manager;

pub use manager::StateManager;

use crate::error::{DeployerError, DeployerResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Deployed,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Deployed => "deployed",
            DeploymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentStatus {
    type Err = DeployerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DeploymentStatus::Pending),
            "deployed" => Ok(DeploymentStatus::Deployed),
            "failed" => Ok(DeploymentStatus::Failed),
            other => Err(DeployerError::Internal(format!(
                "unknown deployment status '{}'",
                other
            ))),
        }
    }
}

/// A deployment as stored
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeploymentRecord {
    pub id: Uuid,
    pub token_name: String,
    pub token_symbol: String,
    pub standard: String,
    pub network: String,
    pub chain_id: u64,
    pub strategy: String,
    pub deployer_address: String,
    pub status: DeploymentStatus,
    pub contract_address: Option<String>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
    /// Full payload sent to the deployment backend
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a deployment attempt
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentUpdate {
    pub id: Uuid,
    pub status: DeploymentStatus,
    pub contract_address: Option<String>,
    pub tx_hash: Option<String>,
    pub error: Option<String>,
}

/// One cancellation transaction sent by a rescue
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RescueRecord {
    pub network: String,
    pub nonce: u64,
    pub tx_hash: Option<String>,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeploymentStats {
    pub pending: u64,
    pub deployed: u64,
    pub failed: u64,
    pub rescues: u64,
}

/// Persistence used by the orchestrator and rescue
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    async fn record_deployment(&self, record: &DeploymentRecord) -> DeployerResult<()>;

    async fn update_deployment(&self, update: &DeploymentUpdate) -> DeployerResult<()>;

    async fn list_deployments(&self, limit: i64) -> DeployerResult<Vec<DeploymentRecord>>;

    async fn record_rescue(&self, rescue: &RescueRecord) -> DeployerResult<()>;

    async fn stats(&self) -> DeployerResult<DeploymentStats>;

    async fn health_check(&self) -> DeployerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            DeploymentStatus::Pending,
            DeploymentStatus::Deployed,
            DeploymentStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<DeploymentStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<DeploymentStatus>().is_err());
    }
}
