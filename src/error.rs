//! Error types for the token deployer

use thiserror::Error;

/// Main error type for the deployer
#[derive(Error, Debug)]
pub enum DeployerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Chain connection error for chain {chain_id}: {message}")]
    ChainConnection { chain_id: u64, message: String },

    #[error("Network {network} not configured")]
    NetworkNotFound { network: String },

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Gas estimation error: {0}")]
    GasEstimation(String),

    #[error("Invalid gas configuration: {0}")]
    InvalidGasConfig(String),

    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Wallet error: {0}")]
    Wallet(String),

    #[error("Deployment error: {0}")]
    Deployment(String),

    #[error("Deployments on {network} are locked: {stuck_count} stuck transaction(s)")]
    DeploymentLocked { network: String, stuck_count: u64 },

    #[error("A rescue is already running on {network}")]
    RescueInProgress { network: String },

    #[error("{in_flight} deployment(s) still running on {network}")]
    DeploymentInProgress { network: String, in_flight: usize },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Insufficient balance on chain {chain_id}: have {have}, need {need}")]
    InsufficientBalance {
        chain_id: u64,
        have: String,
        need: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeployerError {
    /// Shorthand for a field validation failure
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        DeployerError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DeployerError::ChainConnection { .. }
                | DeployerError::Timeout { .. }
                | DeployerError::DeploymentLocked { .. }
                | DeployerError::DeploymentInProgress { .. }
        )
    }

    /// Check if error should trigger an alert
    pub fn should_alert(&self) -> bool {
        matches!(
            self,
            DeployerError::InsufficientBalance { .. } | DeployerError::Wallet(_)
        )
    }

    /// Short machine-readable kind, used in API responses and metrics labels
    pub fn kind(&self) -> &'static str {
        match self {
            DeployerError::Config(_) => "config",
            DeployerError::Database(_) => "database",
            DeployerError::ChainConnection { .. } => "chain_connection",
            DeployerError::NetworkNotFound { .. } => "network_not_found",
            DeployerError::Transaction(_) => "transaction",
            DeployerError::Nonce { .. } => "nonce",
            DeployerError::GasEstimation(_) => "gas_estimation",
            DeployerError::InvalidGasConfig(_) => "invalid_gas_config",
            DeployerError::Validation { .. } => "validation",
            DeployerError::Wallet(_) => "wallet",
            DeployerError::Deployment(_) => "deployment",
            DeployerError::DeploymentLocked { .. } => "deployment_locked",
            DeployerError::RescueInProgress { .. } => "rescue_in_progress",
            DeployerError::DeploymentInProgress { .. } => "deployment_in_progress",
            DeployerError::Timeout { .. } => "timeout",
            DeployerError::InsufficientBalance { .. } => "insufficient_balance",
            DeployerError::Internal(_) => "internal",
        }
    }
}

/// Result type for deployer operations
pub type DeployerResult<T> = Result<T, DeployerError>;
