//! Token deployment
//!
//! Handles:
//! - Deployment previews (fees, cost, strategy, backend payload)
//! - Strategy selection between factory clones, optimized and standard deployments
//! - Submission to the deployment backend with persistent records

pub mod orchestrator;
pub mod payload;
pub mod service;
pub mod strategy;

pub use orchestrator::DeploymentOrchestrator;
pub use payload::{
    BackendDeployment, DeploymentPayload, DeploymentPlan, DeploymentRequest, DeploymentResult,
};
pub use service::{DeploymentService, HttpDeploymentService};
pub use strategy::{select_strategy, DeploymentStrategy, StrategySelection};
