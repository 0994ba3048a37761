//! Token configuration
//!
//! Handles:
//! - Token standard, identity and supply validation
//! - Extension module selection and settings

pub mod config;
pub mod modules;

pub use config::{TokenConfig, TokenFeatures, TokenMetadata, TokenStandard};
pub use modules::{catalog, ExtensionModuleConfigs, ModuleInfo, ModuleKind};
