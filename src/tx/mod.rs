//! Deployer wallet transactions: signing, stuck detection and rescue

pub mod monitor;
pub mod rescue;
pub mod sender;
pub mod stuck;

pub use monitor::{DeploymentGuard, MonitorRegistry, MonitorSnapshot, StuckTransactionMonitor};
pub use rescue::{RescueReport, TransactionRescue};
pub use sender::TransactionSender;
pub use stuck::StuckTransactionInfo;
