//! Stuck transaction monitoring with debounced deployment locking

use super::stuck::{self, StuckTransactionInfo};
use crate::chain::{ChainManager, ChainRpc};
use crate::config::MonitorConfig;
use crate::error::{DeployerError, DeployerResult};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use ethers::types::Address;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Outcome of feeding a reading to the debouncer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockTransition {
    Unchanged,
    Locked,
    Unlocked,
}

/// Turns noisy per-poll readings into a stable lock.
///
/// A fresh submission briefly shows up as a nonce gap, so a gap has to
/// persist for `debounce` before it locks. Likewise the gap has to stay
/// closed for `release_after` before the lock is released.
#[derive(Debug, Clone)]
pub struct StuckDebouncer {
    debounce: Duration,
    release_after: Duration,
    detected_since: Option<Instant>,
    clear_since: Option<Instant>,
    locked: bool,
    rescuing: bool,
}

impl StuckDebouncer {
    pub fn new(debounce: Duration, release_after: Duration) -> Self {
        Self {
            debounce,
            release_after,
            detected_since: None,
            clear_since: None,
            locked: false,
            rescuing: false,
        }
    }

    pub fn observe(&mut self, stuck: bool, now: Instant) -> LockTransition {
        if stuck {
            self.clear_since = None;
            let since = *self.detected_since.get_or_insert(now);
            if !self.locked && now.duration_since(since) >= self.debounce {
                self.locked = true;
                return LockTransition::Locked;
            }
        } else {
            self.detected_since = None;
            if self.locked {
                let since = *self.clear_since.get_or_insert(now);
                if now.duration_since(since) >= self.release_after {
                    self.locked = false;
                    self.clear_since = None;
                    return LockTransition::Unlocked;
                }
            }
        }
        LockTransition::Unchanged
    }

    /// Mark a rescue as running; false if one already is
    pub fn begin_rescue(&mut self) -> bool {
        if self.rescuing {
            return false;
        }
        self.rescuing = true;
        true
    }

    pub fn end_rescue(&mut self) {
        self.rescuing = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked || self.rescuing
    }

    pub fn is_rescuing(&self) -> bool {
        self.rescuing
    }
}

/// What the API and orchestrator see of a monitor
#[derive(Debug, Clone, Serialize)]
pub struct MonitorSnapshot {
    pub network: String,
    pub address: Address,
    pub locked: bool,
    pub rescuing: bool,
    pub deployments_in_flight: usize,
    pub info: Option<StuckTransactionInfo>,
    pub checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Holds a network for one running deployment; released on drop
#[derive(Debug)]
pub struct DeploymentGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for DeploymentGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

struct MonitorState {
    debouncer: StuckDebouncer,
    info: Option<StuckTransactionInfo>,
    checked_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

/// Polls one network for stuck transactions of the deployer wallet
pub struct StuckTransactionMonitor {
    network: String,
    rpc: Arc<dyn ChainRpc>,
    address: Address,
    poll_interval: Duration,
    state: RwLock<MonitorState>,
    deployments: Arc<AtomicUsize>,
}

impl StuckTransactionMonitor {
    pub fn new(
        network: impl Into<String>,
        rpc: Arc<dyn ChainRpc>,
        address: Address,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            network: network.into(),
            rpc,
            address,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            state: RwLock::new(MonitorState {
                debouncer: StuckDebouncer::new(
                    Duration::from_millis(config.debounce_ms),
                    Duration::from_millis(config.release_after_ms),
                ),
                info: None,
                checked_at: None,
                last_error: None,
            }),
            deployments: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    /// Poll once and update the lock
    pub async fn check(&self) -> DeployerResult<MonitorSnapshot> {
        match stuck::detect(self.rpc.as_ref(), self.address).await {
            Ok(info) => {
                self.record(info).await;
                Ok(self.snapshot().await)
            }
            Err(e) => {
                // Keep the previous reading and lock; an RPC hiccup proves nothing
                self.state.write().await.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Feed an externally obtained reading
    pub async fn record(&self, info: StuckTransactionInfo) {
        let mut state = self.state.write().await;
        let transition = state.debouncer.observe(info.has_stuck(), Instant::now());

        match transition {
            LockTransition::Locked => {
                warn!(
                    "Network {}: {} stuck transaction(s) at nonces {:?}, deployments locked",
                    self.network, info.stuck_count, info.stuck_nonces
                );
                crate::metrics::record_deployments_locked(&self.network, true);
            }
            LockTransition::Unlocked => {
                info!("Network {}: nonce gap closed, deployments unlocked", self.network);
                crate::metrics::record_deployments_locked(&self.network, false);
            }
            LockTransition::Unchanged => {}
        }
        crate::metrics::record_stuck_transactions(&self.network, info.stuck_count);

        state.info = Some(info);
        state.checked_at = Some(Utc::now());
        state.last_error = None;
    }

    pub async fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.read().await;
        MonitorSnapshot {
            network: self.network.clone(),
            address: self.address,
            locked: state.debouncer.is_locked(),
            rescuing: state.debouncer.is_rescuing(),
            deployments_in_flight: self.deployments.load(Ordering::SeqCst),
            info: state.info.clone(),
            checked_at: state.checked_at,
            last_error: state.last_error.clone(),
        }
    }

    pub async fn is_locked(&self) -> bool {
        self.state.read().await.debouncer.is_locked()
    }

    /// Reserve the network for a deployment. Refused while locked; no
    /// rescue can start until the guard is dropped.
    pub async fn begin_deployment(&self) -> DeployerResult<DeploymentGuard> {
        let state = self.state.write().await;
        if state.debouncer.is_locked() {
            return Err(DeployerError::DeploymentLocked {
                network: self.network.clone(),
                stuck_count: state.info.as_ref().map(|i| i.stuck_count).unwrap_or(0),
            });
        }

        self.deployments.fetch_add(1, Ordering::SeqCst);
        Ok(DeploymentGuard {
            in_flight: self.deployments.clone(),
        })
    }

    /// Mark a rescue as running. Refused while another rescue or any
    /// deployment is in flight on the network.
    pub async fn begin_rescue(&self) -> DeployerResult<()> {
        let mut state = self.state.write().await;

        let in_flight = self.deployments.load(Ordering::SeqCst);
        if in_flight > 0 {
            return Err(DeployerError::DeploymentInProgress {
                network: self.network.clone(),
                in_flight,
            });
        }

        if state.debouncer.begin_rescue() {
            Ok(())
        } else {
            Err(DeployerError::RescueInProgress {
                network: self.network.clone(),
            })
        }
    }

    pub async fn end_rescue(&self) {
        self.state.write().await.debouncer.end_rescue();
    }

    /// Poll until the shutdown flag is raised
    pub async fn run(&self, shutdown: Arc<RwLock<bool>>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        info!(
            "Stuck transaction monitor started for {} ({:?})",
            self.network, self.address
        );

        loop {
            interval.tick().await;
            if *shutdown.read().await {
                break;
            }

            if let Err(e) = self.check().await {
                error!("Stuck transaction check failed on {}: {}", self.network, e);
            }
        }

        debug!("Stuck transaction monitor for {} stopped", self.network);
    }
}

/// One monitor per connected network
pub struct MonitorRegistry {
    monitors: DashMap<String, Arc<StuckTransactionMonitor>>,
    shutdown: Arc<RwLock<bool>>,
}

impl MonitorRegistry {
    pub fn new(chain_manager: &ChainManager, address: Address, config: &MonitorConfig) -> Self {
        let monitors = DashMap::new();
        for network in chain_manager.connected_networks() {
            if let Ok(rpc) = chain_manager.get_provider(&network) {
                let monitor = StuckTransactionMonitor::new(network.clone(), rpc, address, config);
                monitors.insert(network, Arc::new(monitor));
            }
        }

        Self {
            monitors,
            shutdown: Arc::new(RwLock::new(false)),
        }
    }

    pub fn get(&self, network: &str) -> DeployerResult<Arc<StuckTransactionMonitor>> {
        self.monitors
            .get(network)
            .map(|m| m.clone())
            .ok_or_else(|| DeployerError::NetworkNotFound {
                network: network.to_string(),
            })
    }

    /// Run every monitor's poll loop until `stop`
    pub async fn run_all(&self) {
        let handles: Vec<_> = self
            .monitors
            .iter()
            .map(|entry| {
                let monitor = entry.value().clone();
                let shutdown = self.shutdown.clone();
                tokio::spawn(async move { monitor.run(shutdown).await })
            })
            .collect();

        futures::future::join_all(handles).await;
    }

    pub async fn stop(&self) {
        *self.shutdown.write().await = true;
        info!("Stuck transaction monitors stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::provider::MockChainRpc;
    use crate::chain::BlockTag;

    fn debouncer() -> StuckDebouncer {
        StuckDebouncer::new(Duration::from_secs(30), Duration::from_secs(10))
    }

    #[test]
    fn brief_gaps_do_not_lock() {
        let start = Instant::now();
        let mut d = debouncer();

        assert_eq!(d.observe(true, start), LockTransition::Unchanged);
        assert_eq!(
            d.observe(true, start + Duration::from_secs(20)),
            LockTransition::Unchanged
        );
        // Mined before the debounce elapsed
        assert_eq!(
            d.observe(false, start + Duration::from_secs(25)),
            LockTransition::Unchanged
        );
        assert_eq!(
            d.observe(true, start + Duration::from_secs(40)),
            LockTransition::Unchanged
        );
        assert!(!d.is_locked());
    }

    #[test]
    fn persistent_gap_locks_then_releases() {
        let start = Instant::now();
        let mut d = debouncer();

        d.observe(true, start);
        assert_eq!(
            d.observe(true, start + Duration::from_secs(30)),
            LockTransition::Locked
        );
        assert!(d.is_locked());
        assert_eq!(
            d.observe(true, start + Duration::from_secs(45)),
            LockTransition::Unchanged
        );

        // Clean reading starts the release timer; a relapse resets it
        assert_eq!(
            d.observe(false, start + Duration::from_secs(50)),
            LockTransition::Unchanged
        );
        d.observe(true, start + Duration::from_secs(55));
        assert_eq!(
            d.observe(false, start + Duration::from_secs(58)),
            LockTransition::Unchanged
        );
        assert_eq!(
            d.observe(false, start + Duration::from_secs(65)),
            LockTransition::Unchanged
        );
        assert_eq!(
            d.observe(false, start + Duration::from_secs(68)),
            LockTransition::Unlocked
        );
        assert!(!d.is_locked());
    }

    #[test]
    fn zero_debounce_locks_immediately() {
        let mut d = StuckDebouncer::new(Duration::ZERO, Duration::ZERO);
        let now = Instant::now();
        assert_eq!(d.observe(true, now), LockTransition::Locked);
        assert_eq!(d.observe(false, now), LockTransition::Unlocked);
    }

    #[test]
    fn rescue_holds_the_lock() {
        let mut d = debouncer();
        assert!(d.begin_rescue());
        assert!(!d.begin_rescue());
        assert!(d.is_locked());
        d.end_rescue();
        assert!(!d.is_locked());
    }

    fn monitor_config() -> MonitorConfig {
        MonitorConfig {
            debounce_ms: 0,
            release_after_ms: 0,
            ..MonitorConfig::default()
        }
    }

    #[tokio::test]
    async fn check_updates_snapshot() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(1u64);
        rpc.expect_transaction_count()
            .returning(|_, tag| Ok(if tag == BlockTag::Latest { 3 } else { 5 }));
        rpc.expect_pending_transactions().returning(|_| Ok(Vec::new()));

        let monitor = StuckTransactionMonitor::new(
            "ethereum-testnet",
            Arc::new(rpc),
            Address::zero(),
            &monitor_config(),
        );

        let snapshot = monitor.check().await.unwrap();
        assert!(snapshot.locked);
        let info = snapshot.info.unwrap();
        assert_eq!(info.stuck_nonces, vec![3, 4]);
        assert_eq!(info.stuck_count, 2);
    }

    #[tokio::test]
    async fn failed_check_keeps_previous_reading() {
        let mut rpc = MockChainRpc::new();
        rpc.expect_chain_id().return_const(1u64);
        rpc.expect_transaction_count().returning(|_, _| {
            Err(DeployerError::Nonce {
                chain_id: 1,
                message: "timeout".to_string(),
            })
        });

        let monitor = StuckTransactionMonitor::new(
            "ethereum-testnet",
            Arc::new(rpc),
            Address::zero(),
            &monitor_config(),
        );
        monitor
            .record(StuckTransactionInfo::analyze(1, 2, Vec::new()))
            .await;

        assert!(monitor.check().await.is_err());
        let snapshot = monitor.snapshot().await;
        assert!(snapshot.locked);
        assert_eq!(snapshot.info.unwrap().stuck_count, 1);
        assert!(snapshot.last_error.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn second_rescue_is_rejected() {
        let monitor = StuckTransactionMonitor::new(
            "ethereum-testnet",
            Arc::new(MockChainRpc::new()),
            Address::zero(),
            &monitor_config(),
        );

        monitor.begin_rescue().await.unwrap();
        assert!(matches!(
            monitor.begin_rescue().await,
            Err(DeployerError::RescueInProgress { .. })
        ));
        monitor.end_rescue().await;
        assert!(monitor.begin_rescue().await.is_ok());
    }

    #[tokio::test]
    async fn deployments_and_rescues_exclude_each_other() {
        let monitor = StuckTransactionMonitor::new(
            "ethereum-testnet",
            Arc::new(MockChainRpc::new()),
            Address::zero(),
            &monitor_config(),
        );

        let first = monitor.begin_deployment().await.unwrap();
        let second = monitor.begin_deployment().await.unwrap();
        assert_eq!(monitor.snapshot().await.deployments_in_flight, 2);

        match monitor.begin_rescue().await {
            Err(DeployerError::DeploymentInProgress { in_flight, .. }) => assert_eq!(in_flight, 2),
            other => panic!("expected a refusal, got {:?}", other),
        }
        assert!(!monitor.snapshot().await.rescuing);

        drop(first);
        assert!(monitor.begin_rescue().await.is_err());
        drop(second);
        monitor.begin_rescue().await.unwrap();

        // The running rescue now keeps deployments out
        assert!(matches!(
            monitor.begin_deployment().await,
            Err(DeployerError::DeploymentLocked { .. })
        ));
        monitor.end_rescue().await;
        assert!(monitor.begin_deployment().await.is_ok());
    }
}
