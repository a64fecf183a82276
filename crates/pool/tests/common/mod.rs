//! Scripted in-memory database handles shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tidepool::{BoxError, ConnectionStats, Connector, DatabaseHandle, SharedHandle};
use tidepool::{ClusterConfig, DatabaseConfig, NodeConfig, NodeRole, PoolConfig};
use tidepool_config::HandleLimits;

#[derive(Default)]
pub struct ScriptedHandle {
    pub healthy: AtomicBool,
    pub fail_close: AtomicBool,
    pub pings: AtomicU64,
    pub closes: AtomicU64,
    pub begins: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    pub limits: Mutex<Option<HandleLimits>>,
}

impl ScriptedHandle {
    fn new(limits: HandleLimits) -> Arc<Self> {
        let handle = Self {
            healthy: AtomicBool::new(true),
            limits: Mutex::new(Some(limits)),
            ..Self::default()
        };
        Arc::new(handle)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn count(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseHandle for ScriptedHandle {
    async fn ping(&self) -> Result<(), BoxError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("server closed the connection unexpectedly".into())
        }
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            Err("close: broken pipe".into())
        } else {
            Ok(())
        }
    }

    fn connection_stats(&self) -> ConnectionStats {
        let max_open = self
            .limits
            .lock()
            .as_ref()
            .map(|l| l.max_open)
            .unwrap_or_default();
        ConnectionStats {
            open: 2,
            idle: 1,
            in_use: 1,
            max_open,
        }
    }

    async fn begin(&self) -> Result<(), BoxError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), BoxError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BoxError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens one [`ScriptedHandle`] per host. Hosts in `refused` fail to open.
#[derive(Default)]
pub struct ScriptedConnector {
    pub opened: DashMap<String, Arc<ScriptedHandle>>,
    pub refused: HashSet<String>,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refusing(hosts: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            refused: hosts.iter().map(|h| h.to_string()).collect(),
            ..Self::default()
        })
    }

    pub fn handle(&self, host: &str) -> Arc<ScriptedHandle> {
        self.opened
            .get(host)
            .map(|h| Arc::clone(h.value()))
            .unwrap_or_else(|| panic!("{} was never opened", host))
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(
        &self,
        config: &DatabaseConfig,
        limits: HandleLimits,
    ) -> Result<SharedHandle, BoxError> {
        if self.refused.contains(&config.host) {
            return Err(format!("dial tcp {}: connection refused", config.address()).into());
        }
        let handle = ScriptedHandle::new(limits);
        self.opened.insert(config.host.clone(), Arc::clone(&handle));
        Ok(handle as SharedHandle)
    }
}

pub fn node(id: &str, role: NodeRole) -> NodeConfig {
    NodeConfig::new(id, role, DatabaseConfig::postgres(id, "app"))
}

/// One primary `p` and `replicas` replicas named `r1..rN`.
pub fn topology(replicas: usize) -> Vec<NodeConfig> {
    let mut nodes = vec![node("p", NodeRole::Primary)];
    nodes.extend((1..=replicas).map(|i| node(&format!("r{}", i), NodeRole::Replica)));
    nodes
}

/// Test pool config with a background checker slow enough to stay out of
/// the way.
pub fn quiet_config() -> PoolConfig {
    let mut config = PoolConfig::for_testing();
    config.health_check_interval = std::time::Duration::from_secs(3600);
    config.health_check_timeout = std::time::Duration::from_millis(200);
    config
}

pub fn cluster(nodes: Vec<NodeConfig>) -> ClusterConfig {
    tidepool_common::observability::init_test_tracing();
    ClusterConfig::new(quiet_config(), nodes)
}
