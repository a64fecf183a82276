//! Scripted in-memory handles for unit tests.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tidepool_config::{DatabaseConfig, HandleLimits};

use crate::errors::BoxError;
use crate::handle::{ConnectionStats, Connector, DatabaseHandle, SharedHandle};

#[derive(Default)]
pub(crate) struct MockHandle {
    pub fail_ping: AtomicBool,
    pub fail_close: AtomicBool,
    pub fail_commit: AtomicBool,
    pub ping_delay: Mutex<Duration>,
    pub pings: AtomicU64,
    pub closes: AtomicU64,
    pub begins: AtomicU64,
    pub commits: AtomicU64,
    pub rollbacks: AtomicU64,
    pub stats: Mutex<ConnectionStats>,
}

impl MockHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn shared() -> SharedHandle {
        Self::new()
    }

    pub fn set_ping_failing(&self, failing: bool) {
        self.fail_ping.store(failing, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock() = delay;
    }
}

#[async_trait]
impl DatabaseHandle for MockHandle {
    async fn ping(&self) -> Result<(), BoxError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_ping.load(Ordering::SeqCst) {
            Err("ping failed".into())
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), BoxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close.load(Ordering::SeqCst) {
            Err("close failed".into())
        } else {
            Ok(())
        }
    }

    fn connection_stats(&self) -> ConnectionStats {
        *self.stats.lock()
    }

    async fn begin(&self) -> Result<(), BoxError> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), BoxError> {
        self.commits.fetch_add(1, Ordering::SeqCst);
        if self.fail_commit.load(Ordering::SeqCst) {
            Err("commit failed".into())
        } else {
            Ok(())
        }
    }

    async fn rollback(&self) -> Result<(), BoxError> {
        self.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens a [`MockHandle`] per host and remembers it for inspection.
/// Hosts listed in `unreachable` fail to open.
#[derive(Default)]
pub(crate) struct MockConnector {
    pub handles: DashMap<String, Arc<MockHandle>>,
    pub unreachable: Mutex<Vec<String>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn unreachable(hosts: &[&str]) -> Arc<Self> {
        let connector = Self::default();
        *connector.unreachable.lock() = hosts.iter().map(|h| h.to_string()).collect();
        Arc::new(connector)
    }

    pub fn handle(&self, host: &str) -> Arc<MockHandle> {
        self.handles
            .get(host)
            .map(|h| Arc::clone(h.value()))
            .unwrap_or_else(|| panic!("no handle opened for {}", host))
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(
        &self,
        config: &DatabaseConfig,
        limits: HandleLimits,
    ) -> Result<SharedHandle, BoxError> {
        if self.unreachable.lock().contains(&config.host) {
            return Err(format!("connection refused: {}", config.address()).into());
        }
        let handle = MockHandle::new();
        *handle.stats.lock() = ConnectionStats {
            open: limits.max_idle,
            idle: limits.max_idle,
            in_use: 0,
            max_open: limits.max_open,
        };
        self.handles
            .insert(config.host.clone(), Arc::clone(&handle));
        Ok(handle as SharedHandle)
    }
}
