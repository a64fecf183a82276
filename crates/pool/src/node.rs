//! A single database node: configuration, handle, health flag and counters.
//!
//! Nodes carry no policy. Counters are plain atomics bumped by any number
//! of callers; the health flag is written only by the health checker.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use tidepool_common::{NodeId, NodeRole};
use tidepool_config::{DatabaseConfig, NodeConfig};

use crate::handle::{ConnectionStats, SharedHandle};

const NEVER: i64 = i64::MIN;

/// One live connection target within a pool.
pub struct Node {
    id: NodeId,
    role: NodeRole,
    weight: u32,
    config: DatabaseConfig,
    handle: SharedHandle,
    healthy: AtomicBool,
    connections: AtomicU64,
    queries: AtomicU64,
    errors: AtomicU64,
    // Unix millis, NEVER until first set.
    last_connected_ms: AtomicI64,
    last_queried_ms: AtomicI64,
    last_health_check_ms: AtomicI64,
}

impl Node {
    /// Wrap an opened handle. Nodes start healthy.
    pub fn new(config: NodeConfig, handle: SharedHandle) -> Self {
        Self {
            id: config.id,
            role: config.role,
            weight: config.weight.max(1),
            config: config.database,
            handle,
            healthy: AtomicBool::new(true),
            connections: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_connected_ms: AtomicI64::new(NEVER),
            last_queried_ms: AtomicI64::new(NEVER),
            last_health_check_ms: AtomicI64::new(NEVER),
        }
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn role(&self) -> NodeRole {
        self.role
    }

    pub fn weight(&self) -> u32 {
        self.weight
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    pub fn handle(&self) -> &SharedHandle {
        &self.handle
    }

    #[inline]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set the health flag, returning the previous value.
    pub(crate) fn set_healthy(&self, healthy: bool) -> bool {
        self.healthy.swap(healthy, Ordering::AcqRel)
    }

    #[inline]
    pub(crate) fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
        self.last_connected_ms.store(now_ms(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_query(&self, success: bool) {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        self.last_queried_ms.store(now_ms(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_health_check(&self) {
        self.last_health_check_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn connection_count(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn last_connected(&self) -> Option<DateTime<Utc>> {
        from_ms(self.last_connected_ms.load(Ordering::Relaxed))
    }

    pub fn last_queried(&self) -> Option<DateTime<Utc>> {
        from_ms(self.last_queried_ms.load(Ordering::Relaxed))
    }

    pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
        from_ms(self.last_health_check_ms.load(Ordering::Relaxed))
    }

    /// Copy the node's current state.
    pub fn stats(&self) -> NodeStats {
        NodeStats {
            id: self.id.clone(),
            role: self.role,
            weight: self.weight,
            address: self.config.address(),
            healthy: self.is_healthy(),
            connections: self.connection_count(),
            queries: self.query_count(),
            errors: self.error_count(),
            last_connected: self.last_connected(),
            last_queried: self.last_queried(),
            last_health_check: self.last_health_check(),
            handle: self.handle.connection_stats(),
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("weight", &self.weight)
            .field("healthy", &self.is_healthy())
            .field("queries", &self.query_count())
            .field("errors", &self.error_count())
            .finish()
    }
}

/// Which candidate set an acquisition draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Every node regardless of role
    Any,
    Primary,
    Replica,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Any => "any",
            Route::Primary => "primary",
            Route::Replica => "replica",
        }
    }

    pub fn matches(&self, role: NodeRole) -> bool {
        match self {
            Route::Any => true,
            Route::Primary => role == NodeRole::Primary,
            Route::Replica => role == NodeRole::Replica,
        }
    }
}

impl From<NodeRole> for Route {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Primary => Route::Primary,
            NodeRole::Replica => Route::Replica,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of one node's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStats {
    pub id: NodeId,
    pub role: NodeRole,
    pub weight: u32,
    pub address: String,
    pub healthy: bool,
    pub connections: u64,
    pub queries: u64,
    pub errors: u64,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_queried: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    pub handle: ConnectionStats,
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_ms(ms: i64) -> Option<DateTime<Utc>> {
    if ms == NEVER {
        None
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}
