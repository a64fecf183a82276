//! Tidepool
//!
//! A multi-node database pool manager. One [`PoolManager`] fronts a fixed
//! set of database nodes, each a primary or a replica, and provides:
//!
//! - **Routing**: writes to primaries, reads to replicas, with a structural
//!   fallback to primaries when no replica is configured
//! - **Load Balancing**: round-robin, random or weighted-random selection
//!   among healthy candidates
//! - **Health Checking**: a background loop that pings every node
//!   concurrently and flips its health flag
//! - **Metrics**: lock-free counters plus 1m/5m/15m/1h rolling windows
//!
//! The pool never speaks a wire protocol itself. Each node wraps a
//! [`DatabaseHandle`] opened by a caller-supplied [`Connector`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidepool::{AcquireContext, PoolManager};
//! use tidepool_config::{ClusterConfig, DatabaseConfig, NodeConfig, PoolConfig};
//!
//! let cluster = ClusterConfig::new(
//!     PoolConfig::default(),
//!     vec![
//!         NodeConfig::primary("db-1", DatabaseConfig::postgres("10.0.0.1", "app")),
//!         NodeConfig::replica("db-2", DatabaseConfig::postgres("10.0.0.2", "app")),
//!     ],
//! );
//! let pool = Arc::new(PoolManager::connect(cluster, connector).await?);
//!
//! let cx = AcquireContext::background();
//! let conn = pool.get_slave_connection(&cx)?;
//! let rows = conn.run(run_query(conn.handle())).await?;
//! pool.release_connection(conn);
//!
//! pool.close().await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod balancer;
pub mod connection;
pub mod context;
pub mod errors;
pub mod handle;
pub mod health;
pub mod manager;
pub mod metrics;
pub mod node;
pub mod retry;

#[cfg(test)]
pub(crate) mod testing;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use balancer::LoadBalancer;
pub use connection::PooledConnection;
pub use context::AcquireContext;
pub use errors::{BoxError, ErrorKind, NodeCloseError, PoolError};
pub use handle::{ConnectionStats, Connector, DatabaseHandle, SharedHandle};
pub use health::{HealthChecker, HealthStats};
pub use manager::{PoolManager, PoolStats};
pub use metrics::{
    MetricsCollector, MetricsSnapshot, NodeMetricsSnapshot, WindowKind, WindowMetrics,
    WindowSnapshot,
};
pub use node::{Node, NodeStats, Route};
pub use retry::RetryPolicy;

pub use tidepool_common::{LeaseId, NodeId, NodeRole};
pub use tidepool_config::{ClusterConfig, DatabaseConfig, LoadBalanceStrategy, NodeConfig, PoolConfig};
