//! The pool manager: construction, role-aware node selection, transactions,
//! stats and shutdown.

use futures::future::{join_all, BoxFuture};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tidepool_config::{ClusterConfig, NodeConfig, PoolConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::balancer::LoadBalancer;
use crate::connection::PooledConnection;
use crate::context::AcquireContext;
use crate::errors::{NodeCloseError, PoolError};
use crate::handle::{ConnectionStats, Connector};
use crate::health::{HealthChecker, HealthStats};
use crate::metrics::{MetricsCollector, MetricsSnapshot};
use crate::node::{Node, NodeStats, Route};

/// Merged view of a pool's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStats {
    /// Handle-level counts of the first healthy primary
    pub primary: Option<ConnectionStats>,
    pub nodes: Vec<NodeStats>,
    pub health: HealthStats,
    /// `None` when metrics are disabled
    pub metrics: Option<MetricsSnapshot>,
}

/// Nodes eligible for one route and the balancer that rotates over them.
struct CandidateSet {
    route: Route,
    nodes: Vec<Arc<Node>>,
    balancer: LoadBalancer,
}

impl CandidateSet {
    fn new(route: Route, all: &[Arc<Node>], config: &PoolConfig) -> Self {
        Self {
            route,
            nodes: all
                .iter()
                .filter(|n| route.matches(n.role()))
                .cloned()
                .collect(),
            balancer: LoadBalancer::new(config.load_balance_strategy),
        }
    }
}

/// Multi-node database pool.
///
/// The node list is fixed at construction. Two background tasks run until
/// [`close`](Self::close): the health checker and, when metrics are enabled,
/// the metrics window ticker.
pub struct PoolManager {
    config: PoolConfig,
    nodes: Arc<[Arc<Node>]>,
    all: CandidateSet,
    primaries: CandidateSet,
    replicas: CandidateSet,
    health: Arc<HealthChecker>,
    metrics: Arc<MetricsCollector>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl PoolManager {
    /// Validate `cluster`, open every node through `connector` and start
    /// the background tasks.
    ///
    /// Nodes whose handle fails to open within `connect_timeout` are logged
    /// and skipped. Construction fails only when no node opens.
    pub async fn connect(
        cluster: ClusterConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, PoolError> {
        if cluster.nodes.is_empty() {
            return Err(PoolError::NoNodesConfigured);
        }
        cluster.validate()?;

        let ClusterConfig {
            pool: config,
            nodes: node_configs,
        } = cluster;
        let attempted = node_configs.len();

        info!(
            nodes = attempted,
            strategy = %config.load_balance_strategy,
            failover = config.failover_enabled,
            "Creating database pool"
        );

        let opened = join_all(
            node_configs
                .into_iter()
                .map(|node| open_node(connector.as_ref(), &config, node)),
        )
        .await;
        let nodes: Vec<Arc<Node>> = opened.into_iter().flatten().map(Arc::new).collect();

        if nodes.is_empty() {
            error!(attempted = attempted, "No database nodes could be opened");
            return Err(PoolError::NoNodesAvailable { attempted });
        }

        Ok(Self::from_nodes(config, nodes, attempted))
    }

    fn from_nodes(config: PoolConfig, nodes: Vec<Arc<Node>>, attempted: usize) -> Self {
        let nodes: Arc<[Arc<Node>]> = nodes.into();
        let health = Arc::new(HealthChecker::new(
            Arc::clone(&nodes),
            config.health_check_timeout,
        ));
        let metrics = Arc::new(MetricsCollector::new(
            config.metrics_enabled,
            config.slow_query_threshold,
        ));
        let shutdown = CancellationToken::new();

        let mut tasks = vec![tokio::spawn(Arc::clone(&health).run(
            config.health_check_interval,
            shutdown.child_token(),
        ))];
        if config.metrics_enabled {
            tasks.push(tokio::spawn(
                Arc::clone(&metrics).run(config.metrics_interval, shutdown.child_token()),
            ));
        }

        let pool = Self {
            all: CandidateSet::new(Route::Any, &nodes, &config),
            primaries: CandidateSet::new(Route::Primary, &nodes, &config),
            replicas: CandidateSet::new(Route::Replica, &nodes, &config),
            config,
            nodes,
            health,
            metrics,
            shutdown,
            tasks: Mutex::new(tasks),
            closed: AtomicBool::new(false),
        };

        info!(
            opened = pool.nodes.len(),
            attempted = attempted,
            primaries = pool.primaries.nodes.len(),
            replicas = pool.replicas.nodes.len(),
            "Database pool ready"
        );

        pool
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn nodes(&self) -> &[Arc<Node>] {
        &self.nodes
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Lease a connection from any healthy node regardless of role.
    pub fn get_connection(&self, cx: &AcquireContext) -> Result<PooledConnection, PoolError> {
        self.acquire(Route::Any, cx)
    }

    /// Lease a connection from a healthy primary.
    pub fn get_master_connection(
        &self,
        cx: &AcquireContext,
    ) -> Result<PooledConnection, PoolError> {
        self.acquire(Route::Primary, cx)
    }

    /// Lease a connection from a healthy replica.
    ///
    /// With no replicas configured at all, and failover enabled, primaries
    /// serve the request. Configured replicas that are all unhealthy fail
    /// with [`PoolError::NoHealthyNodes`].
    pub fn get_slave_connection(
        &self,
        cx: &AcquireContext,
    ) -> Result<PooledConnection, PoolError> {
        self.acquire(Route::Replica, cx)
    }

    /// Lease a connection for `route`.
    pub fn acquire(&self, route: Route, cx: &AcquireContext) -> Result<PooledConnection, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        cx.check()?;

        let node = self.select(self.candidates(route)?)?;
        node.record_connection();
        self.metrics.record_connection(node.id(), node.role());

        let conn = PooledConnection::new(node, Arc::clone(&self.metrics));
        trace!(
            lease_id = %conn.lease_id(),
            node_id = %conn.node_id(),
            role = %conn.role(),
            route = %route,
            "Connection acquired"
        );
        Ok(conn)
    }

    /// Return a lease. The handle stays open.
    pub fn release_connection(&self, mut conn: PooledConnection) {
        conn.release();
    }

    fn candidates(&self, route: Route) -> Result<&CandidateSet, PoolError> {
        match route {
            Route::Any => Ok(&self.all),
            Route::Primary => Ok(&self.primaries),
            Route::Replica if self.replicas.nodes.is_empty() => {
                if self.config.failover_enabled {
                    debug!("No replicas configured, routing read to primaries");
                    Ok(&self.primaries)
                } else {
                    Err(PoolError::NoNodesForRole(Route::Replica))
                }
            }
            Route::Replica => Ok(&self.replicas),
        }
    }

    /// Pick one healthy node from `set`. Single-shot: a node found unhealthy
    /// after the pick is reported, not replaced.
    fn select(&self, set: &CandidateSet) -> Result<Arc<Node>, PoolError> {
        if set.nodes.is_empty() {
            return Err(match set.route {
                Route::Any => PoolError::NoNodesConfigured,
                route => PoolError::NoNodesForRole(route),
            });
        }

        let healthy: Vec<&Arc<Node>> = set.nodes.iter().filter(|n| n.is_healthy()).collect();
        if healthy.is_empty() {
            debug!(route = %set.route, "No healthy nodes for route");
            return Err(PoolError::NoHealthyNodes(set.route));
        }

        let weights: Vec<u32> = healthy.iter().map(|n| n.weight()).collect();
        let index = set.balancer.next(healthy.len(), &weights);
        let node = healthy
            .get(index)
            .ok_or(PoolError::NoHealthyNodes(set.route))?;

        ensure_healthy(node)?;
        Ok(Arc::clone(*node))
    }

    /// Run `f` inside a transaction on a primary.
    ///
    /// Commits when `f` succeeds and rolls back when it fails. A failed
    /// rollback is logged; the closure's error is returned either way.
    pub async fn transaction<F, T, E>(&self, cx: &AcquireContext, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c PooledConnection) -> BoxFuture<'c, Result<T, E>>,
        E: From<PoolError>,
    {
        let conn = self.get_master_connection(cx)?;
        conn.handle()
            .begin()
            .await
            .map_err(|e| PoolError::handle(conn.node_id(), e))?;

        match f(&conn).await {
            Ok(value) => {
                conn.handle()
                    .commit()
                    .await
                    .map_err(|e| PoolError::handle(conn.node_id(), e))?;
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = conn.handle().rollback().await {
                    warn!(
                        lease_id = %conn.lease_id(),
                        node_id = %conn.node_id(),
                        error = %e,
                        "Transaction rollback failed"
                    );
                }
                Err(err)
            }
        }
    }

    /// Ping every node once and wait for the round to finish.
    pub async fn health_check(&self, cx: &AcquireContext) -> Result<HealthStats, PoolError> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        cx.check()?;

        tokio::select! {
            stats = self.health.check_all() => Ok(stats),
            _ = cx.token().cancelled() => Err(PoolError::Cancelled),
            _ = deadline(cx) => Err(PoolError::DeadlineExceeded),
        }
    }

    pub fn health_stats(&self) -> HealthStats {
        self.health.stats()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            primary: self
                .primaries
                .nodes
                .iter()
                .find(|n| n.is_healthy())
                .map(|n| n.handle().connection_stats()),
            nodes: self.nodes.iter().map(|n| n.stats()).collect(),
            health: self.health.stats(),
            metrics: self
                .metrics
                .is_enabled()
                .then(|| self.metrics.snapshot()),
        }
    }

    /// Stop the background tasks and close every node's handle.
    ///
    /// Only the first call does any work; later calls return `Ok(())`.
    /// Every handle is closed even when some fail, and the failures are
    /// returned together.
    pub async fn close(&self) -> Result<(), PoolError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Pool already closed");
            return Ok(());
        }

        info!(nodes = self.nodes.len(), "Closing database pool");
        self.shutdown.cancel();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        for result in join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        let results = join_all(self.nodes.iter().map(|node| async move {
            node.handle()
                .close()
                .await
                .map_err(|source| NodeCloseError {
                    node_id: node.id().clone(),
                    source,
                })
        }))
        .await;

        let failures: Vec<NodeCloseError> = results.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            info!("Database pool closed");
            Ok(())
        } else {
            for failure in &failures {
                warn!(node_id = %failure.node_id, error = %failure.source, "Failed to close node");
            }
            Err(PoolError::CloseFailed(failures))
        }
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        if !self.is_closed() {
            debug!("Pool dropped without close, stopping background tasks");
            self.shutdown.cancel();
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("nodes", &self.nodes)
            .field("strategy", &self.config.load_balance_strategy)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn open_node(
    connector: &dyn Connector,
    config: &PoolConfig,
    node: NodeConfig,
) -> Option<Node> {
    let limits = node.database.effective_limits(config);
    let address = node.database.address();

    match tokio::time::timeout(config.connect_timeout, connector.open(&node.database, limits)).await
    {
        Ok(Ok(handle)) => {
            info!(node_id = %node.id, role = %node.role, address = %address, "Opened database node");
            Some(Node::new(node, handle))
        }
        Ok(Err(e)) => {
            warn!(
                node_id = %node.id,
                role = %node.role,
                address = %address,
                error = %e,
                "Failed to open database node, skipping"
            );
            None
        }
        Err(_) => {
            warn!(
                node_id = %node.id,
                role = %node.role,
                address = %address,
                timeout_ms = config.connect_timeout.as_millis() as u64,
                "Timed out opening database node, skipping"
            );
            None
        }
    }
}

/// The health flag can flip between filtering and the pick.
fn ensure_healthy(node: &Node) -> Result<(), PoolError> {
    if node.is_healthy() {
        Ok(())
    } else {
        Err(PoolError::NodeUnhealthy {
            node_id: node.id().clone(),
            role: node.role(),
        })
    }
}

async fn deadline(cx: &AcquireContext) {
    match cx.remaining() {
        Some(left) => tokio::time::sleep(left).await,
        None => futures::future::pending().await,
    }
}
