//! Leased connections handed out by the pool.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidepool_common::{LeaseId, NodeId, NodeRole};
use tracing::trace;

use crate::handle::SharedHandle;
use crate::metrics::MetricsCollector;
use crate::node::Node;

/// A node's handle on loan to one caller.
///
/// Queries run through the lease are counted on the node and in the
/// metrics collector. The lease is released exactly once: either through
/// [`crate::PoolManager::release_connection`] or when it is dropped.
/// Releasing never closes the handle; physical connection reuse belongs to
/// the handle's own pool.
pub struct PooledConnection {
    node: Arc<Node>,
    metrics: Arc<MetricsCollector>,
    lease_id: LeaseId,
    acquired_at: Instant,
    released: bool,
}

impl PooledConnection {
    pub(crate) fn new(node: Arc<Node>, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            node,
            metrics,
            lease_id: LeaseId::new(),
            acquired_at: Instant::now(),
            released: false,
        }
    }

    pub fn lease_id(&self) -> &LeaseId {
        &self.lease_id
    }

    pub fn node_id(&self) -> &NodeId {
        self.node.id()
    }

    pub fn role(&self) -> NodeRole {
        self.node.role()
    }

    /// The node's database handle.
    pub fn handle(&self) -> &SharedHandle {
        self.node.handle()
    }

    /// How long this lease has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }

    /// Record a query executed through this lease.
    pub fn record_query(&self, duration: Duration, success: bool) {
        self.node.record_query(success);
        self.metrics.record_query(self.node.id(), duration, success);
    }

    /// Await `fut`, recording its duration and outcome as one query.
    pub async fn run<F, T, E>(&self, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        let started = Instant::now();
        let result = fut.await;
        self.record_query(started.elapsed(), result.is_ok());
        result
    }

    pub(crate) fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.metrics.record_release();
        trace!(
            lease_id = %self.lease_id,
            node_id = %self.node.id(),
            held_ms = self.acquired_at.elapsed().as_millis() as u64,
            "Connection released"
        );
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("lease_id", &self.lease_id)
            .field("node_id", self.node.id())
            .field("role", &self.node.role())
            .finish()
    }
}
