//! Periodic health probing of every node.
//!
//! Each round pings all nodes concurrently, each bounded by the configured
//! timeout. A node's flag is flipped to match the ping result; only actual
//! transitions are logged.

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::node::Node;

/// Aggregate results of health-check rounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStats {
    /// Completed rounds
    pub checks_run: u64,
    pub last_check_at: Option<DateTime<Utc>>,
    /// Wall time of the last round
    pub last_duration: Option<Duration>,
    pub healthy_nodes: usize,
    pub unhealthy_nodes: usize,
    /// Failed or timed-out pings across all rounds
    pub total_check_failures: u64,
}

/// Outcome of checking one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckOutcome {
    Healthy,
    Failed,
    TimedOut,
}

/// Pings nodes and maintains their health flags.
pub struct HealthChecker {
    nodes: Arc<[Arc<Node>]>,
    timeout: Duration,
    stats: RwLock<HealthStats>,
}

impl HealthChecker {
    pub fn new(nodes: Arc<[Arc<Node>]>, timeout: Duration) -> Self {
        let healthy_nodes = nodes.iter().filter(|n| n.is_healthy()).count();
        Self {
            stats: RwLock::new(HealthStats {
                healthy_nodes,
                unhealthy_nodes: nodes.len() - healthy_nodes,
                ..HealthStats::default()
            }),
            nodes,
            timeout,
        }
    }

    /// Ping every node once and update flags. Returns the round's stats.
    pub async fn check_all(&self) -> HealthStats {
        let started = Instant::now();
        let outcomes = join_all(self.nodes.iter().map(|node| self.check_node(node))).await;

        let failures = outcomes.iter().filter(|p| **p != CheckOutcome::Healthy).count();
        let healthy_nodes = self.nodes.iter().filter(|n| n.is_healthy()).count();
        let elapsed = started.elapsed();

        let mut stats = self.stats.write();
        stats.checks_run += 1;
        stats.last_check_at = Some(Utc::now());
        stats.last_duration = Some(elapsed);
        stats.healthy_nodes = healthy_nodes;
        stats.unhealthy_nodes = self.nodes.len() - healthy_nodes;
        stats.total_check_failures += failures as u64;

        trace!(
            healthy = healthy_nodes,
            unhealthy = stats.unhealthy_nodes,
            duration_ms = elapsed.as_millis() as u64,
            "Health check round complete"
        );

        stats.clone()
    }

    async fn check_node(&self, node: &Node) -> CheckOutcome {
        let outcome = match tokio::time::timeout(self.timeout, node.handle().ping()).await {
            Ok(Ok(())) => CheckOutcome::Healthy,
            Ok(Err(e)) => {
                debug!(node_id = %node.id(), error = %e, "Health check failed");
                CheckOutcome::Failed
            }
            Err(_) => {
                debug!(
                    node_id = %node.id(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Health check timed out"
                );
                CheckOutcome::TimedOut
            }
        };

        node.record_health_check();
        let is_healthy = outcome == CheckOutcome::Healthy;
        if !is_healthy {
            node.record_error();
        }

        let was_healthy = node.set_healthy(is_healthy);
        if was_healthy && !is_healthy {
            warn!(
                node_id = %node.id(),
                role = %node.role(),
                address = %node.config().address(),
                reason = ?outcome,
                "Node marked unhealthy"
            );
        } else if !was_healthy && is_healthy {
            info!(node_id = %node.id(), role = %node.role(), "Node recovered");
        }

        outcome
    }

    pub fn stats(&self) -> HealthStats {
        self.stats.read().clone()
    }

    /// Run a check round every `interval` until `shutdown` is cancelled.
    ///
    /// The first round starts one full interval after the call.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(
            nodes = self.nodes.len(),
            interval_ms = interval.as_millis() as u64,
            timeout_ms = self.timeout.as_millis() as u64,
            "Starting health checker"
        );
        let mut ticker =
            tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.check_all() => {}
                    }
                }
            }
        }

        debug!("Health checker stopped");
    }
}

impl std::fmt::Debug for HealthChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthChecker")
            .field("nodes", &self.nodes.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockHandle;
    use tidepool_common::NodeRole;
    use tidepool_config::{DatabaseConfig, NodeConfig};

    fn cluster(count: usize) -> (Vec<Arc<MockHandle>>, Arc<[Arc<Node>]>) {
        let handles: Vec<_> = (0..count).map(|_| MockHandle::new()).collect();
        let nodes: Vec<Arc<Node>> = handles
            .iter()
            .enumerate()
            .map(|(i, h)| {
                let role = if i == 0 {
                    NodeRole::Primary
                } else {
                    NodeRole::Replica
                };
                let config = NodeConfig::new(
                    format!("db-{}", i),
                    role,
                    DatabaseConfig::postgres(format!("10.0.0.{}", i), "app"),
                );
                Arc::new(Node::new(config, Arc::clone(h) as _))
            })
            .collect();
        (handles, nodes.into())
    }

    #[tokio::test]
    async fn test_failing_ping_marks_unhealthy() {
        let (handles, nodes) = cluster(3);
        handles[1].set_ping_failing(true);

        let checker = HealthChecker::new(Arc::clone(&nodes), Duration::from_secs(1));
        let stats = checker.check_all().await;

        assert!(nodes[0].is_healthy());
        assert!(!nodes[1].is_healthy());
        assert!(nodes[2].is_healthy());
        assert_eq!(nodes[1].error_count(), 1);
        assert!(nodes[1].last_health_check().is_some());
        assert_eq!(stats.checks_run, 1);
        assert_eq!(stats.healthy_nodes, 2);
        assert_eq!(stats.unhealthy_nodes, 1);
        assert_eq!(stats.total_check_failures, 1);
    }

    #[tokio::test]
    async fn test_recovery_after_ping_succeeds() {
        let (handles, nodes) = cluster(2);
        let checker = HealthChecker::new(Arc::clone(&nodes), Duration::from_secs(1));

        handles[1].set_ping_failing(true);
        checker.check_all().await;
        assert!(!nodes[1].is_healthy());

        handles[1].set_ping_failing(false);
        let stats = checker.check_all().await;
        assert!(nodes[1].is_healthy());
        assert_eq!(stats.unhealthy_nodes, 0);
        assert_eq!(stats.checks_run, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_ping_times_out() {
        let (handles, nodes) = cluster(2);
        handles[0].set_ping_delay(Duration::from_secs(10));

        let checker = HealthChecker::new(Arc::clone(&nodes), Duration::from_millis(100));
        let stats = checker.check_all().await;

        assert!(!nodes[0].is_healthy());
        assert!(nodes[1].is_healthy());
        assert_eq!(stats.total_check_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pings_run_concurrently() {
        let (handles, nodes) = cluster(4);
        for handle in &handles {
            handle.set_ping_delay(Duration::from_millis(80));
        }

        let checker = HealthChecker::new(Arc::clone(&nodes), Duration::from_millis(100));
        let started = tokio::time::Instant::now();
        checker.check_all().await;

        assert!(started.elapsed() < Duration::from_millis(150));
        assert!(nodes.iter().all(|n| n.is_healthy()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_loop_pings_until_cancelled() {
        let (handles, nodes) = cluster(1);
        let checker = Arc::new(HealthChecker::new(nodes, Duration::from_millis(50)));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&checker).run(Duration::from_secs(1), shutdown.clone()));

        tokio::time::sleep(Duration::from_millis(3500)).await;
        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(checker.stats().checks_run, 3);
        assert_eq!(handles[0].pings.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
