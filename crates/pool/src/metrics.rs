//! Query and connection metrics with rolling time windows.
//!
//! Totals are lock-free atomics updated on the hot path. Each of the four
//! rolling windows (1m, 5m, 15m, 1h) sits behind its own `parking_lot`
//! RwLock: recording a query takes only read locks and bumps atomics, and
//! a periodic tick takes the write lock to reset any window whose duration
//! has elapsed. Reading metrics always produces a fully
//! copied [`MetricsSnapshot`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tidepool_common::{NodeId, NodeRole};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Initial minimum response time of an empty window.
pub const MIN_RESPONSE_SENTINEL: Duration = Duration::from_nanos(u64::MAX);

/// The fixed set of rolling windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    OneMinute,
    FiveMinutes,
    FifteenMinutes,
    OneHour,
}

impl WindowKind {
    pub const ALL: [WindowKind; 4] = [
        WindowKind::OneMinute,
        WindowKind::FiveMinutes,
        WindowKind::FifteenMinutes,
        WindowKind::OneHour,
    ];

    pub fn duration(&self) -> Duration {
        match self {
            WindowKind::OneMinute => Duration::from_secs(60),
            WindowKind::FiveMinutes => Duration::from_secs(5 * 60),
            WindowKind::FifteenMinutes => Duration::from_secs(15 * 60),
            WindowKind::OneHour => Duration::from_secs(3600),
        }
    }
}

/// One fixed-duration aggregation bucket.
///
/// Counters are atomics so recording only needs the window's read lock;
/// the write lock is taken for rollover alone.
#[derive(Debug)]
pub(crate) struct RollingWindow {
    pub(crate) kind: WindowKind,
    pub(crate) started: Instant,
    pub(crate) started_at: DateTime<Utc>,
    total_queries: AtomicU64,
    slow_queries: AtomicU64,
    failed_queries: AtomicU64,
    min_response_ns: AtomicU64,
    max_response_ns: AtomicU64,
    total_response_ns: AtomicU64,
    pub(crate) previous: Option<WindowSnapshot>,
}

impl RollingWindow {
    fn new(kind: WindowKind, now: Instant) -> Self {
        Self {
            kind,
            started: now,
            started_at: Utc::now(),
            total_queries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            min_response_ns: AtomicU64::new(u64::MAX),
            max_response_ns: AtomicU64::new(0),
            total_response_ns: AtomicU64::new(0),
            previous: None,
        }
    }

    fn record(&self, nanos: u64, success: bool, slow: bool) {
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
        self.min_response_ns.fetch_min(nanos, Ordering::Relaxed);
        self.max_response_ns.fetch_max(nanos, Ordering::Relaxed);
        self.total_response_ns.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn total_queries(&self) -> u64 {
        self.total_queries.load(Ordering::Relaxed)
    }

    pub(crate) fn min_response(&self) -> Duration {
        Duration::from_nanos(self.min_response_ns.load(Ordering::Relaxed))
    }

    pub(crate) fn max_response(&self) -> Duration {
        Duration::from_nanos(self.max_response_ns.load(Ordering::Relaxed))
    }

    /// Reset the window when its duration has elapsed at `now`, archiving
    /// the finished window first. Returns whether a rollover happened.
    fn roll_if_elapsed(&mut self, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed < self.kind.duration() {
            return false;
        }

        let mut finished = self.snapshot(now);
        finished.end = Some(finished.start + chrono_duration(elapsed));

        self.started = now;
        self.started_at = finished.end.unwrap_or_else(Utc::now);
        *self.total_queries.get_mut() = 0;
        *self.slow_queries.get_mut() = 0;
        *self.failed_queries.get_mut() = 0;
        *self.min_response_ns.get_mut() = u64::MAX;
        *self.max_response_ns.get_mut() = 0;
        *self.total_response_ns.get_mut() = 0;
        self.previous = Some(finished);
        true
    }

    fn snapshot(&self, now: Instant) -> WindowSnapshot {
        let elapsed = now.saturating_duration_since(self.started);
        let total_queries = self.total_queries();
        let total_ns = self.total_response_ns.load(Ordering::Relaxed);
        WindowSnapshot {
            kind: self.kind,
            duration_secs: self.kind.duration().as_secs(),
            start: self.started_at,
            end: None,
            total_queries,
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            min_response_ms: if total_queries == 0 {
                0.0
            } else {
                as_ms(self.min_response())
            },
            max_response_ms: as_ms(self.max_response()),
            avg_response_ms: if total_queries == 0 {
                0.0
            } else {
                total_ns as f64 / total_queries as f64 / 1_000_000.0
            },
            queries_per_second: per_second(total_queries, elapsed),
        }
    }
}

/// Copy of one rolling window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    pub kind: WindowKind,
    pub duration_secs: u64,
    pub start: DateTime<Utc>,
    /// Set once the window has rolled over
    pub end: Option<DateTime<Utc>>,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub failed_queries: u64,
    pub min_response_ms: f64,
    pub max_response_ms: f64,
    pub avg_response_ms: f64,
    pub queries_per_second: f64,
}

/// A window's current state plus its last completed period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    pub current: WindowSnapshot,
    pub previous: Option<WindowSnapshot>,
}

#[derive(Debug, Clone, Default)]
struct NodeMetrics {
    connections: u64,
    queries: u64,
    failed_queries: u64,
    slow_queries: u64,
    avg_response_ms: f64,
}

/// Per-node breakdown in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetricsSnapshot {
    pub connections: u64,
    pub queries: u64,
    pub failed_queries: u64,
    pub slow_queries: u64,
    pub avg_response_ms: f64,
}

/// Fully copied view of the collector's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub taken_at: DateTime<Utc>,
    pub uptime_secs: f64,
    pub slow_query_threshold_ms: f64,
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_releases: u64,
    pub primary_connections: u64,
    pub replica_connections: u64,
    pub total_queries: u64,
    pub slow_queries: u64,
    pub failed_queries: u64,
    pub avg_response_ms: f64,
    pub error_rate: f64,
    pub windows: Vec<WindowMetrics>,
    pub nodes: BTreeMap<NodeId, NodeMetricsSnapshot>,
}

impl MetricsSnapshot {
    pub fn window(&self, kind: WindowKind) -> Option<&WindowMetrics> {
        self.windows.iter().find(|w| w.current.kind == kind)
    }
}

/// Thread-safe metrics collector.
pub struct MetricsCollector {
    enabled: bool,
    slow_query_threshold: Duration,
    created: Instant,
    total_connections: AtomicU64,
    active_connections: AtomicI64,
    total_releases: AtomicU64,
    primary_connections: AtomicU64,
    replica_connections: AtomicU64,
    total_queries: AtomicU64,
    slow_queries: AtomicU64,
    failed_queries: AtomicU64,
    total_response_ns: AtomicU64,
    nodes: DashMap<NodeId, NodeMetrics>,
    windows: Vec<RwLock<RollingWindow>>,
}

impl MetricsCollector {
    pub fn new(enabled: bool, slow_query_threshold: Duration) -> Self {
        debug!(
            enabled = enabled,
            slow_query_threshold_ms = slow_query_threshold.as_millis() as u64,
            "Creating metrics collector"
        );
        let now = Instant::now();
        Self {
            enabled,
            slow_query_threshold,
            created: now,
            total_connections: AtomicU64::new(0),
            active_connections: AtomicI64::new(0),
            total_releases: AtomicU64::new(0),
            primary_connections: AtomicU64::new(0),
            replica_connections: AtomicU64::new(0),
            total_queries: AtomicU64::new(0),
            slow_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            total_response_ns: AtomicU64::new(0),
            nodes: DashMap::new(),
            windows: WindowKind::ALL
                .iter()
                .map(|&kind| RwLock::new(RollingWindow::new(kind, now)))
                .collect(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn slow_query_threshold(&self) -> Duration {
        self.slow_query_threshold
    }

    /// Record a connection handed out from `node_id`.
    pub fn record_connection(&self, node_id: &NodeId, role: NodeRole) {
        if !self.enabled {
            return;
        }
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        match role {
            NodeRole::Primary => self.primary_connections.fetch_add(1, Ordering::Relaxed),
            NodeRole::Replica => self.replica_connections.fetch_add(1, Ordering::Relaxed),
        };
        self.nodes.entry(node_id.clone()).or_default().connections += 1;
        trace!(node_id = %node_id, role = %role, "Recorded connection");
    }

    /// Record a connection returned to the pool.
    pub fn record_release(&self) {
        if !self.enabled {
            return;
        }
        self.total_releases.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record one finished query against `node_id`.
    pub fn record_query(&self, node_id: &NodeId, duration: Duration, success: bool) {
        if !self.enabled {
            return;
        }

        let slow = duration >= self.slow_query_threshold;
        let nanos = duration.as_nanos().min(u64::MAX as u128) as u64;
        self.total_queries.fetch_add(1, Ordering::Relaxed);
        self.total_response_ns.fetch_add(nanos, Ordering::Relaxed);
        if slow {
            self.slow_queries.fetch_add(1, Ordering::Relaxed);
        }
        if !success {
            self.failed_queries.fetch_add(1, Ordering::Relaxed);
        }

        {
            let mut node = self.nodes.entry(node_id.clone()).or_default();
            node.queries += 1;
            if slow {
                node.slow_queries += 1;
            }
            if !success {
                node.failed_queries += 1;
            }
            let n = node.queries as f64;
            node.avg_response_ms = (node.avg_response_ms * (n - 1.0) + as_ms(duration)) / n;
        }

        for window in &self.windows {
            window.read().record(nanos, success, slow);
        }

        if slow {
            debug!(
                node_id = %node_id,
                duration_ms = duration.as_millis() as u64,
                "Slow query"
            );
        }
    }

    /// Roll over every window whose duration has elapsed.
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    pub(crate) fn tick_at(&self, now: Instant) {
        for window in &self.windows {
            let mut window = window.write();
            if window.roll_if_elapsed(now) {
                debug!(window = ?window.kind, "Metrics window rolled over");
            }
        }
    }

    /// Copy all counters and windows into a snapshot.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = Instant::now();
        let windows = self
            .windows
            .iter()
            .map(|w| {
                let w = w.read();
                WindowMetrics {
                    current: w.snapshot(now),
                    previous: w.previous.clone(),
                }
            })
            .collect();

        let nodes = self
            .nodes
            .iter()
            .map(|entry| {
                let m = entry.value();
                (
                    entry.key().clone(),
                    NodeMetricsSnapshot {
                        connections: m.connections,
                        queries: m.queries,
                        failed_queries: m.failed_queries,
                        slow_queries: m.slow_queries,
                        avg_response_ms: m.avg_response_ms,
                    },
                )
            })
            .collect();

        let total_queries = self.total_queries.load(Ordering::Relaxed);
        let failed_queries = self.failed_queries.load(Ordering::Relaxed);
        let total_ns = self.total_response_ns.load(Ordering::Relaxed);

        MetricsSnapshot {
            taken_at: Utc::now(),
            uptime_secs: now.saturating_duration_since(self.created).as_secs_f64(),
            slow_query_threshold_ms: as_ms(self.slow_query_threshold),
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed).max(0) as u64,
            total_releases: self.total_releases.load(Ordering::Relaxed),
            primary_connections: self.primary_connections.load(Ordering::Relaxed),
            replica_connections: self.replica_connections.load(Ordering::Relaxed),
            total_queries,
            slow_queries: self.slow_queries.load(Ordering::Relaxed),
            failed_queries,
            avg_response_ms: if total_queries == 0 {
                0.0
            } else {
                total_ns as f64 / total_queries as f64 / 1_000_000.0
            },
            error_rate: if total_queries == 0 {
                0.0
            } else {
                failed_queries as f64 / total_queries as f64
            },
            windows,
            nodes,
        }
    }

    /// Run the rollover ticker until `shutdown` is cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) {
        info!(
            interval_ms = interval.as_millis() as u64,
            "Starting metrics window ticker"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.tick(),
            }
        }

        debug!("Metrics window ticker stopped");
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("enabled", &self.enabled)
            .field("total_queries", &self.total_queries.load(Ordering::Relaxed))
            .field("failed_queries", &self.failed_queries.load(Ordering::Relaxed))
            .finish()
    }
}

fn as_ms(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> MetricsCollector {
        MetricsCollector::new(true, Duration::from_millis(500))
    }

    fn node() -> NodeId {
        NodeId::new("db-1")
    }

    #[test]
    fn test_fast_query_is_not_slow() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(499), true);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, 1);
        assert_eq!(snapshot.slow_queries, 0);
    }

    #[test]
    fn test_threshold_query_is_slow_exactly_once() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(500), true);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.slow_queries, 1);
        for window in &snapshot.windows {
            assert_eq!(window.current.slow_queries, 1);
        }
        assert_eq!(snapshot.nodes[&node()].slow_queries, 1);
    }

    #[test]
    fn test_slow_failed_query_counts_both() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_secs(2), false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.slow_queries, 1);
        assert_eq!(snapshot.failed_queries, 1);
        assert!((snapshot.error_rate - 1.0).abs() < f64::EPSILON);
        assert!((snapshot.avg_response_ms - 2000.0).abs() < 1e-6);
    }

    #[test]
    fn test_incremental_average_and_extremes() {
        let metrics = collector();
        for ms in [10, 20, 30, 40] {
            metrics.record_query(&node(), Duration::from_millis(ms), true);
        }
        let snapshot = metrics.snapshot();
        let minute = &snapshot.window(WindowKind::OneMinute).unwrap().current;
        assert_eq!(minute.total_queries, 4);
        assert!((minute.avg_response_ms - 25.0).abs() < 1e-9);
        assert!((minute.min_response_ms - 10.0).abs() < 1e-9);
        assert!((minute.max_response_ms - 40.0).abs() < 1e-9);
        assert!((snapshot.nodes[&node()].avg_response_ms - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_resets_after_duration() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(5), false);
        metrics.record_query(&node(), Duration::from_millis(900), true);

        let start = metrics.windows[0].read().started;
        metrics.tick_at(start + Duration::from_secs(61));

        let minute = metrics.windows[0].read();
        assert_eq!(minute.kind, WindowKind::OneMinute);
        assert_eq!(minute.total_queries(), 0);
        assert_eq!(minute.min_response(), MIN_RESPONSE_SENTINEL);
        assert_eq!(minute.max_response(), Duration::ZERO);
        let current = minute.snapshot(start + Duration::from_secs(61));
        assert_eq!(current.slow_queries, 0);
        assert_eq!(current.failed_queries, 0);

        let previous = minute.previous.as_ref().unwrap();
        assert_eq!(previous.total_queries, 2);
        assert_eq!(previous.failed_queries, 1);
        assert!(previous.end.is_some());

        // Longer windows are untouched.
        let five = metrics.windows[1].read();
        assert_eq!(five.total_queries(), 2);
        assert!(five.previous.is_none());
    }

    #[test]
    fn test_window_not_reset_before_duration() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(5), true);
        let start = metrics.windows[0].read().started;
        metrics.tick_at(start + Duration::from_secs(59));
        assert_eq!(metrics.windows[0].read().total_queries(), 1);
    }

    #[test]
    fn test_hour_window_resets_on_tick() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(5), true);
        let start = metrics.windows[3].read().started;
        metrics.tick_at(start + Duration::from_secs(3600));
        assert!(metrics.windows.iter().all(|w| w.read().total_queries() == 0));
    }

    #[test]
    fn test_connection_and_release_counters() {
        let metrics = collector();
        metrics.record_connection(&node(), NodeRole::Primary);
        metrics.record_connection(&NodeId::new("db-2"), NodeRole::Replica);
        metrics.record_release();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 2);
        assert_eq!(snapshot.active_connections, 1);
        assert_eq!(snapshot.total_releases, 1);
        assert_eq!(snapshot.primary_connections, 1);
        assert_eq!(snapshot.replica_connections, 1);
    }

    #[test]
    fn test_disabled_collector_records_nothing() {
        let metrics = MetricsCollector::new(false, Duration::from_millis(500));
        metrics.record_connection(&node(), NodeRole::Primary);
        metrics.record_query(&node(), Duration::from_secs(1), false);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_connections, 0);
        assert_eq!(snapshot.total_queries, 0);
        assert!(snapshot.nodes.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(1), true);
        let before = metrics.snapshot();
        metrics.record_query(&node(), Duration::from_millis(1), true);
        assert_eq!(before.total_queries, 1);
        assert_eq!(metrics.snapshot().total_queries, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = collector();
        metrics.record_query(&node(), Duration::from_millis(3), true);
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["total_queries"], 1);
        assert_eq!(json["windows"].as_array().unwrap().len(), 4);
        assert_eq!(json["windows"][0]["current"]["kind"], "one_minute");
    }

    #[test]
    fn test_concurrent_recording() {
        let metrics = Arc::new(collector());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    let id = NodeId::new(format!("db-{}", i % 2));
                    for _ in 0..500 {
                        metrics.record_query(&id, Duration::from_millis(1), true);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, 4000);
        assert_eq!(snapshot.windows[0].current.total_queries, 4000);
        assert_eq!(snapshot.nodes.len(), 2);
    }

    #[test]
    fn test_recording_shares_window_lock_with_readers() {
        let metrics = collector();
        let reader = metrics.windows[0].read();
        metrics.record_query(&node(), Duration::from_millis(7), true);
        assert_eq!(reader.total_queries(), 1);
        assert_eq!(reader.max_response(), Duration::from_millis(7));
    }

    #[test]
    fn test_recording_concurrent_with_rollover() {
        let metrics = Arc::new(collector());
        let start = metrics.windows[0].read().started;
        let writer = {
            let metrics = Arc::clone(&metrics);
            std::thread::spawn(move || {
                for _ in 0..1000 {
                    metrics.record_query(&node(), Duration::from_millis(1), true);
                }
            })
        };
        for i in 0..50 {
            metrics.tick_at(start + Duration::from_secs(61 * (i + 1)));
        }
        writer.join().unwrap();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_queries, 1000);
        let minute = snapshot.window(WindowKind::OneMinute).unwrap();
        assert!(minute.current.total_queries <= 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_stops_on_cancel() {
        let metrics = Arc::new(collector());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&metrics).run(Duration::from_secs(1), shutdown.clone()));
        tokio::time::sleep(Duration::from_secs(3)).await;
        shutdown.cancel();
        task.await.unwrap();
    }
}
