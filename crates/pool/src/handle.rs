//! Contracts for the database handles that back each node.
//!
//! The pool never speaks a wire protocol. A [`Connector`] opens a
//! [`DatabaseHandle`] for a node's [`DatabaseConfig`]; the handle owns its
//! own physical connection pool and knows how to ping, close and report
//! on it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tidepool_config::{DatabaseConfig, HandleLimits};

use crate::errors::BoxError;

/// Connection counts reported by a handle's internal pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStats {
    /// Physical connections currently open (idle + in use)
    pub open: u32,
    /// Open connections not in use
    pub idle: u32,
    /// Connections currently checked out
    pub in_use: u32,
    /// Configured maximum open connections (0 = unlimited)
    pub max_open: u32,
}

impl ConnectionStats {
    /// Fraction of `max_open` currently in use, 0.0 when unlimited.
    pub fn utilization(&self) -> f64 {
        if self.max_open == 0 {
            0.0
        } else {
            self.in_use as f64 / self.max_open as f64
        }
    }
}

/// An open handle to one database node.
///
/// Implementations must be safe to share across tasks; the pool hands the
/// same handle to every caller that selects the node.
#[async_trait]
pub trait DatabaseHandle: Send + Sync + 'static {
    /// Run the lightweight scalar health query (`SELECT 1` or equivalent).
    async fn ping(&self) -> Result<(), BoxError>;

    /// Close the handle and its physical connections.
    async fn close(&self) -> Result<(), BoxError>;

    /// Current open/idle/in-use counts of the handle's internal pool.
    fn connection_stats(&self) -> ConnectionStats;

    /// Start a transaction on this handle.
    async fn begin(&self) -> Result<(), BoxError>;

    /// Commit the current transaction.
    async fn commit(&self) -> Result<(), BoxError>;

    /// Roll back the current transaction.
    async fn rollback(&self) -> Result<(), BoxError>;
}

/// Shared, type-erased handle.
pub type SharedHandle = Arc<dyn DatabaseHandle>;

/// Opens node handles.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a handle for `config`, applying `limits` to its internal pool.
    async fn open(
        &self,
        config: &DatabaseConfig,
        limits: HandleLimits,
    ) -> Result<SharedHandle, BoxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utilization() {
        let stats = ConnectionStats {
            open: 10,
            idle: 6,
            in_use: 4,
            max_open: 20,
        };
        assert!((stats.utilization() - 0.2).abs() < f64::EPSILON);
        assert_eq!(ConnectionStats::default().utilization(), 0.0);
    }
}
