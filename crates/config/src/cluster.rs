//! Node definitions and the full static node list of a pool.

use serde::{Deserialize, Serialize};
use tidepool_common::{NodeId, NodeRole};
use validator::Validate;

use crate::database::DatabaseConfig;
use crate::error::ConfigError;
use crate::pool::PoolConfig;
use crate::validate::{self, ValidationResult};

/// One configured database node.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NodeConfig {
    pub id: NodeId,

    #[serde(default)]
    pub role: NodeRole,

    /// Relative share of traffic under the weighted strategy
    #[serde(default = "default_weight")]
    #[validate(range(min = 1))]
    pub weight: u32,

    #[validate(nested)]
    pub database: DatabaseConfig,
}

fn default_weight() -> u32 {
    1
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>, role: NodeRole, database: DatabaseConfig) -> Self {
        Self {
            id: id.into(),
            role,
            weight: default_weight(),
            database,
        }
    }

    pub fn primary(id: impl Into<NodeId>, database: DatabaseConfig) -> Self {
        Self::new(id, NodeRole::Primary, database)
    }

    pub fn replica(id: impl Into<NodeId>, database: DatabaseConfig) -> Self {
        Self::new(id, NodeRole::Replica, database)
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }
}

/// A pool configuration together with its node list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    pub nodes: Vec<NodeConfig>,
}

impl ClusterConfig {
    pub fn new(pool: PoolConfig, nodes: Vec<NodeConfig>) -> Self {
        Self { pool, nodes }
    }

    /// Validate the pool config and every node, failing on the first class
    /// of error found. Warnings are logged, not returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate_all()?;
        for node in &self.nodes {
            node.validate()?;
        }

        let result = validate::validate_cluster(self);
        result.log_warnings();
        result.into_result()
    }

    /// Run structural checks and best-practice lints without failing fast.
    pub fn check(&self) -> ValidationResult {
        let mut result = validate::validate_cluster(self);
        result.merge(validate::lint::lint_cluster(self));
        result
    }

    pub fn primaries(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Primary)
    }

    pub fn replicas(&self) -> impl Iterator<Item = &NodeConfig> {
        self.nodes.iter().filter(|n| n.role == NodeRole::Replica)
    }
}
