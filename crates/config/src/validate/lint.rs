//! Configuration linting for best practices
//!
//! Checks a cluster configuration for settings that are legal but risky.

use tidepool_common::NodeRole;

use super::{ValidationResult, ValidationWarning};
use crate::cluster::ClusterConfig;
use crate::pool::LoadBalanceStrategy;

/// Lint a cluster configuration
pub fn lint_cluster(config: &ClusterConfig) -> ValidationResult {
    let mut result = ValidationResult::new();
    let pool = &config.pool;

    if config.replicas().count() == 0 && !pool.failover_enabled {
        result.add_warning(ValidationWarning::new(
            "no replicas and failover disabled; replica connections will always fail",
        ));
    }

    if pool.load_balance_strategy == LoadBalanceStrategy::Weighted
        && config.nodes.iter().all(|n| n.weight == config.nodes[0].weight)
    {
        result.add_warning(ValidationWarning::new(
            "weighted strategy with equal weights behaves like random selection",
        ));
    }

    if !pool.metrics_enabled {
        result.add_warning(ValidationWarning::new(
            "metrics disabled; stats will carry no query metrics",
        ));
    }

    for node in &config.nodes {
        if node.database.password.is_empty() && node.role == NodeRole::Primary {
            result.add_warning(ValidationWarning::new(format!(
                "primary node '{}' has no password configured",
                node.id
            )));
        }
    }

    result
}
