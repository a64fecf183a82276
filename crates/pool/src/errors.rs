//! Pool error types.

use std::fmt;
use thiserror::Error;
use tidepool_common::{NodeId, NodeRole};
use tidepool_config::ConfigError;

use crate::node::Route;

/// Boxed error produced by a database handle or connector.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("no nodes configured")]
    NoNodesConfigured,

    #[error("no {0} nodes configured")]
    NoNodesForRole(Route),

    #[error("no healthy nodes for role {0}")]
    NoHealthyNodes(Route),

    #[error("selected node {node_id} ({role}) is unhealthy")]
    NodeUnhealthy { node_id: NodeId, role: NodeRole },

    #[error("failed to open any of {attempted} configured nodes")]
    NoNodesAvailable { attempted: usize },

    #[error("database handle error on node {node_id}: {source}")]
    Handle {
        node_id: NodeId,
        #[source]
        source: BoxError,
    },

    #[error("acquisition cancelled")]
    Cancelled,

    #[error("acquisition deadline exceeded")]
    DeadlineExceeded,

    #[error("pool is closed")]
    Closed,

    #[error("failed to close {} node(s): {}", close_error_count(.0), join_close_errors(.0))]
    CloseFailed(Vec<NodeCloseError>),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure class of a [`PoolError`], for callers that branch on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Nothing is configured (or could be opened) for the request
    NoNodes,
    /// Nodes exist but none is currently healthy
    NoHealthyNodes,
    /// The underlying database handle failed
    Handle,
    /// The caller's context was cancelled or expired
    Cancelled,
    /// The pool has been closed
    Closed,
    /// Configuration was rejected
    Config,
}

impl PoolError {
    pub(crate) fn handle(node_id: &NodeId, source: BoxError) -> Self {
        PoolError::Handle {
            node_id: node_id.clone(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PoolError::NoNodesConfigured
            | PoolError::NoNodesForRole(_)
            | PoolError::NoNodesAvailable { .. } => ErrorKind::NoNodes,
            PoolError::NoHealthyNodes(_) | PoolError::NodeUnhealthy { .. } => {
                ErrorKind::NoHealthyNodes
            }
            PoolError::Handle { .. } | PoolError::CloseFailed(_) => ErrorKind::Handle,
            PoolError::Cancelled | PoolError::DeadlineExceeded => ErrorKind::Cancelled,
            PoolError::Closed => ErrorKind::Closed,
            PoolError::Config(_) => ErrorKind::Config,
        }
    }

    /// Whether waiting and trying again may succeed.
    ///
    /// Only health-driven selection failures qualify; handle errors are
    /// returned as-is and left to the caller.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::NoHealthyNodes
    }
}

/// A close failure on one node.
#[derive(Debug)]
pub struct NodeCloseError {
    pub node_id: NodeId,
    pub source: BoxError,
}

impl fmt::Display for NodeCloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node_id, self.source)
    }
}

fn close_error_count(errors: &[NodeCloseError]) -> usize {
    errors.len()
}

fn join_close_errors(errors: &[NodeCloseError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
