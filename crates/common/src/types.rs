//! Node roles.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Role of a node within a pool.
///
/// The primary accepts reads and writes; replicas serve reads only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Primary,
    Replica,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Primary => "primary",
            NodeRole::Replica => "replica",
        }
    }

    pub fn is_primary(&self) -> bool {
        matches!(self, NodeRole::Primary)
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role name is not recognized.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown node role '{0}' (expected primary or replica)")]
pub struct ParseRoleError(pub String);

impl FromStr for NodeRole {
    type Err = ParseRoleError;

    /// Accepts `primary`/`master` and `replica`/`slave`, case-insensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "primary" | "master" => Ok(NodeRole::Primary),
            "replica" | "slave" => Ok(NodeRole::Replica),
            _ => Err(ParseRoleError(s.to_string())),
        }
    }
}
