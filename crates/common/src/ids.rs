//! Type-safe identifier newtypes.
//!
//! These keep node identifiers and lease identifiers from being mixed up
//! with each other or with arbitrary strings.

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use uuid::Uuid;

/// Stable identifier of a database node, unique within one pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Identifier of one connection lease handed out by a pool.
///
/// Generated per acquisition and attached to log lines so a lease can be
/// followed from acquisition to release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseId(String);

impl LeaseId {
    /// Create a new random lease ID
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LeaseId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_node_id() {
        let id = NodeId::new("primary-1");
        assert_eq!(id.as_str(), "primary-1");
        assert_eq!(id.to_string(), "primary-1");
        assert_eq!(NodeId::from("primary-1"), id);
    }

    #[test]
    fn test_node_id_borrow_lookup() {
        let mut map = HashMap::new();
        map.insert(NodeId::new("replica-a"), 7);
        assert_eq!(map.get("replica-a"), Some(&7));
    }

    #[test]
    fn test_node_id_serializes_as_string() {
        let json = serde_json::to_string(&NodeId::new("db-2")).unwrap();
        assert_eq!(json, "\"db-2\"");
    }

    #[test]
    fn test_lease_ids_are_unique() {
        assert_ne!(LeaseId::new(), LeaseId::new());
    }
}
