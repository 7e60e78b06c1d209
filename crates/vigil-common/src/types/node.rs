//! Node identity and lifecycle status

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a decision node, e.g. `"node-reactor-1"`
///
/// Ordered lexicographically; the validator uses that ordering as the final
/// tie-break so decisions stay reproducible.
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
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a node
///
/// `Degraded` nodes keep estimating but are excluded from consensus until a
/// successful cycle; `Retired` nodes stop participating entirely but remain in
/// the knowledge graph's attribution history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    Active,
    Degraded,
    Retired,
}

impl NodeStatus {
    pub fn participates_in_consensus(self) -> bool {
        matches!(self, NodeStatus::Active)
    }
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Active => "Active",
            NodeStatus::Degraded => "Degraded",
            NodeStatus::Retired => "Retired",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_active_participates() {
        assert!(NodeStatus::Active.participates_in_consensus());
        assert!(!NodeStatus::Degraded.participates_in_consensus());
        assert!(!NodeStatus::Retired.participates_in_consensus());
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        assert!(NodeId::from("node-a") < NodeId::from("node-b"));
    }
}
