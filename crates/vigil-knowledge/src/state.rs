//! Live node-state map entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use vigil_common::{NodeId, NodeStatus};

/// Health report a node publishes after every estimation cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeState {
    pub node_id: NodeId,
    pub status: NodeStatus,
    /// Estimation cycles completed since start
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl NodeState {
    pub fn starting(node_id: NodeId) -> Self {
        Self {
            node_id,
            status: NodeStatus::Active,
            cycles: 0,
            consecutive_failures: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }
}
