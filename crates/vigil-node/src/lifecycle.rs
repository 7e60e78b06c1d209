//! Node lifecycle: Active / Degraded / Retired

use vigil_common::NodeStatus;

/// When a node degrades, retires, and how it recovers
#[derive(Debug, Clone, Copy)]
pub struct LifecyclePolicy {
    /// Consecutive estimation failures before the node degrades
    pub degrade_threshold: u32,
    /// Consecutive estimation failures before a degraded node retires
    pub retire_threshold: u32,
}

impl Default for LifecyclePolicy {
    fn default() -> Self {
        Self {
            degrade_threshold: crate::DEFAULT_DEGRADE_THRESHOLD,
            retire_threshold: crate::DEFAULT_RETIRE_THRESHOLD,
        }
    }
}

/// Mutable health record a node carries through its cycles
#[derive(Debug, Clone)]
pub struct NodeHealth {
    pub status: NodeStatus,
    pub cycles: u64,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl Default for NodeHealth {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeHealth {
    pub fn new() -> Self {
        Self {
            status: NodeStatus::Active,
            cycles: 0,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    /// Record a successful estimation cycle. One success is enough to bring a
    /// degraded node back. Returns true when the status changed.
    pub fn record_success(&mut self) -> bool {
        self.cycles += 1;
        self.consecutive_failures = 0;
        self.last_error = None;
        if self.status == NodeStatus::Degraded {
            self.status = NodeStatus::Active;
            return true;
        }
        false
    }

    /// Record a failed estimation cycle. Returns true when the status changed.
    pub fn record_failure(&mut self, policy: &LifecyclePolicy, error: String) -> bool {
        self.cycles += 1;
        self.consecutive_failures += 1;
        self.last_error = Some(error);
        match self.status {
            NodeStatus::Active if self.consecutive_failures >= policy.degrade_threshold => {
                self.status = NodeStatus::Degraded;
                true
            }
            NodeStatus::Degraded if self.consecutive_failures >= policy.retire_threshold => {
                self.status = NodeStatus::Retired;
                true
            }
            _ => false,
        }
    }

    /// Retirement is terminal; the node stops participating but its
    /// attribution history stays in the knowledge graph.
    pub fn retire(&mut self) {
        self.status = NodeStatus::Retired;
    }
}
