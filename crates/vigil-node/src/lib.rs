//! # Vigil Node
//!
//! A node is an autonomous decision agent owning a scope of tags. It drains
//! its inbox, consults the knowledge graph read-only, runs a pluggable
//! estimation capability over a snapshot of its scope, and publishes action
//! proposals toward the consensus validator.
//!
//! Estimation state is opaque to everything outside the estimator: the node
//! checkpoints whatever blob the estimator hands it and feeds the same blob
//! back on restore.

pub mod estimator;
pub mod lifecycle;
pub mod pid_estimator;
pub mod runtime;
pub mod scoring;

pub use estimator::{CheckpointSink, EstimationContext, Estimator};
pub use lifecycle::{LifecyclePolicy, NodeHealth};
pub use pid_estimator::{PidEstimator, PidLoopSpec, PidModelState};
pub use runtime::{NodeConfig, NodeHandle, NodeRuntime};
pub use scoring::{ObjectivePolicy, RiskModel};

/// Default consecutive estimation failures before a node degrades.
pub const DEFAULT_DEGRADE_THRESHOLD: u32 = 3;

/// Default consecutive estimation failures before a degraded node retires.
pub const DEFAULT_RETIRE_THRESHOLD: u32 = 10;

/// Default interval between model-state checkpoints.
pub const DEFAULT_CHECKPOINT_INTERVAL_SECS: u64 = 60;
