//! # Vigil Runtime
//!
//! Wires the engine together: configuration, the file-backed checkpoint
//! store, the command dispatcher with its audit log, the consensus driving
//! loop, metrics, and the in-process supervisory facade.

pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod supervisory;
pub mod telemetry;

pub use checkpoint::{CheckpointStore, NodeCheckpointSink};
pub use config::EngineConfig;
pub use dispatch::{AuditRecord, CommandDispatcher};
pub use engine::Engine;
pub use supervisory::{EngineStatus, Supervisory};
pub use telemetry::{EngineTelemetry, MetricsSnapshot};

/// Checkpoint records kept per entity before pruning.
pub const DEFAULT_CHECKPOINT_RETENTION: usize = 5;

/// Capacity of the dispatcher's in-memory audit log.
pub const DEFAULT_AUDIT_LOG_CAPACITY: usize = 1000;

/// Default interval between knowledge-graph checkpoints.
pub const DEFAULT_KNOWLEDGE_CHECKPOINT_INTERVAL_SECS: u64 = 120;

/// How often the engine loop closes due consensus rounds.
pub const DECIDE_TICK_MS: u64 = 50;
