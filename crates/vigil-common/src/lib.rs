//! # Vigil Common
//!
//! Shared vocabulary for the Vigil decision engine: tags, proposals, node
//! lifecycle, knowledge facts, checkpoint records, and the unified error type.
//!
//! Every other crate in the workspace speaks these types; none of them carry
//! behavior beyond validation and small derived accessors.

pub mod error;
pub mod types;

pub use error::{
    BusError, CheckpointError, ConsensusError, DispatchError, EstimationError, KnowledgeError,
    Result, SimulationError, VigilError,
};
pub use types::checkpoint::{CheckpointMeta, EntityKind};
pub use types::fact::{Causality, FactPattern, KnowledgeFact, VersionVector};
pub use types::node::{NodeId, NodeStatus};
pub use types::proposal::{
    ControlAction, ObjectiveScores, ObjectiveWeights, PredictedEffect, Proposal, TagWrite,
};
pub use types::tag::{Tag, TagId, TagQuality, TagSnapshot, TagUpdate, TagValue};

/// Engine version, reported by the supervisory façade.
pub const VIGIL_VERSION: &str = env!("CARGO_PKG_VERSION");
