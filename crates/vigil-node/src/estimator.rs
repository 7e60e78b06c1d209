//! Estimation and checkpoint seams

use async_trait::async_trait;
use vigil_common::{CheckpointError, EstimationError, NodeId, Proposal, TagSnapshot};
use vigil_knowledge::KnowledgeGraph;

/// Everything an estimator may look at during one cycle
///
/// The snapshot is a copy and the knowledge graph is consulted read-only;
/// estimation never mutates shared state.
pub struct EstimationContext<'a> {
    pub node_id: &'a NodeId,
    pub snapshot: &'a TagSnapshot,
    pub knowledge: &'a KnowledgeGraph,
}

/// Pluggable estimation capability
///
/// Implementations hold their own model state and expose it only as an opaque
/// blob, so the checkpoint store can persist and restore it without knowing
/// what is inside. Scoring must be monotone: higher projected deviation means
/// higher `risk_score` on emitted proposals.
pub trait Estimator: Send + Sync {
    /// Run one estimation cycle, returning zero or more proposals.
    fn estimate(&mut self, ctx: &EstimationContext<'_>) -> Result<Vec<Proposal>, EstimationError>;

    /// Serialize the current model state.
    fn snapshot_state(&self) -> Result<Vec<u8>, EstimationError>;

    /// Resume from a previously checkpointed model state.
    fn restore_state(&mut self, blob: &[u8]) -> Result<(), EstimationError>;
}

/// Where node model-state blobs are checkpointed to and restored from
///
/// Implemented by the runtime's file-backed checkpoint store.
#[async_trait]
pub trait CheckpointSink: Send + Sync {
    async fn checkpoint(&self, entity_id: &str, blob: Vec<u8>) -> Result<(), CheckpointError>;

    /// Most recent valid blob for the entity, if any.
    async fn load_latest(&self, entity_id: &str) -> Result<Option<Vec<u8>>, CheckpointError>;
}
