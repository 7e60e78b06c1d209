//! Error types for the Vigil engine
//!
//! Provides a unified error type and domain-specific error variants. The rule
//! from the error design: no failure in the core terminates the system. The
//! worst outcome is a node staying `Degraded` or a round being `Escalated`.

use thiserror::Error;

/// Result type alias using VigilError
pub type Result<T> = std::result::Result<T, VigilError>;

/// Unified error type for Vigil operations
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("bus error: {0}")]
    Bus(#[from] BusError),

    #[error("estimation error: {0}")]
    Estimation(#[from] EstimationError),

    #[error("simulation error: {0}")]
    Simulation(#[from] SimulationError),

    #[error("consensus error: {0}")]
    Consensus(#[from] ConsensusError),

    #[error("knowledge error: {0}")]
    Knowledge(#[from] KnowledgeError),

    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Tag Bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("unknown tag: {0}")]
    UnknownTag(String),

    #[error("tag {tag} has no owning node")]
    Unowned { tag: String },

    #[error("tag {tag} has no driver route")]
    Unrouted { tag: String },

    #[error("node {0} is not attached to the bus")]
    UnknownNode(String),

    #[error("driver {driver} write failed: {reason}")]
    DriverWrite { driver: String, reason: String },

    #[error("inbound channel closed for node {0}")]
    ChannelClosed(String),
}

/// Node estimation errors
#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("missing tag in snapshot: {0}")]
    MissingTag(String),

    #[error("tag {tag} quality is {quality}, cannot estimate")]
    BadQuality { tag: String, quality: String },

    #[error("estimator produced invalid state: {0}")]
    InvalidState(String),

    #[error("model state blob rejected: {0}")]
    StateDecode(String),

    #[error("estimator failed: {0}")]
    Failed(String),
}

/// Digital twin simulation errors
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("no process model for tag {0}")]
    NoModel(String),

    #[error("proposal writes non-numeric value to {0}")]
    NonNumericWrite(String),

    #[error("simulation failed: {0}")]
    Failed(String),
}

/// Consensus validator errors
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("round {0} not found")]
    RoundNotFound(uuid::Uuid),

    #[error("round {round} is {state}, expected an escalated round")]
    NotEscalated { round: uuid::Uuid, state: String },

    #[error("round {0} was already resolved")]
    AlreadyResolved(uuid::Uuid),

    #[error("proposal {proposal} is not a candidate of round {round}")]
    UnknownCandidate { round: uuid::Uuid, proposal: uuid::Uuid },

    #[error("proposal intake channel closed")]
    IntakeClosed,
}

/// Knowledge graph errors
#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("node {0} is not registered in the ecosystem")]
    UnknownNode(String),

    #[error("snapshot decode failed: {0}")]
    SnapshotDecode(String),
}

/// Checkpoint store errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("no valid checkpoint for {entity_kind} {entity_id}")]
    NoneValid { entity_kind: String, entity_id: String },

    #[error("encode failed: {0}")]
    Encode(String),
}

/// Command dispatcher errors
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("proposal {0} has no writes to dispatch")]
    EmptyAction(uuid::Uuid),

    #[error("driver rejected command: {0}")]
    DriverRejected(String),
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for VigilError {
    fn from(err: bincode::Error) -> Self {
        VigilError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        VigilError::Checkpoint(CheckpointError::Io(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VigilError::Bus(BusError::UnknownTag("FIC101.PV".to_string()));
        assert!(err.to_string().contains("FIC101.PV"));
    }

    #[test]
    fn test_checkpoint_error_wraps_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: VigilError = io.into();
        assert!(matches!(err, VigilError::Checkpoint(CheckpointError::Io(_))));
    }
}
