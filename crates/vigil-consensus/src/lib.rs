//! # Vigil Consensus
//!
//! The consensus validator collects competing proposals into rounds keyed by
//! overlapping target tags, scores them across four objectives, and decides
//! deterministically. Anything it cannot decide cleanly it escalates to a
//! human instead of guessing.
//!
//! The validator itself is synchronous and lock-protected; the engine drives
//! it from an async loop (proposals in, a periodic close tick, decisions out).

pub mod round;
pub mod scoring;
pub mod validator;

pub use round::{Candidate, ConsensusRound, EscalationReason, RoundOutcome, RoundState, RoundSummary};
pub use scoring::{rank, Verdict};
pub use validator::{
    ConsensusValidator, Decision, EscalationDecision, NodeStatusSource, TagVersionSource,
    ValidatorConfig, ValidatorMetrics,
};

/// Default collection window before a round closes and gets scored.
pub const DEFAULT_COLLECTION_WINDOW_MS: i64 = 250;

/// Default bound on how long a round may sit undecided before it is forced
/// to `Escalated`.
pub const DEFAULT_DECIDING_TIMEOUT_MS: i64 = 2_000;

/// Default minimum gap between the top two aggregate scores for a clean win.
pub const DEFAULT_AMBIGUITY_MARGIN: f64 = 0.05;

/// Default minimum winner confidence for approval.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.5;

/// Default tag-version advance beyond which a round is torn down.
pub const DEFAULT_CANCEL_VERSION_DELTA: u64 = 3;
