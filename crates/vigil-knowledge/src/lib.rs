//! # Vigil Knowledge
//!
//! The shared memory of the ecosystem: a versioned, append/merge-only store of
//! learned facts plus a live map of node states.
//!
//! ## Merge semantics
//!
//! Facts are keyed by `(subject, relation, object)`. Per key, the causally
//! newest fact (by version vector) wins; facts with concurrent vectors are
//! both kept as alternatives tagged by origin, and superseded facts move to a
//! history that stays queryable. `merge` is commutative, associative, and
//! idempotent, so replicas converge regardless of exchange order.
//!
//! Nodes consult the graph read-only during estimation; only the node that
//! derived a fact publishes it.

pub mod graph;
pub mod state;

pub use graph::{KnowledgeGraph, KnowledgeSnapshot};
pub use state::NodeState;

/// Bound on the recent-insight log; the oldest entries roll off.
pub const RECENT_FACT_LOG_CAPACITY: usize = 1000;
