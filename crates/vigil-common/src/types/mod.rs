//! Core data model shared across the engine

pub mod checkpoint;
pub mod fact;
pub mod node;
pub mod proposal;
pub mod tag;
