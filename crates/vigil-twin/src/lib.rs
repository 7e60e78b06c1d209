//! # Vigil Twin
//!
//! Offline replay of a proposal against a process model, before anything
//! touches a real actuator. Simulation is stateless per call: it reads a tag
//! snapshot copy and never mutates bus or node state.
//!
//! The gate rule: a proposal whose risk exceeds the configured threshold must
//! be simulated before it can enter a consensus round, and a risky proposal
//! whose simulation confidence is below the minimum is rejected on the spot;
//! low-confidence risky actions never reach consensus.

pub mod gate;
pub mod model;
pub mod simulator;

pub use gate::{GateConfig, GateDecision, SimulationGate};
pub use model::{FirstOrderModel, FirstOrderParams, ProcessModel};
pub use simulator::{SimulationResult, Simulator};
