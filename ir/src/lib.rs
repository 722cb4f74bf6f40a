//! Computation-graph and schedule data model for the Tessera auto-tuner.
//!
//! This crate defines the structures the search engine operates on: stages
//! with spatial/reduction loop axes, possibly-symbolic extents, and schedules
//! expressed as ordered transform-step sequences.
//!
//! # Module Organization
//!
//! - [`extent`] - Loop extents, constant or symbolic
//! - [`graph`] - Stages, loop axes, operand reads, the compute graph
//! - [`step`] - Schedule transform steps
//! - [`state`] - The schedule itself: a step sequence with canonical serialization
//! - [`bounds`] - Bound inference and validity pruning over schedules
//! - [`error`] - Error types and result handling

pub mod bounds;
pub mod error;
pub mod extent;
pub mod graph;
pub mod state;
pub mod step;

// Re-exports for downstream crates.
// All core types remain accessible at the crate root.
pub use bounds::{infer_bounds, prune_invalid};
pub use error::{Error, MissingShapeVarSnafu, Result};
pub use extent::{Extent, ShapeVarMap};
pub use graph::{AxisKind, ComputeGraph, LoopAxis, Stage, TensorRead};
pub use state::State;
pub use step::{Step, ThreadScope};
