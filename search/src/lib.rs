//! Hardware-aligned auto-tuning search for tensor programs.
//!
//! Given a compute graph with possibly symbolic loop extents and a hardware
//! descriptor, the search finds high-throughput schedules: structural
//! sketches are generated by rule application, instantiated into populations,
//! evolved against a cost model, and measured through an external seam. For
//! dynamic shapes the hardware-aligned pipeline enumerates tile
//! configurations that fill the device cleanly, filters them against capacity
//! and efficiency bounds per workload instance, and dispatches one measured
//! schedule to every instance.
//!
//! Entry point: [`SketchPolicy`].

pub mod aligned;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod evolution;
pub mod filters;
pub mod init;
pub mod measure;
pub mod model;
pub mod mutation;
pub mod policy;
pub mod sketch;
pub mod space;
pub mod task;
pub mod utils;

#[cfg(test)]
pub mod test;

pub use aligned::AlignedConfig;
pub use config::{EvolutionParams, SearchParams};
pub use dispatch::TopKDispatcher;
pub use error::{Result, SearchError};
pub use measure::{BuildResult, MeasureInput, MeasureResult, Measurer, ProgramMeasurer};
pub use model::{CostModel, RandomModel};
pub use policy::{SearchOutput, SketchPolicy};
pub use task::{GpuVendor, SearchTask, Target};
