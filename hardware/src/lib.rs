//! Device memory-hierarchy descriptors.
//!
//! A [`HardwareDescriptor`] carries the immutable per-device facts the search
//! engine prunes against: per-level bandwidths and capacities, SM
//! partitioning, transaction widths, and occupancy-skew coefficients. Built
//! once per search task and shared read-only afterwards.

pub mod descriptor;

pub use descriptor::HardwareDescriptor;
