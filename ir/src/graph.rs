//! Stages, loop axes and operand reads of a computation graph.
//!
//! The graph is consumed read-only by the search engine: stage order is the
//! order sketch rules visit stages (last stage first), and the first stage
//! carrying a reduction axis is the one tile configurations are derived from.

use crate::error::Result;
use crate::extent::{Extent, ShapeVarMap};

/// Loop-axis classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Spatial,
    Reduction,
}

/// One iteration dimension of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopAxis {
    pub name: String,
    pub kind: AxisKind,
    pub extent: Extent,
}

impl LoopAxis {
    pub fn spatial(name: impl Into<String>, extent: impl Into<Extent>) -> Self {
        Self { name: name.into(), kind: AxisKind::Spatial, extent: extent.into() }
    }

    pub fn reduction(name: impl Into<String>, extent: impl Into<Extent>) -> Self {
        Self { name: name.into(), kind: AxisKind::Reduction, extent: extent.into() }
    }
}

/// One operand access of a stage body: the producer it loads from and the
/// loop-axis names appearing in its index expression, outermost first.
///
/// The last entry is the axis that strides fastest in memory; the tile
/// generator aligns those axes to the global-memory transaction width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorRead {
    pub producer: String,
    pub index_axes: Vec<String>,
}

impl TensorRead {
    pub fn new(producer: impl Into<String>, index_axes: &[&str]) -> Self {
        Self {
            producer: producer.into(),
            index_axes: index_axes.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Axis name of the innermost (fastest-striding) index, if any.
    pub fn innermost_axis(&self) -> Option<&str> {
        self.index_axes.last().map(String::as_str)
    }
}

/// A unit of computation: iteration axes plus the operand reads of its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stage {
    pub name: String,
    pub axes: Vec<LoopAxis>,
    pub reads: Vec<TensorRead>,
    /// Byte size of one input element, used for memory footprints.
    pub elem_bytes: i64,
}

impl Stage {
    pub fn space_axes(&self) -> impl Iterator<Item = &LoopAxis> {
        self.axes.iter().filter(|a| a.kind == AxisKind::Spatial)
    }

    pub fn reduce_axes(&self) -> impl Iterator<Item = &LoopAxis> {
        self.axes.iter().filter(|a| a.kind == AxisKind::Reduction)
    }

    pub fn has_reduction(&self) -> bool {
        self.axes.iter().any(|a| a.kind == AxisKind::Reduction)
    }

    pub fn axis(&self, name: &str) -> Option<&LoopAxis> {
        self.axes.iter().find(|a| a.name == name)
    }
}

/// The computation graph: an ordered stage list.
///
/// Stage order matters: sketch generation walks stages from last to first,
/// and the output stage is assumed last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeGraph {
    pub stages: Vec<Stage>,
}

impl ComputeGraph {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    /// The first reduction-bearing stage, which anchors tile-configuration
    /// analysis (operand footprints, axis counts).
    pub fn reduction_stage(&self) -> Option<(usize, &Stage)> {
        self.stages.iter().enumerate().find(|(_, s)| s.has_reduction())
    }

    /// Floating-point operation count for one workload instance: two ops
    /// (multiply + accumulate) per point of the reduction stage's full
    /// iteration domain.
    pub fn flop_for_instance(&self, bindings: &ShapeVarMap) -> Result<f64> {
        let Some((_, stage)) = self.reduction_stage() else {
            // Elementwise-only graph: one op per output point of the last stage.
            let Some(last) = self.stages.last() else { return Ok(0.0) };
            let mut flop = 1.0;
            for axis in &last.axes {
                flop *= axis.extent.substitute(bindings)? as f64;
            }
            return Ok(flop);
        };
        let mut flop = 2.0;
        for axis in &stage.axes {
            flop *= axis.extent.substitute(bindings)? as f64;
        }
        Ok(flop)
    }
}
