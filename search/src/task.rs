//! The search task: graph, target, hardware, and workload instances.

use std::collections::HashMap;

use bon::bon;
use tessera_hardware::HardwareDescriptor;
use tessera_ir::{ComputeGraph, ShapeVarMap, Stage, State};

use crate::error::{NoReductionStageSnafu, Result};
use snafu::OptionExt;

/// Device class a schedule is searched for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Cpu,
    Gpu { vendor: GpuVendor },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Mali,
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu { vendor } => write!(f, "gpu/{vendor:?}"),
        }
    }
}

/// Everything a search needs to know about one workload. Immutable for the
/// lifetime of the search.
#[derive(Debug, Clone)]
pub struct SearchTask {
    pub graph: ComputeGraph,
    pub target: Target,
    pub hardware: HardwareDescriptor,
    /// Names of unresolved shape variables, positionally matching each entry
    /// of `wkl_insts`. `None` for fully static workloads.
    pub shape_vars: Option<Vec<String>>,
    /// Concrete shape-variable bindings, one row per workload instance.
    pub wkl_insts: Vec<Vec<i64>>,
    pub wkl_inst_weights: Vec<f64>,
    pub workload_key: String,
}

#[bon]
impl SearchTask {
    #[builder]
    pub fn builder(
        graph: ComputeGraph,
        target: Target,
        hardware: HardwareDescriptor,
        shape_vars: Option<Vec<String>>,
        #[builder(default)] wkl_insts: Vec<Vec<i64>>,
        #[builder(default)] wkl_inst_weights: Vec<f64>,
        workload_key: String,
    ) -> Self {
        let mut wkl_insts = wkl_insts;
        let mut wkl_inst_weights = wkl_inst_weights;
        // A static task still has exactly one (empty) instance so per-instance
        // loops stay uniform.
        if wkl_insts.is_empty() {
            wkl_insts.push(Vec::new());
        }
        if wkl_inst_weights.len() != wkl_insts.len() {
            wkl_inst_weights = vec![1.0; wkl_insts.len()];
        }
        Self { graph, target, hardware, shape_vars, wkl_insts, wkl_inst_weights, workload_key }
    }
}

impl SearchTask {
    pub fn is_dynamic(&self) -> bool {
        self.shape_vars.as_ref().is_some_and(|v| !v.is_empty())
    }

    /// Binding map for one workload instance.
    pub fn shape_var_map(&self, inst: &[i64]) -> ShapeVarMap {
        let mut map = HashMap::new();
        if let Some(vars) = &self.shape_vars {
            for (name, value) in vars.iter().zip(inst.iter()) {
                map.insert(name.clone(), *value);
            }
        }
        map
    }

    /// The reduction-bearing stage tile analysis anchors on.
    pub fn reduction_stage(&self) -> Result<(usize, &Stage)> {
        self.graph.reduction_stage().context(NoReductionStageSnafu)
    }

    /// Byte size of one input element at the reduction stage.
    pub fn elem_bytes(&self) -> i64 {
        self.graph.reduction_stage().map(|(_, s)| s.elem_bytes).unwrap_or(4)
    }

    /// Spatial and reduction axis counts at the reduction stage.
    pub fn tiling_dims(&self) -> Result<(usize, usize)> {
        let (_, stage) = self.reduction_stage()?;
        Ok((stage.space_axes().count(), stage.reduce_axes().count()))
    }

    /// Per-axis extents of the reduction stage across all workload instances:
    /// `(space_extents, reduce_extents)`, outer index = axis.
    pub fn axis_extents_per_instance(&self) -> Result<(Vec<Vec<i64>>, Vec<Vec<i64>>)> {
        let (_, stage) = self.reduction_stage()?;
        let mut space: Vec<Vec<i64>> = vec![Vec::new(); stage.space_axes().count()];
        let mut reduce: Vec<Vec<i64>> = vec![Vec::new(); stage.reduce_axes().count()];
        for inst in &self.wkl_insts {
            let bindings = self.shape_var_map(inst);
            for (i, axis) in stage.space_axes().enumerate() {
                space[i].push(axis.extent.substitute(&bindings)?);
            }
            for (i, axis) in stage.reduce_axes().enumerate() {
                reduce[i].push(axis.extent.substitute(&bindings)?);
            }
        }
        Ok((space, reduce))
    }

    pub fn init_state(&self) -> State {
        State::new(self.graph.stages.len())
    }

    /// FLOP count for one instance.
    pub fn flop_for_instance(&self, inst: &[i64]) -> Result<f64> {
        Ok(self.graph.flop_for_instance(&self.shape_var_map(inst))?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_ir::{Extent, LoopAxis, TensorRead};

    fn dyn_task() -> SearchTask {
        let graph = ComputeGraph::new(vec![Stage {
            name: "C".to_string(),
            axes: vec![
                LoopAxis::spatial("i", Extent::Const(64)),
                LoopAxis::spatial("j", Extent::var("T")),
                LoopAxis::reduction("k", Extent::Const(32)),
            ],
            reads: vec![TensorRead::new("A", &["i", "k"]), TensorRead::new("B", &["k", "j"])],
            elem_bytes: 4,
        }]);
        SearchTask::builder()
            .graph(graph)
            .target(Target::Gpu { vendor: GpuVendor::Nvidia })
            .hardware(HardwareDescriptor::rtx3090())
            .shape_vars(vec!["T".to_string()])
            .wkl_insts(vec![vec![16], vec![128]])
            .workload_key("matmul_dyn".to_string())
            .build()
    }

    #[test]
    fn test_dynamic_detection() {
        assert!(dyn_task().is_dynamic());
    }

    #[test]
    fn test_default_weights_match_instances() {
        let task = dyn_task();
        assert_eq!(task.wkl_inst_weights, vec![1.0, 1.0]);
    }

    #[test]
    fn test_axis_extents_per_instance() {
        let task = dyn_task();
        let (space, reduce) = task.axis_extents_per_instance().unwrap();
        assert_eq!(space, vec![vec![64, 64], vec![16, 128]]);
        assert_eq!(reduce, vec![vec![32, 32]]);
    }

    #[test]
    fn test_static_task_gets_one_empty_instance() {
        let mut task = dyn_task();
        task = SearchTask::builder()
            .graph(task.graph)
            .target(Target::Cpu)
            .hardware(HardwareDescriptor::generic())
            .workload_key("static".to_string())
            .build();
        assert!(!task.is_dynamic());
        assert_eq!(task.wkl_insts, vec![Vec::<i64>::new()]);
    }
}
