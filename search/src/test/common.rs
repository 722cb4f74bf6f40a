//! Shared fixtures: small matmul-shaped tasks and deterministic measurers.

use smallvec::smallvec;
use tessera_hardware::HardwareDescriptor;
use tessera_ir::{ComputeGraph, Extent, LoopAxis, Stage, State, Step, TensorRead};

use crate::aligned::AlignedConfig;
use crate::measure::{MeasureInput, MeasureResult, Measurer};
use crate::task::{GpuVendor, SearchTask, Target};

fn matmul_stage(n_extent: Extent) -> Stage {
    Stage {
        name: "C".to_string(),
        axes: vec![
            LoopAxis::spatial("i", Extent::Const(64)),
            LoopAxis::spatial("j", n_extent),
            LoopAxis::reduction("k", Extent::Const(32)),
        ],
        reads: vec![TensorRead::new("A", &["i", "k"]), TensorRead::new("B", &["k", "j"])],
        elem_bytes: 4,
    }
}

/// Matmul with a symbolic `j` dimension and two workload instances, on an
/// RTX 3090-class descriptor.
pub fn dynamic_gpu_task() -> SearchTask {
    let graph = ComputeGraph::new(vec![matmul_stage(Extent::var("T"))]);
    SearchTask::builder()
        .graph(graph)
        .target(Target::Gpu { vendor: GpuVendor::Nvidia })
        .hardware(HardwareDescriptor::rtx3090())
        .shape_vars(vec!["T".to_string()])
        .wkl_insts(vec![vec![64], vec![96]])
        .workload_key("matmul_dyn".to_string())
        .build()
}

/// Fully static matmul on the same GPU descriptor.
pub fn static_gpu_task() -> SearchTask {
    let graph = ComputeGraph::new(vec![matmul_stage(Extent::Const(64))]);
    SearchTask::builder()
        .graph(graph)
        .target(Target::Gpu { vendor: GpuVendor::Nvidia })
        .hardware(HardwareDescriptor::rtx3090())
        .workload_key("matmul_static".to_string())
        .build()
}

/// Static matmul on a generic CPU descriptor (no aligned memory levels).
pub fn static_cpu_task() -> SearchTask {
    let graph = ComputeGraph::new(vec![matmul_stage(Extent::Const(64))]);
    SearchTask::builder()
        .graph(graph)
        .target(Target::Cpu)
        .hardware(HardwareDescriptor::generic())
        .workload_key("matmul_cpu".to_string())
        .build()
}

/// A well-formed two-level config for the matmul fixtures: 32-wide shared
/// tiles over 4-wide register tiles, 8-deep block reduction.
pub fn aligned_config_2level() -> AlignedConfig {
    let mut cfg = AlignedConfig::with_levels(2);
    cfg.space_tiles = vec![smallvec![32, 32], smallvec![4, 4]];
    cfg.reduce_tiles = vec![smallvec![8], smallvec![1]];
    cfg.threads_num = 64;
    cfg.single_thread_reg_usage = 16;
    cfg.smem_usage = 4096;
    cfg
}

/// A concrete schedule tiling every spatial axis of the reduction stage by
/// `space_tile` and the reduction axis by `reduce_tile`.
pub fn tiled_gpu_state(task: &SearchTask, space_tile: i64, reduce_tile: i64) -> State {
    let (stage_id, stage) = task.reduction_stage().unwrap();
    let mut s = task.init_state();
    for axis in stage.space_axes() {
        s.split(
            stage_id,
            axis.name.clone(),
            axis.extent.clone(),
            vec![Some(1), Some(space_tile), Some(1)],
        );
    }
    for axis in stage.reduce_axes() {
        s.split(stage_id, axis.name.clone(), axis.extent.clone(), vec![Some(reduce_tile), Some(1)]);
    }
    s
}

/// Cost is inversely proportional to the total split-factor product, so
/// larger tiles rank strictly better and tests can predict winners.
pub struct DeterministicMeasurer;

impl Measurer for DeterministicMeasurer {
    fn measure(&mut self, _task: &SearchTask, inputs: &[MeasureInput]) -> Vec<MeasureResult> {
        inputs
            .iter()
            .map(|input| {
                let work: i64 = input
                    .state
                    .steps
                    .iter()
                    .filter_map(Step::split_length_product)
                    .map(|p| p.max(1))
                    .sum::<i64>()
                    .max(1);
                MeasureResult::from_costs(vec![1.0 / work as f64])
            })
            .collect()
    }
}
