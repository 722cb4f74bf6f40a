//! Candidate filters over (config, schedule) pairs.
//!
//! Each filter is a pure function on equal-length parallel arrays; callers
//! compose them per workload instance. Penalty computation runs as a rayon
//! parallel-for over candidate indices, each index writing its own slot of a
//! pre-sized output vector; the surviving subset is assembled sequentially.
//!
//! All penalties are efficiency ratios in (0, 1]: useful work divided by
//! work after rounding the launch up to hardware granularity.

use rayon::prelude::*;
use tessera_ir::State;

use crate::aligned::AlignedConfig;
use crate::dispatch::{grid_size, padding_penalty};
use crate::error::Result;
use crate::task::SearchTask;
use crate::utils::{ceil_div, round_up};

/// Relaxation step for the padding and occupancy thresholds.
pub const RELAXATION_STEP: f64 = 0.05;

/// Initial threshold for both relaxing filters.
pub const RELAXATION_START: f64 = 0.95;

const SMEM_COMPUTE_INTENSIVE_TOP_K: usize = 20;
const REG_COMPUTE_INTENSIVE_TOP_K: usize = 10;
const SPACE_PRODUCTION_TOP_K: usize = 10;
const K_THRESHOLD_TOP_K: usize = 10;

/// Parallel arrays of tile configs and the schedules instantiated from them.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    pub configs: Vec<AlignedConfig>,
    pub states: Vec<State>,
}

impl Candidates {
    pub fn new(configs: Vec<AlignedConfig>, states: Vec<State>) -> Self {
        debug_assert_eq!(configs.len(), states.len());
        Self { configs, states }
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    fn keep_where(self, keep: &[bool]) -> Self {
        let mut out = Self::default();
        for (i, kept) in keep.iter().enumerate() {
            if *kept {
                out.configs.push(self.configs[i].clone());
                out.states.push(self.states[i].clone());
            }
        }
        out
    }

    /// Keep the first `k` candidates of the index order `ids`.
    fn take_by_order(self, ids: &[usize], k: usize) -> Self {
        let mut out = Self::default();
        for &i in ids.iter().take(k) {
            out.configs.push(self.configs[i].clone());
            out.states.push(self.states[i].clone());
        }
        out
    }
}

/// Keep configs whose thread count is a multiple of the warp granularity.
pub fn threads_number_filter(task: &SearchTask, cands: Candidates) -> Candidates {
    let granularity = task.hardware.thread_granularity();
    let keep: Vec<bool> =
        cands.configs.iter().map(|c| c.threads_num % granularity == 0).collect();
    cands.keep_where(&keep)
}

/// Keep schedules whose padding efficiency for this instance beats the
/// threshold. Efficiency is the product over 2- and 3-way splits of
/// `extent / round_up(extent, split_length_product)`.
pub fn padding_filter(
    task: &SearchTask,
    cands: Candidates,
    wkl_inst: &[i64],
    threshold: f64,
) -> Result<Candidates> {
    let bindings = task.shape_var_map(wkl_inst);
    let keep: Vec<bool> = cands
        .states
        .par_iter()
        .map(|state| {
            padding_penalty(state, &bindings).map(|penalty| penalty > threshold)
        })
        .collect::<Result<_>>()?;
    Ok(cands.keep_where(&keep))
}

/// [`padding_filter`] with threshold relaxation: retry from 0.95 downward in
/// 0.05 steps until at least one schedule survives, restoring the input set
/// before each retry. At threshold zero the input passes through unchanged.
pub fn padding_filter_relaxed(
    task: &SearchTask,
    cands: Candidates,
    wkl_inst: &[i64],
) -> Result<Candidates> {
    let mut threshold = RELAXATION_START;
    loop {
        let filtered = padding_filter(task, cands.clone(), wkl_inst, threshold)?;
        if !filtered.is_empty() {
            return Ok(filtered);
        }
        threshold -= RELAXATION_STEP;
        if threshold < 0.0 {
            return Ok(cands);
        }
    }
}

/// Keep schedules in the lowest SM-visit band whose occupancy efficiency
/// beats the ratio; relax the ratio in 0.05 steps until the set is non-empty.
///
/// The band scan can be structurally unsatisfiable (a grid too small to reach
/// the first band), so the ratio clamps at zero and the input then passes
/// through unchanged.
pub fn occupancy_filter(
    task: &SearchTask,
    cands: Candidates,
    wkl_inst: &[i64],
) -> Result<Candidates> {
    if cands.is_empty() {
        return Ok(cands);
    }
    let hw = &task.hardware;
    let bindings = task.shape_var_map(wkl_inst);
    let grids: Vec<i64> = cands
        .states
        .par_iter()
        .map(|state| grid_size(state, &bindings))
        .collect::<Result<_>>()?;
    let max_grid = grids.iter().copied().max().unwrap_or(1);
    let sm_count = hw.glbmem_sm_partition[0];
    let max_sm_times = ceil_div(max_grid, sm_count);
    let num_cores = hw.num_cores;

    let mut ratio = RELAXATION_START;
    while ratio >= 0.0 {
        let mut keep = vec![false; grids.len()];
        let mut any = false;
        let mut sm_times = hw.smem_sm_partition[1];
        while sm_times <= max_sm_times {
            for (i, &grid) in grids.iter().enumerate() {
                let coeff = if grid < num_cores { hw.lt_ratio } else { hw.gt_ratio };
                let penalty = coeff * grid as f64
                    / ((coeff - 1.0) * grid as f64 + round_up(grid, num_cores) as f64);
                if ceil_div(grid, sm_count) == sm_times && penalty > ratio {
                    keep[i] = true;
                    any = true;
                }
            }
            sm_times += 1;
        }
        if any {
            return Ok(cands.keep_where(&keep));
        }
        ratio -= RELAXATION_STEP;
    }
    Ok(cands)
}

/// Reject configs whose resident blocks would overrun the SM register file,
/// or whose per-thread usage (with the reduction-tile correction term)
/// exceeds the 255-register launch bound.
pub fn register_launch_bounds_filter(
    task: &SearchTask,
    cands: Candidates,
    wkl_inst: &[i64],
) -> Result<Candidates> {
    if cands.is_empty() {
        return Ok(cands);
    }
    let hw = &task.hardware;
    let bindings = task.shape_var_map(wkl_inst);
    // Deeper pipelines double-buffer the accumulator.
    let sch_base = if cands.states[0].num_stages > 7 { 2.0 } else { 1.0 };
    let keep: Vec<bool> = cands
        .configs
        .par_iter()
        .zip(cands.states.par_iter())
        .map(|(cfg, state)| {
            let grid = grid_size(state, &bindings)?;
            let blocks_in_sm =
                hw.smem_sm_partition[1].min(ceil_div(grid, hw.smem_sm_partition[0]));
            let reg = cfg.single_thread_reg_usage as f64;
            let reduce_corr = reg * cfg.reduce_tiles[0][0] as f64 / 16.0;
            Ok((blocks_in_sm * cfg.threads_num) as f64 * (reg + reduce_corr)
                < hw.max_reg_per_sm as f64
                && reg * sch_base + reduce_corr < 255.0)
        })
        .collect::<Result<_>>()?;
    Ok(cands.keep_where(&keep))
}

/// Reject configs whose resident blocks would overrun the SM shared memory.
pub fn shared_memory_launch_bounds_filter(
    task: &SearchTask,
    cands: Candidates,
    wkl_inst: &[i64],
) -> Result<Candidates> {
    let hw = &task.hardware;
    let bindings = task.shape_var_map(wkl_inst);
    let keep: Vec<bool> = cands
        .configs
        .par_iter()
        .zip(cands.states.par_iter())
        .map(|(cfg, state)| {
            let grid = grid_size(state, &bindings)?;
            let blocks_in_sm =
                hw.smem_sm_partition[1].min(ceil_div(grid, hw.smem_sm_partition[0]));
            Ok(blocks_in_sm * cfg.smem_usage < hw.max_smem_usage_per_sm)
        })
        .collect::<Result<_>>()?;
    Ok(cands.keep_where(&keep))
}

/// Top 20 by shared-level compute-intensity ratio, descending.
pub fn shared_memory_compute_intensive_filter(cands: Candidates) -> Candidates {
    let ids = sorted_ids_desc(&cands, |c| c.compute_intensive_ratio[0]);
    cands.take_by_order(&ids, SMEM_COMPUTE_INTENSIVE_TOP_K)
}

/// Top 10 by register-level compute-intensity ratio, descending.
pub fn reg_compute_intensive_filter(cands: Candidates) -> Candidates {
    let ids = sorted_ids_desc(&cands, |c| c.compute_intensive_ratio[1]);
    cands.take_by_order(&ids, REG_COMPUTE_INTENSIVE_TOP_K)
}

/// Top 10 by space-production threshold, descending.
pub fn space_production_threshold_filter(cands: Candidates) -> Candidates {
    let ids = sorted_ids_desc(&cands, |c| c.space_production_threshold as f64);
    cands.take_by_order(&ids, SPACE_PRODUCTION_TOP_K)
}

/// Top 10 by the product of per-level k-thresholds, ascending.
pub fn k_threshold_filter(cands: Candidates) -> Candidates {
    let mut ids: Vec<usize> = (0..cands.len()).collect();
    ids.sort_by(|&a, &b| {
        cands.configs[a]
            .k_threshold_product()
            .partial_cmp(&cands.configs[b].k_threshold_product())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    cands.take_by_order(&ids, K_THRESHOLD_TOP_K)
}

fn sorted_ids_desc(cands: &Candidates, key: impl Fn(&AlignedConfig) -> f64) -> Vec<usize> {
    let mut ids: Vec<usize> = (0..cands.len()).collect();
    ids.sort_by(|&a, &b| {
        key(&cands.configs[b])
            .partial_cmp(&key(&cands.configs[a]))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    ids
}
