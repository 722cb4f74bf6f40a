//! Per-instance schedule adaptation and dispatch.
//!
//! A schedule tuned for one tile shape still runs on every workload instance;
//! what changes is how well the launch fills the device. The adaptation
//! penalties quantify that: occupancy (wave quantization against the core
//! count) and padding (extents rounded up to the tile). Both are efficiency
//! ratios in (0, 1] and multiply into the adapted score.

use std::collections::HashMap;

use tessera_ir::{Extent, ShapeVarMap, State, Step};

use crate::error::Result;
use crate::task::SearchTask;
use crate::utils::{ceil_div, round_up};

/// Thread-block count a schedule launches for one instance: the product over
/// 3-way splits of the extent divided by the block tile.
pub fn grid_size(state: &State, bindings: &ShapeVarMap) -> Result<i64> {
    let mut grid = 1i64;
    for step in &state.steps {
        let Step::Split { extent, lengths, .. } = step else { continue };
        if lengths.len() != 3 {
            continue;
        }
        let extent = extent.substitute(bindings)?;
        let tile: i64 = lengths.iter().map(|l| l.unwrap_or(1)).product();
        grid *= ceil_div(extent, tile.max(1)).max(1);
    }
    Ok(grid)
}

/// Padding efficiency of a schedule for one instance: the product over 2- and
/// 3-way splits of `extent / round_up(extent, tile)`.
pub fn padding_penalty(state: &State, bindings: &ShapeVarMap) -> Result<f64> {
    let mut penalty = 1.0f64;
    for step in &state.steps {
        let Step::Split { extent, lengths, .. } = step else { continue };
        if lengths.len() != 2 && lengths.len() != 3 {
            continue;
        }
        let extent = extent.substitute(bindings)?;
        let tile: i64 = lengths.iter().map(|l| l.unwrap_or(1)).product();
        penalty *= extent as f64 / round_up(extent, tile.max(1)) as f64;
    }
    Ok(penalty)
}

/// Occupancy efficiency of a grid: useful blocks over the wave-quantized
/// block count, skewed by the below/above-core-count coefficient.
pub fn occupancy_penalty(grid: i64, task: &SearchTask) -> f64 {
    let hw = &task.hardware;
    let coeff = if grid < hw.num_cores { hw.lt_ratio } else { hw.gt_ratio };
    coeff * grid as f64 / ((coeff - 1.0) * grid as f64 + round_up(grid, hw.num_cores) as f64)
}

/// A measured score adapted to one workload instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adapted {
    pub occupancy: f64,
    pub padding: f64,
    pub score: f64,
}

/// Adapt a measured base score to one instance by its occupancy and padding
/// efficiency.
pub fn adapt_state_to_workload(
    task: &SearchTask,
    state: &State,
    wkl_inst: &[i64],
    base_score: f64,
) -> Result<Adapted> {
    let bindings = task.shape_var_map(wkl_inst);
    let occupancy = occupancy_penalty(grid_size(state, &bindings)?, task);
    let padding = padding_penalty(state, &bindings)?;
    Ok(Adapted { occupancy, padding, score: base_score * occupancy * padding })
}

/// Combined adaption penalty (≥ 1) a measured cost is scaled by when a
/// schedule runs on an instance it was not shaped for.
pub fn adaption_penalty(task: &SearchTask, state: &State, wkl_inst: &[i64]) -> Result<f64> {
    let adapted = adapt_state_to_workload(task, state, wkl_inst, 1.0)?;
    Ok(1.0 / (adapted.occupancy * adapted.padding).max(f64::MIN_POSITIVE))
}

/// Assigns one measured schedule per workload instance by adapted score.
#[derive(Debug, Clone, Copy, Default)]
pub struct TopKDispatcher;

impl TopKDispatcher {
    /// `scores` is a row-major `[num_insts × num_states]` matrix of adapted
    /// scores; returns instance → state-column of the per-row argmax.
    pub fn dispatch(&self, scores: &[f64], num_states: usize) -> HashMap<usize, usize> {
        debug_assert!(num_states > 0 && scores.len() % num_states == 0);
        let mut out = HashMap::new();
        for (inst_id, row) in scores.chunks_exact(num_states).enumerate() {
            let mut best = 0;
            let mut best_score = f64::NEG_INFINITY;
            for (state_id, &score) in row.iter().enumerate() {
                if score > best_score {
                    best_score = score;
                    best = state_id;
                }
            }
            out.insert(inst_id, best);
        }
        out
    }

    /// Convert a dispatch map over measured-state columns into a deduplicated
    /// selection list plus instance → selection-index map.
    pub fn map_insts_to_states(
        &self,
        dispatch: &HashMap<usize, usize>,
        states: &[State],
    ) -> (Vec<State>, HashMap<usize, usize>) {
        let mut selected: Vec<State> = Vec::new();
        let mut column_to_selected: HashMap<usize, usize> = HashMap::new();
        let mut inst_map = HashMap::new();
        let mut inst_ids: Vec<&usize> = dispatch.keys().collect();
        inst_ids.sort_unstable();
        for &inst_id in inst_ids {
            let column = dispatch[&inst_id];
            let idx = *column_to_selected.entry(column).or_insert_with(|| {
                selected.push(states[column].clone());
                selected.len() - 1
            });
            inst_map.insert(inst_id, idx);
        }
        (selected, inst_map)
    }
}

/// Weighted-latency aggregate over instances: Σ weightᵢ · flopᵢ / bestᵢ,
/// with weights normalized to sum 1 and `bestᵢ` the best measured
/// flops-per-second for instance `i`.
pub fn flop_weighted_latency(task: &SearchTask, best_inst_flops: &[f64]) -> Result<f64> {
    let total_weight: f64 = task.wkl_inst_weights.iter().sum();
    let mut latency = 0.0;
    for (inst_id, inst) in task.wkl_insts.iter().enumerate() {
        let weight = task.wkl_inst_weights[inst_id] / total_weight.max(f64::MIN_POSITIVE);
        let flop = task.flop_for_instance(inst)?;
        let best = best_inst_flops.get(inst_id).copied().unwrap_or(0.0);
        if best > 0.0 {
            latency += weight * flop / best;
        }
    }
    Ok(latency)
}
