//! Population initialization rules.
//!
//! Two families instantiate a sketch into a concrete schedule. The random
//! family samples tile sizes and annotations per population slot; the aligned
//! family derives everything deterministically from one
//! [`AlignedConfig`], so the hardware-aligned pipeline measures exactly the
//! configurations its filters accepted.

use rand::Rng;
use rand::rngs::StdRng;
use tessera_ir::{AxisKind, Extent, Stage, State, Step, ThreadScope};

use crate::aligned::AlignedConfig;
use crate::config::SearchParams;
use crate::task::{SearchTask, Target};
use crate::utils::random_factorization;

/// Outcome of applying one init (or mutation) rule to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Valid,
    Invalid,
}

/// Unroll pragma the aligned path always emits; random init samples from
/// `SearchParams::auto_unroll_configs` instead.
const ALIGNED_AUTO_UNROLL: i64 = 512;

/// Largest extent an axis takes over all workload instances; `None` when a
/// shape variable is unbound in every instance.
pub fn max_extent(task: &SearchTask, extent: &Extent) -> Option<i64> {
    match extent {
        Extent::Const(c) => Some(*c),
        Extent::Var(_) => task
            .wkl_insts
            .iter()
            .filter_map(|inst| extent.substitute(&task.shape_var_map(inst)).ok())
            .max(),
    }
}

fn stage_axis_kind(stage: &Stage, axis: &str) -> Option<AxisKind> {
    stage.axis(axis).map(|a| a.kind)
}

// ---------------------------------------------------------------------------
// Random initialization
// ---------------------------------------------------------------------------

/// Randomized init rules, applied in order; any `Invalid` discards the
/// candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitRule {
    FillTileSize,
    ThreadBind,
    Unroll,
    Vectorize,
}

/// Rule list per device class. GPU binds threads; CPU vectorizes instead.
pub fn init_rules(task: &SearchTask) -> Vec<InitRule> {
    match task.target {
        Target::Cpu => vec![InitRule::FillTileSize, InitRule::Unroll, InitRule::Vectorize],
        Target::Gpu { .. } => vec![InitRule::FillTileSize, InitRule::ThreadBind, InitRule::Unroll],
    }
}

impl InitRule {
    pub fn apply(
        &self,
        task: &SearchTask,
        params: &SearchParams,
        state: &mut State,
        rng: &mut StdRng,
    ) -> ResultKind {
        match self {
            Self::FillTileSize => fill_tile_sizes_random(task, params, state, rng),
            Self::ThreadBind => bind_threads(task, state),
            Self::Unroll => {
                let max_step =
                    params.auto_unroll_configs[rng.gen_range(0..params.auto_unroll_configs.len())];
                annotate_unroll(task, state, max_step)
            }
            Self::Vectorize => vectorize_innermost(task, state),
        }
    }
}

fn fill_tile_sizes_random(
    task: &SearchTask,
    params: &SearchParams,
    state: &mut State,
    rng: &mut StdRng,
) -> ResultKind {
    for step_id in state.unfilled_split_ids() {
        let Step::Split { extent, lengths, .. } = &state.steps[step_id] else { continue };
        let Some(extent) = max_extent(task, extent) else { return ResultKind::Invalid };
        let nparts = lengths.len();
        let parts =
            random_factorization(extent, nparts, params.max_innermost_split_factor, rng);
        state.fill_split(step_id, parts.into_iter().map(Some).collect());
    }
    ResultKind::Valid
}

// ---------------------------------------------------------------------------
// Aligned initialization
// ---------------------------------------------------------------------------

/// Deterministic init rules instantiating a sketch from one accepted tile
/// configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignedInitRule {
    TileSize,
    ThreadBind,
    Unroll,
}

pub fn aligned_init_rules() -> Vec<AlignedInitRule> {
    vec![AlignedInitRule::TileSize, AlignedInitRule::ThreadBind, AlignedInitRule::Unroll]
}

impl AlignedInitRule {
    pub fn apply(
        &self,
        task: &SearchTask,
        config: &AlignedConfig,
        state: &mut State,
    ) -> ResultKind {
        match self {
            Self::TileSize => fill_tile_sizes_aligned(task, config, state),
            Self::ThreadBind => bind_threads(task, state),
            Self::Unroll => annotate_unroll(task, state, ALIGNED_AUTO_UNROLL),
        }
    }
}

/// Fill the reduction stage's tiling splits from the config.
///
/// A spatial axis with shared tile `s` and register tile `r` becomes the
/// 3-way split `[1, s / r, r]` (vthread, thread, serial); a reduction axis
/// becomes the 2-way split `[rs, rr]`. Tiles that do not divide evenly
/// invalidate the candidate.
fn fill_tile_sizes_aligned(
    task: &SearchTask,
    config: &AlignedConfig,
    state: &mut State,
) -> ResultKind {
    let Ok((stage_id, stage)) = task.reduction_stage() else { return ResultKind::Invalid };
    if config.space_tiles.len() < 2 || config.reduce_tiles.len() < 2 {
        return ResultKind::Invalid;
    }
    let space_names: Vec<&str> = stage.space_axes().map(|a| a.name.as_str()).collect();
    let reduce_names: Vec<&str> = stage.reduce_axes().map(|a| a.name.as_str()).collect();

    for step_id in state.unfilled_split_ids() {
        let Step::Split { stage_id: sid, axis, lengths, .. } = &state.steps[step_id] else {
            continue;
        };
        if *sid != stage_id {
            // Splits outside the reduction stage keep one free length for
            // bound inference to fill.
            let mut parts = vec![Some(1); lengths.len()];
            parts[0] = None;
            state.fill_split(step_id, parts);
            continue;
        }
        match stage_axis_kind(stage, axis) {
            Some(AxisKind::Spatial) => {
                let Some(i) = space_names.iter().position(|n| n == axis) else {
                    return ResultKind::Invalid;
                };
                let (Some(&s), Some(&r)) =
                    (config.space_tiles[0].get(i), config.space_tiles[1].get(i))
                else {
                    return ResultKind::Invalid;
                };
                if r == 0 || s % r != 0 || lengths.len() != 3 {
                    return ResultKind::Invalid;
                }
                state.fill_split(step_id, vec![Some(1), Some(s / r), Some(r)]);
            }
            Some(AxisKind::Reduction) => {
                let Some(i) = reduce_names.iter().position(|n| n == axis) else {
                    return ResultKind::Invalid;
                };
                let (Some(&rs), Some(&rr)) =
                    (config.reduce_tiles[0].get(i), config.reduce_tiles[1].get(i))
                else {
                    return ResultKind::Invalid;
                };
                if lengths.len() != 2 {
                    return ResultKind::Invalid;
                }
                state.fill_split(step_id, vec![Some(rs), Some(rr)]);
            }
            None => return ResultKind::Invalid,
        }
    }
    ResultKind::Valid
}

// ---------------------------------------------------------------------------
// Shared structural annotations
// ---------------------------------------------------------------------------

/// Bind the reduction stage's 3-way-split spatial parts: fused outers to
/// `blockIdx.x`, fused first inner parts to `vthread`, fused second inner
/// parts to `threadIdx.x`.
fn bind_threads(task: &SearchTask, state: &mut State) -> ResultKind {
    let Ok((stage_id, _)) = task.reduction_stage() else { return ResultKind::Invalid };
    let tiled_axes: Vec<String> = state
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::Split { stage_id: sid, axis, lengths, .. }
                if *sid == stage_id && lengths.len() == 3 =>
            {
                Some(axis.clone())
            }
            _ => None,
        })
        .collect();
    if tiled_axes.is_empty() {
        return ResultKind::Invalid;
    }
    for (part, scope) in
        [(0, ThreadScope::BlockX), (1, ThreadScope::Vthread), (2, ThreadScope::ThreadX)]
    {
        let parts: Vec<String> = tiled_axes.iter().map(|a| format!("{a}.{part}")).collect();
        let name = if parts.len() > 1 {
            let fused = format!("{}_fused", parts.join("_"));
            state.fuse(stage_id, parts);
            fused
        } else {
            parts.into_iter().next().unwrap_or_default()
        };
        state.bind(stage_id, name, scope);
    }
    ResultKind::Valid
}

fn annotate_unroll(task: &SearchTask, state: &mut State, max_step: i64) -> ResultKind {
    let Ok((stage_id, _)) = task.reduction_stage() else { return ResultKind::Invalid };
    if max_step > 0 {
        state.unroll(stage_id, max_step);
    }
    ResultKind::Valid
}

/// Vectorize the innermost spatial part of the reduction stage (CPU path).
fn vectorize_innermost(task: &SearchTask, state: &mut State) -> ResultKind {
    let Ok((stage_id, stage)) = task.reduction_stage() else { return ResultKind::Invalid };
    let Some(last) = stage.space_axes().last() else { return ResultKind::Invalid };
    let split_parts = state.steps.iter().rev().find_map(|s| match s {
        Step::Split { stage_id: sid, axis, lengths, .. }
            if *sid == stage_id && axis == &last.name =>
        {
            Some(lengths.len())
        }
        _ => None,
    });
    let axis = match split_parts {
        Some(parts) => format!("{}.{parts}", last.name),
        None => last.name.clone(),
    };
    state.vectorize(stage_id, axis);
    ResultKind::Valid
}
