//! Structural sketch generation.
//!
//! Sketches are schedule skeletons: the transform steps are all present, but
//! split lengths stay undefined until population initialization fills them.
//! Generation is a breadth-first walk over `(state, stage_id)` pairs, last
//! stage first, with each rule either skipping, applying, or applying and
//! cutting off the rest of the rule list for that state.

use std::collections::HashSet;
use std::sync::Arc;

use tessera_ir::{Stage, State, Step, ThreadScope};

use crate::error::{NoSketchesSnafu, Result, UnsupportedTargetSnafu};
use crate::task::{GpuVendor, SearchTask, Target};

/// What a rule's condition check decided for one `(state, stage)` visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Not applicable here; try the next rule.
    Skip,
    /// Apply, and let the remaining rules also branch off the original state.
    Apply,
    /// Apply, and stop considering further rules for this state.
    ApplyAndSkipRest,
}

pub type CustomCondition = Arc<dyn Fn(&SearchTask, &State, usize) -> ConditionKind + Send + Sync>;
pub type CustomApply = Arc<dyn Fn(&SearchTask, &State, usize) -> Vec<(State, i32)> + Send + Sync>;

/// The closed set of structural rules. Priority order is the list order
/// assembled in [`sketch_rules`].
#[derive(Clone)]
pub enum SketchRule {
    SkipStage,
    AlwaysInline,
    MultiLevelTiling,
    MultiLevelTilingWithFusion,
    /// Hardware-aligned tiling: the splits stay fully undefined and are later
    /// instantiated from an [`crate::aligned::AlignedConfig`].
    AlignHardwareTileWithFusion,
    AddCacheRead,
    AddCacheWrite,
    AddRfactor,
    CrossThreadReduction,
    Custom { condition: CustomCondition, apply: CustomApply },
}

impl std::fmt::Debug for SketchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::SkipStage => "SkipStage",
            Self::AlwaysInline => "AlwaysInline",
            Self::MultiLevelTiling => "MultiLevelTiling",
            Self::MultiLevelTilingWithFusion => "MultiLevelTilingWithFusion",
            Self::AlignHardwareTileWithFusion => "AlignHardwareTileWithFusion",
            Self::AddCacheRead => "AddCacheRead",
            Self::AddCacheWrite => "AddCacheWrite",
            Self::AddRfactor => "AddRfactor",
            Self::CrossThreadReduction => "CrossThreadReduction",
            Self::Custom { .. } => "Custom",
        };
        f.write_str(name)
    }
}

fn has_cache_read(state: &State, stage_id: usize) -> bool {
    state.steps.iter().any(|s| matches!(s, Step::CacheRead { stage_id: id, .. } if *id == stage_id))
}

fn has_cache_write(state: &State, stage_id: usize) -> bool {
    state.steps.iter().any(|s| matches!(s, Step::CacheWrite { stage_id: id, .. } if *id == stage_id))
}

fn has_rfactor(state: &State, stage_id: usize) -> bool {
    state.steps.iter().any(|s| matches!(s, Step::Rfactor { stage_id: id, .. } if *id == stage_id))
}

fn has_cross_thread_bind(state: &State, stage_id: usize) -> bool {
    state.steps.iter().any(|s| {
        matches!(s, Step::Bind { stage_id: id, scope: ThreadScope::ThreadX, .. } if *id == stage_id)
    })
}

/// First later stage that reads this stage's output and carries no reduction
/// itself.
fn elementwise_consumer(task: &SearchTask, stage_id: usize) -> Option<usize> {
    let name = &task.graph.stages[stage_id].name;
    task.graph.stages.iter().enumerate().skip(stage_id + 1).find_map(|(id, stage)| {
        (!stage.has_reduction() && stage.reads.iter().any(|r| &r.producer == name)).then_some(id)
    })
}

/// Push undefined multi-level splits for every axis of the stage: `space_parts`
/// lengths per spatial axis, `reduce_parts` per reduction axis.
fn push_tiling_splits(state: &mut State, stage: &Stage, stage_id: usize, space_parts: usize, reduce_parts: usize) {
    for axis in stage.space_axes() {
        state.split(stage_id, axis.name.clone(), axis.extent.clone(), vec![None; space_parts]);
    }
    for axis in stage.reduce_axes() {
        state.split(stage_id, axis.name.clone(), axis.extent.clone(), vec![None; reduce_parts]);
    }
}

impl SketchRule {
    pub fn condition(&self, task: &SearchTask, state: &State, stage_id: usize) -> ConditionKind {
        let stage = &task.graph.stages[stage_id];
        match self {
            Self::SkipStage => ConditionKind::ApplyAndSkipRest,
            Self::AlwaysInline => {
                let inlineable = !stage.has_reduction()
                    && !stage.reads.is_empty()
                    && stage_id + 1 != task.graph.stages.len();
                if inlineable { ConditionKind::ApplyAndSkipRest } else { ConditionKind::Skip }
            }
            Self::MultiLevelTiling | Self::AlignHardwareTileWithFusion => {
                if stage.has_reduction() {
                    ConditionKind::ApplyAndSkipRest
                } else {
                    ConditionKind::Skip
                }
            }
            Self::MultiLevelTilingWithFusion => {
                if stage.has_reduction() && elementwise_consumer(task, stage_id).is_some() {
                    ConditionKind::ApplyAndSkipRest
                } else {
                    ConditionKind::Skip
                }
            }
            Self::AddCacheRead => {
                let wants = matches!(task.target, Target::Gpu { .. })
                    && stage.has_reduction()
                    && !stage.reads.is_empty()
                    && !has_cache_read(state, stage_id);
                if wants { ConditionKind::Apply } else { ConditionKind::Skip }
            }
            Self::AddCacheWrite => {
                let wants = stage.has_reduction()
                    && elementwise_consumer(task, stage_id).is_none()
                    && !has_cache_write(state, stage_id);
                if wants { ConditionKind::Apply } else { ConditionKind::Skip }
            }
            Self::AddRfactor => {
                let wants = stage.has_reduction()
                    && !task.is_dynamic()
                    && !has_rfactor(state, stage_id);
                if wants { ConditionKind::Apply } else { ConditionKind::Skip }
            }
            Self::CrossThreadReduction => {
                let wants = stage.has_reduction()
                    && !task.is_dynamic()
                    && !has_cross_thread_bind(state, stage_id);
                if wants { ConditionKind::Apply } else { ConditionKind::Skip }
            }
            Self::Custom { condition, .. } => condition(task, state, stage_id),
        }
    }

    pub fn apply(&self, task: &SearchTask, state: &State, stage_id: usize) -> Vec<(State, i32)> {
        let stage = &task.graph.stages[stage_id];
        let prev = stage_id as i32 - 1;
        match self {
            Self::SkipStage => vec![(state.clone(), prev)],
            Self::AlwaysInline => {
                let mut child = state.clone();
                child.inline(stage_id);
                vec![(child, prev)]
            }
            Self::MultiLevelTiling => {
                let mut child = state.clone();
                push_tiling_splits(&mut child, stage, stage_id, 3, 2);
                vec![(child, prev)]
            }
            Self::MultiLevelTilingWithFusion | Self::AlignHardwareTileWithFusion => {
                let mut child = state.clone();
                push_tiling_splits(&mut child, stage, stage_id, 3, 2);
                if let Some(consumer) = elementwise_consumer(task, stage_id) {
                    let axes: Vec<String> = task.graph.stages[consumer]
                        .space_axes()
                        .map(|a| a.name.clone())
                        .collect();
                    child.fuse(consumer, axes);
                }
                vec![(child, prev)]
            }
            Self::AddCacheRead => {
                let mut child = state.clone();
                for read in &stage.reads {
                    child.cache_read(stage_id, read.producer.clone(), "shared");
                }
                vec![(child, stage_id as i32)]
            }
            Self::AddCacheWrite => {
                let mut child = state.clone();
                child.cache_write(stage_id, "local");
                vec![(child, stage_id as i32)]
            }
            Self::AddRfactor => {
                let mut children = Vec::new();
                for axis in stage.reduce_axes() {
                    let mut child = state.clone();
                    child.split(stage_id, axis.name.clone(), axis.extent.clone(), vec![None, None]);
                    child.rfactor(stage_id, axis.name.clone());
                    children.push((child, stage_id as i32));
                }
                children
            }
            Self::CrossThreadReduction => {
                let mut child = state.clone();
                for axis in stage.reduce_axes() {
                    child.split(stage_id, axis.name.clone(), axis.extent.clone(), vec![None, None]);
                    child.bind(stage_id, format!("{}.1", axis.name), ThreadScope::ThreadX);
                }
                vec![(child, stage_id as i32)]
            }
            Self::Custom { apply, .. } => apply(task, state, stage_id),
        }
    }
}

/// Assemble the priority-ordered rule list for a task's device class. The
/// list is fixed for the lifetime of the policy.
pub fn sketch_rules(task: &SearchTask) -> Result<Vec<SketchRule>> {
    match &task.target {
        Target::Cpu => Ok(vec![
            SketchRule::AlwaysInline,
            SketchRule::AddRfactor,
            SketchRule::AddCacheWrite,
            SketchRule::MultiLevelTilingWithFusion,
            SketchRule::MultiLevelTiling,
            SketchRule::SkipStage,
        ]),
        Target::Gpu { vendor: GpuVendor::Nvidia | GpuVendor::Amd } => {
            let tiling = if task.hardware.has_aligned_levels() {
                SketchRule::AlignHardwareTileWithFusion
            } else {
                SketchRule::MultiLevelTiling
            };
            let mut rules = vec![
                SketchRule::AddCacheRead,
                SketchRule::AlwaysInline,
                SketchRule::CrossThreadReduction,
                SketchRule::AddCacheWrite,
            ];
            if !task.hardware.has_aligned_levels() {
                rules.push(SketchRule::MultiLevelTilingWithFusion);
            }
            rules.push(tiling);
            rules.push(SketchRule::SkipStage);
            Ok(rules)
        }
        target @ Target::Gpu { vendor: GpuVendor::Mali } => {
            UnsupportedTargetSnafu { target: target.to_string() }.fail()
        }
    }
}

/// Enumerate all sketches for the task by breadth-first rule application.
pub fn generate_sketches(task: &SearchTask, rules: &[SketchRule]) -> Result<Vec<State>> {
    let mut cur: Vec<(State, i32)> =
        vec![(task.init_state(), task.graph.stages.len() as i32 - 1)];
    let mut next: Vec<(State, i32)> = Vec::new();
    let mut out: Vec<State> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    while !cur.is_empty() {
        for (state, stage_id) in cur.drain(..) {
            if stage_id < 0 {
                if seen.insert(state.canonical()) {
                    out.push(state);
                }
                continue;
            }
            for rule in rules {
                match rule.condition(task, &state, stage_id as usize) {
                    ConditionKind::Skip => {}
                    ConditionKind::Apply => {
                        next.extend(rule.apply(task, &state, stage_id as usize));
                    }
                    ConditionKind::ApplyAndSkipRest => {
                        next.extend(rule.apply(task, &state, stage_id as usize));
                        break;
                    }
                }
            }
        }
        std::mem::swap(&mut cur, &mut next);
    }

    for state in &mut out {
        reset_splits_before_rfactor(state);
    }
    tracing::debug!(count = out.len(), "generated sketches");
    if out.is_empty() {
        return NoSketchesSnafu.fail();
    }
    Ok(out)
}

/// A split immediately preceding an rfactor on the same stage must stay
/// undefined, or the factor transform cannot be replayed after tile
/// assignment.
fn reset_splits_before_rfactor(state: &mut State) {
    for i in 1..state.steps.len() {
        let Step::Rfactor { stage_id, .. } = &state.steps[i] else { continue };
        let rf_stage = *stage_id;
        if let Step::Split { stage_id, lengths, .. } = &mut state.steps[i - 1]
            && *stage_id == rf_stage
        {
            for len in lengths.iter_mut() {
                *len = None;
            }
        }
    }
}
