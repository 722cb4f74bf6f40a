//! Mutation rules for the evolutionary search.
//!
//! Each rule rewrites one aspect of a concrete schedule in place. Rules are
//! drawn by weight; a rule returning [`ResultKind::Invalid`] makes the caller
//! fall back to an unmutated copy of the parent.

use rand::Rng;
use rand::rngs::StdRng;
use tessera_ir::{State, Step};

use crate::config::SearchParams;
use crate::init::ResultKind;
use crate::task::SearchTask;
use crate::utils::{divisors, prefix_sum_probs, sample_prefix_sum};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationRule {
    /// Move a factor between two parts of one split.
    TileSize,
    /// Re-draw the unroll pragma from the candidate list.
    AutoUnroll,
    /// Shift a factor of two between the thread part and the serial innermost
    /// part of a 3-way split, keeping the block tile fixed. The dynamic-shape
    /// mutation: block tiles stay hardware-aligned while per-thread work
    /// changes.
    InnermostTileSize,
}

impl MutationRule {
    pub fn weight(&self) -> f64 {
        match self {
            Self::TileSize => 0.90,
            Self::AutoUnroll => 0.10,
            Self::InnermostTileSize => 1.0,
        }
    }

    pub fn apply(
        &self,
        params: &SearchParams,
        state: &mut State,
        rng: &mut StdRng,
    ) -> ResultKind {
        match self {
            Self::TileSize => mutate_tile_size(params, state, rng),
            Self::AutoUnroll => mutate_auto_unroll(params, state, rng),
            Self::InnermostTileSize => mutate_innermost_tile_size(params, state, rng),
        }
    }
}

/// Weighted rule list: dynamic tasks mutate only the innermost tile so block
/// shapes keep their alignment; static tasks mix tile and unroll moves.
pub fn mutation_rules(task: &SearchTask) -> Vec<MutationRule> {
    if task.is_dynamic() {
        vec![MutationRule::InnermostTileSize]
    } else {
        vec![MutationRule::TileSize, MutationRule::AutoUnroll]
    }
}

/// Draw one rule proportional to its weight.
pub fn choose_rule(rules: &[MutationRule], rng: &mut StdRng) -> MutationRule {
    let weights: Vec<f64> = rules.iter().map(MutationRule::weight).collect();
    let prefix = prefix_sum_probs(&weights);
    rules[sample_prefix_sum(&prefix, rng)]
}

fn filled_split_ids(state: &State) -> Vec<usize> {
    state
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            matches!(s, Step::Split { lengths, .. }
                if lengths.len() >= 2 && lengths.iter().all(Option::is_some))
        })
        .map(|(i, _)| i)
        .collect()
}

fn mutate_tile_size(params: &SearchParams, state: &mut State, rng: &mut StdRng) -> ResultKind {
    let candidates = filled_split_ids(state);
    if candidates.is_empty() {
        return ResultKind::Invalid;
    }
    let step_id = candidates[rng.gen_range(0..candidates.len())];
    let Step::Split { lengths, .. } = &state.steps[step_id] else { return ResultKind::Invalid };
    let mut parts: Vec<i64> = lengths.iter().map(|l| l.unwrap_or(1)).collect();

    let src = rng.gen_range(0..parts.len());
    let factors: Vec<i64> = divisors(parts[src]).into_iter().filter(|d| *d > 1).collect();
    if factors.is_empty() {
        return ResultKind::Invalid;
    }
    let factor = factors[rng.gen_range(0..factors.len())];
    let mut dst = rng.gen_range(0..parts.len() - 1);
    if dst >= src {
        dst += 1;
    }
    if dst == parts.len() - 1 && parts[dst] * factor > params.max_innermost_split_factor {
        return ResultKind::Invalid;
    }
    parts[src] /= factor;
    parts[dst] *= factor;
    state.fill_split(step_id, parts.into_iter().map(Some).collect());
    ResultKind::Valid
}

fn mutate_auto_unroll(params: &SearchParams, state: &mut State, rng: &mut StdRng) -> ResultKind {
    let unroll_ids: Vec<usize> = state
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| matches!(s, Step::Unroll { .. }))
        .map(|(i, _)| i)
        .collect();
    if unroll_ids.is_empty() || params.auto_unroll_configs.len() < 2 {
        return ResultKind::Invalid;
    }
    let step_id = unroll_ids[rng.gen_range(0..unroll_ids.len())];
    let Step::Unroll { max_step, .. } = &mut state.steps[step_id] else {
        return ResultKind::Invalid;
    };
    let current = *max_step;
    let choices: Vec<i64> =
        params.auto_unroll_configs.iter().copied().filter(|c| *c != current).collect();
    *max_step = choices[rng.gen_range(0..choices.len())];
    ResultKind::Valid
}

fn mutate_innermost_tile_size(
    params: &SearchParams,
    state: &mut State,
    rng: &mut StdRng,
) -> ResultKind {
    let candidates: Vec<usize> = state
        .steps
        .iter()
        .enumerate()
        .filter(|(_, s)| {
            matches!(s, Step::Split { lengths, .. }
                if lengths.len() == 3 && lengths.iter().all(Option::is_some))
        })
        .map(|(i, _)| i)
        .collect();
    if candidates.is_empty() {
        return ResultKind::Invalid;
    }
    let step_id = candidates[rng.gen_range(0..candidates.len())];
    let Step::Split { lengths, .. } = &state.steps[step_id] else { return ResultKind::Invalid };
    let mid = lengths[1].unwrap_or(1);
    let inner = lengths[2].unwrap_or(1);

    let can_grow = mid % 2 == 0 && inner * 2 <= params.max_innermost_split_factor;
    let can_shrink = inner % 2 == 0;
    let grow = match (can_grow, can_shrink) {
        (true, true) => rng.r#gen::<bool>(),
        (true, false) => true,
        (false, true) => false,
        (false, false) => return ResultKind::Invalid,
    };
    let (mid, inner) = if grow { (mid / 2, inner * 2) } else { (mid * 2, inner / 2) };
    state.fill_split(step_id, vec![Some(1), Some(mid), Some(inner)]);
    ResultKind::Valid
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::common::{dynamic_gpu_task, static_gpu_task};
    use rand::SeedableRng;
    use tessera_ir::Extent;

    fn tiled_state() -> State {
        let mut s = State::new(1);
        s.split(0, "i", Extent::Const(64), vec![Some(1), Some(16), Some(4)]);
        s.split(0, "k", Extent::Const(32), vec![Some(8), Some(4)]);
        s.unroll(0, 64);
        s
    }

    #[test]
    fn test_rule_lists_per_shape_kind() {
        assert_eq!(mutation_rules(&dynamic_gpu_task()), vec![MutationRule::InnermostTileSize]);
        assert_eq!(
            mutation_rules(&static_gpu_task()),
            vec![MutationRule::TileSize, MutationRule::AutoUnroll]
        );
    }

    #[test]
    fn test_tile_size_preserves_split_product() {
        let params = SearchParams::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..32 {
            let mut state = tiled_state();
            if mutate_tile_size(&params, &mut state, &mut rng) == ResultKind::Valid {
                let products: Vec<i64> =
                    state.steps.iter().filter_map(Step::split_length_product).collect();
                assert_eq!(products, vec![64, 32]);
            }
        }
    }

    #[test]
    fn test_innermost_keeps_block_tile() {
        let params = SearchParams::default();
        let mut rng = StdRng::seed_from_u64(9);
        let mut mutated = false;
        for _ in 0..16 {
            let mut state = tiled_state();
            if mutate_innermost_tile_size(&params, &mut state, &mut rng) == ResultKind::Valid {
                mutated = true;
                let Step::Split { lengths, .. } = &state.steps[0] else { panic!() };
                let product: i64 = lengths.iter().map(|l| l.unwrap()).product();
                assert_eq!(product, 64);
                assert_ne!(lengths[2], Some(4));
            }
        }
        assert!(mutated);
    }

    #[test]
    fn test_auto_unroll_changes_value() {
        let params = SearchParams::default();
        let mut rng = StdRng::seed_from_u64(2);
        let mut state = tiled_state();
        assert_eq!(mutate_auto_unroll(&params, &mut state, &mut rng), ResultKind::Valid);
        let Step::Unroll { max_step, .. } = &state.steps[2] else { panic!() };
        assert_ne!(*max_step, 64);
    }

    #[test]
    fn test_unmutatable_state_is_invalid() {
        let params = SearchParams::default();
        let mut rng = StdRng::seed_from_u64(1);
        let mut empty = State::new(1);
        assert_eq!(mutate_tile_size(&params, &mut empty, &mut rng), ResultKind::Invalid);
        assert_eq!(mutate_auto_unroll(&params, &mut empty, &mut rng), ResultKind::Invalid);
        assert_eq!(
            mutate_innermost_tile_size(&params, &mut empty, &mut rng),
            ResultKind::Invalid
        );
    }

    #[test]
    fn test_choose_rule_respects_weights() {
        let mut rng = StdRng::seed_from_u64(4);
        let rules = vec![MutationRule::TileSize, MutationRule::AutoUnroll];
        let mut tile = 0;
        for _ in 0..1000 {
            if choose_rule(&rules, &mut rng) == MutationRule::TileSize {
                tile += 1;
            }
        }
        // Expected 900 of 1000.
        assert!((850..=950).contains(&tile));
    }
}
