//! Tests of the top-level trial loop and eps-greedy selection.

use tessera_ir::State;

use crate::config::SearchParams;
use crate::measure::ProgramMeasurer;
use crate::model::RandomModel;
use crate::policy::SketchPolicy;
use crate::test::common::{DeterministicMeasurer, static_gpu_task};

fn small_params() -> SearchParams {
    SearchParams::builder().population(32).sample_init_min_pop(8).num_iters(2).build()
}

fn policy_with_eps(eps: f64) -> SketchPolicy<RandomModel> {
    let params = SearchParams::builder()
        .eps_greedy(eps)
        .population(32)
        .sample_init_min_pop(8)
        .num_iters(2)
        .build();
    SketchPolicy::new(static_gpu_task(), RandomModel::new(11), params, 31).unwrap()
}

/// Distinct throwaway schedules keyed by a split factor.
fn numbered_states(start: i64, count: usize) -> Vec<State> {
    (0..count)
        .map(|i| {
            let mut s = State::new(1);
            s.split(0, "i", 1 << 20, vec![Some(start + i as i64)]);
            s
        })
        .collect()
}

#[test]
fn test_eps_greedy_interleaves_seven_good_three_random() {
    let mut policy = policy_with_eps(0.3);
    let best = numbered_states(1, 8);
    let random = numbered_states(100, 5);
    let inputs = policy.pick_states_with_eps_greedy(&best, &random, 10, 100).unwrap();
    assert_eq!(inputs.len(), 10);
    for (i, input) in inputs.iter().take(7).enumerate() {
        assert_eq!(input.state.canonical(), best[i].canonical());
    }
    for (i, input) in inputs.iter().skip(7).enumerate() {
        assert_eq!(input.state.canonical(), random[i].canonical());
    }
}

#[test]
fn test_eps_greedy_buckets_fall_back_to_each_other() {
    let mut policy = policy_with_eps(0.3);
    // Only 4 good candidates: the good quota borrows from the random bucket.
    let best = numbered_states(1, 4);
    let random = numbered_states(100, 8);
    let inputs = policy.pick_states_with_eps_greedy(&best, &random, 10, 100).unwrap();
    assert_eq!(inputs.len(), 10);
    let canonicals: Vec<String> = inputs.iter().map(|i| i.state.canonical()).collect();
    for state in &best {
        assert!(canonicals.contains(&state.canonical()));
    }
}

#[test]
fn test_eps_greedy_skips_already_measured() {
    let mut policy = policy_with_eps(0.3);
    let best = numbered_states(1, 8);
    let random = numbered_states(100, 5);
    policy.measured_states_set.insert(best[0].canonical());
    let inputs = policy.pick_states_with_eps_greedy(&best, &random, 10, 100).unwrap();
    let canonicals: Vec<String> = inputs.iter().map(|i| i.state.canonical()).collect();
    assert!(!canonicals.contains(&best[0].canonical()));
    let mut dedup = canonicals.clone();
    dedup.sort();
    dedup.dedup();
    assert_eq!(dedup.len(), canonicals.len());
}

#[test]
fn test_eps_greedy_respects_remaining_trial_budget() {
    let mut policy = policy_with_eps(0.3);
    let best = numbered_states(1, 8);
    let random = numbered_states(100, 5);
    let inputs = policy.pick_states_with_eps_greedy(&best, &random, 10, 4).unwrap();
    assert_eq!(inputs.len(), 4);
}

#[test]
fn test_classic_search_measures_within_budget() {
    let mut policy =
        SketchPolicy::new(static_gpu_task(), RandomModel::new(19), small_params(), 3).unwrap();
    let mut measurer = ProgramMeasurer::new(DeterministicMeasurer);
    let output = policy.search(12, 100, 4, &mut measurer).unwrap();
    assert!(output.best_state.is_some());
    assert!(measurer.ct <= 12);
    assert!(measurer.has_valid.contains("matmul_static"));
    // Nothing is ever measured twice.
    assert_eq!(policy.measured_states_set.len(), measurer.ct);
}

#[test]
fn test_early_stopping_cuts_the_budget() {
    let mut policy =
        SketchPolicy::new(static_gpu_task(), RandomModel::new(23), small_params(), 5).unwrap();
    let mut measurer = ProgramMeasurer::new(DeterministicMeasurer);
    // Zero tolerance: the loop must stop after the first round that fails to
    // improve on the very trial the best was found at.
    policy.search(1000, 0, 4, &mut measurer).unwrap();
    assert!(measurer.ct < 1000);
}

#[test]
fn test_single_trial_search_returns_unmeasured_best() {
    let mut policy =
        SketchPolicy::new(static_gpu_task(), RandomModel::new(29), small_params(), 8).unwrap();
    let mut measurer = ProgramMeasurer::new(DeterministicMeasurer);
    let output = policy.search(1, 100, 4, &mut measurer).unwrap();
    assert!(output.best_state.is_some());
    assert_eq!(measurer.ct, 0);
}

#[test]
fn test_continue_search_one_round_reports_progress() {
    let mut policy =
        SketchPolicy::new(static_gpu_task(), RandomModel::new(37), small_params(), 12).unwrap();
    let mut measurer = ProgramMeasurer::new(DeterministicMeasurer);
    let (consumed, metric) = policy.continue_search_one_round(4, &mut measurer).unwrap();
    assert!(consumed > 0 && consumed <= 4);
    assert!(metric > 0.0);
}
