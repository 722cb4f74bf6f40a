//! Population sampling and evolutionary search.
//!
//! Both phases are parallel over population slots, one seeded RNG per slot,
//! with shared state (explored sets, the elitism heap) touched only between
//! batches. The heap keeps the best not-yet-measured schedules across
//! generations; its contents, sorted by descending score, are the round's
//! measurement candidates.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tessera_ir::{State, infer_bounds, prune_invalid};

use crate::error::Result;
use crate::init::{ResultKind, max_extent};
use crate::model::CostModel;
use crate::mutation::choose_rule;
use crate::policy::SketchPolicy;
use crate::utils::{argsort_desc, prefix_sum_probs, sample_prefix_sum};

/// Scores at or below this mark an infeasible schedule.
const SCORE_FLOOR: f64 = -1e10;

/// Sampling rounds without a new accepted schedule before the population
/// target is halved.
const STALL_ROUNDS: usize = 5;

/// Min-heap entry ordered by score, canonical string as tiebreak.
struct HeapItem {
    score: f64,
    canonical: String,
    state: State,
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.canonical == other.canonical
    }
}

impl Eq for HeapItem {}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.canonical.cmp(&other.canonical))
            .reverse()
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<C: CostModel> SketchPolicy<C> {
    /// Sample an initial population of at least `out_size` schedules from the
    /// cached sketches.
    ///
    /// Every batch instantiates `population` slots in parallel; accepted
    /// schedules must score above the feasibility floor and be new to the
    /// explored set. Five consecutive batches without progress halve the
    /// target (floor 1). `first_round` resets the explored set so a fresh
    /// search does not starve on a previous round's coverage.
    pub fn sample_init_population(
        &mut self,
        out_size: usize,
        first_round: bool,
    ) -> Result<Vec<State>> {
        self.ensure_sketches()?;
        if first_round {
            self.sampled_states_set.clear();
        }
        let population = self.params.evolution.population;
        let mut min_pop = out_size.max(1);
        let mut out: Vec<State> = Vec::new();
        let mut stall = 0usize;

        while out.len() < min_pop {
            let seeds: Vec<u64> = (0..population).map(|_| self.rng.r#gen()).collect();
            let task = &self.task;
            let params = &self.params;
            let rules = &self.init_rules;
            let sketches = &self.sketch_cache;
            let mut candidates: Vec<State> = seeds
                .into_par_iter()
                .filter_map(|seed| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let mut state = sketches[rng.gen_range(0..sketches.len())].clone();
                    for rule in rules {
                        if rule.apply(task, params, &mut state, &mut rng) == ResultKind::Invalid {
                            return None;
                        }
                    }
                    Some(state)
                })
                .collect();
            infer_bounds(&mut candidates);
            let candidates = prune_invalid(candidates, |e| max_extent(task, e));
            let scores = self.model.predict(&self.task, &candidates);

            let before = out.len();
            for (state, score) in candidates.into_iter().zip(scores) {
                if score <= SCORE_FLOOR {
                    continue;
                }
                if self.sampled_states_set.insert(state.canonical()) {
                    out.push(state);
                }
            }
            if out.len() == before {
                stall += 1;
                if stall >= STALL_ROUNDS {
                    min_pop = (min_pop / 2).max(1);
                    stall = 0;
                    tracing::debug!(min_pop, "population sampling stalled, halving target");
                }
            } else {
                stall = 0;
            }
        }
        tracing::debug!(size = out.len(), "sampled initial population");
        Ok(out)
    }

    /// Evolve the population and return up to `out_size` unmeasured
    /// schedules, best first.
    pub fn evolutionary_search(
        &mut self,
        init_population: Vec<State>,
        out_size: usize,
    ) -> Result<Vec<State>> {
        let mut num_iters = self.params.evolution.num_iters;
        if !self.model.is_informative() {
            num_iters = num_iters.min(2);
        }
        let population = self.params.evolution.population;
        let mutation_prob = self.params.evolution.mutation_prob;
        // Sharpen selection pressure as the search matures.
        let sharpness = (self.trial_ct / 100 + 1) as i32;

        let mut cur = init_population;
        let mut heap: BinaryHeap<HeapItem> = BinaryHeap::with_capacity(out_size + 1);
        let mut heap_set: HashSet<String> = HashSet::new();

        for iter in 0..=num_iters {
            infer_bounds(&mut cur);
            let task = &self.task;
            cur = prune_invalid(std::mem::take(&mut cur), |e| max_extent(task, e));
            if cur.is_empty() {
                break;
            }
            let scores: Vec<f64> = if self.task.is_dynamic() {
                let rows = self.model.predict_for_all_instances(&self.task, &cur)?;
                (0..cur.len())
                    .map(|j| {
                        let best = rows
                            .iter()
                            .map(|row| row[j].score)
                            .fold(f64::NEG_INFINITY, f64::max);
                        if best > 0.0 { best.powi(sharpness) } else { best }
                    })
                    .collect()
            } else {
                self.model.predict(&self.task, &cur)
            };

            for (state, &score) in cur.iter().zip(&scores) {
                if score <= SCORE_FLOOR {
                    continue;
                }
                let canonical = state.canonical();
                if self.measured_states_set.contains(&canonical)
                    || heap_set.contains(&canonical)
                {
                    continue;
                }
                if heap.len() < out_size {
                    heap_set.insert(canonical.clone());
                    heap.push(HeapItem { score, canonical, state: state.clone() });
                } else if let Some(min) = heap.peek()
                    && score > min.score
                {
                    heap_set.insert(canonical.clone());
                    heap.push(HeapItem { score, canonical, state: state.clone() });
                    if let Some(evicted) = heap.pop() {
                        heap_set.remove(&evicted.canonical);
                    }
                }
            }
            if iter == num_iters {
                break;
            }

            let weights: Vec<f64> = scores.iter().map(|s| s.max(0.0)).collect();
            let prefix = prefix_sum_probs(&weights);
            let seeds: Vec<u64> = (0..population).map(|_| self.rng.r#gen()).collect();
            let params = &self.params;
            let rules = &self.mutation_rules;
            let parents = &cur;
            let next: Vec<State> = seeds
                .into_par_iter()
                .map(|seed| {
                    let mut rng = StdRng::seed_from_u64(seed);
                    let parent = &parents[sample_prefix_sum(&prefix, &mut rng)];
                    let mut child = parent.clone();
                    if rng.r#gen::<f64>() < mutation_prob {
                        let rule = choose_rule(rules, &mut rng);
                        if rule.apply(params, &mut child, &mut rng) == ResultKind::Invalid {
                            child = parent.clone();
                        }
                    }
                    child
                })
                .collect();
            cur = next;
        }

        let mut items: Vec<HeapItem> = heap.into_vec();
        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(items.into_iter().map(|item| item.state).collect())
    }

    /// One round of population work: sample (reusing cached sketches), mix in
    /// the best measured schedules, set aside `num_random` random picks, and
    /// evolve the rest.
    pub fn search_one_round(
        &mut self,
        out_size: usize,
        num_random: usize,
        random_states: &mut Vec<State>,
    ) -> Result<Vec<State>> {
        let first_round = self.sketch_cache.is_empty();
        let min_pop = self.params.evolution.sample_init_min_pop;
        let mut population = self.sample_init_population(min_pop, first_round)?;

        let num_measured = (self.params.evolution.population as f64
            * self.params.evolution.use_measured_ratio) as usize;
        let ids = argsort_desc(&self.measured_states_throughputs);
        for &id in ids.iter().take(num_measured) {
            population.push(self.measured_states_vec[id].clone());
        }

        random_states.clear();
        for _ in 0..num_random {
            if population.is_empty() {
                break;
            }
            let pick = self.rng.gen_range(0..population.len());
            random_states.push(population[pick].clone());
        }

        self.evolutionary_search(population, out_size)
    }
}
