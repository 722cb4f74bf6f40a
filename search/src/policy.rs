//! The sketch search policy: top-level trial loop and dispatch.
//!
//! A policy owns the rule lists for one task, the cost model, and the
//! explored/measured bookkeeping. Static workloads run the classic loop of
//! sample → evolve → eps-greedy pick → measure → model update. Dynamic
//! workloads on hardware with aligned memory levels instead run
//! [`SketchPolicy::efficient_search`]: enumerate aligned tile configs, filter
//! them per instance, measure the union once, and dispatch one schedule per
//! instance by adapted score.

use std::collections::{BTreeMap, HashMap, HashSet};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use snafu::OptionExt;
use tessera_ir::{State, infer_bounds};

use crate::aligned::AlignedConfig;
use crate::config::SearchParams;
use crate::dispatch::{TopKDispatcher, adapt_state_to_workload, adaption_penalty, flop_weighted_latency};
use crate::error::{EmptyCandidateSetSnafu, NoSketchesSnafu, Result};
use crate::filters::{
    Candidates, occupancy_filter, padding_filter_relaxed, reg_compute_intensive_filter,
    register_launch_bounds_filter, shared_memory_compute_intensive_filter,
    shared_memory_launch_bounds_filter, threads_number_filter,
};
use crate::init::{AlignedInitRule, InitRule, ResultKind, aligned_init_rules, init_rules};
use crate::measure::{MeasureInput, MeasureResult, Measurer, ProgramMeasurer};
use crate::model::CostModel;
use crate::mutation::{MutationRule, mutation_rules};
use crate::sketch::{SketchRule, generate_sketches, sketch_rules};
use crate::space::ConfigSpace;
use crate::task::SearchTask;
use crate::utils::{prefix_sum_probs, sample_prefix_sum};

/// Result of one search: the overall best schedule plus, for dynamic tasks,
/// the per-instance selection.
#[derive(Debug, Clone, Default)]
pub struct SearchOutput {
    pub best_state: Option<State>,
    /// Deduplicated selected schedules (dispatch targets for dynamic tasks).
    pub states: Vec<State>,
    /// Workload-instance id → index into `states`.
    pub inst_dispatch: HashMap<usize, usize>,
}

pub struct SketchPolicy<C> {
    pub task: SearchTask,
    pub params: SearchParams,
    pub model: C,
    pub(crate) sketch_rules: Vec<SketchRule>,
    pub(crate) init_rules: Vec<InitRule>,
    pub(crate) aligned_init_rules: Vec<AlignedInitRule>,
    pub(crate) mutation_rules: Vec<MutationRule>,
    pub(crate) sketch_cache: Vec<State>,
    /// Canonical strings of everything ever submitted for measurement.
    pub(crate) measured_states_set: HashSet<String>,
    pub(crate) measured_states_vec: Vec<State>,
    pub(crate) measured_states_throughputs: Vec<f64>,
    /// Canonical strings accepted during population sampling.
    pub(crate) sampled_states_set: HashSet<String>,
    /// Prefix-sum distribution over instances, biased toward the least
    /// optimized ones.
    pub(crate) inst_opt_prob: Vec<f64>,
    pub(crate) inst_dispatch: HashMap<usize, usize>,
    pub(crate) trial_ct: usize,
    pub(crate) rng: StdRng,
}

impl<C: CostModel> SketchPolicy<C> {
    pub fn new(task: SearchTask, model: C, params: SearchParams, seed: u64) -> Result<Self> {
        let rules = sketch_rules(&task)?;
        let init = init_rules(&task);
        let mutation = mutation_rules(&task);
        Ok(Self {
            sketch_rules: rules,
            init_rules: init,
            aligned_init_rules: aligned_init_rules(),
            mutation_rules: mutation,
            sketch_cache: Vec::new(),
            measured_states_set: HashSet::new(),
            measured_states_vec: Vec::new(),
            measured_states_throughputs: Vec::new(),
            sampled_states_set: HashSet::new(),
            inst_opt_prob: Vec::new(),
            inst_dispatch: HashMap::new(),
            trial_ct: 0,
            rng: StdRng::seed_from_u64(seed),
            task,
            params,
            model,
        })
    }

    pub(crate) fn ensure_sketches(&mut self) -> Result<()> {
        if self.sketch_cache.is_empty() {
            self.sketch_cache = generate_sketches(&self.task, &self.sketch_rules)?;
        }
        Ok(())
    }

    /// Run the search for `n_trials` measurements.
    pub fn search<M: Measurer>(
        &mut self,
        n_trials: usize,
        early_stopping: usize,
        num_measure_per_iter: usize,
        measurer: &mut ProgramMeasurer<M>,
    ) -> Result<SearchOutput> {
        if self.task.is_dynamic() && self.task.hardware.has_aligned_levels() {
            return self.efficient_search(measurer);
        }
        let key = self.task.workload_key.clone();

        if n_trials <= 1 {
            let mut random_states = Vec::new();
            let best =
                self.search_one_round(num_measure_per_iter.max(1) * 2, 0, &mut random_states)?;
            return Ok(SearchOutput {
                best_state: best.into_iter().next(),
                ..SearchOutput::default()
            });
        }

        let num_random = (self.params.eps_greedy * num_measure_per_iter as f64) as usize;
        let mut ct = 0usize;
        let mut empty_retry = self.params.empty_retry_count;
        while ct < n_trials {
            let mut random_states = Vec::new();
            let mut best_states = self.search_one_round(
                num_measure_per_iter * 2,
                num_random * 3,
                &mut random_states,
            )?;
            infer_bounds(&mut best_states);
            infer_bounds(&mut random_states);
            let inputs = self.pick_states_with_eps_greedy(
                &best_states,
                &random_states,
                num_measure_per_iter,
                n_trials - ct,
            )?;
            if inputs.is_empty() {
                if empty_retry == 0 {
                    tracing::warn!("no new candidates to measure, stopping search");
                    break;
                }
                empty_retry -= 1;
                continue;
            }
            empty_retry = self.params.empty_retry_count;

            let results = measurer.measure(&self.task, &inputs)?;
            self.model.update(&inputs, &results);
            self.record_measurements(&inputs, &results)?;
            ct += inputs.len();
            self.trial_ct = ct;
            tracing::info!(ct, n_trials, best = measurer.best_score(&key), "measurement round done");

            if self.task.is_dynamic() {
                self.calculate_inst_opt_prob(measurer)?;
            }
            if let Some(&best_ct) = measurer.best_ct.get(&key)
                && ct.saturating_sub(best_ct) > early_stopping
                && measurer.has_valid.contains(&key)
            {
                tracing::info!(ct, best_ct, "early stopping: no recent improvement");
                break;
            }
        }

        Ok(SearchOutput {
            best_state: measurer.best_state.get(&key).cloned(),
            states: measurer.best_state.get(&key).cloned().into_iter().collect(),
            inst_dispatch: self.inst_dispatch.clone(),
        })
    }

    /// Run exactly one measurement round. Returns the trials consumed and the
    /// progress metric: weighted latency for dynamic tasks, best throughput
    /// otherwise.
    pub fn continue_search_one_round<M: Measurer>(
        &mut self,
        num_measure_per_iter: usize,
        measurer: &mut ProgramMeasurer<M>,
    ) -> Result<(usize, f64)> {
        let num_random = (self.params.eps_greedy * num_measure_per_iter as f64) as usize;
        let mut random_states = Vec::new();
        let mut best_states =
            self.search_one_round(num_measure_per_iter * 2, num_random * 3, &mut random_states)?;
        infer_bounds(&mut best_states);
        infer_bounds(&mut random_states);
        let inputs = self.pick_states_with_eps_greedy(
            &best_states,
            &random_states,
            num_measure_per_iter,
            num_measure_per_iter,
        )?;
        if inputs.is_empty() {
            return Ok((0, 0.0));
        }
        let results = measurer.measure(&self.task, &inputs)?;
        self.model.update(&inputs, &results);
        self.record_measurements(&inputs, &results)?;
        self.trial_ct += inputs.len();

        let key = &self.task.workload_key;
        let metric = if self.task.is_dynamic() {
            let per_inst = measurer.best_inst_flops.get(key).cloned().unwrap_or_default();
            flop_weighted_latency(&self.task, &per_inst)?
        } else {
            measurer.best_score(key)
        };
        Ok((inputs.len(), metric))
    }

    /// Interleave score-ordered and random candidates into a measurement
    /// batch, skipping anything already measured. The good bucket fills
    /// first; each bucket falls back to the other when exhausted.
    pub(crate) fn pick_states_with_eps_greedy(
        &mut self,
        best: &[State],
        random: &[State],
        num_measure_per_iter: usize,
        remaining: usize,
    ) -> Result<Vec<MeasureInput>> {
        let num_random = (self.params.eps_greedy * num_measure_per_iter as f64) as usize;
        let num_good = num_measure_per_iter - num_random;
        let cap = num_measure_per_iter.min(remaining);

        let mut inputs = Vec::new();
        let mut offset_best = 0usize;
        let mut offset_random = 0usize;
        let mut i = 0usize;
        while inputs.len() < cap {
            let has_best = offset_best < best.len();
            let has_random = offset_random < random.len();
            let state = if i < num_good {
                if has_best {
                    offset_best += 1;
                    &best[offset_best - 1]
                } else if has_random {
                    offset_random += 1;
                    &random[offset_random - 1]
                } else {
                    break;
                }
            } else if has_random {
                offset_random += 1;
                &random[offset_random - 1]
            } else if has_best {
                offset_best += 1;
                &best[offset_best - 1]
            } else {
                break;
            };
            i += 1;

            let key = state.canonical();
            if self.measured_states_set.contains(&key) {
                continue;
            }
            self.measured_states_set.insert(key);
            let wkl_inst_id = self.cherry_pick_workload_instance()?;
            inputs.push(MeasureInput { state: state.clone(), wkl_inst_id });
        }
        Ok(inputs)
    }

    /// Instance a candidate is timed on: drawn from the optimization-pressure
    /// distribution once one exists, otherwise the largest instance by FLOPs.
    pub(crate) fn cherry_pick_workload_instance(&mut self) -> Result<usize> {
        if !self.task.is_dynamic() || self.task.wkl_insts.len() <= 1 {
            return Ok(0);
        }
        if !self.inst_opt_prob.is_empty() {
            return Ok(sample_prefix_sum(&self.inst_opt_prob, &mut self.rng));
        }
        let mut best = 0usize;
        let mut best_flop = f64::NEG_INFINITY;
        for (i, inst) in self.task.wkl_insts.iter().enumerate() {
            let flop = self.task.flop_for_instance(inst)?;
            if flop > best_flop {
                best_flop = flop;
                best = i;
            }
        }
        Ok(best)
    }

    /// Rebuild the instance sampling distribution: weight ∝ FLOPs × workload
    /// weight ÷ best achieved FLOP/s, so under-optimized instances are
    /// measured more often.
    pub(crate) fn calculate_inst_opt_prob<M>(
        &mut self,
        measurer: &ProgramMeasurer<M>,
    ) -> Result<()> {
        let key = &self.task.workload_key;
        let per_inst = measurer.best_inst_flops.get(key);
        let mut weights = Vec::with_capacity(self.task.wkl_insts.len());
        for (i, inst) in self.task.wkl_insts.iter().enumerate() {
            let flop = self.task.flop_for_instance(inst)?;
            let weight = self.task.wkl_inst_weights[i];
            let best = per_inst.and_then(|v| v.get(i)).copied().unwrap_or(0.0);
            weights.push(if best > 0.0 { flop * weight / best } else { flop * weight });
        }
        self.inst_opt_prob = prefix_sum_probs(&weights);
        Ok(())
    }

    pub(crate) fn record_measurements(
        &mut self,
        inputs: &[MeasureInput],
        results: &[MeasureResult],
    ) -> Result<()> {
        for (input, result) in inputs.iter().zip(results) {
            if !result.is_valid() {
                continue;
            }
            let inst = &self.task.wkl_insts[input.wkl_inst_id];
            let penalty = adaption_penalty(&self.task, &input.state, inst)?;
            let throughput =
                self.task.flop_for_instance(inst)? / penalty / result.mean_cost();
            self.measured_states_vec.push(input.state.clone());
            self.measured_states_throughputs.push(throughput);
        }
        Ok(())
    }

    /// The hardware-aligned pipeline for dynamic tasks: enumerate tile
    /// configs, instantiate and filter per instance, measure the union once,
    /// then dispatch one schedule per instance by adapted score with build
    /// verification.
    pub fn efficient_search<M: Measurer>(
        &mut self,
        measurer: &mut ProgramMeasurer<M>,
    ) -> Result<SearchOutput> {
        self.ensure_sketches()?;
        let sketch = self
            .sketch_cache
            .iter()
            .find(|s| !s.unfilled_split_ids().is_empty())
            .cloned()
            .context(NoSketchesSnafu)?;

        let space = ConfigSpace::new(&self.task)?;
        let configs = space.emit_configs()?;
        tracing::debug!(count = configs.len(), "emitted aligned tile configs");

        let task = &self.task;
        let rules = &self.aligned_init_rules;
        let pairs: Vec<(AlignedConfig, State)> = configs
            .into_par_iter()
            .filter_map(|cfg| {
                let mut state = sketch.clone();
                for rule in rules {
                    if rule.apply(task, &cfg, &mut state) == ResultKind::Invalid {
                        return None;
                    }
                }
                Some((cfg, state))
            })
            .collect();

        let (configs, states): (Vec<_>, Vec<_>) = pairs.into_iter().unzip();
        let cands = threads_number_filter(&self.task, Candidates::new(configs, states));
        if cands.is_empty() {
            return EmptyCandidateSetSnafu { stage: "thread-count filtering" }.fail();
        }

        let mut union: BTreeMap<AlignedConfig, State> = BTreeMap::new();
        for inst in &self.task.wkl_insts {
            let mut c = occupancy_filter(&self.task, cands.clone(), inst)?;
            c = register_launch_bounds_filter(&self.task, c, inst)?;
            c = shared_memory_launch_bounds_filter(&self.task, c, inst)?;
            c = padding_filter_relaxed(&self.task, c, inst)?;
            c = shared_memory_compute_intensive_filter(c);
            c = reg_compute_intensive_filter(c);
            for (cfg, state) in c.configs.into_iter().zip(c.states) {
                union.entry(cfg).or_insert(state);
            }
        }
        if union.is_empty() {
            return EmptyCandidateSetSnafu { stage: "per-instance filtering" }.fail();
        }
        let states: Vec<State> = union.into_values().collect();
        tracing::info!(count = states.len(), "measuring aligned candidates");

        let mut inputs = Vec::with_capacity(states.len());
        for state in &states {
            let wkl_inst_id = self.cherry_pick_workload_instance()?;
            self.measured_states_set.insert(state.canonical());
            inputs.push(MeasureInput { state: state.clone(), wkl_inst_id });
        }
        let results = measurer.measure(&self.task, &inputs)?;
        self.model.update(&inputs, &results);
        self.record_measurements(&inputs, &results)?;
        self.trial_ct += inputs.len();
        self.calculate_inst_opt_prob(measurer)?;

        let mut base = Vec::with_capacity(states.len());
        for (input, result) in inputs.iter().zip(&results) {
            if result.is_valid() {
                let inst = &self.task.wkl_insts[input.wkl_inst_id];
                let penalty = adaption_penalty(&self.task, &input.state, inst)?;
                base.push(self.task.flop_for_instance(inst)? / penalty / result.mean_cost());
            } else {
                base.push(0.0);
            }
        }

        let num_states = states.len();
        let num_insts = self.task.wkl_insts.len();
        let mut scores = vec![0.0; num_insts * num_states];
        for (i, inst) in self.task.wkl_insts.iter().enumerate() {
            for (j, state) in states.iter().enumerate() {
                scores[i * num_states + j] =
                    adapt_state_to_workload(&self.task, state, inst, base[j])?.score;
            }
        }

        // Dispatch with build verification: a failed build zeroes that pair
        // and only the affected instances are re-dispatched, until stable.
        let dispatcher = TopKDispatcher;
        let mut dispatch = dispatcher.dispatch(&scores, num_states);
        loop {
            let mut changed = false;
            for (&inst_id, &state_id) in &dispatch {
                if scores[inst_id * num_states + state_id] == 0.0 {
                    continue;
                }
                let build = measurer.measurer.build(&self.task, &states[state_id], inst_id);
                if !build.success {
                    tracing::warn!(inst_id, state_id, msg = %build.error_msg, "build failed, re-dispatching");
                    scores[inst_id * num_states + state_id] = 0.0;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            let next = dispatcher.dispatch(&scores, num_states);
            if next == dispatch {
                break;
            }
            dispatch = next;
        }

        let (selected, inst_dispatch) = dispatcher.map_insts_to_states(&dispatch, &states);
        self.inst_dispatch = inst_dispatch.clone();
        let key = &self.task.workload_key;
        Ok(SearchOutput {
            best_state: measurer.best_state.get(key).cloned(),
            states: selected,
            inst_dispatch,
        })
    }
}
