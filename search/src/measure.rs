//! Measurement seam: build/run candidates on a device and keep score.
//!
//! The search core never talks to real hardware. It hands candidates to a
//! [`Measurer`] implementation and records the results in a
//! [`ProgramMeasurer`], which tracks the running best per workload key and,
//! for dynamic tasks, the best achieved flops per instance.

use std::collections::{HashMap, HashSet};

use tessera_ir::State;

use crate::dispatch::adaption_penalty;
use crate::error::Result;
use crate::task::SearchTask;

/// One candidate submitted for measurement: the schedule plus the workload
/// instance it is timed on.
#[derive(Debug, Clone)]
pub struct MeasureInput {
    pub state: State,
    pub wkl_inst_id: usize,
}

/// Outcome of compiling one candidate, used during dispatch verification.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub success: bool,
    pub error_msg: String,
}

impl BuildResult {
    pub fn ok() -> Self {
        Self { success: true, error_msg: String::new() }
    }

    pub fn fail(msg: impl Into<String>) -> Self {
        Self { success: false, error_msg: msg.into() }
    }
}

/// Timing result for one candidate. `error_no != 0` marks a failed run; its
/// costs are meaningless.
#[derive(Debug, Clone)]
pub struct MeasureResult {
    pub costs: Vec<f64>,
    pub error_no: i32,
    pub error_msg: String,
}

impl MeasureResult {
    pub fn from_costs(costs: Vec<f64>) -> Self {
        Self { costs, error_no: 0, error_msg: String::new() }
    }

    pub fn error(error_no: i32, msg: impl Into<String>) -> Self {
        Self { costs: Vec::new(), error_no, error_msg: msg.into() }
    }

    pub fn is_valid(&self) -> bool {
        self.error_no == 0 && !self.costs.is_empty()
    }

    /// Mean cost in seconds; `f64::MAX` for failed runs.
    pub fn mean_cost(&self) -> f64 {
        if !self.is_valid() {
            return f64::MAX;
        }
        self.costs.iter().sum::<f64>() / self.costs.len() as f64
    }
}

/// The external build-and-run seam.
pub trait Measurer {
    fn measure(&mut self, task: &SearchTask, inputs: &[MeasureInput]) -> Vec<MeasureResult>;

    /// Compile-only check for dispatch verification. Devices that cannot
    /// separate the two phases may simply report success.
    fn build(&mut self, _task: &SearchTask, _state: &State, _wkl_inst_id: usize) -> BuildResult {
        BuildResult::ok()
    }
}

/// Measurement bookkeeping around a raw [`Measurer`].
#[derive(Debug)]
pub struct ProgramMeasurer<M> {
    pub measurer: M,
    /// Best adapted throughput (FLOP/s) seen so far, per workload key.
    pub best_throughput: HashMap<String, f64>,
    /// Trial counter at which the best was found, per workload key.
    pub best_ct: HashMap<String, usize>,
    pub best_state: HashMap<String, State>,
    /// Best achieved FLOP/s per workload instance (dynamic tasks).
    pub best_inst_flops: HashMap<String, Vec<f64>>,
    pub has_valid: HashSet<String>,
    /// Total measurements submitted.
    pub ct: usize,
}

impl<M: Measurer> ProgramMeasurer<M> {
    pub fn new(measurer: M) -> Self {
        Self {
            measurer,
            best_throughput: HashMap::new(),
            best_ct: HashMap::new(),
            best_state: HashMap::new(),
            best_inst_flops: HashMap::new(),
            has_valid: HashSet::new(),
            ct: 0,
        }
    }

    pub fn best_score(&self, workload_key: &str) -> f64 {
        self.best_throughput.get(workload_key).copied().unwrap_or(0.0)
    }

    /// Measure a batch and fold the results into the running best tables.
    pub fn measure(
        &mut self,
        task: &SearchTask,
        inputs: &[MeasureInput],
    ) -> Result<Vec<MeasureResult>> {
        let results = self.measurer.measure(task, inputs);
        let key = task.workload_key.clone();
        for (input, result) in inputs.iter().zip(results.iter()) {
            self.ct += 1;
            if !result.is_valid() {
                tracing::debug!(error_no = result.error_no, msg = %result.error_msg, "measurement failed");
                continue;
            }
            self.has_valid.insert(key.clone());
            let mean = result.mean_cost();
            let inst = &task.wkl_insts[input.wkl_inst_id];
            let penalty = adaption_penalty(task, &input.state, inst)?;
            let throughput = task.flop_for_instance(inst)? / penalty / mean;
            if throughput > self.best_score(&key) {
                self.best_throughput.insert(key.clone(), throughput);
                self.best_ct.insert(key.clone(), self.ct);
                self.best_state.insert(key.clone(), input.state.clone());
                tracing::info!(workload = %key, throughput, ct = self.ct, "new best schedule");
            }
            if task.is_dynamic() {
                let per_inst = self
                    .best_inst_flops
                    .entry(key.clone())
                    .or_insert_with(|| vec![0.0; task.wkl_insts.len()]);
                for (inst_id, wkl_inst) in task.wkl_insts.iter().enumerate() {
                    let penalty = adaption_penalty(task, &input.state, wkl_inst)?;
                    let flops = task.flop_for_instance(wkl_inst)? / penalty / mean;
                    if flops > per_inst[inst_id] {
                        per_inst[inst_id] = flops;
                    }
                }
            }
        }
        Ok(results)
    }
}
