//! Cost-model seam.
//!
//! The evolutionary search only needs relative scores, so the trait is small:
//! predict, a per-instance variant carrying the adaptation penalties, and an
//! update hook fed after every measurement round. [`RandomModel`] is the
//! non-informative placeholder; the search clamps its evolution budget when
//! `is_informative()` is false.

use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessera_ir::State;

use crate::dispatch::adapt_state_to_workload;
use crate::error::Result;
use crate::measure::{MeasureInput, MeasureResult};
use crate::task::SearchTask;

/// Predicted score for one (state, instance) pair, with the penalties the
/// dispatcher needs alongside it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstancePrediction {
    pub score: f64,
    pub occupancy: f64,
    pub padding: f64,
}

pub trait CostModel: Send + Sync {
    /// Relative throughput scores, one per state. Larger is better; scores at
    /// or below `-1e10` mark infeasible states.
    fn predict(&self, task: &SearchTask, states: &[State]) -> Vec<f64>;

    /// Per-instance predictions, row-major `[inst][state]`. The default
    /// adapts `predict` scores by each instance's occupancy and padding
    /// penalties.
    fn predict_for_all_instances(
        &self,
        task: &SearchTask,
        states: &[State],
    ) -> Result<Vec<Vec<InstancePrediction>>> {
        let base = self.predict(task, states);
        let mut rows = Vec::with_capacity(task.wkl_insts.len());
        for inst in &task.wkl_insts {
            let mut row = Vec::with_capacity(states.len());
            for (state, score) in states.iter().zip(base.iter()) {
                let adapted = adapt_state_to_workload(task, state, inst, *score)?;
                row.push(InstancePrediction {
                    score: adapted.score,
                    occupancy: adapted.occupancy,
                    padding: adapted.padding,
                });
            }
            rows.push(row);
        }
        Ok(rows)
    }

    fn update(&mut self, inputs: &[MeasureInput], results: &[MeasureResult]);

    /// Whether predictions carry signal. A placeholder returns `false` and
    /// the evolution loop shortens accordingly.
    fn is_informative(&self) -> bool;
}

/// Uniform-random scores; the model of last resort before any measurements
/// exist.
#[derive(Debug)]
pub struct RandomModel {
    rng: Mutex<StdRng>,
}

impl RandomModel {
    pub fn new(seed: u64) -> Self {
        Self { rng: Mutex::new(StdRng::seed_from_u64(seed)) }
    }
}

impl CostModel for RandomModel {
    fn predict(&self, _task: &SearchTask, states: &[State]) -> Vec<f64> {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        states.iter().map(|_| rng.r#gen::<f64>()).collect()
    }

    fn update(&mut self, _inputs: &[MeasureInput], _results: &[MeasureResult]) {}

    fn is_informative(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::common::{dynamic_gpu_task, tiled_gpu_state};

    #[test]
    fn test_random_model_scores_in_unit_interval() {
        let task = dynamic_gpu_task();
        let model = RandomModel::new(42);
        let states = vec![tiled_gpu_state(&task, 16, 8), tiled_gpu_state(&task, 8, 8)];
        let scores = model.predict(&task, &states);
        assert_eq!(scores.len(), 2);
        assert!(scores.iter().all(|s| (0.0..1.0).contains(s)));
        assert!(!model.is_informative());
    }

    #[test]
    fn test_per_instance_predictions_apply_penalties() {
        let task = dynamic_gpu_task();
        let model = RandomModel::new(7);
        let states = vec![tiled_gpu_state(&task, 16, 8)];
        let rows = model.predict_for_all_instances(&task, &states).unwrap();
        assert_eq!(rows.len(), task.wkl_insts.len());
        for row in &rows {
            assert_eq!(row.len(), 1);
            let p = row[0];
            assert!(p.occupancy > 0.0 && p.occupancy <= 1.0);
            assert!(p.padding > 0.0 && p.padding <= 1.0);
        }
    }
}
