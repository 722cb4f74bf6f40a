//! The schedule: an ordered transform-step sequence over a graph's stages.
//!
//! States have value semantics: mutation always happens on an owned copy, so
//! derived schedules never affect the ones they were cloned from. Equality
//! and deduplication go through [`State::canonical`], a stable textual
//! serialization used as the key in explored/measured sets and the elitism
//! heap.

use std::fmt;

use crate::extent::Extent;
use crate::step::{Step, ThreadScope};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct State {
    pub steps: Vec<Step>,
    pub num_stages: usize,
}

impl State {
    pub fn new(num_stages: usize) -> Self {
        Self { steps: Vec::new(), num_stages }
    }

    /// Stable serialization; the deduplication key throughout the search.
    pub fn canonical(&self) -> String {
        let mut out = String::with_capacity(self.steps.len() * 24);
        for step in &self.steps {
            out.push_str(&step.to_string());
            out.push(';');
        }
        out
    }

    pub fn split(
        &mut self,
        stage_id: usize,
        axis: impl Into<String>,
        extent: impl Into<Extent>,
        lengths: Vec<Option<i64>>,
    ) -> &mut Self {
        self.steps.push(Step::Split {
            stage_id,
            axis: axis.into(),
            extent: extent.into(),
            lengths,
        });
        self
    }

    pub fn fuse(&mut self, stage_id: usize, axes: Vec<String>) -> &mut Self {
        self.steps.push(Step::Fuse { stage_id, axes });
        self
    }

    pub fn cache_read(
        &mut self,
        stage_id: usize,
        producer: impl Into<String>,
        scope: impl Into<String>,
    ) -> &mut Self {
        self.steps.push(Step::CacheRead {
            stage_id,
            producer: producer.into(),
            scope: scope.into(),
        });
        self
    }

    pub fn cache_write(&mut self, stage_id: usize, scope: impl Into<String>) -> &mut Self {
        self.steps.push(Step::CacheWrite { stage_id, scope: scope.into() });
        self
    }

    pub fn rfactor(&mut self, stage_id: usize, axis: impl Into<String>) -> &mut Self {
        self.steps.push(Step::Rfactor { stage_id, axis: axis.into() });
        self
    }

    pub fn bind(&mut self, stage_id: usize, axis: impl Into<String>, scope: ThreadScope) -> &mut Self {
        self.steps.push(Step::Bind { stage_id, axis: axis.into(), scope });
        self
    }

    pub fn unroll(&mut self, stage_id: usize, max_step: i64) -> &mut Self {
        self.steps.push(Step::Unroll { stage_id, max_step });
        self
    }

    pub fn vectorize(&mut self, stage_id: usize, axis: impl Into<String>) -> &mut Self {
        self.steps.push(Step::Vectorize { stage_id, axis: axis.into() });
        self
    }

    pub fn inline(&mut self, stage_id: usize) -> &mut Self {
        self.steps.push(Step::Inline { stage_id });
        self
    }

    /// Indices of split steps, in application order.
    pub fn split_step_ids(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, Step::Split { .. }))
            .map(|(i, _)| i)
            .collect()
    }

    /// Split steps whose lengths are all still undefined.
    pub fn unfilled_split_ids(&self) -> Vec<usize> {
        self.steps
            .iter()
            .enumerate()
            .filter(|(_, s)| {
                matches!(s, Step::Split { lengths, .. } if lengths.iter().all(Option::is_none))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Overwrite the lengths of the split step at `step_id`.
    ///
    /// Quietly ignores non-split steps; callers obtain ids from
    /// [`Self::split_step_ids`].
    pub fn fill_split(&mut self, step_id: usize, new_lengths: Vec<Option<i64>>) {
        if let Some(Step::Split { lengths, .. }) = self.steps.get_mut(step_id) {
            *lengths = new_lengths;
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_distinguishes_step_order() {
        let mut a = State::new(1);
        a.split(0, "i", 64, vec![None, None]).inline(0);
        let mut b = State::new(1);
        b.inline(0);
        b.split(0, "i", 64, vec![None, None]);
        assert_ne!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_canonical_equal_for_identical_sequences() {
        let mut a = State::new(1);
        a.split(0, "i", 64, vec![Some(8), Some(8)]);
        let b = a.clone();
        assert_eq!(a.canonical(), b.canonical());
    }

    #[test]
    fn test_clone_isolates_mutation() {
        let mut a = State::new(1);
        a.split(0, "i", 64, vec![None, None]);
        let snapshot = a.clone();
        a.fill_split(0, vec![Some(8), Some(8)]);
        assert_ne!(a.canonical(), snapshot.canonical());
        assert_eq!(snapshot.unfilled_split_ids(), vec![0]);
    }

    #[test]
    fn test_unfilled_split_ids_skips_partially_filled() {
        let mut s = State::new(1);
        s.split(0, "i", 64, vec![None, None]);
        s.split(0, "j", 32, vec![Some(4), None]);
        assert_eq!(s.unfilled_split_ids(), vec![0]);
    }
}
