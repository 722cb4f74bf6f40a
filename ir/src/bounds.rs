//! Bound inference and validity pruning over schedules.
//!
//! Inference fills the one remaining undefined length of a split when the
//! others and the extent are known, so canonical serializations of otherwise
//! identical schedules compare equal. Pruning drops schedules whose concrete
//! split factors overrun their axis extents.

use crate::extent::Extent;
use crate::state::State;
use crate::step::Step;

/// Round `a` up to the next positive multiple quotient of `b`.
fn ceil_div(a: i64, b: i64) -> i64 {
    (a + b - 1) / b
}

/// Fill the single undefined length of each split step whose extent is
/// constant and whose other lengths are defined. Splits on symbolic extents
/// are left untouched.
pub fn infer_bounds(states: &mut [State]) {
    for state in states.iter_mut() {
        for step in state.steps.iter_mut() {
            let Step::Split { extent: Extent::Const(extent), lengths, .. } = step else {
                continue;
            };
            let undefined = lengths.iter().filter(|l| l.is_none()).count();
            if undefined != 1 {
                continue;
            }
            let defined: i64 = lengths.iter().flatten().product();
            if defined <= 0 || defined > *extent {
                continue;
            }
            let fill = ceil_div(*extent, defined);
            for len in lengths.iter_mut() {
                if len.is_none() {
                    *len = Some(fill);
                }
            }
        }
    }
}

/// Drop schedules whose fully defined split factors exceed their axis extent.
///
/// `max_extent_of` resolves an extent to its largest concrete value (e.g. the
/// maximum over all workload instances); `None` means the extent cannot be
/// bounded and the split is accepted as-is.
pub fn prune_invalid<F>(states: Vec<State>, max_extent_of: F) -> Vec<State>
where
    F: Fn(&Extent) -> Option<i64>,
{
    states
        .into_iter()
        .filter(|state| {
            state.steps.iter().all(|step| {
                let Step::Split { extent, lengths, .. } = step else {
                    return true;
                };
                if lengths.iter().any(Option::is_none) {
                    return true;
                }
                let Some(max) = max_extent_of(extent) else {
                    return true;
                };
                let product: i64 = lengths.iter().flatten().product();
                product >= 1 && product <= max
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infer_fills_single_undefined_length() {
        let mut s = State::new(1);
        s.split(0, "i", 64, vec![None, Some(4), Some(4)]);
        let mut states = vec![s];
        infer_bounds(&mut states);
        let Step::Split { lengths, .. } = &states[0].steps[0] else { unreachable!() };
        assert_eq!(lengths, &vec![Some(4), Some(4), Some(4)]);
    }

    #[test]
    fn test_infer_leaves_symbolic_extents_alone() {
        let mut s = State::new(1);
        s.split(0, "i", Extent::var("T"), vec![None, Some(4)]);
        let mut states = vec![s.clone()];
        infer_bounds(&mut states);
        assert_eq!(states[0], s);
    }

    #[test]
    fn test_prune_rejects_oversized_factors() {
        let mut ok = State::new(1);
        ok.split(0, "i", 64, vec![Some(8), Some(8)]);
        let mut bad = State::new(1);
        bad.split(0, "i", 64, vec![Some(16), Some(8)]);
        let kept = prune_invalid(vec![ok.clone(), bad], |e| e.as_const());
        assert_eq!(kept, vec![ok]);
    }

    #[test]
    fn test_prune_keeps_unbounded_extents() {
        let mut s = State::new(1);
        s.split(0, "i", Extent::var("T"), vec![Some(1024), Some(8)]);
        let kept = prune_invalid(vec![s.clone()], |e| e.as_const());
        assert_eq!(kept, vec![s]);
    }
}
