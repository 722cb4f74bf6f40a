//! Schedule transform steps.
//!
//! A schedule is an ordered sequence of these steps. Split lengths may be
//! `None` ("undefined"): structurally present but left for a later
//! tile-assignment pass to fill in.

use std::fmt;

use crate::extent::Extent;

/// Hardware thread scope a loop axis can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadScope {
    BlockX,
    ThreadX,
    Vthread,
}

impl fmt::Display for ThreadScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BlockX => "blockIdx.x",
            Self::ThreadX => "threadIdx.x",
            Self::Vthread => "vthread",
        };
        write!(f, "{s}")
    }
}

/// One loop transformation applied to a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Split `axis` (original extent `extent`) into inner parts of the given
    /// lengths; `None` lengths are filled in later by tile assignment.
    Split { stage_id: usize, axis: String, extent: Extent, lengths: Vec<Option<i64>> },
    Fuse { stage_id: usize, axes: Vec<String> },
    CacheRead { stage_id: usize, producer: String, scope: String },
    CacheWrite { stage_id: usize, scope: String },
    Rfactor { stage_id: usize, axis: String },
    Bind { stage_id: usize, axis: String, scope: ThreadScope },
    Unroll { stage_id: usize, max_step: i64 },
    Vectorize { stage_id: usize, axis: String },
    Inline { stage_id: usize },
}

impl Step {
    pub fn stage_id(&self) -> usize {
        match self {
            Self::Split { stage_id, .. }
            | Self::Fuse { stage_id, .. }
            | Self::CacheRead { stage_id, .. }
            | Self::CacheWrite { stage_id, .. }
            | Self::Rfactor { stage_id, .. }
            | Self::Bind { stage_id, .. }
            | Self::Unroll { stage_id, .. }
            | Self::Vectorize { stage_id, .. }
            | Self::Inline { stage_id } => *stage_id,
        }
    }

    /// Product of the defined lengths of a split step, `None` for other steps.
    pub fn split_length_product(&self) -> Option<i64> {
        match self {
            Self::Split { lengths, .. } => {
                Some(lengths.iter().map(|l| l.unwrap_or(1)).product())
            }
            _ => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Split { stage_id, axis, extent, lengths } => {
                write!(f, "SP s{stage_id} {axis} ext={extent} [")?;
                for (i, len) in lengths.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match len {
                        Some(v) => write!(f, "{v}")?,
                        None => write!(f, "_")?,
                    }
                }
                write!(f, "]")
            }
            Self::Fuse { stage_id, axes } => write!(f, "FU s{stage_id} [{}]", axes.join(",")),
            Self::CacheRead { stage_id, producer, scope } => {
                write!(f, "CR s{stage_id} {producer}@{scope}")
            }
            Self::CacheWrite { stage_id, scope } => write!(f, "CW s{stage_id} @{scope}"),
            Self::Rfactor { stage_id, axis } => write!(f, "RF s{stage_id} {axis}"),
            Self::Bind { stage_id, axis, scope } => write!(f, "BD s{stage_id} {axis}->{scope}"),
            Self::Unroll { stage_id, max_step } => write!(f, "UR s{stage_id} {max_step}"),
            Self::Vectorize { stage_id, axis } => write!(f, "VE s{stage_id} {axis}"),
            Self::Inline { stage_id } => write!(f, "IL s{stage_id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_display_marks_undefined_lengths() {
        let step = Step::Split {
            stage_id: 0,
            axis: "i".to_string(),
            extent: Extent::Const(64),
            lengths: vec![Some(2), None, Some(8)],
        };
        assert_eq!(step.to_string(), "SP s0 i ext=64 [2,_,8]");
    }

    #[test]
    fn test_split_length_product_treats_undefined_as_one() {
        let step = Step::Split {
            stage_id: 0,
            axis: "i".to_string(),
            extent: Extent::Const(64),
            lengths: vec![Some(2), None, Some(8)],
        };
        assert_eq!(step.split_length_product(), Some(16));
        assert_eq!(Step::Inline { stage_id: 0 }.split_length_product(), None);
    }
}
