//! Loop extents: constant or symbolic.
//!
//! A symbolic extent refers to a shape variable whose value is only known per
//! workload instance. Substitution with an incomplete binding map is a hard
//! error: every symbolic variable must resolve, or the task definition itself
//! is broken.

use std::collections::HashMap;
use std::fmt;

use snafu::OptionExt;

use crate::error::{MissingShapeVarSnafu, Result};

/// Binding of shape-variable names to concrete values for one workload instance.
pub type ShapeVarMap = HashMap<String, i64>;

/// A loop extent, either a compile-time constant or a symbolic shape variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extent {
    Const(i64),
    Var(String),
}

impl Extent {
    /// Shorthand for a symbolic extent.
    pub fn var(name: impl Into<String>) -> Self {
        Self::Var(name.into())
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Self::Var(_))
    }

    /// Constant value, if this extent is already concrete.
    pub fn as_const(&self) -> Option<i64> {
        match self {
            Self::Const(v) => Some(*v),
            Self::Var(_) => None,
        }
    }

    /// Resolve this extent against a workload-instance binding.
    ///
    /// Fails when a symbolic variable is absent from the map; that is a task
    /// definition error, not a recoverable search condition.
    pub fn substitute(&self, bindings: &ShapeVarMap) -> Result<i64> {
        match self {
            Self::Const(v) => Ok(*v),
            Self::Var(name) => {
                bindings.get(name).copied().context(MissingShapeVarSnafu { name: name.clone() })
            }
        }
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Const(v) => write!(f, "{v}"),
            Self::Var(name) => write!(f, "{name}"),
        }
    }
}

impl From<i64> for Extent {
    fn from(v: i64) -> Self {
        Self::Const(v)
    }
}
