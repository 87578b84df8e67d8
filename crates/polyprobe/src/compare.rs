//! Comparison outcome shared by the DOM and trace oracles.

use serde::{Deserialize, Serialize};

/// Outcome of comparing a live value against golden data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "diff", rename_all = "snake_case")]
pub enum ComparisonResult<D> {
    /// Both sides are equal after normalization
    Equal,
    /// The sides differ; `D` explains how
    Unequal(D),
}

impl<D> ComparisonResult<D> {
    /// Check if the comparison found no difference
    #[must_use]
    pub const fn is_equal(&self) -> bool {
        matches!(self, Self::Equal)
    }

    /// Get the difference, if any
    #[must_use]
    pub const fn diff(&self) -> Option<&D> {
        match self {
            Self::Equal => None,
            Self::Unequal(d) => Some(d),
        }
    }

    /// Convert into a `Result`, mapping the difference with `f`
    pub fn into_result<E>(self, f: impl FnOnce(D) -> E) -> Result<(), E> {
        match self {
            Self::Equal => Ok(()),
            Self::Unequal(d) => Err(f(d)),
        }
    }
}
