//! Errors raised by the batched linear-algebra layer.
use std::fmt;

/// Result alias for batched linear algebra.
pub type LinalgResult<T> = Result<T, LinalgError>;

#[derive(Debug, Clone, PartialEq)]
pub enum LinalgError {
    // ---- Shapes ----
    /// Operand has fewer axes than the routine's core rank.
    RankTooLow { op: &'static str, operand: &'static str, ndim: usize, core: usize },

    /// Core (trailing) dimensions are not conformable.
    CoreShape { op: &'static str, left: Vec<usize>, right: Vec<usize>, reason: &'static str },

    /// Leading batch shapes cannot be broadcast against each other.
    BroadcastMismatch { op: &'static str, left: Vec<usize>, right: Vec<usize> },

    /// Two parallel lists disagree in length (e.g. dA vs d²A rows).
    LengthMismatch { what: &'static str, expected: usize, found: usize },

    // ---- Numerics ----
    /// A matrix could not be factorized at the given batch position.
    Singular { op: &'static str, batch_index: Vec<usize>, diagonal: Vec<f64> },

    /// A non-finite value reached a routine that requires finite input.
    NonFinite { op: &'static str, batch_index: Vec<usize> },
}

impl std::error::Error for LinalgError {}

impl fmt::Display for LinalgError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinalgError::RankTooLow { op, operand, ndim, core } => {
                write!(f, "{op}: operand '{operand}' has {ndim} axes, needs at least {core}")
            }
            LinalgError::CoreShape { op, left, right, reason } => {
                write!(f, "{op}: core shapes {left:?} and {right:?} do not conform: {reason}")
            }
            LinalgError::BroadcastMismatch { op, left, right } => {
                write!(f, "{op}: batch shapes {left:?} and {right:?} cannot be broadcast")
            }
            LinalgError::LengthMismatch { what, expected, found } => {
                write!(f, "Length mismatch for {what}: expected {expected}, found {found}")
            }
            LinalgError::Singular { op, batch_index, diagonal } => {
                write!(f, "{op}: singular matrix at batch index {batch_index:?} (diagonal {diagonal:?})")
            }
            LinalgError::NonFinite { op, batch_index } => {
                write!(f, "{op}: non-finite input at batch index {batch_index:?}")
            }
        }
    }
}
