//! Errors of the spherical-harmonic coefficient codec and spectra.
use std::fmt;

/// Result alias for alm handling.
pub type AlmResult<T> = Result<T, AlmError>;

#[derive(Debug, Clone, PartialEq)]
pub enum AlmError {
    /// `n_lm` is not `(lmax + 1)(lmax + 2) / 2` for any `lmax`.
    InvalidSize { n_lm: usize },

    /// A real-alm axis must hold interleaved (re, im) pairs.
    OddRealLength { len: usize },

    /// An `(ℓ, m)` pair outside the layout.
    InvalidIndex { l: usize, m: usize, lmax: usize },

    /// Inputs that must share a length do not.
    LengthMismatch { what: &'static str, expected: usize, found: usize },

    /// An input array lacks the axes an operation needs.
    RankTooLow { what: &'static str, ndim: usize, needed: usize },
}

impl std::error::Error for AlmError {}

impl fmt::Display for AlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlmError::InvalidSize { n_lm } => {
                write!(f, "{n_lm} coefficients do not form a triangular alm layout")
            }
            AlmError::OddRealLength { len } => {
                write!(f, "Real alm axis has odd length {len}; expected (re, im) pairs")
            }
            AlmError::InvalidIndex { l, m, lmax } => {
                write!(f, "(l, m) = ({l}, {m}) is outside the layout with lmax = {lmax}")
            }
            AlmError::LengthMismatch { what, expected, found } => {
                write!(f, "Length mismatch for {what}: expected {expected}, found {found}")
            }
            AlmError::RankTooLow { what, ndim, needed } => {
                write!(f, "{what} has {ndim} axes, needs at least {needed}")
            }
        }
    }
}
