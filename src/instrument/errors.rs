//! Errors raised while validating instrument descriptors and deriving noise
//! levels from them.
use std::fmt;

/// Result alias for instrument handling.
pub type InstrumentResult<T> = Result<T, InstrumentError>;

#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentError {
    /// An instrument needs at least one channel.
    NoChannels,

    /// An optional per-channel array does not have one entry per frequency.
    LengthMismatch { field: &'static str, expected: usize, found: usize },

    /// A per-channel value is NaN or infinite.
    NonFinite { field: &'static str, index: usize, value: f64 },

    /// A per-channel value must be strictly positive.
    NonPositive { field: &'static str, index: usize, value: f64 },

    /// An operation needs a field the descriptor does not provide.
    MissingField { field: &'static str, needed_by: &'static str },

    /// The Stokes layout of the data cannot be mapped onto depths.
    UnsupportedStokes { n_stokes: usize },
}

impl std::error::Error for InstrumentError {}

impl fmt::Display for InstrumentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstrumentError::NoChannels => write!(f, "Instrument has no frequency channels"),
            InstrumentError::LengthMismatch { field, expected, found } => {
                write!(f, "Instrument field '{field}' has {found} entries, expected {expected}")
            }
            InstrumentError::NonFinite { field, index, value } => {
                write!(f, "Instrument field '{field}' is not finite at channel {index}: {value}")
            }
            InstrumentError::NonPositive { field, index, value } => {
                write!(f, "Instrument field '{field}' must be positive at channel {index}: {value}")
            }
            InstrumentError::MissingField { field, needed_by } => {
                write!(f, "Instrument field '{field}' is required by {needed_by}")
            }
            InstrumentError::UnsupportedStokes { n_stokes } => {
                write!(f, "Cannot pick noise depths for {n_stokes} Stokes parameters (expected 1, 2 or 3)")
            }
        }
    }
}
