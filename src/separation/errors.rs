use crate::{
    algebra::errors::LinalgError, alm::errors::AlmError, components::errors::ModelError,
    instrument::errors::InstrumentError, optimization::errors::OptError,
};
use ndarray::Array1;

/// Result alias for component-separation entry points.
pub type SeparationResult<T> = Result<T, SeparationError>;

#[derive(Debug, Clone, PartialEq)]
pub enum SeparationError {
    // ---- Wrapped layers ----
    Model { source: ModelError },
    Linalg { source: LinalgError },
    Opt { source: OptError },
    Instrument { source: InstrumentError },
    Alm { source: AlmError },

    // ---- Fit outcome ----
    /// The optimizer stopped without meeting its convergence test.
    NotConverged {
        x: Array1<f64>,
        status: String,
        iterations: usize,
        grad_norm: Option<f64>,
    },

    // ---- Inputs ----
    /// Data (or weights) with an unusable shape.
    DataShape {
        what: &'static str,
        shape: Vec<usize>,
        reason: &'static str,
    },

    /// Frequency axis length differs from the mixing matrix.
    FrequencyMismatch {
        expected: usize,
        found: usize,
    },

    /// Patch labels must cover every pixel.
    PatchLabels {
        expected: usize,
        found: usize,
    },

    /// Adaptive fits need one cluster map per free parameter.
    ClusterCount {
        expected: usize,
        found: usize,
    },

    /// A malformed option value.
    InvalidOption {
        name: &'static str,
        reason: &'static str,
    },

    /// Every sample is masked.
    NoValidSamples,
}

impl std::error::Error for SeparationError {}

impl std::fmt::Display for SeparationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SeparationError::Model { source } => write!(f, "Mixing model error: {source}"),
            SeparationError::Linalg { source } => write!(f, "Linear algebra error: {source}"),
            SeparationError::Opt { source } => write!(f, "Optimizer error: {source}"),
            SeparationError::Instrument { source } => write!(f, "Instrument error: {source}"),
            SeparationError::Alm { source } => write!(f, "Alm error: {source}"),
            SeparationError::NotConverged { status, iterations, grad_norm, .. } => match grad_norm {
                Some(g) => write!(
                    f,
                    "Spectral fit did not converge after {iterations} iterations ({status}); |grad| = {g:.3e}"
                ),
                None => write!(
                    f,
                    "Spectral fit did not converge after {iterations} iterations ({status})"
                ),
            },
            SeparationError::DataShape { what, shape, reason } => {
                write!(f, "Invalid shape {shape:?} for {what}: {reason}")
            }
            SeparationError::FrequencyMismatch { expected, found } => {
                write!(f, "Data has {found} frequencies, mixing matrix has {expected}")
            }
            SeparationError::PatchLabels { expected, found } => {
                write!(f, "Expected {expected} patch labels (one per pixel), found {found}")
            }
            SeparationError::ClusterCount { expected, found } => {
                write!(f, "Expected {expected} cluster maps (one per free parameter), found {found}")
            }
            SeparationError::InvalidOption { name, reason } => {
                write!(f, "Invalid option {name}: {reason}")
            }
            SeparationError::NoValidSamples => write!(f, "Every sample of the data is masked"),
        }
    }
}

impl From<ModelError> for SeparationError {
    fn from(source: ModelError) -> Self {
        SeparationError::Model { source }
    }
}

impl From<LinalgError> for SeparationError {
    fn from(source: LinalgError) -> Self {
        SeparationError::Linalg { source }
    }
}

/// Model and linear-algebra failures raised inside the objective keep their
/// own variant instead of nesting under `Opt`.
impl From<OptError> for SeparationError {
    fn from(source: OptError) -> Self {
        match source {
            OptError::Model { source } => SeparationError::Model { source },
            OptError::Linalg { source } => SeparationError::Linalg { source },
            source => SeparationError::Opt { source },
        }
    }
}

impl From<InstrumentError> for SeparationError {
    fn from(source: InstrumentError) -> Self {
        SeparationError::Instrument { source }
    }
}

impl From<AlmError> for SeparationError {
    fn from(source: AlmError) -> Self {
        SeparationError::Alm { source }
    }
}
