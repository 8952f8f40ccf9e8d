use crate::{
    algebra::errors::LinalgError, alm::errors::AlmError, components::errors::ModelError,
    instrument::errors::InstrumentError, optimization::errors::OptError,
    separation::errors::SeparationError,
};

/// Result alias for forecasting stages.
pub type ForecastResult<T> = Result<T, ForecastError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ForecastError {
    // ---- Wrapped layers ----
    Separation { source: SeparationError },
    Model { source: ModelError },
    Linalg { source: LinalgError },
    Opt { source: OptError },
    Instrument { source: InstrumentError },
    Alm { source: AlmError },

    // ---- Cosmological likelihood ----
    /// `BlBl·Alens + BuBu·r + noise` must stay strictly positive.
    NonPositiveModel {
        ell: usize,
        value: f64,
    },

    /// `Σ⁻¹ + Σ_ℓ YY_ℓ dof_ℓ/Cl_ℓ` could not be factorized at this `r`.
    SingularUncertainty {
        r: f64,
    },

    // ---- Inputs ----
    /// Multipole range outside what the inputs cover.
    InvalidRange {
        lmin: usize,
        lmax: usize,
        reason: &'static str,
    },

    /// An array with the wrong shape.
    ShapeMismatch {
        what: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    /// A malformed option value.
    InvalidOption {
        name: &'static str,
        reason: &'static str,
    },
}

impl std::error::Error for ForecastError {}

impl std::fmt::Display for ForecastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForecastError::Separation { source } => write!(f, "Component separation failed: {source}"),
            ForecastError::Model { source } => write!(f, "Mixing model error: {source}"),
            ForecastError::Linalg { source } => write!(f, "Linear algebra error: {source}"),
            ForecastError::Opt { source } => write!(f, "Optimizer error: {source}"),
            ForecastError::Instrument { source } => write!(f, "Instrument error: {source}"),
            ForecastError::Alm { source } => write!(f, "Alm error: {source}"),
            ForecastError::NonPositiveModel { ell, value } => {
                write!(f, "Model spectrum is not positive at ell = {ell}: {value}")
            }
            ForecastError::SingularUncertainty { r } => {
                write!(f, "Residual uncertainty matrix is singular at r = {r:.6e}")
            }
            ForecastError::InvalidRange { lmin, lmax, reason } => {
                write!(f, "Invalid multipole range [{lmin}, {lmax}]: {reason}")
            }
            ForecastError::ShapeMismatch { what, expected, found } => {
                write!(f, "Shape mismatch for {what}: expected {expected:?}, found {found:?}")
            }
            ForecastError::InvalidOption { name, reason } => {
                write!(f, "Invalid option {name}: {reason}")
            }
        }
    }
}

/// Errors from the inputs of a fit keep their own layer; everything else
/// stays wrapped as a separation failure.
impl From<SeparationError> for ForecastError {
    fn from(source: SeparationError) -> Self {
        match source {
            SeparationError::Model { source } => ForecastError::Model { source },
            SeparationError::Instrument { source } => ForecastError::Instrument { source },
            SeparationError::Alm { source } => ForecastError::Alm { source },
            source => ForecastError::Separation { source },
        }
    }
}

impl From<ModelError> for ForecastError {
    fn from(source: ModelError) -> Self {
        ForecastError::Model { source }
    }
}

impl From<LinalgError> for ForecastError {
    fn from(source: LinalgError) -> Self {
        ForecastError::Linalg { source }
    }
}

impl From<OptError> for ForecastError {
    fn from(source: OptError) -> Self {
        ForecastError::Opt { source }
    }
}

impl From<InstrumentError> for ForecastError {
    fn from(source: InstrumentError) -> Self {
        ForecastError::Instrument { source }
    }
}

impl From<AlmError> for ForecastError {
    fn from(source: AlmError) -> Self {
        ForecastError::Alm { source }
    }
}

/// Recovers a `ForecastError` raised inside a Brent objective; argmin's own
/// failures go through [`OptError`].
impl From<argmin::core::Error> for ForecastError {
    fn from(err: argmin::core::Error) -> Self {
        match err.downcast::<ForecastError>() {
            Ok(forecast_err) => forecast_err,
            Err(err) => ForecastError::Opt { source: OptError::from(err) },
        }
    }
}
