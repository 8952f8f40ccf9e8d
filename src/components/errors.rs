//! Errors for emission laws and the mixing-matrix model.
//!
//! [`ModelError`] covers precondition failures of the model layer: malformed
//! frequency lists, parameter vectors of the wrong length, names that no
//! component owns, and evaluations that leave the finite range.
//!
//! ## Conventions
//! - Parameter and component names are the user-visible strings
//!   (`"Dust.beta_d"`, `"CMB"`).
//! - Frequencies are in GHz.
use crate::algebra::errors::LinalgError;

/// Result alias for the model layer.
pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Clone, PartialEq)]
pub enum ModelError {
    // ---- Construction ----
    /// A mixing matrix needs at least one component.
    NoComponents,

    /// A mixing matrix needs at least one frequency.
    NoFrequencies,

    /// Frequencies must be finite and strictly positive.
    InvalidFrequency { index: usize, value: f64, reason: &'static str },

    /// Two components expose the same parameter name.
    DuplicateParameter { name: String },

    /// A parameter default or pinned value is unusable.
    InvalidParameterValue { name: String, value: f64, reason: &'static str },

    /// Prewhitening factors must end in the frequency axis.
    PrewhiteningShape { expected_last: usize, found: Vec<usize> },

    // ---- Evaluation ----
    /// The parameter vector does not match the free parameters.
    ParamLengthMismatch { expected: usize, found: usize },

    /// Per-pixel parameter maps have the wrong shape.
    ParamMapShape { expected_cols: usize, found: Vec<usize> },

    /// No component owns this parameter.
    UnknownParameter { name: String },

    /// No component has this name.
    UnknownComponent { name: String },

    /// An emission law returned NaN or ±∞.
    NonFiniteEvaluation { component: String, nu: f64, value: f64 },

    /// Finite-difference derivatives of a user law failed validation.
    NonFiniteDerivative { component: String, nu: f64 },

    /// Applying the prewhitening factors failed.
    Linalg { source: LinalgError },
}

impl std::error::Error for ModelError {}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Construction ----
            ModelError::NoComponents => write!(f, "Mixing matrix has no components"),
            ModelError::NoFrequencies => write!(f, "Mixing matrix has no frequencies"),
            ModelError::InvalidFrequency { index, value, reason } => {
                write!(f, "Invalid frequency {value} at index {index}: {reason}")
            }
            ModelError::DuplicateParameter { name } => {
                write!(f, "Parameter '{name}' is defined by more than one component")
            }
            ModelError::InvalidParameterValue { name, value, reason } => {
                write!(f, "Invalid value {value} for parameter '{name}': {reason}")
            }
            ModelError::PrewhiteningShape { expected_last, found } => {
                write!(
                    f,
                    "Prewhitening factors must have a trailing axis of length {expected_last}, \
                     found shape {found:?}"
                )
            }

            // ---- Evaluation ----
            ModelError::ParamLengthMismatch { expected, found } => {
                write!(f, "Expected {expected} spectral parameters, found {found}")
            }
            ModelError::ParamMapShape { expected_cols, found } => {
                write!(
                    f,
                    "Parameter maps must have shape (n_pix, {expected_cols}), found {found:?}"
                )
            }
            ModelError::UnknownParameter { name } => {
                write!(f, "No component owns a parameter named '{name}'")
            }
            ModelError::UnknownComponent { name } => {
                write!(f, "No component named '{name}'")
            }
            ModelError::NonFiniteEvaluation { component, nu, value } => {
                write!(f, "Component '{component}' evaluated to {value} at {nu} GHz")
            }
            ModelError::NonFiniteDerivative { component, nu } => {
                write!(f, "Finite-difference derivatives of '{component}' at {nu} GHz are not finite")
            }
            ModelError::Linalg { source } => write!(f, "Prewhitening failed: {source}"),
        }
    }
}

impl From<LinalgError> for ModelError {
    fn from(source: LinalgError) -> Self {
        ModelError::Linalg { source }
    }
}
