//! optimization::errors — failures of the spectral-parameter fit.
//!
//! [`OptError`] covers bad options, non-finite objective output, argmin
//! failures, bound violations, and the model and linear-algebra errors
//! raised inside the cost function. The latter travel through argmin as
//! boxed errors and are recovered intact by `From<argmin::core::Error>`.
use argmin::core::{ArgminError, Error};

use crate::{algebra::errors::LinalgError, components::errors::ModelError};

pub type OptResult<T> = Result<T, OptError>;

#[derive(Debug, Clone, PartialEq)]
pub enum OptError {
    // ---- Gradient ----
    /// The objective has no analytic gradient; finite differences take over.
    GradientNotImplemented,

    GradientDimMismatch { expected: usize, found: usize },

    InvalidGradient { index: usize, value: f64, reason: &'static str },

    // ---- Options ----
    InvalidTolGrad { tol: f64, reason: &'static str },
    InvalidTolCost { tol: f64, reason: &'static str },
    InvalidMaxIter { max_iter: usize, reason: &'static str },

    /// Every stopping rule was disabled.
    NoTolerancesProvided,

    InvalidLineSearch { name: String, reason: &'static str },
    InvalidLBFGSMem { mem: usize, reason: &'static str },

    // ---- Objective and outcome ----
    NonFiniteCost { value: f64 },
    InvalidThetaHat { index: usize, value: f64, reason: &'static str },

    /// The solver finished without a best parameter vector.
    MissingThetaHat,

    // ---- Argmin ----
    /// An error reported by argmin itself; `kind` names its category.
    Backend { kind: &'static str, text: String },

    // ---- Second derivatives ----
    HessianDimMismatch { expected: usize, found: (usize, usize) },
    InvalidHessian { row: usize, col: usize, value: f64 },

    // ---- Bounds ----
    InvalidBound { index: usize, lower: f64, upper: f64, reason: &'static str },
    StartOutsideBounds { index: usize, value: f64, lower: f64, upper: f64 },

    /// Bounds or a starting point sized for a different parameter count.
    ParamLengthMismatch { what: &'static str, expected: usize, found: usize },

    // ---- Model layers ----
    Model { source: ModelError },
    Linalg { source: LinalgError },
}

impl std::error::Error for OptError {}

impl OptError {
    /// Failures of the objective itself at a trial point (a model that
    /// cannot be evaluated, a singular system, a non-finite value), as
    /// opposed to misuse of the optimizer.
    pub fn is_evaluation_failure(&self) -> bool {
        matches!(self, OptError::Model { .. } | OptError::Linalg { .. } | OptError::NonFiniteCost { .. })
    }
}

impl std::fmt::Display for OptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptError::GradientNotImplemented => write!(f, "no analytic gradient available"),
            OptError::GradientDimMismatch { expected, found } => {
                write!(f, "gradient has {found} entries, expected {expected}")
            }
            OptError::InvalidGradient { index, value, reason } => {
                write!(f, "gradient entry {index} = {value}: {reason}")
            }
            OptError::InvalidTolGrad { tol, reason } => write!(f, "gradient tolerance {tol}: {reason}"),
            OptError::InvalidTolCost { tol, reason } => write!(f, "cost tolerance {tol}: {reason}"),
            OptError::InvalidMaxIter { max_iter, reason } => write!(f, "max_iter {max_iter}: {reason}"),
            OptError::NoTolerancesProvided => {
                write!(f, "at least one of tol_grad, tol_cost or max_iter is required")
            }
            OptError::InvalidLineSearch { name, reason } => write!(f, "line search '{name}': {reason}"),
            OptError::InvalidLBFGSMem { mem, reason } => write!(f, "L-BFGS memory {mem}: {reason}"),
            OptError::NonFiniteCost { value } => write!(f, "objective evaluated to {value}"),
            OptError::InvalidThetaHat { index, value, reason } => {
                write!(f, "estimated parameter {index} = {value}: {reason}")
            }
            OptError::MissingThetaHat => write!(f, "solver returned no best parameters"),
            OptError::Backend { kind, text } => write!(f, "argmin {kind}: {text}"),
            OptError::HessianDimMismatch { expected, found } => {
                write!(f, "Hessian is {}x{}, expected {expected}x{expected}", found.0, found.1)
            }
            OptError::InvalidHessian { row, col, value } => {
                write!(f, "Hessian entry ({row}, {col}) = {value} is not finite")
            }
            OptError::InvalidBound { index, lower, upper, reason } => {
                write!(f, "bound [{lower}, {upper}] of parameter {index}: {reason}")
            }
            OptError::StartOutsideBounds { index, value, lower, upper } => {
                write!(f, "start {value} of parameter {index} outside [{lower}, {upper}]")
            }
            OptError::ParamLengthMismatch { what, expected, found } => {
                write!(f, "{what} has length {found}, expected {expected}")
            }
            OptError::Model { source } => write!(f, "mixing-matrix model: {source}"),
            OptError::Linalg { source } => write!(f, "linear algebra: {source}"),
        }
    }
}

impl From<Error> for OptError {
    fn from(err: Error) -> Self {
        let err = match err.downcast::<OptError>() {
            Ok(ours) => return ours,
            Err(err) => err,
        };
        match err.downcast::<ArgminError>() {
            Ok(argmin_err) => {
                let (kind, text) = match argmin_err {
                    ArgminError::InvalidParameter { text } => ("invalid parameter", text),
                    ArgminError::NotImplemented { text } => ("not implemented", text),
                    ArgminError::NotInitialized { text } => ("not initialized", text),
                    ArgminError::ConditionViolated { text } => ("condition violated", text),
                    ArgminError::CheckpointNotFound { text } => ("checkpoint not found", text),
                    ArgminError::PotentialBug { text } => ("potential bug", text),
                    ArgminError::ImpossibleError { text } => ("impossible error", text),
                    other => ("error", other.to_string()),
                };
                OptError::Backend { kind, text }
            }
            Err(err) => OptError::Backend { kind: "error", text: err.to_string() },
        }
    }
}

impl From<LinalgError> for OptError {
    fn from(source: LinalgError) -> Self {
        OptError::Linalg { source }
    }
}

impl From<ModelError> for OptError {
    fn from(source: ModelError) -> Self {
        OptError::Model { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Recovery of crate errors that travelled through argmin's boxed error.
    // - Mapping of argmin's own error kinds.
    // - Which errors count as evaluation failures of the objective.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // An `OptError` raised inside a cost function comes back out of the
    // argmin error unchanged.
    //
    // Given
    // -----
    // - A singular-matrix error wrapped as `OptError::Linalg` and boxed into
    //   `argmin::core::Error`.
    //
    // Expect
    // ------
    // - `OptError::from` returns the original value.
    fn boxed_opt_error_round_trips() {
        // Arrange
        let original = OptError::from(LinalgError::Singular {
            op: "solve",
            batch_index: vec![3],
            diagonal: vec![0.0, 1.0],
        });
        let boxed: Error = original.clone().into();

        // Act
        let recovered = OptError::from(boxed);

        // Assert
        assert_eq!(recovered, original);
    }

    #[test]
    // Purpose
    // -------
    // Argmin's structured errors keep their category and text.
    //
    // Given
    // -----
    // - `ArgminError::NotImplemented`.
    //
    // Expect
    // ------
    // - `OptError::Backend` with kind "not implemented" and the same text.
    fn argmin_errors_keep_their_kind() {
        // Arrange
        let boxed: Error = ArgminError::NotImplemented { text: "hessian".to_string() }.into();

        // Act
        let err = OptError::from(boxed);

        // Assert
        assert_eq!(err, OptError::Backend { kind: "not implemented", text: "hessian".to_string() });
    }

    #[test]
    // Purpose
    // -------
    // Objective failures are told apart from configuration errors.
    //
    // Given
    // -----
    // - A singular-matrix error, a non-finite cost and an invalid tolerance.
    //
    // Expect
    // ------
    // - The first two are evaluation failures; the third is not.
    fn evaluation_failures_are_classified() {
        let singular = OptError::from(LinalgError::Singular { op: "solve", batch_index: vec![], diagonal: vec![0.0] });
        assert!(singular.is_evaluation_failure());
        assert!(OptError::NonFiniteCost { value: f64::INFINITY }.is_evaluation_failure());
        assert!(!OptError::InvalidTolGrad { tol: -1.0, reason: "negative" }.is_evaluation_failure());
    }
}
