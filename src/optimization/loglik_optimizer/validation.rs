//! loglik_optimizer::validation — checks on what enters and leaves a fit.
//!
//! Tolerances are checked once when options are built; gradients, Hessians
//! and final estimates are checked every time they cross the argmin
//! boundary, so a NaN produced by a degenerate mixing matrix surfaces as a
//! typed [`OptError`] instead of a silently wrong β̂.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{Grad, Theta, types::Hessian},
};

/// `Err(reason)` unless `tol` is finite and strictly positive.
fn positive_finite(tol: f64) -> Result<(), &'static str> {
    if !tol.is_finite() {
        Err("tolerance must be finite")
    } else if tol <= 0.0 {
        Err("tolerance must be strictly positive")
    } else {
        Ok(())
    }
}

/// Gradient-norm stopping tolerance; `None` disables the rule.
///
/// # Errors
/// [`OptError::InvalidTolGrad`] for a non-finite or non-positive value.
pub fn verify_tol_grad(tol: Option<f64>) -> OptResult<()> {
    match tol {
        Some(tol) => positive_finite(tol).map_err(|reason| OptError::InvalidTolGrad { tol, reason }),
        None => Ok(()),
    }
}

/// Cost-change stopping tolerance; `None` disables the rule.
///
/// # Errors
/// [`OptError::InvalidTolCost`] for a non-finite or non-positive value.
pub fn verify_tol_cost(tol: Option<f64>) -> OptResult<()> {
    match tol {
        Some(tol) => positive_finite(tol).map_err(|reason| OptError::InvalidTolCost { tol, reason }),
        None => Ok(()),
    }
}

/// Gradient of length `dim` with finite entries.
///
/// # Errors
/// - [`OptError::GradientDimMismatch`] on a length mismatch.
/// - [`OptError::InvalidGradient`] naming the first non-finite entry.
pub fn validate_grad(grad: &Grad, dim: usize) -> OptResult<()> {
    if grad.len() != dim {
        return Err(OptError::GradientDimMismatch { expected: dim, found: grad.len() });
    }
    match grad.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(OptError::InvalidGradient {
            index,
            value: grad[index],
            reason: "gradient entries must be finite",
        }),
        None => Ok(()),
    }
}

/// Unwrap the solver's best parameters, rejecting a missing or non-finite
/// vector.
///
/// # Errors
/// - [`OptError::MissingThetaHat`] when argmin kept no best parameters.
/// - [`OptError::InvalidThetaHat`] naming the first non-finite entry.
pub fn validate_theta_hat(theta_hat: Option<Theta>) -> OptResult<Theta> {
    let theta = theta_hat.ok_or(OptError::MissingThetaHat)?;
    match theta.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(OptError::InvalidThetaHat {
            index,
            value: theta[index],
            reason: "parameter estimates must be finite",
        }),
        None => Ok(theta),
    }
}

/// Log-likelihood values (`−½ χ²` here) only need to be finite.
///
/// # Errors
/// [`OptError::NonFiniteCost`] for NaN or ±∞.
pub fn validate_value(value: f64) -> OptResult<()> {
    if value.is_finite() { Ok(()) } else { Err(OptError::NonFiniteCost { value }) }
}

/// Square `dim × dim` matrix with finite entries.
///
/// # Errors
/// - [`OptError::HessianDimMismatch`] for the wrong shape.
/// - [`OptError::InvalidHessian`] naming the first non-finite entry.
pub fn validate_hessian(hessian: &Hessian, dim: usize) -> OptResult<()> {
    if hessian.dim() != (dim, dim) {
        return Err(OptError::HessianDimMismatch { expected: dim, found: hessian.dim() });
    }
    match hessian.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), &value)) => Err(OptError::InvalidHessian { row, col, value }),
        None => Ok(()),
    }
}
