//! loglik_optimizer::finite_diff — numerical derivatives for fits and
//! emission laws.
//!
//! Analytic derivatives are used wherever the mixing matrix provides them.
//! The helpers here cover the rest:
//! - [`run_fd_diff`]: forward-difference gradient of a fallible cost, the
//!   adapter's fallback when an objective has no analytic gradient.
//! - [`central_gradient`]: derivative of an emission law in its spectral
//!   parameters when the law does not implement one.
//! - [`compute_hessian`]: Jacobian of a gradient function (the observed
//!   information of a spectral fit).
//! - [`hessian_from_values`]: second derivatives from function values
//!   alone.
//!
//! Every returned array has passed [`validate_grad`] or
//! [`validate_hessian`]; Hessians are returned symmetric.
use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        Grad, Theta,
        types::Hessian,
        validation::{validate_grad, validate_hessian},
    },
};
use argmin::core::Error;
use finitediff::FiniteDiff;
use std::cell::RefCell;

/// Forward-difference gradient of a cost that reports failures out of band.
///
/// `func` stores any error in `closure_err` and returns NaN; the cell is
/// reset before differencing and checked afterwards.
///
/// # Errors
/// The stored error (through `From<Error>`), or a validation error.
pub fn run_fd_diff<G: Fn(&Theta) -> f64>(
    theta: &Theta, func: &G, closure_err: &RefCell<Option<Error>>,
) -> OptResult<Grad> {
    closure_err.replace(None);
    let grad = theta.forward_diff(func);
    if let Some(err) = closure_err.take() {
        return Err(err.into());
    }
    validate_grad(&grad, theta.len())?;
    Ok(grad)
}

/// Central-difference gradient of an infallible scalar function.
pub fn central_gradient<G: Fn(&Theta) -> f64>(func: &G, theta: &Theta) -> OptResult<Grad> {
    let grad = theta.central_diff(func);
    validate_grad(&grad, theta.len())?;
    Ok(grad)
}

/// Jacobian of the gradient function `f` at `theta`, symmetrized.
///
/// Central differences first; if they produce a non-finite entry (a step
/// crossing a parameter bound, typically) forward differences are tried
/// before giving up.
///
/// # Errors
/// The validation error of the forward-difference attempt.
pub fn compute_hessian<F: Fn(&Theta) -> Grad>(f: &F, theta: &Theta) -> OptResult<Hessian> {
    let dim = theta.len();
    let central = theta.central_hessian(f);
    let hess = match validate_hessian(&central, dim) {
        Ok(()) => central,
        Err(_) => {
            let forward = theta.forward_hessian(f);
            validate_hessian(&forward, dim)?;
            forward
        }
    };
    Ok(symmetrize(hess))
}

/// Hessian of a scalar function from four-point second differences,
/// `[f(+hᵢ+hⱼ) − f(+hᵢ−hⱼ) − f(−hᵢ+hⱼ) + f(−hᵢ−hⱼ)] / (4 hᵢ hⱼ)` with
/// `hᵢ = ε^{1/4} max(1, |θᵢ|)`.
pub fn hessian_from_values<G: Fn(&Theta) -> f64>(func: &G, theta: &Theta) -> OptResult<Hessian> {
    let n = theta.len();
    let steps = theta.mapv(|x| f64::EPSILON.powf(0.25) * x.abs().max(1.0));
    let mut probe = theta.clone();
    let mut at = |i: usize, di: f64, j: usize, dj: f64| {
        probe.assign(theta);
        probe[i] += di;
        probe[j] += dj;
        func(&probe)
    };
    let mut hess = Hessian::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let (hi, hj) = (steps[i], steps[j]);
            let v = (at(i, hi, j, hj) - at(i, hi, j, -hj) - at(i, -hi, j, hj) + at(i, -hi, j, -hj))
                / (4.0 * hi * hj);
            hess[[i, j]] = v;
            hess[[j, i]] = v;
        }
    }
    validate_hessian(&hess, n)?;
    Ok(hess)
}

fn symmetrize(hess: Hessian) -> Hessian {
    (&hess + &hess.t()) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::errors::OptError;
    use argmin::core::ArgminError;
    use ndarray::{Array1, array};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - The out-of-band error channel and validation of forward differences.
    // - Central gradients and value-only Hessians against closed forms.
    // - The symmetrized Jacobian of a gradient and its failure path.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Forward differences of a χ²-like quadratic approximate its gradient.
    //
    // Given
    // -----
    // - c(θ) = ½ Σ (θᵢ − μᵢ)² at θ = (1.5, −3), μ = (1.6, −2.9).
    //
    // Expect
    // ------
    // - ∇c ≈ θ − μ to 1e-6.
    fn forward_gradient_of_quadratic_cost() {
        // Arrange
        let theta: Theta = array![1.5, -3.0];
        let mu = array![1.6, -2.9];
        let no_err: RefCell<Option<Error>> = RefCell::new(None);
        let cost = |t: &Theta| 0.5 * (t - &mu).mapv(|v| v * v).sum();

        // Act
        let grad = run_fd_diff(&theta, &cost, &no_err).unwrap();

        // Assert
        assert!((grad[0] + 0.1).abs() < 1e-6);
        assert!((grad[1] + 0.1).abs() < 1e-6);
    }

    #[test]
    // Purpose
    // -------
    // A failure stored by the cost takes precedence over the NaN gradient,
    // and NaN without a stored failure is a validation error.
    //
    // Given
    // -----
    // - A cost that stores an argmin "not implemented" error; a cost that
    //   only returns NaN.
    //
    // Expect
    // ------
    // - `Backend { kind: "not implemented" }`, then `InvalidGradient`.
    fn stored_errors_and_nan_gradients_are_reported() {
        // Arrange
        let theta: Theta = array![1.0];
        let cell: RefCell<Option<Error>> = RefCell::new(None);
        let failing = |_: &Theta| {
            cell.replace(Some(ArgminError::NotImplemented { text: "fd".to_string() }.into()));
            f64::NAN
        };
        let nan = |_: &Theta| f64::NAN;

        // Act
        let stored = run_fd_diff(&theta, &failing, &cell);
        let invalid = run_fd_diff(&theta, &nan, &cell);

        // Assert
        assert_eq!(stored, Err(OptError::Backend { kind: "not implemented", text: "fd".to_string() }));
        assert!(matches!(invalid, Err(OptError::InvalidGradient { index: 0, .. })));
    }

    #[test]
    // Purpose
    // -------
    // `central_gradient` differentiates a power law in its exponent.
    //
    // Given
    // -----
    // - f(β) = (ν/ν₀)^β with ν/ν₀ = 2.5 at β = 1.5.
    //
    // Expect
    // ------
    // - f'(β) = (ν/ν₀)^β ln(ν/ν₀) to 1e-8 relative.
    fn central_gradient_of_power_law_exponent() {
        // Arrange
        let theta: Theta = array![1.5];
        let f = |b: &Theta| 2.5_f64.powf(b[0]);

        // Act
        let g = central_gradient(&f, &theta).unwrap();

        // Assert
        let expected = 2.5_f64.powf(1.5) * 2.5_f64.ln();
        assert!(((g[0] - expected) / expected).abs() < 1e-8);
    }

    #[test]
    // Purpose
    // -------
    // The Jacobian of an asymmetric gradient map comes back symmetrized;
    // a NaN gradient fails validation on both attempts.
    //
    // Given
    // -----
    // - g(θ) = (2θ₀ + θ₁, 3θ₀ + 4θ₁), whose Jacobian is [[2, 1], [3, 4]].
    // - g(θ) = NaN.
    //
    // Expect
    // ------
    // - [[2, 2], [2, 4]] to 1e-6; `InvalidHessian` for the NaN map.
    fn jacobian_is_symmetrized_and_validated() {
        // Arrange
        let theta: Theta = array![0.3, -1.2];
        let g = |t: &Theta| array![2.0 * t[0] + t[1], 3.0 * t[0] + 4.0 * t[1]];
        let bad = |_: &Theta| Array1::from(vec![f64::NAN, f64::NAN]);

        // Act
        let h = compute_hessian(&g, &theta).unwrap();
        let err = compute_hessian(&bad, &theta);

        // Assert
        let expected = [[2.0, 2.0], [2.0, 4.0]];
        for i in 0..2 {
            for j in 0..2 {
                assert!((h[[i, j]] - expected[i][j]).abs() < 1e-6);
            }
        }
        assert!(matches!(err, Err(OptError::InvalidHessian { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Second differences from values recover a mixed polynomial Hessian.
    //
    // Given
    // -----
    // - f(x, y) = x²y + 3y² at (1, 2).
    //
    // Expect
    // ------
    // - H = [[2y, 2x], [2x, 6]] = [[4, 2], [2, 6]] to 1e-6.
    fn hessian_from_values_recovers_polynomial_hessian() {
        // Arrange
        let theta: Theta = array![1.0, 2.0];
        let f = |t: &Theta| t[0] * t[0] * t[1] + 3.0 * t[1] * t[1];

        // Act
        let h = hessian_from_values(&f, &theta).unwrap();

        // Assert
        let expected = [[4.0, 2.0], [2.0, 6.0]];
        for i in 0..2 {
            for j in 0..2 {
                assert!((h[[i, j]] - expected[i][j]).abs() < 1e-6);
            }
        }
    }
}
