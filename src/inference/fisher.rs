//! inference::fisher — parameter covariance from Fisher information.
//!
//! Purpose
//! -------
//! Turn a Fisher (or observed-information) matrix on the spectral
//! parameters into the covariance `Σ = F⁻¹` and per-parameter standard
//! errors, refusing directions the data do not constrain.
//!
//! Key behaviors
//! -------------
//! - [`invert_fisher`] symmetrizes, copies into a `nalgebra::DMatrix`, and
//!   inverts through `symmetric_eigen`. Any eigenvalue
//!   `λ ≤ EIGEN_EPS · λ_max` (or a non-positive `λ_max`) is reported as
//!   [`LinalgError::Singular`] with the eigenvalues as the diagonal.
//! - [`standard_errors`] reads `√Σ_ii`.
//! - [`numerical_information`] builds `−∂²ℓ/∂β²` from a gradient callback
//!   by finite differences, for cross-checking analytic information
//!   matrices.
//!
//! Invariants & assumptions
//! ------------------------
//! - Inputs are square; a `0 × 0` Fisher matrix inverts to `0 × 0`.
//! - The returned `Σ` is exactly symmetric.
//!
//! Conventions
//! -----------
//! - Matrices are on the total (not average) log-likelihood scale,
//!   `ℓ = −χ²/2`.
use crate::{
    algebra::{
        batched::{from_dmatrix, to_dmatrix},
        errors::{LinalgError, LinalgResult},
    },
    optimization::{
        errors::OptResult,
        loglik_optimizer::{Grad, Theta, finite_diff::compute_hessian},
        numerical_stability::transformations::EIGEN_EPS,
    },
};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

/// invert_fisher — `Σ = F⁻¹` via symmetric eigendecomposition.
///
/// Parameters
/// ----------
/// - `fisher`: square information matrix; only its symmetric part is used.
///
/// Returns
/// -------
/// The symmetric covariance `Q Λ⁻¹ Qᵗ`.
///
/// Errors
/// ------
/// - `LinalgError::CoreShape` for a non-square input.
/// - `LinalgError::Singular` when the matrix is not positive definite to
///   within `EIGEN_EPS · λ_max`.
pub fn invert_fisher(fisher: &Array2<f64>) -> LinalgResult<Array2<f64>> {
    let (r, c) = fisher.dim();
    if r != c {
        return Err(LinalgError::CoreShape {
            op: "invert_fisher",
            left: vec![r, c],
            right: vec![r, c],
            reason: "Fisher matrix must be square",
        });
    }
    if r == 0 {
        return Ok(Array2::zeros((0, 0)));
    }
    if fisher.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFinite { op: "invert_fisher", batch_index: Vec::new() });
    }

    let sym = symmetrized(fisher);
    let eig = to_dmatrix(&sym.view()).symmetric_eigen();
    let lambda_max = eig.eigenvalues.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let cutoff = EIGEN_EPS * lambda_max;
    if lambda_max <= 0.0 || eig.eigenvalues.iter().any(|&l| l <= cutoff) {
        return Err(LinalgError::Singular {
            op: "invert_fisher",
            batch_index: Vec::new(),
            diagonal: eig.eigenvalues.iter().copied().collect(),
        });
    }

    let q = &eig.eigenvectors;
    let mut sigma = DMatrix::<f64>::zeros(r, r);
    for (k, &lambda) in eig.eigenvalues.iter().enumerate() {
        for j in 0..r {
            for i in 0..r {
                sigma[(i, j)] += q[(i, k)] * q[(j, k)] / lambda;
            }
        }
    }
    Ok(symmetrized(&from_dmatrix(&sigma)))
}

/// `√Σ_ii` for each parameter.
pub fn standard_errors(sigma: &Array2<f64>) -> Array1<f64> {
    sigma.diag().mapv(f64::sqrt)
}

/// Observed information `−∂²ℓ/∂β²` from the gradient of `ℓ`, by central
/// (then forward) finite differences.
pub fn numerical_information<F: Fn(&Theta) -> Grad>(grad: &F, beta: &Theta) -> OptResult<Array2<f64>> {
    Ok(-compute_hessian(grad, beta)?)
}

/// `(M + Mᵗ) / 2`.
pub fn symmetrized(m: &Array2<f64>) -> Array2<f64> {
    (m + &m.t()) * 0.5
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Inversion of a well-conditioned SPD Fisher matrix.
    // - Rejection of singular, indefinite and non-square inputs.
    // - Finite-difference information for a quadratic log-likelihood.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // An SPD matrix inverts exactly and the result is symmetric.
    //
    // Given
    // -----
    // - F = [[4, 1], [1, 3]].
    //
    // Expect
    // ------
    // - F Σ = I to 1e-12; Σ symmetric; standard errors √Σ_ii.
    fn spd_fisher_inverts_to_symmetric_covariance() {
        // Arrange
        let f = array![[4.0, 1.0], [1.0, 3.0]];

        // Act
        let sigma = invert_fisher(&f).unwrap();

        // Assert
        let prod = f.dot(&sigma);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(prod[[i, j]], expected, epsilon = 1e-12);
            }
        }
        assert_eq!(sigma[[0, 1]], sigma[[1, 0]]);
        let se = standard_errors(&sigma);
        assert_relative_eq!(se[0], (3.0f64 / 11.0).sqrt(), max_relative = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Unconstrained directions are refused rather than pseudo-inverted.
    //
    // Given
    // -----
    // - A rank-one matrix, an indefinite matrix and a 2×3 matrix.
    //
    // Expect
    // ------
    // - Singular, Singular, CoreShape; an empty matrix inverts to empty.
    fn degenerate_fisher_is_rejected() {
        assert!(matches!(
            invert_fisher(&array![[1.0, 1.0], [1.0, 1.0]]),
            Err(LinalgError::Singular { .. })
        ));
        assert!(matches!(
            invert_fisher(&array![[1.0, 0.0], [0.0, -2.0]]),
            Err(LinalgError::Singular { .. })
        ));
        assert!(matches!(
            invert_fisher(&Array2::zeros((2, 3))),
            Err(LinalgError::CoreShape { .. })
        ));
        assert_eq!(invert_fisher(&Array2::zeros((0, 0))).unwrap().dim(), (0, 0));
    }

    #[test]
    // Purpose
    // -------
    // Finite-difference information recovers the curvature of a quadratic.
    //
    // Given
    // -----
    // - ℓ(β) = −½ βᵗ F β with F = [[2, 0.5], [0.5, 1]], so ∇ℓ = −F β.
    //
    // Expect
    // ------
    // - numerical_information ≈ F.
    fn numerical_information_matches_quadratic_curvature() {
        let f = array![[2.0, 0.5], [0.5, 1.0]];
        let grad = |b: &Theta| -f.dot(b);

        let info = numerical_information(&grad, &array![0.3, -0.2]).unwrap();

        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(info[[i, j]], f[[i, j]], epsilon = 1e-6);
            }
        }
    }
}
