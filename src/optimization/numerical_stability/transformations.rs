//! Numerical stability utilities.
//!
//! Provides safe implementations of the scalar maps used to keep spectral
//! parameters inside their bounds while the optimizer works on an
//! unconstrained vector. The functions follow guarded strategies with
//! explicit cutoffs (`x > 20.0`) to keep `f64` arithmetic in a
//! well-conditioned regime.
//!
//! # Provided items
//! - [`safe_softplus(x)`]: stable `ln(1 + exp(x))`, mapping ℝ → (0, ∞).
//! - [`safe_softplus_inv(x)`]: its inverse on (0, ∞).
//! - [`safe_logistic(x)`]: stable `1 / (1 + exp(-x))`, mapping ℝ → (0, 1).
//! - [`safe_logit(p)`]: inverse of the logistic with `p` clamped away from
//!   0 and 1 by [`LOGIT_EPS`].
//! - Shared tolerances: [`LOGIT_EPS`], [`EIGEN_EPS`], [`GENERAL_TOL`].

/// Clamp applied to probabilities before taking a logit.
///
/// Starting values that sit exactly on an interval bound are pulled inside
/// by this relative margin so the unconstrained image stays finite.
pub const LOGIT_EPS: f64 = 1e-10;

/// Relative eigenvalue floor for Fisher-matrix inversion.
///
/// Eigenvalues `λ ≤ EIGEN_EPS · λ_max` mark a direction the data do not
/// constrain; inverting through them is refused.
pub const EIGEN_EPS: f64 = 1e-12;

/// Generic small positive tolerance (distances to one-sided bounds,
/// denominators).
pub const GENERAL_TOL: f64 = 1e-12;

/// Numerically stable softplus: `softplus(x) = ln(1 + exp(x))`.
///
/// - For sufficiently large `x`, `softplus(x) ≈ x`.
/// - Otherwise, it falls back to `ln1p(exp(x))`.
///
/// # Parameters
/// - `x`: real input
///
/// # Returns
/// - `softplus(x)` as `f64`.
pub fn safe_softplus(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp().ln_1p() }
}

/// Stable inverse of softplus on `(0, ∞)`: `t = ln(exp(x) - 1)`.
///
/// - For sufficiently large `x`, `ln(exp(x) - 1) ≈ x`.
/// - Otherwise, it uses `ln(expm1(x))`.
///
/// # Parameters
/// - `x`: a positive real (the softplus output), must be finite and `> 0`.
///
/// # Returns
/// - `t` such that `softplus(t) = x`.
pub fn safe_softplus_inv(x: f64) -> f64 {
    if x > 20.0 { x } else { x.exp_m1().ln() }
}

/// Numerically stable logistic `σ(x) = 1 / (1 + exp(-x))`.
///
/// Evaluates `exp` only on non-positive arguments, so neither tail
/// overflows. `σ` is also the derivative of [`safe_softplus`].
pub fn safe_logistic(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// Logit `ln(p / (1 - p))` with `p` clamped to `[LOGIT_EPS, 1 - LOGIT_EPS]`.
pub fn safe_logit(p: f64) -> f64 {
    let p = p.clamp(LOGIT_EPS, 1.0 - LOGIT_EPS);
    (p / (1.0 - p)).ln()
}
