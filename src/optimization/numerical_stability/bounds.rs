//! numerical_stability::bounds — box constraints via smooth reparameterization.
//!
//! Purpose
//! -------
//! Let the unconstrained L-BFGS solver respect per-parameter bounds. Each
//! bounded parameter `β` is written as a smooth bijection of an
//! unconstrained coordinate `θ`; the optimizer only ever sees `θ`.
//!
//! Key behaviors
//! -------------
//! - Two-sided bounds: `β = lo + (hi − lo) · σ(θ)`, with `σ` the logistic.
//! - Lower bound only: `β = lo + softplus(θ)`.
//! - Upper bound only: `β = hi − softplus(θ)`.
//! - Unbounded: `β = θ`.
//! - [`BoundTransform::chain_grad`] maps `∇_β ℓ` to `∇_θ ℓ` through the
//!   diagonal Jacobian `dβ/dθ`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every finite `θ` maps strictly inside (or, after rounding, onto) the
//!   bounds, so iterates can never leave the feasible box.
//! - Starting values must lie inside the closed box; values on an edge are
//!   pulled inside by [`LOGIT_EPS`] / [`GENERAL_TOL`] before inversion.
//!
//! Conventions
//! -----------
//! - `Bound::new(None, None)` is [`Bound::Free`]; infinite limits are
//!   treated as absent.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::types::{Grad, Theta},
    numerical_stability::transformations::{
        GENERAL_TOL, safe_logistic, safe_logit, safe_softplus, safe_softplus_inv,
    },
};

/// Box constraint on a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Bound {
    #[default]
    Free,
    Lower(f64),
    Upper(f64),
    Interval { lower: f64, upper: f64 },
}

impl Bound {
    /// Build a bound from optional limits; infinite limits count as absent.
    ///
    /// # Errors
    /// [`OptError::InvalidBound`] for NaN limits or `lower >= upper`.
    pub fn new(lower: Option<f64>, upper: Option<f64>) -> OptResult<Self> {
        let clean = |x: Option<f64>| x.filter(|v| !v.is_infinite());
        match (clean(lower), clean(upper)) {
            (Some(lo), _) | (_, Some(lo)) if lo.is_nan() => Err(OptError::InvalidBound {
                index: 0,
                lower: lower.unwrap_or(f64::NEG_INFINITY),
                upper: upper.unwrap_or(f64::INFINITY),
                reason: "Bounds must not be NaN.",
            }),
            (None, None) => Ok(Bound::Free),
            (Some(lo), None) => Ok(Bound::Lower(lo)),
            (None, Some(hi)) => Ok(Bound::Upper(hi)),
            (Some(lo), Some(hi)) if lo < hi => Ok(Bound::Interval { lower: lo, upper: hi }),
            (Some(lo), Some(hi)) => Err(OptError::InvalidBound {
                index: 0,
                lower: lo,
                upper: hi,
                reason: "Lower bound must be strictly below the upper bound.",
            }),
        }
    }

    pub fn lower(&self) -> f64 {
        match *self {
            Bound::Lower(lo) | Bound::Interval { lower: lo, .. } => lo,
            _ => f64::NEG_INFINITY,
        }
    }

    pub fn upper(&self) -> f64 {
        match *self {
            Bound::Upper(hi) | Bound::Interval { upper: hi, .. } => hi,
            _ => f64::INFINITY,
        }
    }

    /// Closed-box membership.
    pub fn contains(&self, beta: f64) -> bool {
        beta >= self.lower() && beta <= self.upper()
    }

    /// `β(θ)`.
    pub fn to_model(&self, theta: f64) -> f64 {
        match *self {
            Bound::Free => theta,
            Bound::Lower(lo) => lo + safe_softplus(theta),
            Bound::Upper(hi) => hi - safe_softplus(theta),
            Bound::Interval { lower, upper } => lower + (upper - lower) * safe_logistic(theta),
        }
    }

    /// `dβ/dθ`.
    pub fn jacobian(&self, theta: f64) -> f64 {
        match *self {
            Bound::Free => 1.0,
            Bound::Lower(_) => safe_logistic(theta),
            Bound::Upper(_) => -safe_logistic(theta),
            Bound::Interval { lower, upper } => {
                let s = safe_logistic(theta);
                (upper - lower) * s * (1.0 - s)
            }
        }
    }

    /// `θ(β)` for a value inside the closed box.
    ///
    /// Assumes `self.contains(beta)`; the caller validates.
    pub fn to_unconstrained(&self, beta: f64) -> f64 {
        match *self {
            Bound::Free => beta,
            Bound::Lower(lo) => safe_softplus_inv((beta - lo).max(GENERAL_TOL)),
            Bound::Upper(hi) => safe_softplus_inv((hi - beta).max(GENERAL_TOL)),
            Bound::Interval { lower, upper } => safe_logit((beta - lower) / (upper - lower)),
        }
    }
}

/// Per-parameter bounds for a whole parameter vector.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoundTransform {
    bounds: Vec<Bound>,
}

impl BoundTransform {
    pub fn new(bounds: Vec<Bound>) -> Self {
        Self { bounds }
    }

    /// All parameters unbounded.
    pub fn free(n: usize) -> Self {
        Self { bounds: vec![Bound::Free; n] }
    }

    pub fn bounds(&self) -> &[Bound] {
        &self.bounds
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// `β(θ)` componentwise.
    pub fn to_model(&self, theta: &Theta) -> Theta {
        Theta::from_iter(self.bounds.iter().zip(theta.iter()).map(|(b, &t)| b.to_model(t)))
    }

    /// `θ(β)` componentwise, after checking length and membership.
    ///
    /// # Errors
    /// - [`OptError::ParamLengthMismatch`] if `beta` has the wrong length.
    /// - [`OptError::StartOutsideBounds`] for a value outside its box or a
    ///   non-finite value.
    pub fn to_unconstrained(&self, beta: &Theta) -> OptResult<Theta> {
        if beta.len() != self.bounds.len() {
            return Err(OptError::ParamLengthMismatch {
                what: "starting point",
                expected: self.bounds.len(),
                found: beta.len(),
            });
        }
        for (index, (b, &value)) in self.bounds.iter().zip(beta.iter()).enumerate() {
            if !value.is_finite() || !b.contains(value) {
                return Err(OptError::StartOutsideBounds {
                    index,
                    value,
                    lower: b.lower(),
                    upper: b.upper(),
                });
            }
        }
        Ok(Theta::from_iter(self.bounds.iter().zip(beta.iter()).map(|(b, &v)| b.to_unconstrained(v))))
    }

    /// `∇_θ ℓ = ∇_β ℓ ⊙ dβ/dθ`.
    pub fn chain_grad(&self, theta: &Theta, grad_beta: &Grad) -> Grad {
        Grad::from_iter(
            self.bounds
                .iter()
                .zip(theta.iter().zip(grad_beta.iter()))
                .map(|(b, (&t, &g))| g * b.jacobian(t)),
        )
    }
}
