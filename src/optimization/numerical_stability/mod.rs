//! numerical_stability — guarded scalar transforms and parameter bounds.
//!
//! Purpose
//! -------
//! Collect the numerically stable scalar maps and shared tolerances used
//! when spectral parameters are optimized on an unconstrained scale and
//! mapped back into their physical bounds.
//!
//! Key behaviors
//! -------------
//! - Stable scalar transforms (`safe_softplus`, its inverse,
//!   `safe_logistic`, `safe_logit`) that never overflow in the tails.
//! - [`Bound`] / [`BoundTransform`]: per-parameter box constraints expressed
//!   as smooth bijections, with the gradient chain rule.
//! - Shared tolerances (`LOGIT_EPS`, `EIGEN_EPS`, `GENERAL_TOL`) so the
//!   optimizer and inference layers agree on their guards. The
//!   pseudo-inverse cutoff lives with the algebra
//!   ([`PINV_RCOND`](crate::algebra::batched::PINV_RCOND)).
//!
//! Invariants & assumptions
//! ------------------------
//! - Scalar transforms assume finite inputs; validation of starting points
//!   happens in [`BoundTransform::to_unconstrained`].
//! - This module never logs or touches global state.
//!
//! Testing notes
//! -------------
//! - [`transformations`] checks the guarded maps against naïve formulas and
//!   in the tails.
//! - [`bounds`] checks round trips, Jacobians against finite differences,
//!   and rejection of infeasible starts.

pub mod bounds;
pub mod transformations;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::bounds::{Bound, BoundTransform};
pub use self::transformations::{
    EIGEN_EPS, GENERAL_TOL, LOGIT_EPS, safe_logistic, safe_logit, safe_softplus, safe_softplus_inv,
};
