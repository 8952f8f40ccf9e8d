//! optimization — MLE stack, parameter bounds, and the optimizer error surface.
//!
//! Purpose
//! -------
//! Provide the fitting layer used by component separation: an
//! Argmin-backed log-likelihood maximizer, box constraints expressed as
//! smooth reparameterizations, and a single error/result surface that also
//! carries failures from the mixing-matrix model and the linear algebra.
//!
//! Key behaviors
//! -------------
//! - [`loglik_optimizer`]: `maximize` / `maximize_bounded` over any
//!   [`LogLikelihood`](loglik_optimizer::LogLikelihood).
//! - [`numerical_stability`]: guarded scalar transforms, shared tolerances,
//!   and [`Bound`](numerical_stability::Bound) /
//!   [`BoundTransform`](numerical_stability::BoundTransform).
//! - [`errors`]: [`OptError`](errors::OptError), convertible from argmin,
//!   [`LinalgError`](crate::algebra::LinalgError) and
//!   [`ModelError`](crate::components::ModelError).
//!
//! Conventions
//! -----------
//! - All solvers maximize `ℓ(θ)` by minimizing `c(θ) = -ℓ(θ)`.
//! - This module never logs; progress output is opt-in through the
//!   `obs_slog` feature.

pub mod errors;
pub mod loglik_optimizer;
pub mod numerical_stability;
