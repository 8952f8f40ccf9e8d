//! loglik_optimizer — argmin-powered log-likelihood maximization.
//!
//! Purpose
//! -------
//! Provide the optimizer behind every spectral-parameter fit. Callers
//! implement a single trait, [`LogLikelihood`], and invoke [`maximize`] or
//! [`maximize_bounded`] to run L-BFGS with a configurable line search,
//! tolerances, and finite-difference fallbacks.
//!
//! Key behaviors
//! -------------
//! - Convert user-supplied log-likelihoods `ℓ(θ)` into Argmin-compatible
//!   cost functions `c(θ) = -ℓ(θ)` via [`adapter::ArgMinAdapter`].
//! - Enforce box constraints by optimizing the [`adapter::Reparameterized`]
//!   model in unconstrained coordinates ([`maximize_bounded`]).
//! - Rescale coordinates by the curvature an objective reports
//!   ([`adapter::Preconditioned`]) so step sizes and the gradient
//!   tolerance do not depend on the amplitude of the data.
//! - Report trial points where the objective cannot be evaluated as an
//!   infinite cost; the backtracking line search steps back from them.
//! - Select an L-BFGS solver via [`builders`] based on
//!   [`traits::LineSearcher`], execute it via [`run::run_lbfgs`], and
//!   normalize results into an [`OptimOutcome`].
//! - Provide finite-difference helpers in [`finite_diff`] for gradients and
//!   Hessians when analytic derivatives are missing.
//!
//! Invariants & assumptions
//! ------------------------
//! - The optimizer **always maximizes** `ℓ(θ)` by minimizing `c(θ) = -ℓ(θ)`;
//!   user code implements `ℓ` and `∇ℓ`, never the cost.
//! - [`LogLikelihood::value`] and [`LogLikelihood::grad`] report invalid
//!   inputs and numerical failures as [`OptError`] values, not panics.
//! - [`OptimOutcome::converged`] is true only for `SolverConverged` or
//!   `TargetCostReached`; callers decide what to do with anything else.
//!
//! Conventions
//! -----------
//! - Parameters are [`Theta`] (`Array1<f64>`); cost is always `-ℓ`
//!   internally while all user-facing values are in `ℓ`.
//! - Errors bubble up as [`OptResult<T>`] / [`OptError`].
//!
//! Testing notes
//! -------------
//! - Unit tests cover sign conventions, failed evaluations, the bounded
//!   chain rule and the rescaling ([`adapter`]), solver wiring
//!   ([`builders`]), finite differences ([`finite_diff`]), configuration and
//!   outcome rules ([`traits`]) and toy maximizations, including badly
//!   scaled and partly unevaluable ones ([`api`]).
//! - The separation layer exercises the whole stack on spectral fits.
//!
//! [`OptError`]: crate::optimization::errors::OptError
//! [`OptResult<T>`]: crate::optimization::errors::OptResult

pub mod adapter;
pub mod api;
pub mod builders;
pub mod finite_diff;
pub mod run;
pub mod traits;
pub mod types;
pub mod validation;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::api::{maximize, maximize_bounded};
pub use self::traits::{LineSearcher, LogLikelihood, MLEOptions, OptimOutcome, Tolerances};
pub use self::types::{Cost, DEFAULT_LBFGS_MEM, FnEvalMap, Grad, Hessian, Theta};
