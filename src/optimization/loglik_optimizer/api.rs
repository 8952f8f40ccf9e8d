//! High-level entry points for maximizing a user-provided `LogLikelihood`.
//!
//! [`maximize`] selects an L-BFGS solver with a Hager–Zhang, More–Thuente
//! or backtracking line search, wraps the model in an `ArgMinAdapter`
//! (which *minimizes* `-ℓ(θ)`), and delegates the run to `run_lbfgs`. When
//! the model reports its curvature the run happens in rescaled coordinates
//! ([`Preconditioned`]).
//! [`maximize_bounded`] does the same for a box-constrained model by
//! optimizing in unconstrained coordinates and mapping the result back.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{
        OptimOutcome, Theta,
        adapter::{ArgMinAdapter, Preconditioned, Reparameterized},
        builders::{build_optimizer_backtracking, build_optimizer_hager_zhang, build_optimizer_more_thuente},
        run::run_lbfgs,
        traits::{LineSearcher, LogLikelihood, MLEOptions},
    },
    numerical_stability::bounds::BoundTransform,
};

/// Maximize a log-likelihood `ℓ(θ)` using L-BFGS with the chosen line search.
///
/// # Behavior
/// - Validates the initial guess via `f.check(theta0, data)` and requires a
///   finite `ℓ(theta0)`.
/// - With `opts.precondition` and a curvature from `f.curvature`, optimizes
///   `u` in `θ = θ₀ + D u`, `D_i = 1/√c_i` (see [`Preconditioned`]). The
///   first L-BFGS step is then a diagonal Newton step, so a likelihood
///   scaled by `10¹⁴` takes the same path as the unscaled one.
/// - Wraps the objective in an `ArgMinAdapter` that exposes a
///   *minimization* problem `c(θ) = -ℓ(θ)` to `argmin`.
/// - Builds an L-BFGS solver with the line search named by
///   `opts.line_searcher` and calls `run_lbfgs`.
///
/// `theta_hat` is always reported in the caller's coordinates.
///
/// # Errors
/// - Propagates any error from `f.check` or from evaluating `ℓ(theta0)`;
///   [`OptError::NonFiniteCost`] for a non-finite `ℓ(theta0)`.
/// - Propagates builder errors from `build_optimizer_*`.
/// - Propagates runtime errors from `run_lbfgs`.
///
/// # Example
/// ```no_run
/// use ndarray::array;
/// use rust_compsep::optimization::{
///     errors::OptResult,
///     loglik_optimizer::{LogLikelihood, MLEOptions, Theta, maximize},
/// };
///
/// struct Paraboloid;
/// impl LogLikelihood for Paraboloid {
///     type Data = ();
///     fn value(&self, theta: &Theta, _: &()) -> OptResult<f64> {
///         Ok(-theta.dot(theta))
///     }
///     fn check(&self, _: &Theta, _: &()) -> OptResult<()> {
///         Ok(())
///     }
/// }
///
/// let out = maximize(&Paraboloid, array![0.1, -0.2, 0.3], &(), &MLEOptions::default())?;
/// assert!(out.converged);
/// # Ok::<(), rust_compsep::optimization::errors::OptError>(())
/// ```
pub fn maximize<F: LogLikelihood>(
    f: &F, theta0: Theta, data: &F::Data, opts: &MLEOptions,
) -> OptResult<OptimOutcome> {
    f.check(&theta0, data)?;
    let start = f.value(&theta0, data)?;
    if !start.is_finite() {
        return Err(OptError::NonFiniteCost { value: start });
    }
    if opts.precondition {
        if let Some(curvature) = f.curvature(&theta0, data)? {
            let n = theta0.len();
            let scaled = Preconditioned::from_curvature(f, theta0, &curvature)?;
            let mut outcome = run_with_line_search(&scaled, Theta::zeros(n), data, opts)?;
            outcome.theta_hat = scaled.to_inner(&outcome.theta_hat);
            return Ok(outcome);
        }
    }
    run_with_line_search(f, theta0, data, opts)
}

fn run_with_line_search<F: LogLikelihood>(
    f: &F, theta0: Theta, data: &F::Data, opts: &MLEOptions,
) -> OptResult<OptimOutcome> {
    let problem = ArgMinAdapter::new(f, data);
    match opts.line_searcher {
        LineSearcher::MoreThuente => {
            let solver = build_optimizer_more_thuente(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
        LineSearcher::HagerZhang => {
            let solver = build_optimizer_hager_zhang(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
        LineSearcher::Backtracking => {
            let solver = build_optimizer_backtracking(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
    }
}

/// Maximize `ℓ(β)` subject to per-parameter bounds.
///
/// The start `beta0` is mapped to unconstrained coordinates, [`maximize`]
/// runs on the [`Reparameterized`] model, and `theta_hat` in the returned
/// outcome is mapped back to `β`. `grad_norm` stays the norm of the
/// gradient the stopping rule saw (unconstrained, and rescaled when
/// preconditioning applies).
///
/// # Errors
/// - `StartOutsideBounds` / `ParamLengthMismatch` for an infeasible start.
/// - Everything [`maximize`] can return.
pub fn maximize_bounded<F: LogLikelihood>(
    f: &F, beta0: &Theta, bounds: &BoundTransform, data: &F::Data, opts: &MLEOptions,
) -> OptResult<OptimOutcome> {
    let theta0 = bounds.to_unconstrained(beta0)?;
    let wrapped = Reparameterized::new(f, bounds);
    let mut outcome = maximize(&wrapped, theta0, data, opts)?;
    outcome.theta_hat = bounds.to_model(&outcome.theta_hat);
    Ok(outcome)
}
