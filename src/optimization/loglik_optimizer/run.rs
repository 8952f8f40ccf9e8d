//! loglik_optimizer::run — drive an argmin executor to an [`OptimOutcome`].
use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{Grad, LogLikelihood, MLEOptions, OptimOutcome, Theta, adapter::ArgMinAdapter},
};
#[cfg(feature = "obs_slog")]
use argmin::core::{CostFunction, Gradient};
use argmin::core::{Executor, IterState, Solver, State};
#[cfg(feature = "obs_slog")]
use argmin_math::ArgminL2Norm;

type LbfgsState = IterState<Theta, Grad, (), (), (), f64>;

/// Run `solver` on `problem` from `theta0`.
///
/// `opts.tols.max_iter` caps the iteration count; the gradient and cost
/// tolerances are already baked into `solver` by the builders. With the
/// `obs_slog` feature and `opts.verbose`, the starting `−½χ²` is printed
/// and an argmin slog observer reports every iteration.
///
/// The outcome reports the log-likelihood (the negated best cost), not the
/// cost.
///
/// # Errors
/// Solver and line-search failures, crate errors raised by the objective
/// (recovered through `From<argmin::core::Error>`), and validation of the
/// final estimate.
pub fn run_lbfgs<'a, F, S>(
    theta0: Theta, opts: &MLEOptions, problem: ArgMinAdapter<'a, F>, solver: S,
) -> OptResult<OptimOutcome>
where
    F: LogLikelihood,
    S: Solver<ArgMinAdapter<'a, F>, LbfgsState> + Send + 'static,
{
    #[cfg(feature = "obs_slog")]
    if opts.verbose {
        report_start(&theta0, &problem)?;
    }
    let mut executor = Executor::new(problem, solver).configure(|state| state.param(theta0));
    if let Some(max_iter) = opts.tols.max_iter {
        executor = executor.configure(|state| state.max_iters(max_iter as u64));
    }
    #[cfg(feature = "obs_slog")]
    if opts.verbose {
        executor = executor.add_observer(
            argmin_observer_slog::SlogLogger::term_noblock(),
            argmin::core::observers::ObserverMode::Always,
        );
    }

    let mut state = executor.run()?.state().clone();
    let iterations = state.get_iter();
    let counts = state.get_func_counts().clone();
    let status = state.get_termination_status().clone();
    let last_grad = state.take_gradient();
    let log_l = -state.get_best_cost();
    OptimOutcome::new(state.take_best_param(), log_l, status, iterations, counts, last_grad)
}

#[cfg(feature = "obs_slog")]
fn report_start<F: LogLikelihood>(theta0: &Theta, problem: &ArgMinAdapter<'_, F>) -> OptResult<()> {
    let log_l = -problem.cost(theta0)?;
    let grad_norm = problem.gradient(theta0).ok().map(|g| g.l2_norm());
    match grad_norm {
        Some(n) => eprintln!("start: -chi2/2 = {log_l:.6}, |grad| = {n:.6}"),
        None => eprintln!("start: -chi2/2 = {log_l:.6}"),
    }
    Ok(())
}
