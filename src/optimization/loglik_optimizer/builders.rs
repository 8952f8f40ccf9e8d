//! loglik_optimizer::builders — L-BFGS solvers configured from [`MLEOptions`].
//!
//! Builders set the history length and the gradient/cost tolerances. The
//! starting point and the iteration cap are applied by
//! [`run_lbfgs`](super::run::run_lbfgs).
use argmin::solver::{
    linesearch::{BacktrackingLineSearch, condition::ArmijoCondition},
    quasinewton::LBFGS,
};

use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        traits::MLEOptions,
        types::{
            Cost, DEFAULT_LBFGS_MEM, Grad, HagerZhangLS, LbfgsBacktracking, LbfgsHagerZhang, LbfgsMoreThuente,
            MoreThuenteLS, Theta,
        },
    },
};

/// L-BFGS with a Hager–Zhang line search.
///
/// # Errors
/// A tolerance argmin rejects.
pub fn build_optimizer_hager_zhang(opts: &MLEOptions) -> OptResult<LbfgsHagerZhang> {
    configure_lbfgs(LBFGS::new(HagerZhangLS::new(), history(opts)), opts)
}

/// L-BFGS with a More–Thuente line search.
///
/// # Errors
/// A tolerance argmin rejects.
pub fn build_optimizer_more_thuente(opts: &MLEOptions) -> OptResult<LbfgsMoreThuente> {
    configure_lbfgs(LBFGS::new(MoreThuenteLS::new(), history(opts)), opts)
}

/// Sufficient-decrease constant of the Armijo condition.
const ARMIJO_C: f64 = 1e-4;

/// Step contraction per rejected backtracking trial.
const BACKTRACK_RHO: f64 = 0.5;

/// L-BFGS with an Armijo backtracking line search.
///
/// Trial points are judged on the cost alone, so a trial whose cost is
/// `+∞` (a failed evaluation) is rejected and the step is halved.
///
/// # Errors
/// A tolerance or line-search constant argmin rejects.
pub fn build_optimizer_backtracking(opts: &MLEOptions) -> OptResult<LbfgsBacktracking> {
    let linesearch = BacktrackingLineSearch::new(ArmijoCondition::new(ARMIJO_C)?).rho(BACKTRACK_RHO)?;
    configure_lbfgs(LBFGS::new(linesearch, history(opts)), opts)
}

/// Apply `tol_grad` and `tol_cost` to a solver with any line search; unset
/// tolerances keep argmin's defaults.
pub fn configure_lbfgs<L>(
    mut solver: LBFGS<L, Theta, Grad, Cost>, opts: &MLEOptions,
) -> OptResult<LBFGS<L, Theta, Grad, Cost>> {
    if let Some(tol) = opts.tols.tol_grad {
        solver = solver.with_tolerance_grad(tol)?;
    }
    if let Some(tol) = opts.tols.tol_cost {
        solver = solver.with_tolerance_cost(tol)?;
    }
    Ok(solver)
}

fn history(opts: &MLEOptions) -> usize {
    opts.lbfgs_mem.unwrap_or(DEFAULT_LBFGS_MEM)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{
        errors::OptError,
        loglik_optimizer::traits::{LineSearcher, Tolerances},
    };

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Construction of every solver flavor with default and explicit
    //   history sizes.
    // - Tolerance wiring in `configure_lbfgs`, including Argmin's own
    //   rejection of a tolerance that slipped past validation.
    //
    // End-to-end executor behavior is covered in `api`.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Every builder succeeds for every history-size choice.
    //
    // Given
    // -----
    // - Valid tolerances and `lbfgs_mem` in {None, Some(3)}.
    //
    // Expect
    // ------
    // - `Ok(_)` from all three builders.
    fn builders_accept_default_and_explicit_memory() {
        for mem in [None, Some(3)] {
            // Arrange
            let tols = Tolerances::new(Some(1e-8), Some(1e-12), Some(50)).unwrap();
            let hz = MLEOptions::new(tols, LineSearcher::HagerZhang, false, mem).unwrap();
            let mt = MLEOptions::new(tols, LineSearcher::MoreThuente, false, mem).unwrap();
            let bt = MLEOptions::new(tols, LineSearcher::Backtracking, false, mem).unwrap();

            // Act / Assert
            assert!(build_optimizer_hager_zhang(&hz).is_ok());
            assert!(build_optimizer_more_thuente(&mt).is_ok());
            assert!(build_optimizer_backtracking(&bt).is_ok());
        }
    }

    #[test]
    // Purpose
    // -------
    // A negative tolerance written directly into the options (bypassing
    // `Tolerances::new`) is rejected by Argmin and surfaces as an `OptError`.
    //
    // Given
    // -----
    // - `Tolerances { tol_grad: Some(-1.0), .. }` built as a literal.
    //
    // Expect
    // ------
    // - `configure_lbfgs` returns an argmin "invalid parameter" error.
    fn configure_lbfgs_surfaces_argmin_rejection() {
        // Arrange
        let raw = LBFGS::new(MoreThuenteLS::new(), DEFAULT_LBFGS_MEM);
        let opts = MLEOptions {
            tols: Tolerances { tol_grad: Some(-1.0), tol_cost: None, max_iter: Some(10) },
            ..MLEOptions::default()
        };

        // Act
        let configured = configure_lbfgs(raw, &opts);

        // Assert
        assert!(matches!(configured, Err(OptError::Backend { kind: "invalid parameter", .. })));
    }
}
