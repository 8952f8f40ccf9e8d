//! loglik_optimizer::traits — the objective interface and solver options.
//!
//! Fits maximize a log-likelihood `ℓ(θ)` by handing argmin the cost
//! `c(θ) = −ℓ(θ)`. For the spectral likelihood `ℓ(β) = −½ χ²(β)` with the
//! amplitudes profiled out, so argmin minimizes `½ χ²`. Analytic gradients
//! are gradients of `ℓ`; the adapter flips their sign.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{
        Cost, FnEvalMap, Grad, Theta,
        validation::{validate_theta_hat, validate_value, verify_tol_cost, verify_tol_grad},
    },
};
use argmin::core::{TerminationReason, TerminationStatus};
use argmin_math::ArgminL2Norm;
use std::str::FromStr;

/// An objective the optimizer can maximize.
///
/// `Data` is whatever the objective needs besides `θ`; for spectral fits it
/// is the compacted data and its inverse noise.
pub trait LogLikelihood {
    type Data: 'static;

    /// `ℓ(θ)`.
    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<Cost>;

    /// Reject an unusable `(θ, data)` pair before the first iteration.
    fn check(&self, theta: &Theta, data: &Self::Data) -> OptResult<()>;

    /// `∇ℓ(θ)`; finite differences of the cost are used when this returns
    /// [`OptError::GradientNotImplemented`].
    fn grad(&self, _theta: &Theta, _data: &Self::Data) -> OptResult<Grad> {
        Err(OptError::GradientNotImplemented)
    }

    /// Curvature of the cost `−ℓ` along each coordinate at `theta`, e.g.
    /// the diagonal of the Fisher matrix. When present, [`maximize`]
    /// rescales coordinate `i` by `1/√c_i`, which makes the first L-BFGS
    /// step a diagonal Newton step independent of the data amplitude.
    ///
    /// [`maximize`]: super::api::maximize
    fn curvature(&self, _theta: &Theta, _data: &Self::Data) -> OptResult<Option<Grad>> {
        Ok(None)
    }
}

/// Line search inside L-BFGS. Parses case-insensitively from
/// `"MoreThuente"`, `"HagerZhang"` or `"Backtracking"`.
///
/// Only `Backtracking` survives trial points where the objective cannot be
/// evaluated; the Wolfe searches stop the fit there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearcher {
    MoreThuente,
    HagerZhang,
    Backtracking,
}

impl FromStr for LineSearcher {
    type Err = OptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "morethuente" => Ok(LineSearcher::MoreThuente),
            "hagerzhang" => Ok(LineSearcher::HagerZhang),
            "backtracking" => Ok(LineSearcher::Backtracking),
            _ => Err(OptError::InvalidLineSearch {
                name: s.to_string(),
                reason: "expected 'MoreThuente', 'HagerZhang' or 'Backtracking'",
            }),
        }
    }
}

/// Solver configuration of a spectral fit.
///
/// The default is [`Tolerances::default`], More–Thuente, silent, an
/// L-BFGS history of [`DEFAULT_LBFGS_MEM`](super::types::DEFAULT_LBFGS_MEM)
/// and curvature preconditioning on.
#[derive(Debug, Clone, PartialEq)]
pub struct MLEOptions {
    pub tols: Tolerances,
    pub line_searcher: LineSearcher,
    /// Print the starting point and attach the slog observer (`obs_slog`
    /// feature only).
    pub verbose: bool,
    pub lbfgs_mem: Option<usize>,
    /// Rescale coordinates by the objective's curvature at the start (see
    /// [`LogLikelihood::curvature`]). With it on, `tol_grad` bounds the
    /// gradient in the rescaled coordinates, roughly the Newton decrement.
    pub precondition: bool,
}

impl MLEOptions {
    /// # Errors
    /// [`OptError::InvalidLBFGSMem`] for a zero history length.
    pub fn new(
        tols: Tolerances, line_searcher: LineSearcher, verbose: bool, lbfgs_mem: Option<usize>,
    ) -> OptResult<Self> {
        if lbfgs_mem == Some(0) {
            return Err(OptError::InvalidLBFGSMem { mem: 0, reason: "history length must be positive" });
        }
        Ok(Self { tols, line_searcher, verbose, lbfgs_mem, precondition: true })
    }

    pub fn with_precondition(mut self, precondition: bool) -> Self {
        self.precondition = precondition;
        self
    }
}

impl Default for MLEOptions {
    fn default() -> Self {
        Self {
            tols: Tolerances::default(),
            line_searcher: LineSearcher::MoreThuente,
            verbose: false,
            lbfgs_mem: None,
            precondition: true,
        }
    }
}

/// Stopping rules. At least one must be set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    /// Stop once `|∇c|` falls below this.
    pub tol_grad: Option<f64>,
    /// Stop once the cost changes by less than this between iterations.
    pub tol_cost: Option<f64>,
    pub max_iter: Option<usize>,
}

impl Tolerances {
    /// # Errors
    /// - [`OptError::NoTolerancesProvided`] when all three are `None`.
    /// - [`OptError::InvalidTolGrad`] / [`OptError::InvalidTolCost`] for
    ///   non-finite or non-positive tolerances.
    /// - [`OptError::InvalidMaxIter`] for `max_iter == 0`.
    pub fn new(tol_grad: Option<f64>, tol_cost: Option<f64>, max_iter: Option<usize>) -> OptResult<Self> {
        if tol_grad.is_none() && tol_cost.is_none() && max_iter.is_none() {
            return Err(OptError::NoTolerancesProvided);
        }
        verify_tol_grad(tol_grad)?;
        verify_tol_cost(tol_cost)?;
        if max_iter == Some(0) {
            return Err(OptError::InvalidMaxIter { max_iter: 0, reason: "at least one iteration is required" });
        }
        Ok(Self { tol_grad, tol_cost, max_iter })
    }
}

impl Default for Tolerances {
    /// `tol_grad = 1e-6`, no cost rule, at most 300 iterations.
    fn default() -> Self {
        Self { tol_grad: Some(1e-6), tol_cost: None, max_iter: Some(300) }
    }
}

/// What a finished fit reports.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimOutcome {
    pub theta_hat: Theta,
    /// `ℓ(θ̂)`, not the cost.
    pub value: f64,
    /// Set only for `SolverConverged` or `TargetCostReached`; an iteration
    /// cap is not convergence.
    pub converged: bool,
    /// Termination reason as text.
    pub status: String,
    pub iterations: usize,
    /// Argmin's evaluation counters (`cost_count`, `gradient_count`, ...).
    pub fn_evals: FnEvalMap,
    /// Norm of the last gradient the solver kept.
    pub grad_norm: Option<f64>,
}

impl OptimOutcome {
    /// # Errors
    /// A missing or non-finite `theta_hat`, or a non-finite `value`.
    pub fn new(
        theta_hat: Option<Theta>, value: f64, termination: TerminationStatus, iterations: u64,
        fn_evals: FnEvalMap, grad: Option<Grad>,
    ) -> OptResult<Self> {
        let theta_hat = validate_theta_hat(theta_hat)?;
        validate_value(value)?;
        let (converged, status) = match &termination {
            TerminationStatus::NotTerminated => (false, "NotTerminated".to_string()),
            TerminationStatus::Terminated(reason) => (
                matches!(reason, TerminationReason::SolverConverged | TerminationReason::TargetCostReached),
                format!("{reason:?}"),
            ),
        };
        Ok(Self {
            theta_hat,
            value,
            converged,
            status,
            iterations: iterations as usize,
            fn_evals,
            grad_norm: grad.map(|g| g.l2_norm()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Validation rules of `Tolerances::new` and `MLEOptions::new`.
    // - Case-insensitive parsing of `LineSearcher`.
    // - Which termination reasons `OptimOutcome` reports as converged.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Tolerance and option constructors reject degenerate configurations.
    //
    // Given
    // -----
    // - No tolerances at all, a negative gradient tolerance, zero
    //   iterations, and a zero L-BFGS memory.
    //
    // Expect
    // ------
    // - The matching named error for each.
    fn constructors_reject_degenerate_configurations() {
        assert_eq!(Tolerances::new(None, None, None), Err(OptError::NoTolerancesProvided));
        assert!(matches!(
            Tolerances::new(Some(-1.0), None, None),
            Err(OptError::InvalidTolGrad { .. })
        ));
        assert!(matches!(
            Tolerances::new(None, None, Some(0)),
            Err(OptError::InvalidMaxIter { .. })
        ));
        assert!(matches!(
            MLEOptions::new(Tolerances::default(), LineSearcher::MoreThuente, false, Some(0)),
            Err(OptError::InvalidLBFGSMem { .. })
        ));
        assert_eq!(MLEOptions::default().tols, Tolerances::default());
    }

    #[test]
    // Purpose
    // -------
    // Line-search names parse regardless of case.
    //
    // Given
    // -----
    // - "morethuente", "HAGERZHANG", "Backtracking" and "bfgs".
    //
    // Expect
    // ------
    // - The three known names parse; "bfgs" is `InvalidLineSearch`.
    fn line_searcher_parses_case_insensitively() {
        assert_eq!("morethuente".parse::<LineSearcher>(), Ok(LineSearcher::MoreThuente));
        assert_eq!("HAGERZHANG".parse::<LineSearcher>(), Ok(LineSearcher::HagerZhang));
        assert_eq!("Backtracking".parse::<LineSearcher>(), Ok(LineSearcher::Backtracking));
        assert!(matches!(
            "bfgs".parse::<LineSearcher>(),
            Err(OptError::InvalidLineSearch { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Only genuine convergence counts as converged.
    //
    // Given
    // -----
    // - Terminations by `SolverConverged` and by `MaxItersReached`.
    //
    // Expect
    // ------
    // - `converged` is true for the first and false for the second, and the
    //   status string names the reason.
    fn outcome_distinguishes_convergence_from_iteration_cap() {
        // Arrange
        let mk = |reason| {
            OptimOutcome::new(
                Some(array![1.0]),
                -0.5,
                TerminationStatus::Terminated(reason),
                10,
                FnEvalMap::new(),
                Some(array![1e-9]),
            )
        };

        // Act
        let ok = mk(TerminationReason::SolverConverged).unwrap();
        let capped = mk(TerminationReason::MaxItersReached).unwrap();

        // Assert
        assert!(ok.converged);
        assert!(!capped.converged);
        assert_eq!(capped.status, "MaxItersReached");
        assert!(ok.grad_norm.is_some_and(|n| n < 1e-8));
    }
}
