//! separation::result — immutable outputs of the separation entry points.
//!
//! Purpose
//! -------
//! Carry everything a fit produced: the spectral parameters and their
//! covariance, the amplitude and residual maps, the amplitude covariance
//! `(AᵗN⁻¹A)⁻¹`, the mask of samples actually used, optimizer diagnostics and
//! the event log.
//!
//! Conventions
//! -----------
//! - Maps are stored in the internal layout `(n_pix, ..., core)` with UNSEEN
//!   at masked pixels. The `*_maps` accessors return the caller layout
//!   (core axis first, pixel axis last).
//! - `x`, `Σ` and the Fisher matrix are in model space `β` on the total
//!   log-likelihood scale.
use crate::{
    diagnostics::EventLog,
    inference::fisher::standard_errors,
    optimization::loglik_optimizer::{FnEvalMap, OptimOutcome},
    separation::masking::{UNSEEN, swap_outer_axes},
};
use ndarray::{Array1, Array2, Array3, ArrayD, Axis};

/// How the optimizer finished.
#[derive(Debug, Clone, PartialEq)]
pub struct FitDiagnostics {
    pub status: String,
    pub converged: bool,
    pub iterations: usize,
    pub fn_evals: FnEvalMap,
    pub grad_norm: Option<f64>,
}

impl FitDiagnostics {
    /// Diagnostics of a fit with nothing to optimize.
    pub fn fixed() -> Self {
        Self {
            status: "No free parameters".to_string(),
            converged: true,
            iterations: 0,
            fn_evals: FnEvalMap::new(),
            grad_norm: None,
        }
    }
}

impl From<&OptimOutcome> for FitDiagnostics {
    fn from(outcome: &OptimOutcome) -> Self {
        Self {
            status: outcome.status.clone(),
            converged: outcome.converged,
            iterations: outcome.iterations,
            fn_evals: outcome.fn_evals.clone(),
            grad_norm: outcome.grad_norm,
        }
    }
}

/// Result of a single (global) spectral fit.
#[derive(Debug, Clone)]
pub struct SeparationFit {
    pub(crate) params: Vec<String>,
    pub(crate) x: Array1<f64>,
    pub(crate) sigma: Array2<f64>,
    pub(crate) fisher: Array2<f64>,
    pub(crate) observed_information: Array2<f64>,
    pub(crate) s: ArrayD<f64>,
    pub(crate) chi: ArrayD<f64>,
    pub(crate) chi_db: Vec<ArrayD<f64>>,
    pub(crate) inv_atna: ArrayD<f64>,
    pub(crate) mask_good: Array1<bool>,
    pub(crate) chi2: f64,
    pub(crate) diagnostics: FitDiagnostics,
    pub(crate) log: EventLog,
}

impl SeparationFit {
    /// Parameter names, `"<Component>.<param>"`.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Best-fit spectral parameters `β̂`.
    pub fn x(&self) -> &Array1<f64> {
        &self.x
    }

    /// `Σ = F⁻¹`.
    pub fn sigma(&self) -> &Array2<f64> {
        &self.sigma
    }

    /// Gauss–Newton Fisher matrix at `β̂`.
    pub fn fisher(&self) -> &Array2<f64> {
        &self.fisher
    }

    /// Exact Hessian of `½χ²` at `β̂`. Diagnostic only; `Σ` uses the
    /// Fisher matrix.
    pub fn observed_information(&self) -> &Array2<f64> {
        &self.observed_information
    }

    pub fn standard_errors(&self) -> Array1<f64> {
        standard_errors(&self.sigma)
    }

    /// Amplitudes, internal layout `(n_pix, ..., n_comp)`.
    pub fn s(&self) -> &ArrayD<f64> {
        &self.s
    }

    /// Amplitudes in the caller layout `(n_comp, ..., n_pix)`.
    pub fn s_maps(&self) -> ArrayD<f64> {
        swap_outer_axes(self.s.view())
    }

    /// Residuals `d − A s`, internal layout `(n_pix, ..., n_freq)`.
    pub fn chi(&self) -> &ArrayD<f64> {
        &self.chi
    }

    /// Residuals in the caller layout `(n_freq, ..., n_pix)`.
    pub fn chi_maps(&self) -> ArrayD<f64> {
        swap_outer_axes(self.chi.view())
    }

    /// `χ·(A_i s)/|χ|` per parameter, each of the batch shape
    /// `(n_pix, ...)`.
    pub fn chi_db(&self) -> &[ArrayD<f64>] {
        &self.chi_db
    }

    /// `(AᵗN⁻¹A)⁻¹`, internal layout `(n_pix, ..., n_comp, n_comp)`.
    pub fn inv_atna(&self) -> &ArrayD<f64> {
        &self.inv_atna
    }

    /// `true` for the pixels that entered the fit.
    pub fn mask_good(&self) -> &Array1<bool> {
        &self.mask_good
    }

    /// `χ²` at `β̂`.
    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    pub fn diagnostics(&self) -> &FitDiagnostics {
        &self.diagnostics
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

/// Result of independent fits over a patch partition.
///
/// Per-patch quantities are indexed by label; patches without a valid pixel
/// hold UNSEEN parameters and `None` diagnostics.
#[derive(Debug, Clone)]
pub struct PatchSeparation {
    pub(crate) params: Vec<String>,
    pub(crate) labels: Array1<usize>,
    pub(crate) x: Array2<f64>,
    pub(crate) sigma: Array3<f64>,
    pub(crate) s: ArrayD<f64>,
    pub(crate) chi: ArrayD<f64>,
    pub(crate) chi_db: Vec<ArrayD<f64>>,
    pub(crate) inv_atna: ArrayD<f64>,
    pub(crate) mask_good: Array1<bool>,
    pub(crate) chi2: Array1<f64>,
    pub(crate) diagnostics: Vec<Option<FitDiagnostics>>,
    pub(crate) log: EventLog,
}

impl PatchSeparation {
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn n_patches(&self) -> usize {
        self.x.nrows()
    }

    pub fn labels(&self) -> &Array1<usize> {
        &self.labels
    }

    /// `(n_patch, n_params)`.
    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    /// `(n_patch, n_params, n_params)`.
    pub fn sigma(&self) -> &Array3<f64> {
        &self.sigma
    }

    /// Parameters per pixel, `(n_pix, n_params)`; UNSEEN at masked pixels.
    pub fn x_maps(&self) -> Array2<f64> {
        let mut maps = self.x.select(Axis(0), &self.labels.to_vec());
        for (mut row, &good) in maps.axis_iter_mut(Axis(0)).zip(self.mask_good.iter()) {
            if !good {
                row.fill(UNSEEN);
            }
        }
        maps
    }

    pub fn s(&self) -> &ArrayD<f64> {
        &self.s
    }

    pub fn s_maps(&self) -> ArrayD<f64> {
        swap_outer_axes(self.s.view())
    }

    pub fn chi(&self) -> &ArrayD<f64> {
        &self.chi
    }

    pub fn chi_maps(&self) -> ArrayD<f64> {
        swap_outer_axes(self.chi.view())
    }

    pub fn chi_db(&self) -> &[ArrayD<f64>] {
        &self.chi_db
    }

    pub fn inv_atna(&self) -> &ArrayD<f64> {
        &self.inv_atna
    }

    pub fn mask_good(&self) -> &Array1<bool> {
        &self.mask_good
    }

    /// `χ²` per patch (UNSEEN for skipped patches).
    pub fn chi2(&self) -> &Array1<f64> {
        &self.chi2
    }

    pub fn diagnostics(&self) -> &[Option<FitDiagnostics>] {
        &self.diagnostics
    }

    /// `true` when the patch had no valid pixel.
    pub fn is_skipped(&self, patch: usize) -> bool {
        self.diagnostics.get(patch).is_some_and(Option::is_none)
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

/// `n` UNSEEN-filled arrays of `shape`.
pub(crate) fn unseen_maps(n: usize, shape: &[usize]) -> Vec<ArrayD<f64>> {
    (0..n).map(|_| ArrayD::from_elem(shape.to_vec(), UNSEEN)).collect()
}
