//! separation::likelihood — the concentrated spectral likelihood.
//!
//! Purpose
//! -------
//! Expose `ℓ(β) = −½ χ²(β)` to the optimizer, where the component amplitudes
//! are profiled out analytically:
//!
//! ```text
//! s(β) = W(β) d,    χ = d − A s,    χ² = Σ_batch χᵗ N⁻¹ χ
//! ```
//!
//! together with its gradient, the Gauss–Newton Fisher matrix and the full
//! observed information, all on the total (summed over batch) scale.
//!
//! Key behaviors
//! -------------
//! - [`MixingModel`] is the seam between a parametric mixing matrix and the
//!   likelihood; [`MixingMatrix`] implements it directly and adaptive fits
//!   implement it over cluster maps.
//! - [`SpectralLikelihood`] implements
//!   [`LogLikelihood`](crate::optimization::loglik_optimizer::LogLikelihood)
//!   with an analytic gradient `∂ℓ/∂β_i = Σ (A_i s)ᵗ N⁻¹ χ`, and reports the
//!   Fisher diagonal as its curvature so fits are preconditioned against
//!   the data amplitude and the noise level.
//! - [`fisher_at`]: `F_ij = Σ (N⁻¹ x_i)ᵗ (x_j − A W x_j)` with `x_i = A_i s`.
//! - [`observed_information_at`]: the exact Hessian of `½χ²`,
//!   `H_ij = −(A_ij s)ᵗN⁻¹χ − (A_i s_j)ᵗN⁻¹χ + (A_i s)ᵗN⁻¹(A_j s + A s_j)`
//!   with `s_j = W_j d`. It equals the Fisher matrix wherever `χ = 0`.
//! - [`chi_db_at`]: per-sample projection of `A_i s` on the residual
//!   direction, `χ·(A_i s)/|χ|` (zero where `|χ| = 0`).
//!
//! Invariants & assumptions
//! ------------------------
//! - Data use the internal layout `(n_pix, ..., n_freq)`; `A` and its
//!   derivatives broadcast against the batch axes.
//! - Masked samples have been removed (or zeroed) before data reach this
//!   module; every entry is finite.
//!
//! Downstream usage
//! ----------------
//! - `comp_sep` maximizes [`SpectralLikelihood`] through `maximize_bounded`
//!   and then calls the `*_at` helpers once at the optimum.
//!
//! Testing notes
//! -------------
//! - The analytic gradient and observed information are checked against
//!   finite differences; Fisher and observed information agree on noiseless
//!   data at the truth.
use crate::{
    algebra::{
        batched::{mv, sub, vdot},
        errors::LinalgResult,
        noise_weights::InvNoise,
        weights::WlsKernel,
    },
    components::{errors::ModelResult, mixing_matrix::MixingMatrix},
    inference::fisher::symmetrized,
    optimization::{
        errors::{OptError, OptResult},
        loglik_optimizer::{Cost, Grad, Theta, traits::LogLikelihood},
        numerical_stability::bounds::BoundTransform,
    },
    separation::errors::{SeparationError, SeparationResult},
};
use ndarray::{Array1, Array2, ArrayD, Zip};

/// A mixing matrix parameterized by a flat vector `β`.
pub trait MixingModel: Send + Sync {
    fn n_params(&self) -> usize;
    fn n_freq(&self) -> usize;
    fn n_comp(&self) -> usize;
    fn param_names(&self) -> Vec<String>;
    fn defaults(&self) -> Array1<f64>;
    fn bounds(&self) -> BoundTransform;

    /// `A(β)`, shape `(..., n_freq, n_comp)`.
    fn evaluate(&self, beta: &Array1<f64>) -> ModelResult<ArrayD<f64>>;
    /// `[A_i]`.
    fn gradient(&self, beta: &Array1<f64>) -> ModelResult<Vec<ArrayD<f64>>>;
    /// `[[A_ij]]`.
    fn hessian(&self, beta: &Array1<f64>) -> ModelResult<Vec<Vec<ArrayD<f64>>>>;
}

impl MixingModel for MixingMatrix {
    fn n_params(&self) -> usize {
        MixingMatrix::n_params(self)
    }

    fn n_freq(&self) -> usize {
        MixingMatrix::n_freq(self)
    }

    fn n_comp(&self) -> usize {
        MixingMatrix::n_comp(self)
    }

    fn param_names(&self) -> Vec<String> {
        MixingMatrix::param_names(self).to_vec()
    }

    fn defaults(&self) -> Array1<f64> {
        MixingMatrix::defaults(self).clone()
    }

    fn bounds(&self) -> BoundTransform {
        MixingMatrix::bounds(self)
    }

    fn evaluate(&self, beta: &Array1<f64>) -> ModelResult<ArrayD<f64>> {
        MixingMatrix::evaluate(self, beta)
    }

    fn gradient(&self, beta: &Array1<f64>) -> ModelResult<Vec<ArrayD<f64>>> {
        MixingMatrix::gradient(self, beta)
    }

    fn hessian(&self, beta: &Array1<f64>) -> ModelResult<Vec<Vec<ArrayD<f64>>>> {
        MixingMatrix::hessian(self, beta)
    }
}

/// Data in the internal layout plus the weights that go with it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectralData {
    data: ArrayD<f64>,
    inv_n: InvNoise,
}

impl SpectralData {
    /// # Errors
    /// - [`SeparationError::DataShape`] for 0-d data, non-finite entries, or
    ///   weights whose frequency axis disagrees with the data.
    pub fn new(data: ArrayD<f64>, inv_n: InvNoise) -> SeparationResult<Self> {
        let Some(&n_freq) = data.shape().last() else {
            return Err(SeparationError::DataShape {
                what: "data",
                shape: Vec::new(),
                reason: "data needs a frequency axis",
            });
        };
        if data.iter().any(|v| !v.is_finite()) {
            return Err(SeparationError::DataShape {
                what: "data",
                shape: data.shape().to_vec(),
                reason: "entries must be finite once masked samples are removed",
            });
        }
        if let Some(nf) = inv_n.n_freq() {
            if nf != n_freq {
                return Err(SeparationError::DataShape {
                    what: "inverse noise",
                    shape: vec![nf],
                    reason: "trailing axis must match the data frequency axis",
                });
            }
        }
        Ok(Self { data, inv_n })
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn inv_n(&self) -> &InvNoise {
        &self.inv_n
    }

    pub fn n_freq(&self) -> usize {
        self.data.shape().last().copied().unwrap_or(0)
    }

    /// Number of frequency vectors (product of the batch axes).
    pub fn n_samples(&self) -> usize {
        self.data.len() / self.n_freq().max(1)
    }
}

/// Everything the likelihood computes at one `β`.
#[derive(Debug, Clone)]
pub struct SpectralEvaluation {
    pub a: ArrayD<f64>,
    pub kernel: WlsKernel,
    /// Amplitudes `W d`, shape `(batch..., n_comp)`.
    pub s: ArrayD<f64>,
    /// Residuals `d − A s`, shape `(batch..., n_freq)`.
    pub chi: ArrayD<f64>,
    /// `N⁻¹ χ`.
    pub n_chi: ArrayD<f64>,
    pub chi2: f64,
}

/// `ℓ(β) = −½χ²(β)` for a [`MixingModel`].
#[derive(Debug, Clone, Copy)]
pub struct SpectralLikelihood<'a, M: MixingModel + ?Sized> {
    model: &'a M,
}

impl<'a, M: MixingModel + ?Sized> SpectralLikelihood<'a, M> {
    pub fn new(model: &'a M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        self.model
    }

    /// Amplitudes, residuals and `χ²` at `beta`.
    pub fn evaluate(&self, beta: &Theta, data: &SpectralData) -> OptResult<SpectralEvaluation> {
        let a = self.model.evaluate(beta)?;
        let kernel = WlsKernel::new(a.view(), data.inv_n())?;
        let s = kernel.amplitudes(data.data().view())?;
        let chi = sub(data.data().view(), mv(a.view(), s.view())?.view())?;
        let n_chi = data.inv_n().apply_vec(chi.view())?;
        let chi2 = vdot(chi.view(), n_chi.view())?.sum();
        Ok(SpectralEvaluation { a, kernel, s, chi, n_chi, chi2 })
    }

    /// Gauss–Newton Fisher matrix at `beta`.
    pub fn fisher(&self, beta: &Theta, data: &SpectralData) -> OptResult<Array2<f64>> {
        let ev = self.evaluate(beta, data)?;
        Ok(fisher_at(&ev, &self.model.gradient(beta)?, data.inv_n())?)
    }

    /// Exact Hessian of `½χ²` at `beta`.
    pub fn observed_information(&self, beta: &Theta, data: &SpectralData) -> OptResult<Array2<f64>> {
        let ev = self.evaluate(beta, data)?;
        let a_db = self.model.gradient(beta)?;
        let a_dbdb = self.model.hessian(beta)?;
        Ok(observed_information_at(&ev, &a_db, &a_dbdb, data)?)
    }
}

impl<'a, M: MixingModel + ?Sized> LogLikelihood for SpectralLikelihood<'a, M> {
    type Data = SpectralData;

    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<Cost> {
        Ok(-0.5 * self.evaluate(theta, data)?.chi2)
    }

    fn check(&self, theta: &Theta, data: &Self::Data) -> OptResult<()> {
        if theta.len() != self.model.n_params() {
            return Err(OptError::ParamLengthMismatch {
                what: "spectral parameters",
                expected: self.model.n_params(),
                found: theta.len(),
            });
        }
        if data.n_freq() != self.model.n_freq() {
            return Err(OptError::ParamLengthMismatch {
                what: "data frequencies",
                expected: self.model.n_freq(),
                found: data.n_freq(),
            });
        }
        Ok(())
    }

    fn grad(&self, theta: &Theta, data: &Self::Data) -> OptResult<Grad> {
        let ev = self.evaluate(theta, data)?;
        Ok(score_at(&ev, &self.model.gradient(theta)?)?)
    }

    /// Diagonal of the Gauss–Newton Fisher matrix.
    fn curvature(&self, theta: &Theta, data: &Self::Data) -> OptResult<Option<Grad>> {
        Ok(Some(self.fisher(theta, data)?.diag().to_owned()))
    }
}

/// `x_i = A_i s` for every parameter.
fn component_shifts(ev: &SpectralEvaluation, a_db: &[ArrayD<f64>]) -> LinalgResult<Vec<ArrayD<f64>>> {
    a_db.iter().map(|a_i| mv(a_i.view(), ev.s.view())).collect()
}

/// `∂ℓ/∂β_i = Σ (A_i s)ᵗ N⁻¹ χ`.
pub fn score_at(ev: &SpectralEvaluation, a_db: &[ArrayD<f64>]) -> LinalgResult<Grad> {
    let xs = component_shifts(ev, a_db)?;
    xs.iter()
        .map(|x| Ok(vdot(x.view(), ev.n_chi.view())?.sum()))
        .collect::<LinalgResult<Vec<f64>>>()
        .map(Array1::from)
}

/// Gauss–Newton Fisher `F_ij = Σ (N⁻¹ x_i)ᵗ (I − A W) x_j`, symmetrized.
pub fn fisher_at(
    ev: &SpectralEvaluation, a_db: &[ArrayD<f64>], inv_n: &InvNoise,
) -> LinalgResult<Array2<f64>> {
    let p = a_db.len();
    let xs = component_shifts(ev, a_db)?;
    let nxs = xs.iter().map(|x| inv_n.apply_vec(x.view())).collect::<LinalgResult<Vec<_>>>()?;
    let projected = xs
        .iter()
        .map(|x| {
            let back = mv(ev.a.view(), ev.kernel.amplitudes(x.view())?.view())?;
            sub(x.view(), back.view())
        })
        .collect::<LinalgResult<Vec<_>>>()?;

    let mut fisher = Array2::<f64>::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            fisher[[i, j]] = vdot(nxs[i].view(), projected[j].view())?.sum();
        }
    }
    Ok(symmetrized(&fisher))
}

/// Exact Hessian of `½χ²` (observed information of `ℓ`), symmetrized.
pub fn observed_information_at(
    ev: &SpectralEvaluation, a_db: &[ArrayD<f64>], a_dbdb: &[Vec<ArrayD<f64>>], data: &SpectralData,
) -> LinalgResult<Array2<f64>> {
    let p = a_db.len();
    let inv_n = data.inv_n();
    let xs = component_shifts(ev, a_db)?;
    let nxs = xs.iter().map(|x| inv_n.apply_vec(x.view())).collect::<LinalgResult<Vec<_>>>()?;
    let w_db = ev.kernel.w_db(a_db, inv_n)?;
    let s_db = w_db
        .iter()
        .map(|w_j| mv(w_j.view(), data.data().view()))
        .collect::<LinalgResult<Vec<_>>>()?;
    // u_j = A_j s + A s_j = −∂χ/∂β_j
    let us = xs
        .iter()
        .zip(&s_db)
        .map(|(x, s_j)| Ok(x + &mv(ev.a.view(), s_j.view())?))
        .collect::<LinalgResult<Vec<_>>>()?;

    let mut hess = Array2::<f64>::zeros((p, p));
    for i in 0..p {
        for j in 0..p {
            let curvature = mv(a_dbdb[i][j].view(), ev.s.view())?;
            let cross = mv(a_db[i].view(), s_db[j].view())?;
            hess[[i, j]] = vdot(nxs[i].view(), us[j].view())?.sum()
                - vdot(curvature.view(), ev.n_chi.view())?.sum()
                - vdot(cross.view(), ev.n_chi.view())?.sum();
        }
    }
    Ok(symmetrized(&hess))
}

/// `χ·(A_i s) / |χ|` per sample, one map per parameter.
pub fn chi_db_at(ev: &SpectralEvaluation, a_db: &[ArrayD<f64>]) -> LinalgResult<Vec<ArrayD<f64>>> {
    let norm = vdot(ev.chi.view(), ev.chi.view())?.mapv(f64::sqrt);
    component_shifts(ev, a_db)?
        .iter()
        .map(|x| {
            let num = vdot(ev.chi.view(), x.view())?;
            Ok(Zip::from(&num).and(&norm).map_collect(|&n, &d| if d > 0.0 { n / d } else { 0.0 }))
        })
        .collect()
}
