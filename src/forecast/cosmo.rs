//! forecast::cosmo — noise-averaged cosmological likelihood on r.
//!
//! Purpose
//! -------
//! Evaluate −2 log L(r) for the B-mode power spectrum after component
//! separation, with the foreground residuals marginalized over the spectral
//! parameter uncertainty Σ.
//!
//! Key behaviors
//! -------------
//! - Model: `Cl(r) = BlBl·Alens + BuBu·r + noise`, with
//!   `dof_ℓ = (2ℓ + 1)·fsky` and `d_ℓ = dof_ℓ / Cl_ℓ`.
//! - `U(r) = (Σ⁻¹ + Σ_ℓ d_ℓ YY_ℓ)⁻¹`, factorized once per evaluation.
//! - −2 log L is the sum of three pieces:
//!   - `Σ_ℓ d_ℓ [Cl_obs (1 − tr(U YY_ℓ)/Cl_ℓ) + tr(Σ YY_ℓ)] − tr(U Q Σ Q)`
//!     with `Q = Σ_ℓ d_ℓ YY_ℓ`;
//!   - `Σ_ℓ d_ℓ (yy + 2yz)_ℓ − (Σ_ℓ d_ℓ Yy_ℓ)ᵗ U (Σ_m d_m (Yy + 2Yz)_m)`;
//!   - `Σ_ℓ dof_ℓ ln Cl_ℓ − ln det U`.
//!
//! Invariants & assumptions
//! ------------------------
//! - The observed spectrum is `Cl_obs = BB(Alens, r_fid) + noise`.
//! - `Σ⁻¹` is the Gauss-Newton Fisher matrix of the spectral fit.
//! - A model spectrum that is not strictly positive fails with
//!   [`ForecastError::NonPositiveModel`]; a failed factorization of `U⁻¹`
//!   with [`ForecastError::SingularUncertainty`].
use crate::{
    algebra::batched::{from_dmatrix, to_dmatrix},
    forecast::{
        errors::{ForecastError, ForecastResult},
        residuals::ResidualTerms,
        templates::BbTemplates,
    },
};
use ndarray::{Array1, Array2, Axis};

/// −2 log L(r) for fixed separation outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct CosmoLikelihood {
    ell: Array1<usize>,
    dof: Array1<f64>,
    cl_obs: Array1<f64>,
    bl_bl: Array1<f64>,
    bu_bu: Array1<f64>,
    noise: Array1<f64>,
    alens: f64,
    sigma: Array2<f64>,
    fisher: Array2<f64>,
    terms: ResidualTerms,
    /// `yy + 2yz`.
    bias: Array1<f64>,
    /// `Yy + 2Yz`.
    dy_bias: Array2<f64>,
    /// `tr(Σ YY_ℓ)`.
    tr_sigma_yy: Array1<f64>,
}

impl CosmoLikelihood {
    /// Assemble the likelihood over `[lmin, lmin + n_ell)`.
    ///
    /// # Errors
    /// [`ForecastError::ShapeMismatch`] when the spectra, the terms and Σ do
    /// not agree on `n_ell` and `n_params`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lmin: usize, fsky: f64, alens: f64, templates: &BbTemplates, noise: &Array1<f64>, terms: ResidualTerms,
        sigma: &Array2<f64>, fisher: &Array2<f64>,
    ) -> ForecastResult<Self> {
        let n_ell = terms.n_ell();
        let p = terms.dy_dy.len_of(Axis(1));
        for (what, len) in [
            ("noise spectrum", noise.len()),
            ("BB template", templates.bb.len()),
            ("BuBu template", templates.bu_bu.len()),
            ("BlBl template", templates.bl_bl.len()),
        ] {
            if len != n_ell {
                return Err(ForecastError::ShapeMismatch { what, expected: vec![n_ell], found: vec![len] });
            }
        }
        for (what, m) in [("parameter covariance", sigma), ("Fisher matrix", fisher)] {
            if m.dim() != (p, p) {
                return Err(ForecastError::ShapeMismatch { what, expected: vec![p, p], found: m.shape().to_vec() });
            }
        }
        let ell: Array1<usize> = (lmin..lmin + n_ell).collect();
        let dof = ell.mapv(|l| (2 * l + 1) as f64 * fsky);
        let tr_sigma_yy = terms.stat(sigma);
        Ok(Self {
            dof,
            cl_obs: &templates.bb + noise,
            bl_bl: templates.bl_bl.clone(),
            bu_bu: templates.bu_bu.clone(),
            noise: noise.clone(),
            alens,
            sigma: sigma.clone(),
            fisher: fisher.clone(),
            bias: terms.bias(),
            dy_bias: &terms.dy_y + &(&terms.dy_z * 2.0),
            tr_sigma_yy,
            terms,
            ell,
        })
    }

    pub fn ell(&self) -> &Array1<usize> {
        &self.ell
    }

    pub fn dof(&self) -> &Array1<f64> {
        &self.dof
    }

    /// `BB(Alens, r_fid) + noise`.
    pub fn cl_obs(&self) -> &Array1<f64> {
        &self.cl_obs
    }

    /// `BlBl·Alens + BuBu·r + noise`, checked for positivity.
    pub fn cl_model(&self, r: f64) -> ForecastResult<Array1<f64>> {
        let cl = &(&self.bl_bl * self.alens) + &(&self.bu_bu * r) + &self.noise;
        if let Some((i, &value)) = cl.iter().enumerate().find(|(_, v)| !v.is_finite() || **v <= 0.0) {
            return Err(ForecastError::NonPositiveModel { ell: self.ell[i], value });
        }
        Ok(cl)
    }

    /// −2 log L at `r`.
    pub fn neg2_log_l(&self, r: f64) -> ForecastResult<f64> {
        let cl = self.cl_model(r)?;
        let d = &self.dof / &cl;
        let p = self.sigma.nrows();

        // Q = Σ_ℓ d_ℓ YY_ℓ
        let mut q = Array2::<f64>::zeros((p, p));
        for (yy, &dl) in self.terms.dy_dy.outer_iter().zip(d.iter()) {
            q.scaled_add(dl, &yy);
        }
        let (u, ln_det_u_inv) = self.uncertainty(&q, r)?;

        // trCinvC
        let mut tr_cinv_c = 0.0;
        for (l, yy) in self.terms.dy_dy.outer_iter().enumerate() {
            let tr_u_yy = (&u * &yy.t()).sum();
            tr_cinv_c += d[l] * (self.cl_obs[l] * (1.0 - tr_u_yy / cl[l]) + self.tr_sigma_yy[l]);
        }
        tr_cinv_c -= (&u * &q.dot(&self.sigma).dot(&q).t()).sum();

        // trECinvC
        let mut a = Array1::<f64>::zeros(p);
        let mut b = Array1::<f64>::zeros(p);
        for l in 0..d.len() {
            a.scaled_add(d[l], &self.terms.dy_y.row(l));
            b.scaled_add(d[l], &self.dy_bias.row(l));
        }
        let tr_ecinv_c = (&d * &self.bias).sum() - a.dot(&u.dot(&b));

        // logdetC
        let log_det_c = (&self.dof * &cl.mapv(f64::ln)).sum() + ln_det_u_inv;

        Ok(tr_cinv_c + tr_ecinv_c + log_det_c)
    }

    /// `U = (Σ⁻¹ + Q)⁻¹` and `ln det U⁻¹`.
    fn uncertainty(&self, q: &Array2<f64>, r: f64) -> ForecastResult<(Array2<f64>, f64)> {
        if q.is_empty() {
            return Ok((Array2::zeros((0, 0)), 0.0));
        }
        let u_inv = &self.fisher + q;
        let chol = to_dmatrix(&u_inv.view()).cholesky().ok_or(ForecastError::SingularUncertainty { r })?;
        let ln_det = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
        if !ln_det.is_finite() {
            return Err(ForecastError::SingularUncertainty { r });
        }
        Ok((from_dmatrix(&chol.inverse()), ln_det))
    }
}
