//! forecast::residuals — post-separation noise and foreground residual spectra.
//!
//! Purpose
//! -------
//! Propagate a spectral fit into the CMB channel: the noise left after
//! separation, and the foreground residual spectra (systematic bias,
//! statistical residual and its variance) that follow from the parameter
//! uncertainty Σ and the foreground cross-spectra `C_ℓ`.
//!
//! Key behaviors
//! -------------
//! - [`noise_spectrum`]: `(AᵗN_ℓ⁻¹A)⁻¹[cmb, cmb]`, or the sandwich
//!   `W N_ℓ Wᵗ[cmb, cmb]` when the true noise differs from the weighting.
//! - [`CmbProjector`]: the CMB rows of `W`, `W_dB` and
//!   `V = Σ_ij Σ_ij W_dBdB_ij`, one row per multipole.
//! - [`ResidualTerms`]: the elementary quadratic forms
//!   `yy = wᵗCw`, `yz = wᵗCv`, `YY = W_dB C W_dBᵗ`, `Yy = W_dB C w` and
//!   `Yz = W_dB C v`, from which bias, stat and var are derived.
//!
//! Invariants & assumptions
//! ------------------------
//! - `A` is evaluated without prewhitening at the fitted parameters.
//! - Weights with no batch axis (pixel-domain fits) give one projector that
//!   is repeated for every multipole; weights batched over ℓ must cover
//!   `0..=lmax`.
//! - Foreground spectra are `(n_freq, n_freq, n_ell)` and already windowed
//!   to `[lmin, lmax]` when they reach [`ResidualTerms::compute`].
use crate::{
    algebra::{noise_weights::InvNoise, weights::WlsKernel},
    forecast::errors::{ForecastError, ForecastResult},
};
use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView, ArrayView3, ArrayViewD, Axis, Dimension, Ix2, Ix3, s};

/// CMB rows of the projector and its derivatives over `[lmin, lmax]`.
#[derive(Debug, Clone, PartialEq)]
pub struct CmbProjector {
    /// `W[cmb, :]`, shape `(n_ell, n_freq)`.
    pub w: Array2<f64>,
    /// `W_i[cmb, :]`, shape `(n_ell, n_params, n_freq)`.
    pub w_db: Array3<f64>,
    /// `Σ_ij Σ_ij W_ij[cmb, :]`, shape `(n_ell, n_freq)`.
    pub v: Array2<f64>,
}

impl CmbProjector {
    /// Build the projector rows for `A` of shape `(n_freq, n_comp)`, or
    /// batched over `0..=lmax` as `(n_ell_total, n_freq, n_comp)`, and its
    /// derivatives, weighted by `weights`.
    ///
    /// # Errors
    /// - [`ForecastError::InvalidRange`] when per-ℓ weights stop before
    ///   `lmax`.
    /// - Linear-algebra failures of the kernel.
    #[allow(clippy::too_many_arguments)]
    pub fn new<D: Dimension>(
        a: ArrayView<'_, f64, D>, a_db: &[ArrayD<f64>], a_dbdb: &[Vec<ArrayD<f64>>], weights: &InvNoise,
        sigma: &Array2<f64>, i_cmb: usize, lmin: usize, lmax: usize,
    ) -> ForecastResult<Self> {
        let p = a_db.len();
        if sigma.dim() != (p, p) {
            return Err(ForecastError::ShapeMismatch {
                what: "parameter covariance",
                expected: vec![p, p],
                found: sigma.shape().to_vec(),
            });
        }
        let kernel = WlsKernel::new(a.into_dyn(), weights)?;
        let w = cmb_rows(kernel.w(), i_cmb, lmin, lmax)?;
        let n_ell = w.nrows();

        let mut w_db = Array3::<f64>::zeros((n_ell, p, w.ncols()));
        for (i, w_i) in kernel.w_db(a_db, weights)?.iter().enumerate() {
            w_db.index_axis_mut(Axis(1), i).assign(&cmb_rows(w_i, i_cmb, lmin, lmax)?);
        }

        let mut v = Array2::<f64>::zeros(w.raw_dim());
        if p > 0 {
            let w_dbdb = kernel.w_dbdb(a_db, a_dbdb, weights)?;
            for (i, row) in w_dbdb.iter().enumerate() {
                for (j, w_ij) in row.iter().enumerate() {
                    v.scaled_add(sigma[[i, j]], &cmb_rows(w_ij, i_cmb, lmin, lmax)?);
                }
            }
        }
        Ok(Self { w, w_db, v })
    }

    pub fn n_ell(&self) -> usize {
        self.w.nrows()
    }

    pub fn n_params(&self) -> usize {
        self.w_db.len_of(Axis(1))
    }
}

/// Elementary quadratic forms of the foreground residuals, per multipole.
#[derive(Debug, Clone, PartialEq)]
pub struct ResidualTerms {
    /// `wᵗ C w`, shape `(n_ell,)`.
    pub yy: Array1<f64>,
    /// `wᵗ C v`, shape `(n_ell,)`.
    pub yz: Array1<f64>,
    /// `W_dB C W_dBᵗ`, shape `(n_ell, n_params, n_params)`.
    pub dy_dy: Array3<f64>,
    /// `W_dB C w`, shape `(n_ell, n_params)`.
    pub dy_y: Array2<f64>,
    /// `W_dB C v`, shape `(n_ell, n_params)`.
    pub dy_z: Array2<f64>,
}

impl ResidualTerms {
    /// Contract the projector rows with windowed foreground spectra.
    pub fn compute(proj: &CmbProjector, cl_fgs: ArrayView3<'_, f64>) -> ForecastResult<Self> {
        let (n_ell, p, n_freq) = proj.w_db.dim();
        if cl_fgs.dim() != (n_freq, n_freq, n_ell) {
            return Err(ForecastError::ShapeMismatch {
                what: "foreground spectra",
                expected: vec![n_freq, n_freq, n_ell],
                found: cl_fgs.shape().to_vec(),
            });
        }
        let mut terms = Self {
            yy: Array1::zeros(n_ell),
            yz: Array1::zeros(n_ell),
            dy_dy: Array3::zeros((n_ell, p, p)),
            dy_y: Array2::zeros((n_ell, p)),
            dy_z: Array2::zeros((n_ell, p)),
        };
        for l in 0..n_ell {
            let c = cl_fgs.index_axis(Axis(2), l);
            let (w, v, w_db) = (proj.w.row(l), proj.v.row(l), proj.w_db.index_axis(Axis(0), l));
            let cw = c.dot(&w);
            let cv = c.dot(&v);
            terms.yy[l] = w.dot(&cw);
            terms.yz[l] = w.dot(&cv);
            terms.dy_dy.index_axis_mut(Axis(0), l).assign(&w_db.dot(&c).dot(&w_db.t()));
            terms.dy_y.row_mut(l).assign(&w_db.dot(&cw));
            terms.dy_z.row_mut(l).assign(&w_db.dot(&cv));
        }
        Ok(terms)
    }

    pub fn n_ell(&self) -> usize {
        self.yy.len()
    }

    /// Systematic residual `yy + 2 yz`.
    pub fn bias(&self) -> Array1<f64> {
        &self.yy + &(&self.yz * 2.0)
    }

    /// Statistical residual `Σ_ij Σ_ij YY_ℓij`.
    pub fn stat(&self, sigma: &Array2<f64>) -> Array1<f64> {
        self.dy_dy.outer_iter().map(|yy| (&yy * sigma).sum()).collect()
    }

    /// Variance of the statistical residual, `stat² + 2 Yyᵗ Σ Yy`.
    pub fn var(&self, sigma: &Array2<f64>) -> Array1<f64> {
        let stat = self.stat(sigma);
        self.dy_y
            .outer_iter()
            .zip(stat.iter())
            .map(|(yy, st)| st * st + 2.0 * yy.dot(&sigma.dot(&yy)))
            .collect()
    }
}

/// CMB noise after separation over `[lmin, lmax]`.
///
/// `inv_nl` are the per-ℓ weights used by the separation, batched over
/// `0..=lmax` or beyond, and `A` may be batched the same way. With `n_true` (shape `(n_ell_total, n_freq)` for a
/// diagonal or `(n_ell_total, n_freq, n_freq)` for a dense covariance) the
/// sandwich `(AᵗN⁻¹A)⁻¹AᵗN⁻¹ N N⁻¹A(AᵗN⁻¹A)⁻¹` is returned instead.
pub fn noise_spectrum<D: Dimension>(
    a: ArrayView<'_, f64, D>, inv_nl: &InvNoise, n_true: Option<ArrayViewD<'_, f64>>, i_cmb: usize, lmin: usize,
    lmax: usize,
) -> ForecastResult<Array1<f64>> {
    if inv_nl.batch_ndim() != 1 {
        return Err(ForecastError::InvalidOption { name: "inv_nl", reason: "must be batched over multipoles" });
    }
    let kernel = WlsKernel::new(a.into_dyn(), inv_nl)?;
    let Some(n_true) = n_true else {
        let inv_atna = kernel.inv_atna()?;
        let cov = as_ell_batch(&inv_atna, lmin, lmax)?;
        return Ok(cov.slice(s![lmin..=lmax, i_cmb, i_cmb]).to_owned());
    };

    let w = as_ell_batch(kernel.w(), lmin, lmax)?;
    let n_freq = w.len_of(Axis(2));
    let w_cmb = w.slice(s![.., i_cmb, ..]);
    let shape = n_true.shape().to_vec();
    let full = match shape.len() {
        2 => {
            let diag = n_true.into_dimensionality::<Ix2>().map_err(|_| true_noise_shape(&shape, n_freq))?;
            let mut full = Array3::<f64>::zeros((diag.nrows(), n_freq, n_freq));
            for (mut block, row) in full.outer_iter_mut().zip(diag.outer_iter()) {
                block.diag_mut().assign(&row);
            }
            full
        }
        3 => n_true.into_dimensionality::<Ix3>().map_err(|_| true_noise_shape(&shape, n_freq))?.to_owned(),
        _ => return Err(true_noise_shape(&shape, n_freq)),
    };
    if full.len_of(Axis(0)) <= lmax || full.len_of(Axis(1)) != n_freq || full.len_of(Axis(2)) != n_freq {
        return Err(true_noise_shape(full.shape(), n_freq));
    }
    Ok((lmin..=lmax)
        .map(|l| {
            let row = w_cmb.row(l);
            row.dot(&full.index_axis(Axis(0), l).dot(&row))
        })
        .collect())
}

/// Window `(f, f, ℓ)` spectra to `[lmin, lmax]` and divide by the sky
/// fraction.
pub fn windowed_spectra(cl: ArrayView3<'_, f64>, lmin: usize, lmax: usize, fsky: f64) -> ForecastResult<Array3<f64>> {
    let (f1, f2, n) = cl.dim();
    if f1 != f2 {
        return Err(ForecastError::ShapeMismatch {
            what: "foreground spectra",
            expected: vec![f1, f1, lmax + 1],
            found: cl.shape().to_vec(),
        });
    }
    if n <= lmax {
        return Err(ForecastError::InvalidRange { lmin, lmax, reason: "foreground spectra end before lmax" });
    }
    Ok(cl.slice(s![.., .., lmin..=lmax]).mapv(|c| c / fsky))
}

// ---- Shape helpers ----

/// Rows `[lmin, lmax]` of a CMB row `(c, f)` (repeated) or `(L, c, f)`.
fn cmb_rows(x: &ArrayD<f64>, i_cmb: usize, lmin: usize, lmax: usize) -> ForecastResult<Array2<f64>> {
    let n_ell = lmax + 1 - lmin;
    match x.ndim() {
        2 => {
            let row = x.index_axis(Axis(0), i_cmb);
            let n_freq = row.len();
            let mut out = Array2::<f64>::zeros((n_ell, n_freq));
            for mut r in out.outer_iter_mut() {
                r.assign(&row);
            }
            Ok(out)
        }
        _ => {
            let batched = as_ell_batch(x, lmin, lmax)?;
            Ok(batched.slice(s![lmin..=lmax, i_cmb, ..]).to_owned())
        }
    }
}

fn as_ell_batch(x: &ArrayD<f64>, lmin: usize, lmax: usize) -> ForecastResult<ArrayView3<'_, f64>> {
    let view = x.view().into_dimensionality::<Ix3>().map_err(|_| ForecastError::ShapeMismatch {
        what: "per-multipole weights",
        expected: vec![lmax + 1],
        found: x.shape().to_vec(),
    })?;
    if view.len_of(Axis(0)) <= lmax {
        return Err(ForecastError::InvalidRange { lmin, lmax, reason: "per-multipole weights end before lmax" });
    }
    Ok(view)
}

fn true_noise_shape(found: &[usize], n_freq: usize) -> ForecastError {
    ForecastError::ShapeMismatch { what: "true noise covariance", expected: vec![n_freq, n_freq], found: found.to_vec() }
}
