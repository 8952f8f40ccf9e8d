//! separation::harmonic — component separation on spherical-harmonic
//! coefficients.
//!
//! Purpose
//! -------
//! Fit the spectral parameters on alms instead of maps, with weights that can
//! change with ℓ (beams, inhomogeneous noise levels). The complex alms are
//! packed into the real layout of `alm::codec`, where every real slot is one
//! independent sample of the likelihood.
//!
//! Key behaviors
//! -------------
//! - Coefficients below `lmin`, and coefficients masked in any frequency,
//!   carry no information; slots with ℓ < `lmin` are excluded from the fit.
//! - Per-ℓ weights `(lmax + 1, n_freq[, n_freq])` are expanded to the real
//!   slots; weights without an ℓ axis are broadcast.
//! - The amplitudes come back as complex alms, and `cl_in` / `cl_out` are the
//!   empirical spectra of the input and output alms divided by `fsky`.
//!
//! Conventions
//! -----------
//! - Input alms `(n_freq, [n_stokes,] n_lm)`, healpy ordering.
//! - `cl_in`: `(n_freq, n_freq, lmax + 1)` or
//!   `(n_stokes, n_freq, n_freq, lmax + 1)`; `cl_out` likewise over
//!   components.
use crate::{
    algebra::noise_weights::InvNoise,
    alm::{
        codec::{AlmLayout, format_alms, r_to_c_alms},
        spectra::empirical_harmonic_covariance,
    },
    separation::{
        comp_sep::{SeparationOptions, comp_sep_masked},
        errors::{SeparationError, SeparationResult},
        likelihood::MixingModel,
        masking::{PixelMask, is_unseen, swap_outer_axes},
        result::SeparationFit,
    },
};
use nalgebra::Complex;
use ndarray::{Array1, ArrayD, ArrayViewD, IxDyn};

/// Result of a harmonic-domain fit.
#[derive(Debug, Clone)]
pub struct HarmonicSeparation {
    fit: SeparationFit,
    s_alms: ArrayD<Complex<f64>>,
    cl_in: ArrayD<f64>,
    cl_out: ArrayD<f64>,
    lmin: usize,
    fsky: f64,
}

impl HarmonicSeparation {
    /// The fit on real slots (internal layout `(2 n_lm, [n_stokes,] ·)`).
    pub fn fit(&self) -> &SeparationFit {
        &self.fit
    }

    /// Amplitude alms `(n_comp, [n_stokes,] n_lm)`, zero below `lmin`.
    pub fn s_alms(&self) -> &ArrayD<Complex<f64>> {
        &self.s_alms
    }

    pub fn cl_in(&self) -> &ArrayD<f64> {
        &self.cl_in
    }

    pub fn cl_out(&self) -> &ArrayD<f64> {
        &self.cl_out
    }

    pub fn lmin(&self) -> usize {
        self.lmin
    }

    pub fn fsky(&self) -> f64 {
        self.fsky
    }

    pub fn into_fit(self) -> SeparationFit {
        self.fit
    }
}

/// Leading (ℓ) axis length of per-ℓ weights, if they have one.
fn ell_axis(inv_n: &InvNoise) -> Option<usize> {
    if inv_n.batch_ndim() == 0 {
        return None;
    }
    match inv_n {
        InvNoise::Identity => None,
        InvNoise::Diagonal(d) => d.shape().first().copied(),
        InvNoise::Full(m) => m.shape().first().copied(),
    }
}

/// Empirical spectra of `(n_chan, [n_stokes,] n_lm)` alms divided by `fsky`.
fn spectra(alms: &ArrayD<Complex<f64>>, fsky: f64) -> SeparationResult<ArrayD<f64>> {
    let view = alms.view();
    let cl = if view.ndim() == 3 {
        empirical_harmonic_covariance(view.permuted_axes(IxDyn(&[1, 0, 2])))?
    } else {
        empirical_harmonic_covariance(view)?
    };
    Ok(cl / fsky)
}

/// Alms moved to the internal real layout, with per-slot weights and the
/// `lmin` mask.
pub(crate) struct PreparedAlms {
    ells: Vec<usize>,
    pub(crate) n_stokes: Option<usize>,
    real: ArrayD<f64>,
    internal: ArrayD<f64>,
    weights: InvNoise,
    mask: PixelMask,
    lmin: usize,
    fsky: f64,
}

impl PreparedAlms {
    pub(crate) fn new(
        n_freq: usize, alms: ArrayViewD<'_, Complex<f64>>, inv_n: Option<&InvNoise>, lmin: usize, fsky: Option<f64>,
    ) -> SeparationResult<Self> {
        let fsky = fsky.unwrap_or(1.0);
        if !(fsky > 0.0 && fsky <= 1.0) {
            return Err(SeparationError::InvalidOption { name: "fsky", reason: "must lie in (0, 1]" });
        }
        if !(2..=3).contains(&alms.ndim()) {
            return Err(SeparationError::DataShape {
                what: "alms",
                shape: alms.shape().to_vec(),
                reason: "expected (n_freq, n_lm) or (n_freq, n_stokes, n_lm)",
            });
        }
        if alms.shape()[0] != n_freq {
            return Err(SeparationError::FrequencyMismatch { expected: n_freq, found: alms.shape()[0] });
        }
        let layout = AlmLayout::from_size(alms.shape()[alms.ndim() - 1])?;
        let ells = layout.real_alm_ells();
        let n_stokes = (alms.ndim() == 3).then(|| alms.shape()[1]);

        let real = format_alms(alms.view(), lmin)?;
        let internal = swap_outer_axes(real.view());

        let mut weights = match inv_n {
            None => InvNoise::Identity,
            Some(w) => match ell_axis(w) {
                None => w.clone(),
                Some(n) if n == layout.lmax() + 1 => w.select_leading(&ells),
                Some(n) => {
                    return Err(SeparationError::DataShape {
                        what: "inverse noise",
                        shape: vec![n],
                        reason: "leading axis must have lmax + 1 entries",
                    });
                }
            },
        };
        if n_stokes.is_some() && ell_axis(&weights).is_some() {
            weights = weights.insert_batch_axis(1);
        }

        let mask = PixelMask::from_good(ells.iter().map(|&l| l >= lmin).collect::<Array1<bool>>());
        Ok(Self { ells, n_stokes, real, internal, weights, mask, lmin, fsky })
    }

    /// ℓ of every slot that enters the fit, in fit order.
    pub(crate) fn fitted_ells(&self) -> Vec<usize> {
        self.mask.keep().iter().map(|&k| self.ells[k]).collect()
    }

    /// Fit `model` on the prepared slots and return the amplitudes as alms.
    pub(crate) fn separate<M: MixingModel + ?Sized>(
        self, model: &M, opts: &SeparationOptions,
    ) -> SeparationResult<HarmonicSeparation> {
        let fit = comp_sep_masked(model, self.internal.view(), &self.weights, &self.mask, opts)?;

        let s_real = swap_outer_axes(fit.s().view()).mapv(|v| if is_unseen(v) { 0.0 } else { v });
        let s_alms = r_to_c_alms(s_real.view())?;
        let cl_in = spectra(&r_to_c_alms(self.real.view())?, self.fsky)?;
        let cl_out = spectra(&s_alms, self.fsky)?;

        Ok(HarmonicSeparation { fit, s_alms, cl_in, cl_out, lmin: self.lmin, fsky: self.fsky })
    }
}

/// Joint fit of all alms with ℓ ≥ `lmin`.
///
/// # Arguments
/// - `model`: a [`MixingMatrix`](crate::components::mixing_matrix::MixingMatrix)
///   or any other [`MixingModel`]; `A` may be batched over the real slots.
/// - `alms`: `(n_freq, [n_stokes,] n_lm)`; UNSEEN/NaN coefficients are
///   dropped in every frequency.
/// - `inv_n`: per-ℓ weights with a leading axis of length `lmax + 1`, or
///   ℓ-independent weights; identity when `None`.
/// - `fsky`: sky fraction in `(0, 1]` used to normalize the spectra; 1 when
///   `None`.
///
/// # Errors
/// - [`SeparationError::InvalidOption`] for `fsky` outside `(0, 1]`.
/// - [`SeparationError::DataShape`] for a wrong rank or ℓ axis.
/// - [`SeparationError::Alm`] for a non-triangular alm axis.
/// - As [`comp_sep_masked`] otherwise.
pub fn harmonic_comp_sep<M: MixingModel + ?Sized>(
    model: &M, alms: ArrayViewD<'_, Complex<f64>>, inv_n: Option<&InvNoise>, lmin: usize, fsky: Option<f64>,
    opts: &SeparationOptions,
) -> SeparationResult<HarmonicSeparation> {
    PreparedAlms::new(model.n_freq(), alms, inv_n, lmin, fsky)?.separate(model, opts)
}
