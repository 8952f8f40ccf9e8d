//! instrument::noise — noise levels and beams derived from an [`Instrument`].
//!
//! Purpose
//! -------
//! Convert map depths and beam widths into the weights used by the
//! separation and forecasting layers:
//!
//! - [`gauss_beam`]: the Gaussian beam transfer function `b_ℓ`;
//! - [`harmonic_noise_cov`]: the per-multipole inverse noise
//!   `(b_ℓ / depth_p[rad])²`;
//! - [`prewhiten_factors`]: pixel resolution over depth, per Stokes row;
//! - [`nside2resol_arcmin`] / [`npix2nside`]: HEALPix resolution helpers.
//!
//! Conventions
//! -----------
//! - Outputs keep the frequency axis last: `(lmax + 1, n_freq)` for
//!   harmonic weights, `(n_freq,)` or `(n_stokes, n_freq)` for prewhitening.
//! - A FWHM of zero (or no FWHM at all) means a unit beam.
use crate::instrument::{
    descriptor::Instrument,
    errors::{InstrumentError, InstrumentResult},
};
use ndarray::{Array1, Array2, ArrayD, Axis, stack};
use std::f64::consts::PI;

const ARCMIN_PER_RAD: f64 = 60.0 * 180.0 / PI;

/// Gaussian beam window `b_ℓ = exp(−ℓ(ℓ+1)σ²/2)` for ℓ = 0..=lmax.
///
/// `σ = fwhm / √(8 ln 2)` with `fwhm_arcmin` converted to radians.
pub fn gauss_beam(fwhm_arcmin: f64, lmax: usize) -> Array1<f64> {
    let sigma = (fwhm_arcmin / ARCMIN_PER_RAD) / (8.0 * 2f64.ln()).sqrt();
    Array1::from_shape_fn(lmax + 1, |l| {
        let l = l as f64;
        (-0.5 * l * (l + 1.0) * sigma * sigma).exp()
    })
}

/// Inverse noise per multipole and channel, `(b_ℓ / depth_p[rad])²`.
///
/// Returns shape `(lmax + 1, n_freq)`, ready to wrap as diagonal weights
/// batched over ℓ.
///
/// # Errors
/// [`InstrumentError::MissingField`] if the instrument has no `depth_p`.
pub fn harmonic_noise_cov(instrument: &Instrument, lmax: usize) -> InstrumentResult<Array2<f64>> {
    let depth = instrument.require_depth_p("harmonic_noise_cov")?;
    let n_freq = instrument.n_freq();
    let mut out = Array2::<f64>::zeros((lmax + 1, n_freq));
    for f in 0..n_freq {
        let bl = match instrument.fwhm() {
            Some(fwhm) => gauss_beam(fwhm[f], lmax),
            None => Array1::ones(lmax + 1),
        };
        let depth_rad = depth[f] / ARCMIN_PER_RAD;
        out.column_mut(f).assign(&bl.mapv(|b| (b / depth_rad).powi(2)));
    }
    Ok(out)
}

/// Angular size of a HEALPix pixel, in arcmin; `nside = 0` stands for a
/// single pixel covering the sphere.
pub fn nside2resol_arcmin(nside: usize) -> f64 {
    let resol = |n: f64| (4.0 * PI / (12.0 * n * n)).sqrt() * ARCMIN_PER_RAD;
    if nside == 0 { 12f64.sqrt() * resol(1.0) } else { resol(nside as f64) }
}

/// `nside` for a full-sky HEALPix map with `n_pix` pixels, if `n_pix` is one.
pub fn npix2nside(n_pix: usize) -> Option<usize> {
    if n_pix % 12 != 0 {
        return None;
    }
    let nside = ((n_pix / 12) as f64).sqrt().round() as usize;
    (nside > 0 && 12 * nside * nside == n_pix).then_some(nside)
}

/// Prewhitening factors `resol_arcmin(nside) / depth`.
///
/// `n_stokes` selects the depth rows:
/// - `None` or `Some(1)`: `depth_i`, shape `(n_freq,)`;
/// - `Some(2)`: `depth_p` twice, shape `(2, n_freq)`;
/// - `Some(3)`: `depth_i, depth_p, depth_p`, shape `(3, n_freq)`.
///
/// Returns `Ok(None)` when the instrument lacks the needed depth, in which
/// case the data are not prewhitened.
///
/// # Errors
/// [`InstrumentError::UnsupportedStokes`] for any other Stokes count.
pub fn prewhiten_factors(
    instrument: &Instrument, n_stokes: Option<usize>, nside: usize,
) -> InstrumentResult<Option<ArrayD<f64>>> {
    let resol = nside2resol_arcmin(nside);
    let sens: ArrayD<f64> = match n_stokes {
        None | Some(1) => match instrument.depth_i() {
            Some(d) => d.clone().into_dyn(),
            None => return Ok(None),
        },
        Some(2) => match instrument.depth_p() {
            Some(p) => stack(Axis(0), &[p.view(), p.view()])
                .map_err(|_| InstrumentError::UnsupportedStokes { n_stokes: 2 })?
                .into_dyn(),
            None => return Ok(None),
        },
        Some(3) => match (instrument.depth_i(), instrument.depth_p()) {
            (Some(i), Some(p)) => stack(Axis(0), &[i.view(), p.view(), p.view()])
                .map_err(|_| InstrumentError::UnsupportedStokes { n_stokes: 3 })?
                .into_dyn(),
            _ => return Ok(None),
        },
        Some(n) => return Err(InstrumentError::UnsupportedStokes { n_stokes: n }),
    };
    Ok(Some(sens.mapv(|d| resol / d)))
}
