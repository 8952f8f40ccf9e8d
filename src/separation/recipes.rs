//! separation::recipes — map-domain entry points in the caller layout.
//!
//! Purpose
//! -------
//! Wrap the fit engine for the usual pixel-domain inputs: maps shaped
//! `(n_freq, [n_stokes,] n_pix)` with UNSEEN marking missing entries.
//!
//! Key behaviors
//! -------------
//! - [`basic_comp_sep`] / [`basic_comp_sep_patches`]: white noise described
//!   by the instrument depths. Data and `A` are prewhitened by
//!   `resol_arcmin(nside) / depth` and the fit uses identity weights.
//! - [`weighted_comp_sep`]: per-pixel, per-frequency variance maps, weights
//!   `diag(1 / cov)`.
//! - [`adaptive_comp_sep`]: per-parameter cluster maps; the weights are
//!   `diag(pw²)` and `A` is not prewhitened.
//!
//! Invariants & assumptions
//! ------------------------
//! - A pixel is masked when any frequency (or Stokes entry) is UNSEEN, and
//!   for [`weighted_comp_sep`] also when any variance is UNSEEN or
//!   non-positive.
//! - `nside` is read from the pixel count; a single pixel stands for
//!   `nside = 0`. Other non-HEALPix pixel counts are rejected when
//!   prewhitening is needed.
//! - Without the depth a recipe needs, the data are used as given with
//!   identity weights.
use crate::{
    algebra::{batched::mul, noise_weights::InvNoise},
    components::mixing_matrix::MixingMatrix,
    instrument::{
        descriptor::Instrument,
        noise::{npix2nside, prewhiten_factors},
    },
    separation::{
        adaptive::{AdaptiveSeparation, clustered_comp_sep},
        comp_sep::{SeparationOptions, comp_sep_masked, multi_comp_sep},
        errors::{SeparationError, SeparationResult},
        masking::{PixelMask, is_unseen, swap_outer_axes},
        result::{PatchSeparation, SeparationFit},
    },
};
use ndarray::{ArrayD, ArrayViewD, Axis};

/// Caller-layout maps moved to the internal layout, after shape checks.
pub(crate) fn internal_maps(
    mm: &MixingMatrix, instrument: &Instrument, data: ArrayViewD<'_, f64>,
) -> SeparationResult<ArrayD<f64>> {
    if !(2..=3).contains(&data.ndim()) {
        return Err(SeparationError::DataShape {
            what: "data",
            shape: data.shape().to_vec(),
            reason: "expected (n_freq, n_pix) or (n_freq, n_stokes, n_pix)",
        });
    }
    if instrument.n_freq() != mm.n_freq() {
        return Err(SeparationError::FrequencyMismatch { expected: mm.n_freq(), found: instrument.n_freq() });
    }
    if data.shape()[0] != mm.n_freq() {
        return Err(SeparationError::FrequencyMismatch { expected: mm.n_freq(), found: data.shape()[0] });
    }
    Ok(swap_outer_axes(data))
}

/// `resol / depth` for internal-layout maps, or `None` without depths.
fn prewhitening_for(instrument: &Instrument, internal: &ArrayD<f64>) -> SeparationResult<Option<ArrayD<f64>>> {
    let n_pix = internal.shape()[0];
    let n_stokes = (internal.ndim() == 3).then(|| internal.shape()[1]);
    Ok(prewhiten_factors(instrument, n_stokes, map_nside(n_pix)?)?)
}

/// HEALPix `nside` of a map with `n_pix` pixels; a single pixel is `0`.
pub(crate) fn map_nside(n_pix: usize) -> SeparationResult<usize> {
    match n_pix {
        1 => Ok(0),
        n => npix2nside(n).ok_or(SeparationError::DataShape {
            what: "data",
            shape: vec![n],
            reason: "pixel count is not a HEALPix map size",
        }),
    }
}

/// Prewhitened mixing matrix and data, plus the mask of the raw data.
fn prewhitened(
    mm: &MixingMatrix, instrument: &Instrument, data: ArrayViewD<'_, f64>,
) -> SeparationResult<(MixingMatrix, ArrayD<f64>, PixelMask)> {
    let internal = internal_maps(mm, instrument, data)?;
    let mask = PixelMask::from_data(internal.view())?;
    match prewhitening_for(instrument, &internal)? {
        Some(pw) => {
            // Scaled sentinels are no longer recognizable as UNSEEN.
            let mut scaled = mul(internal.view(), pw.view())?;
            for (mut row, &good) in scaled.axis_iter_mut(Axis(0)).zip(mask.good().iter()) {
                if !good {
                    row.fill(f64::NAN);
                }
            }
            Ok((mm.clone().with_prewhitening(pw)?, scaled, mask))
        }
        None => Ok((mm.clone(), internal, mask)),
    }
}

/// Joint fit of maps with white noise given by the instrument depths.
///
/// # Arguments
/// - `data`: `(n_freq, n_pix)` or `(n_freq, n_stokes, n_pix)`.
///
/// # Returns
/// A [`SeparationFit`] whose amplitudes are in the units of the input maps
/// and whose `χ` is in prewhitened units.
pub fn basic_comp_sep(
    mm: &MixingMatrix, instrument: &Instrument, data: ArrayViewD<'_, f64>, opts: &SeparationOptions,
) -> SeparationResult<SeparationFit> {
    let (model, scaled, mask) = prewhitened(mm, instrument, data)?;
    comp_sep_masked(&model, scaled.view(), &InvNoise::Identity, &mask, opts)
}

/// [`basic_comp_sep`] with one independent fit per patch label.
pub fn basic_comp_sep_patches(
    mm: &MixingMatrix, instrument: &Instrument, data: ArrayViewD<'_, f64>, labels: &[usize],
    opts: &SeparationOptions,
) -> SeparationResult<PatchSeparation> {
    let (model, scaled, _) = prewhitened(mm, instrument, data)?;
    multi_comp_sep(&model, scaled.view(), &InvNoise::Identity, labels, opts)
}

/// Joint fit with per-pixel variance maps.
///
/// # Arguments
/// - `data`, `cov`: `(n_freq, [n_stokes,] n_pix)`, same shape.
///
/// # Errors
/// [`SeparationError::DataShape`] when the shapes differ, otherwise as
/// [`comp_sep_masked`].
pub fn weighted_comp_sep(
    mm: &MixingMatrix, instrument: &Instrument, data: ArrayViewD<'_, f64>, cov: ArrayViewD<'_, f64>,
    opts: &SeparationOptions,
) -> SeparationResult<SeparationFit> {
    if cov.shape() != data.shape() {
        return Err(SeparationError::DataShape {
            what: "cov",
            shape: cov.shape().to_vec(),
            reason: "variance maps must have the shape of the data",
        });
    }
    let internal = internal_maps(mm, instrument, data)?;
    let cov = swap_outer_axes(cov);
    let cov_good = cov
        .axis_iter(Axis(0))
        .map(|pixel| pixel.iter().all(|&v| !is_unseen(v) && v > 0.0))
        .collect();
    let mask = PixelMask::from_data(internal.view())?.intersect(&PixelMask::from_good(cov_good))?;
    let inv_n = InvNoise::from_variances(cov.view());
    comp_sep_masked(mm, internal.view(), &inv_n, &mask, opts)
}

/// Joint fit with spectral parameters that vary over clusters.
///
/// # Arguments
/// - `labels`: one cluster map of length `n_pix` per free parameter.
/// - `opts`: `x0` and `bounds` per free parameter, repeated per cluster.
pub fn adaptive_comp_sep(
    mm: &MixingMatrix, instrument: &Instrument, data: ArrayViewD<'_, f64>, labels: &[Vec<usize>],
    opts: &SeparationOptions,
) -> SeparationResult<AdaptiveSeparation> {
    let internal = internal_maps(mm, instrument, data)?;
    let inv_n = match prewhitening_for(instrument, &internal)? {
        Some(pw) => InvNoise::diagonal(pw.mapv(|w| w * w))?,
        None => InvNoise::Identity,
    };
    let base = mm.clone().without_prewhitening();
    clustered_comp_sep(&base, internal.view(), &inv_n, labels, opts)
}
