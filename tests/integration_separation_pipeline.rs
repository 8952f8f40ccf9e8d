//! Integration tests for parametric component separation.
//!
//! Purpose
//! -------
//! - Validate the end-to-end separation path: from emission laws and an
//!   instrument, through the mixing matrix and the spectral likelihood, to
//!   fitted spectral parameters, amplitudes and their uncertainties.
//! - Check the masking contract on realistic inputs: a masked pixel must
//!   behave exactly as if it had never been part of the data.
//!
//! Coverage
//! --------
//! - `components`: CMB, dust and synchrotron laws through `MixingMatrix`.
//! - `separation::comp_sep`: joint fits in the internal layout, masking.
//! - `separation::recipes`: instrument-driven fits on `(freq, stokes, pix)`
//!   maps, per patch.
//! - `diagnostics`: events forwarded to a caller-installed sink.
//!
//! Exclusions
//! ----------
//! - Kernel-level algebra and derivative checks; unit tests cover those.
//! - Alm-domain separation, exercised by the forecast integration tests.
use approx::assert_relative_eq;
use ndarray::{Array1, Array2, Array3, ArrayD, Axis, IxDyn, array};
use rust_compsep::{
    algebra::InvNoise,
    components::{Cmb, Dust, MixingMatrix, Synchrotron},
    diagnostics::PipelineEvent,
    instrument::{Instrument, InstrumentDescriptor},
    optimization::loglik_optimizer::MLEOptions,
    separation::{SeparationOptions, UNSEEN, basic_comp_sep_patches, comp_sep, is_unseen},
};
use std::sync::{Arc, Mutex};

const FREQS: [f64; 5] = [30.0, 90.0, 150.0, 220.0, 353.0];

/// Purpose
/// -------
/// CMB plus dust with a fixed 20 K temperature on the three central
/// frequencies: a single free parameter, β_d.
fn cmb_dust() -> MixingMatrix {
    MixingMatrix::builder(&FREQS[1..4])
        .with(Cmb::default())
        .with(Dust::new(353.0).with_fixed_temp(20.0))
        .build()
        .unwrap()
}

/// Purpose
/// -------
/// Three-component model over all five frequencies, free parameters
/// (β_d, β_pl).
fn three_components() -> MixingMatrix {
    MixingMatrix::builder(&FREQS)
        .with(Cmb::default())
        .with(Dust::new(353.0).with_fixed_temp(20.0))
        .with(Synchrotron::new(23.0))
        .build()
        .unwrap()
}

/// Purpose
/// -------
/// Polarization depths for the five-band instrument.
fn instrument() -> Instrument {
    InstrumentDescriptor::new(&FREQS).with_depth_p(&[20.0, 5.0, 6.0, 12.0, 40.0]).validate().unwrap()
}

/// Purpose
/// -------
/// Deterministic, non-degenerate amplitudes for `n_pix` pixels and
/// `n_comp` components.
fn amplitudes(n_pix: usize, n_comp: usize) -> Array2<f64> {
    Array2::from_shape_fn((n_pix, n_comp), |(p, c)| 3.0 + 2.5 * ((p as f64) * 1.3 + (c as f64) * 0.7).sin())
}

/// Purpose
/// -------
/// Internal-layout data `(n_pix, n_freq)` given by `d = A s`, plus an
/// optional small deterministic perturbation.
fn internal_data(a: &ArrayD<f64>, s: &Array2<f64>, perturb: f64) -> ArrayD<f64> {
    let a = a.view().into_dimensionality::<ndarray::Ix2>().unwrap();
    let mut d = s.dot(&a.t());
    for ((p, f), v) in d.indexed_iter_mut() {
        *v += perturb * ((p * 7 + f * 3) as f64).cos();
    }
    d.into_dyn()
}

/// Purpose
/// -------
/// Options starting the fit away from the true parameters.
fn start_at(x0: Array1<f64>) -> SeparationOptions {
    SeparationOptions::new(Some(x0), None, MLEOptions::default(), false).unwrap()
}

#[test]
// Purpose
// -------
// Noiseless data generated by the model are recovered exactly.
//
// Given
// -----
// - 3 frequencies, [CMB, dust], β_d = 1.54, 16 pixels, identity weights;
//   dust brighter than the CMB so that β_d is well constrained.
//
// Expect
// ------
// - β̂ and every amplitude within 1e-6 of the truth; χ² ≈ 0.
// - Positive Σ, equal to the inverse Fisher information.
fn noiseless_fit_recovers_parameters_and_amplitudes() {
    // Arrange
    let mm = cmb_dust();
    let a = mm.evaluate(&array![1.54]).unwrap();
    let mut s = amplitudes(16, 2);
    s.column_mut(1).mapv_inplace(|v| 100.0 * v);
    let d = internal_data(&a, &s, 0.0);

    // Act
    let fit = comp_sep(&mm, d.view(), &InvNoise::Identity, &start_at(array![1.8])).unwrap();

    // Assert
    assert_relative_eq!(fit.x()[0], 1.54, epsilon = 1e-6);
    for (got, want) in fit.s().iter().zip(s.iter()) {
        assert_relative_eq!(*got, *want, epsilon = 1e-6, max_relative = 1e-6);
    }
    assert!(fit.chi2() < 1e-10);
    assert!(fit.sigma()[[0, 0]] > 0.0);
    assert!(fit.standard_errors()[0] > 0.0);
    assert_relative_eq!(fit.fisher()[[0, 0]] * fit.sigma()[[0, 0]], 1.0, max_relative = 1e-8);
}

#[test]
// Purpose
// -------
// A masked pixel contributes nothing: fitting with it marked UNSEEN equals
// fitting without it.
//
// Given
// -----
// - 12 noisy pixels; pixel 4 has a single UNSEEN frequency in one run and
//   is removed entirely in the other.
//
// Expect
// ------
// - Identical β̂ and χ²; identical amplitudes on shared pixels.
// - Pixel 4 of the masked run is UNSEEN in s and χ.
fn masked_pixel_is_equivalent_to_a_removed_pixel() {
    // Arrange
    let mm = cmb_dust();
    let a = mm.evaluate(&array![1.6]).unwrap();
    let d = internal_data(&a, &amplitudes(12, 2), 0.05);
    let mut masked = d.clone();
    masked[[4, 1]] = UNSEEN;
    let keep: Vec<usize> = (0..12).filter(|&p| p != 4).collect();
    let removed = d.select(Axis(0), &keep);
    let opts = start_at(array![1.4]);

    // Act
    let with_mask = comp_sep(&mm, masked.view(), &InvNoise::Identity, &opts).unwrap();
    let without = comp_sep(&mm, removed.view(), &InvNoise::Identity, &opts).unwrap();

    // Assert
    assert_relative_eq!(with_mask.x()[0], without.x()[0], epsilon = 1e-10);
    assert_relative_eq!(with_mask.chi2(), without.chi2(), epsilon = 1e-10);
    assert!(!with_mask.mask_good()[4]);
    assert!(with_mask.s().index_axis(Axis(0), 4).iter().all(|&v| is_unseen(v)));
    assert!(with_mask.chi().index_axis(Axis(0), 4).iter().all(|&v| is_unseen(v)));
    for (i, &p) in keep.iter().enumerate() {
        for c in 0..2 {
            assert_relative_eq!(with_mask.s()[[p, c]], without.s()[[i, c]], epsilon = 1e-8);
        }
    }
}

#[test]
// Purpose
// -------
// Instrument-driven fits on Q/U maps recover a different β per patch and
// forward events to the caller's sink.
//
// Given
// -----
// - 5 frequencies, [CMB, dust, synchrotron], 48 pixels (HEALPix nside 2) in 2 patches with
//   (β_d, β_pl) = (1.5, −3.1) and (1.65, −2.9); noiseless maps.
//
// Expect
// ------
// - Each patch recovers its parameters; the per-pixel parameter maps
//   follow the labels.
// - The sink receives the events of the result log (in any order when
//   patches run in parallel).
fn patch_fits_on_stokes_maps() {
    // Arrange
    let mm = three_components();
    let truths = [array![1.5, -3.1], array![1.65, -2.9]];
    let labels: Vec<usize> = (0..48).map(|p| p % 2).collect();
    let s = amplitudes(48, 3);
    let mut maps = Array3::<f64>::zeros((5, 2, 48));
    for (p, &label) in labels.iter().enumerate() {
        let a = mm.evaluate(&truths[label]).unwrap();
        for f in 0..5 {
            for q in 0..2 {
                let scale = if q == 0 { 1.0 } else { -0.6 };
                maps[[f, q, p]] = (0..3).map(|c| a[[f, c]] * s[[p, c]] * scale).sum();
            }
        }
    }
    let seen = Arc::new(Mutex::new(Vec::<PipelineEvent>::new()));
    let sink_store = Arc::clone(&seen);
    let opts = start_at(array![1.55, -3.0])
        .with_sink(Arc::new(move |e: &PipelineEvent| sink_store.lock().unwrap().push(e.clone())));

    // Act
    let out = basic_comp_sep_patches(&mm, &instrument(), maps.view().into_dyn(), &labels, &opts).unwrap();

    // Assert
    assert_eq!(out.n_patches(), 2);
    for (patch, truth) in truths.iter().enumerate() {
        assert!(!out.is_skipped(patch));
        assert_relative_eq!(out.x()[[patch, 0]], truth[0], epsilon = 1e-5);
        assert_relative_eq!(out.x()[[patch, 1]], truth[1], epsilon = 1e-5);
    }
    let x_maps = out.x_maps();
    for (p, &label) in labels.iter().enumerate() {
        assert_relative_eq!(x_maps[[p, 0]], truths[label][0], epsilon = 1e-5);
    }
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), out.log().len());
    assert!(out.log().events().iter().all(|e| seen.contains(e)));
    let finished = seen.iter().filter(|e| matches!(e, PipelineEvent::FitFinished { converged: true, .. })).count();
    assert_eq!(finished, 2);
}

#[test]
// Purpose
// -------
// Masking every pixel is an error rather than an empty result.
//
// Given
// -----
// - Four pixels, each with one UNSEEN frequency.
//
// Expect
// ------
// - `comp_sep` fails.
fn fully_masked_data_is_rejected() {
    // Arrange
    let mm = cmb_dust();
    let mut d = ArrayD::<f64>::from_elem(IxDyn(&[4, 3]), 1.0);
    for p in 0..4 {
        d[[p, p % 3]] = UNSEEN;
    }

    // Act
    let out = comp_sep(&mm, d.view(), &InvNoise::Identity, &SeparationOptions::default());

    // Assert
    assert!(out.is_err());
}
