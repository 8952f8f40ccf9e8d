//! separation::comp_sep — the parametric fit engine.
//!
//! Purpose
//! -------
//! Fit the spectral parameters of a [`MixingModel`] to multi-frequency data
//! by maximizing the concentrated likelihood, then derive everything the
//! downstream stages need at the optimum: amplitudes, residuals, the
//! Gauss–Newton Fisher matrix and its inverse, the observed information,
//! `χ_dB` maps and `(AᵗN⁻¹A)⁻¹`.
//!
//! Key behaviors
//! -------------
//! - [`comp_sep`] masks every pixel holding an UNSEEN/NaN entry, fits the
//!   remaining pixels jointly and returns maps with UNSEEN at the masked
//!   pixels.
//! - [`multi_comp_sep`] runs one independent fit per patch label. Patches
//!   without a valid pixel are skipped and reported as UNSEEN. With the
//!   `parallel` feature the patches are fitted on the rayon pool; results
//!   are assembled in label order either way.
//! - A fit that stops without converging is an error
//!   ([`SeparationError::NotConverged`]) unless
//!   [`SeparationOptions::accept_unconverged`] is set, in which case the
//!   diagnostics carry the optimizer status.
//!
//! Invariants & assumptions
//! ------------------------
//! - Data use the internal layout `(n_pix, ..., n_freq)`. Per-pixel weights
//!   have the same batch axes as the data; anything with fewer batch axes is
//!   broadcast.
//! - `x0` and bounds default to the model's own defaults and bounds.
//!
//! Downstream usage
//! ----------------
//! - The recipes in `separation::recipes` build the weights and prewhitening
//!   and call these entry points; the forecast consumes the resulting
//!   [`SeparationFit`].
use crate::{
    algebra::{broadcast::broadcast_to, noise_weights::InvNoise},
    diagnostics::{EventLog, EventSink, PipelineEvent},
    inference::fisher::invert_fisher,
    optimization::{
        errors::OptError,
        loglik_optimizer::{MLEOptions, maximize_bounded},
        numerical_stability::bounds::BoundTransform,
    },
    separation::{
        errors::{SeparationError, SeparationResult},
        likelihood::{
            MixingModel, SpectralData, SpectralLikelihood, chi_db_at, fisher_at, observed_information_at,
        },
        masking::{PixelMask, UNSEEN},
        result::{FitDiagnostics, PatchSeparation, SeparationFit, unseen_maps},
    },
};
use ndarray::{Array1, Array2, Array3, ArrayD, ArrayViewD, Axis, IxDyn};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use std::fmt;

/// Options shared by every separation entry point.
#[derive(Clone, Default)]
pub struct SeparationOptions {
    /// Starting point in model space; the model defaults when `None`.
    pub x0: Option<Array1<f64>>,
    /// Per-parameter bounds; the model bounds when `None`.
    pub bounds: Option<BoundTransform>,
    pub mle: MLEOptions,
    /// Return a fit whose optimizer did not converge instead of failing.
    pub accept_unconverged: bool,
    /// Receives every pipeline event as it is recorded.
    pub sink: Option<EventSink>,
}

impl SeparationOptions {
    /// # Errors
    /// - [`SeparationError::InvalidOption`] for non-finite starting values or
    ///   a bounds/start length mismatch.
    /// - [`SeparationError::Opt`] (`StartOutsideBounds`) when `x0` violates
    ///   `bounds`.
    pub fn new(
        x0: Option<Array1<f64>>, bounds: Option<BoundTransform>, mle: MLEOptions, accept_unconverged: bool,
    ) -> SeparationResult<Self> {
        if let Some(x) = &x0 {
            if x.iter().any(|v| !v.is_finite()) {
                return Err(SeparationError::InvalidOption {
                    name: "x0",
                    reason: "starting values must be finite",
                });
            }
        }
        if let (Some(x), Some(b)) = (&x0, &bounds) {
            if x.len() != b.len() {
                return Err(SeparationError::InvalidOption {
                    name: "bounds",
                    reason: "one bound per starting value is required",
                });
            }
            b.to_unconstrained(x)?;
        }
        Ok(Self { x0, bounds, mle, accept_unconverged, sink: None })
    }

    pub fn with_sink(mut self, sink: EventSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Fresh log wired to the configured sink.
    pub(crate) fn event_log(&self) -> EventLog {
        match &self.sink {
            Some(sink) => EventLog::with_sink(sink.clone()),
            None => EventLog::new(),
        }
    }
}

impl fmt::Debug for SeparationOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeparationOptions")
            .field("x0", &self.x0)
            .field("bounds", &self.bounds)
            .field("mle", &self.mle)
            .field("accept_unconverged", &self.accept_unconverged)
            .field("sink", &self.sink.as_ref().map(|_| "<callback>"))
            .finish()
    }
}

/// Everything computed by one fit, on the compacted samples.
#[derive(Debug, Clone)]
pub(crate) struct FitCore {
    pub x: Array1<f64>,
    pub sigma: Array2<f64>,
    pub fisher: Array2<f64>,
    pub observed_information: Array2<f64>,
    pub s: ArrayD<f64>,
    pub chi: ArrayD<f64>,
    pub chi_db: Vec<ArrayD<f64>>,
    pub inv_atna: ArrayD<f64>,
    pub chi2: f64,
    pub diagnostics: FitDiagnostics,
}

/// Maximize the spectral likelihood of `model` on `data` and derive the
/// post-fit products.
pub(crate) fn fit_spectral<M: MixingModel + ?Sized>(
    model: &M, data: &SpectralData, opts: &SeparationOptions, patch: Option<usize>, log: &mut EventLog,
) -> SeparationResult<FitCore> {
    let p = model.n_params();
    if data.n_freq() != model.n_freq() {
        return Err(SeparationError::FrequencyMismatch { expected: model.n_freq(), found: data.n_freq() });
    }
    let x0 = opts.x0.clone().unwrap_or_else(|| model.defaults());
    if x0.len() != p {
        return Err(OptError::ParamLengthMismatch { what: "x0", expected: p, found: x0.len() }.into());
    }
    let bounds = opts.bounds.clone().unwrap_or_else(|| model.bounds());
    if bounds.len() != p {
        return Err(OptError::ParamLengthMismatch { what: "bounds", expected: p, found: bounds.len() }.into());
    }

    log.record(PipelineEvent::FitStarted { patch, n_params: p, n_samples: data.n_samples() });
    let like = SpectralLikelihood::new(model);
    let (x, diagnostics) = if p == 0 {
        (x0, FitDiagnostics::fixed())
    } else {
        let outcome = maximize_bounded(&like, &x0, &bounds, data, &opts.mle)?;
        let diagnostics = FitDiagnostics::from(&outcome);
        (outcome.theta_hat, diagnostics)
    };
    let ev = like.evaluate(&x, data)?;
    log.record(PipelineEvent::FitFinished {
        patch,
        status: diagnostics.status.clone(),
        converged: diagnostics.converged,
        iterations: diagnostics.iterations,
        chi2: ev.chi2,
        grad_norm: diagnostics.grad_norm,
    });
    if !diagnostics.converged && !opts.accept_unconverged {
        return Err(SeparationError::NotConverged {
            x,
            status: diagnostics.status,
            iterations: diagnostics.iterations,
            grad_norm: diagnostics.grad_norm,
        });
    }

    let c = model.n_comp();
    let nd = data.data().ndim();
    let mut target = data.data().shape()[..nd - 1].to_vec();
    target.extend([c, c]);
    let inv_atna = ev.kernel.inv_atna()?;
    let inv_atna = broadcast_to("inv_atna", &inv_atna.view(), &target)?.to_owned();

    let (fisher, sigma, observed_information, chi_db) = if p == 0 {
        (Array2::zeros((0, 0)), Array2::zeros((0, 0)), Array2::zeros((0, 0)), Vec::new())
    } else {
        let a_db = model.gradient(&x)?;
        let a_dbdb = model.hessian(&x)?;
        let fisher = fisher_at(&ev, &a_db, data.inv_n())?;
        let sigma = invert_fisher(&fisher)?;
        let observed = observed_information_at(&ev, &a_db, &a_dbdb, data)?;
        let chi_db = chi_db_at(&ev, &a_db)?;
        (fisher, sigma, observed, chi_db)
    };

    Ok(FitCore {
        x,
        sigma,
        fisher,
        observed_information,
        s: ev.s,
        chi: ev.chi,
        chi_db,
        inv_atna,
        chi2: ev.chi2,
        diagnostics,
    })
}

fn check_layout(data: &ArrayViewD<'_, f64>) -> SeparationResult<()> {
    if data.ndim() < 2 {
        return Err(SeparationError::DataShape {
            what: "data",
            shape: data.shape().to_vec(),
            reason: "expected (n_pix, ..., n_freq)",
        });
    }
    Ok(())
}

/// Joint fit over every unmasked pixel.
///
/// # Arguments
/// - `data`: internal layout `(n_pix, ..., n_freq)`; pixels with any
///   UNSEEN/NaN entry are excluded.
/// - `inv_n`: weights broadcastable against the data.
///
/// # Errors
/// - [`SeparationError::NoValidSamples`] when every pixel is masked.
/// - [`SeparationError::NotConverged`] unless unconverged fits are accepted.
/// - Shape, model and linear-algebra failures from the layers below.
pub fn comp_sep<M: MixingModel + ?Sized>(
    model: &M, data: ArrayViewD<'_, f64>, inv_n: &InvNoise, opts: &SeparationOptions,
) -> SeparationResult<SeparationFit> {
    check_layout(&data)?;
    let mask = PixelMask::from_data(data.view())?;
    comp_sep_masked(model, data, inv_n, &mask, opts)
}

/// [`comp_sep`] with an explicit pixel mask.
pub fn comp_sep_masked<M: MixingModel + ?Sized>(
    model: &M, data: ArrayViewD<'_, f64>, inv_n: &InvNoise, mask: &PixelMask, opts: &SeparationOptions,
) -> SeparationResult<SeparationFit> {
    check_layout(&data)?;
    if mask.n_pix() != data.shape()[0] {
        return Err(SeparationError::DataShape {
            what: "mask",
            shape: vec![mask.n_pix()],
            reason: "mask length must equal the number of pixels",
        });
    }
    let mut log = opts.event_log();
    log.record(PipelineEvent::MaskApplied { n_masked: mask.n_masked(), n_total: mask.n_pix() });
    if mask.n_good() == 0 {
        return Err(SeparationError::NoValidSamples);
    }

    let weights = inv_n.compact_pixels(data.ndim() - 1, mask.n_pix(), mask.keep());
    let spectral = SpectralData::new(mask.compact(data), weights)?;
    let core = fit_spectral(model, &spectral, opts, None, &mut log)?;

    Ok(SeparationFit {
        params: model.param_names(),
        x: core.x,
        sigma: core.sigma,
        fisher: core.fisher,
        observed_information: core.observed_information,
        s: mask.expand(core.s.view(), UNSEEN),
        chi: mask.expand(core.chi.view(), UNSEEN),
        chi_db: core.chi_db.iter().map(|m| mask.expand(m.view(), UNSEEN)).collect(),
        inv_atna: mask.expand(core.inv_atna.view(), UNSEEN),
        mask_good: mask.good().clone(),
        chi2: core.chi2,
        diagnostics: core.diagnostics,
        log,
    })
}

enum PatchOutcome {
    Skipped { log: EventLog },
    Fitted { keep: Vec<usize>, core: Box<FitCore>, log: EventLog },
}

/// Independent fits on the pixels sharing each patch label.
///
/// # Arguments
/// - `labels`: one patch index per pixel; patches are `0..=max(labels)`.
///
/// # Errors
/// - [`SeparationError::PatchLabels`] when `labels` does not cover the
///   pixels.
/// - [`SeparationError::NoValidSamples`] when every pixel is masked.
/// - The first failing patch's error otherwise.
pub fn multi_comp_sep<M: MixingModel + ?Sized>(
    model: &M, data: ArrayViewD<'_, f64>, inv_n: &InvNoise, labels: &[usize], opts: &SeparationOptions,
) -> SeparationResult<PatchSeparation> {
    check_layout(&data)?;
    let n_pix = data.shape()[0];
    if labels.len() != n_pix {
        return Err(SeparationError::PatchLabels { expected: n_pix, found: labels.len() });
    }
    let mask = PixelMask::from_data(data.view())?;
    let mut log = opts.event_log();
    log.record(PipelineEvent::MaskApplied { n_masked: mask.n_masked(), n_total: n_pix });
    if mask.n_good() == 0 {
        return Err(SeparationError::NoValidSamples);
    }
    let n_patch = labels.iter().max().map_or(0, |&m| m + 1);
    let batch_ndim = data.ndim() - 1;

    let fit_patch = |patch: usize| -> SeparationResult<PatchOutcome> {
        let mut patch_log = opts.event_log();
        let keep: Vec<usize> =
            (0..n_pix).filter(|&i| labels[i] == patch && mask.good()[i]).collect();
        if keep.is_empty() {
            patch_log.record(PipelineEvent::PatchSkipped { patch, reason: "no unmasked pixel" });
            return Ok(PatchOutcome::Skipped { log: patch_log });
        }
        let weights = inv_n.compact_pixels(batch_ndim, n_pix, &keep);
        let spectral = SpectralData::new(data.select(Axis(0), &keep), weights)?;
        let core = fit_spectral(model, &spectral, opts, Some(patch), &mut patch_log)?;
        Ok(PatchOutcome::Fitted { keep, core: Box::new(core), log: patch_log })
    };

    #[cfg(feature = "parallel")]
    let outcomes: Vec<SeparationResult<PatchOutcome>> = (0..n_patch).into_par_iter().map(fit_patch).collect();
    #[cfg(not(feature = "parallel"))]
    let outcomes: Vec<SeparationResult<PatchOutcome>> = (0..n_patch).map(fit_patch).collect();
    let outcomes = outcomes.into_iter().collect::<SeparationResult<Vec<_>>>()?;

    let p = model.n_params();
    let c = model.n_comp();
    let batch_shape = data.shape()[..batch_ndim].to_vec();
    let with_core = |core: &[usize]| {
        let mut shape = batch_shape.clone();
        shape.extend_from_slice(core);
        ArrayD::from_elem(IxDyn(&shape), UNSEEN)
    };
    let mut x = Array2::from_elem((n_patch, p), UNSEEN);
    let mut sigma = Array3::from_elem((n_patch, p, p), UNSEEN);
    let mut s = with_core(&[c]);
    let mut chi = ArrayD::from_elem(data.raw_dim(), UNSEEN);
    let mut chi_db = unseen_maps(p, &batch_shape);
    let mut inv_atna = with_core(&[c, c]);
    let mut chi2 = Array1::from_elem(n_patch, UNSEEN);
    let mut diagnostics = vec![None; n_patch];

    for (patch, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            PatchOutcome::Skipped { log: patch_log } => log.absorb(patch_log),
            PatchOutcome::Fitted { keep, core, log: patch_log } => {
                x.row_mut(patch).assign(&core.x);
                sigma.index_axis_mut(Axis(0), patch).assign(&core.sigma);
                scatter_rows(&mut s, core.s.view(), &keep);
                scatter_rows(&mut chi, core.chi.view(), &keep);
                scatter_rows(&mut inv_atna, core.inv_atna.view(), &keep);
                for (dst, src) in chi_db.iter_mut().zip(&core.chi_db) {
                    scatter_rows(dst, src.view(), &keep);
                }
                chi2[patch] = core.chi2;
                diagnostics[patch] = Some(core.diagnostics);
                log.absorb(patch_log);
            }
        }
    }

    Ok(PatchSeparation {
        params: model.param_names(),
        labels: Array1::from(labels.to_vec()),
        x,
        sigma,
        s,
        chi,
        chi_db,
        inv_atna,
        mask_good: mask.good().clone(),
        chi2,
        diagnostics,
        log,
    })
}

/// Copy the rows of `src` to rows `rows` of `dst` (leading axis).
pub(crate) fn scatter_rows(dst: &mut ArrayD<f64>, src: ArrayViewD<'_, f64>, rows: &[usize]) {
    for (row, &pix) in src.axis_iter(Axis(0)).zip(rows) {
        dst.index_axis_mut(Axis(0), pix).assign(&row);
    }
}
