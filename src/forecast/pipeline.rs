//! forecast::pipeline — staged xForecast from a spectral fit to σ(r).
//!
//! Purpose
//! -------
//! Chain component separation, post-separation noise, foreground residuals
//! and the cosmological likelihood into one forecast. Each stage is an
//! immutable value that consumes the previous one:
//! `SeparationFit` → [`NoiseStage`] → [`ResidualStage`] → [`XForecast`].
//!
//! Key behaviors
//! -------------
//! - [`NoiseStage::new`] evaluates `A`, `A_dB` and `A_dBdB` at the fitted
//!   parameters (without prewhitening) and computes the CMB noise spectrum.
//! - [`NoiseStage::into_residuals`] windows the foreground spectra, builds
//!   the CMB projector rows and derives bias, stat and var.
//! - [`ResidualStage::into_forecast`] adds the fiducial BB templates and
//!   runs the profile search on r.
//! - [`x_forecast`] and [`harmonic_x_forecast`] drive the whole chain from
//!   maps or alms; [`harmonic_x_forecast_fsl`] also fits the far-sidelobe
//!   calibration and carries an ℓ-dependent `A` through the later stages.
//!
//! Invariants & assumptions
//! ------------------------
//! - Map-domain fits weight every frequency by `(resol_arcmin / depth_p)²`;
//!   the noise spectrum uses the beam-aware per-ℓ weights of the instrument.
//! - Alm-domain fits use the same per-ℓ weights for the fit, the projector
//!   and the noise, unless the caller provides their own.
//! - Events of every stage are appended to the log of the fit, so the sink
//!   installed on the separation options keeps receiving them.
use crate::{
    algebra::noise_weights::InvNoise,
    alm::{codec::AlmLayout, spectra::cross_spectra},
    components::mixing_matrix::MixingMatrix,
    diagnostics::{EventLog, PipelineEvent},
    forecast::{
        cosmo::CosmoLikelihood,
        errors::{ForecastError, ForecastResult},
        profile::{ProfileOptions, ProfileOutcome, profile_r},
        residuals::{CmbProjector, ResidualTerms, noise_spectrum, windowed_spectra},
        templates::{BbTemplates, FiducialSpectra},
    },
    instrument::{
        descriptor::Instrument,
        noise::{harmonic_noise_cov, nside2resol_arcmin},
    },
    separation::{
        comp_sep::{SeparationOptions, comp_sep},
        fsl::{BeamCalibrated, SidelobeBeams, harmonic_comp_sep_fsl},
        harmonic::{HarmonicSeparation, harmonic_comp_sep},
        likelihood::MixingModel,
        recipes::{internal_maps, map_nside},
        result::SeparationFit,
    },
};
use ndarray::{Array1, Array3, ArrayD, ArrayView3, ArrayViewD, Axis, Ix2};
use nalgebra::Complex;

/// Multipole window, fiducial cosmology and sky fraction of a forecast.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastOptions {
    pub lmin: usize,
    pub lmax: usize,
    /// Lensing amplitude of the fiducial and model spectra.
    pub alens: f64,
    /// Fiducial tensor-to-scalar ratio of the observed spectrum.
    pub r: f64,
    pub fsky: f64,
    pub profile: ProfileOptions,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self { lmin: 2, lmax: 128, alens: 1.0, r: 0.001, fsky: 1.0, profile: ProfileOptions::default() }
    }
}

impl ForecastOptions {
    pub fn new(lmin: usize, lmax: usize, alens: f64, r: f64, fsky: f64) -> ForecastResult<Self> {
        let opts = Self { lmin, lmax, alens, r, fsky, profile: ProfileOptions::default() };
        opts.validate()?;
        Ok(opts)
    }

    pub fn with_profile(mut self, profile: ProfileOptions) -> Self {
        self.profile = profile;
        self
    }

    pub fn validate(&self) -> ForecastResult<()> {
        if self.lmin > self.lmax {
            return Err(ForecastError::InvalidRange { lmin: self.lmin, lmax: self.lmax, reason: "lmin exceeds lmax" });
        }
        if !self.alens.is_finite() || self.alens < 0.0 {
            return Err(ForecastError::InvalidOption { name: "alens", reason: "must be finite and >= 0" });
        }
        if !self.r.is_finite() || self.r < 0.0 {
            return Err(ForecastError::InvalidOption { name: "r", reason: "must be finite and >= 0" });
        }
        if !(self.fsky > 0.0 && self.fsky <= 1.0) {
            return Err(ForecastError::InvalidOption { name: "fsky", reason: "must lie in (0, 1]" });
        }
        self.profile.validate()
    }

    fn ell(&self) -> Array1<usize> {
        (self.lmin..=self.lmax).collect()
    }
}

/// Spectral fit plus the CMB noise left after separation.
#[derive(Debug, Clone)]
pub struct NoiseStage {
    fit: SeparationFit,
    opts: ForecastOptions,
    i_cmb: usize,
    a: ArrayD<f64>,
    a_db: Vec<ArrayD<f64>>,
    a_dbdb: Vec<Vec<ArrayD<f64>>>,
    weights: InvNoise,
    noise: Array1<f64>,
    log: EventLog,
}

impl NoiseStage {
    /// # Arguments
    /// - `mixing`: the model `fit` was obtained with; its prewhitening is
    ///   ignored.
    /// - `weights`: the inverse noise the fit was weighted with, either
    ///   ℓ-independent or batched over `0..=lmax`.
    /// - `inv_nl`: per-ℓ inverse noise of the CMB channel estimate.
    /// - `n_true`: true per-ℓ noise covariance, when it differs from
    ///   `inv_nl⁻¹`.
    pub fn new(
        fit: SeparationFit, mixing: &MixingMatrix, weights: InvNoise, inv_nl: &InvNoise,
        n_true: Option<ArrayViewD<'_, f64>>, opts: ForecastOptions,
    ) -> ForecastResult<Self> {
        let mixing = mixing.clone().without_prewhitening();
        let i_cmb = mixing.cmb_index()?;
        Self::with_model(fit, &mixing, i_cmb, weights, inv_nl, n_true, opts)
    }

    /// [`NoiseStage::new`] for any mixing model whose `A` is either
    /// `(n_freq, n_comp)` or batched over `0..=lmax` like `inv_nl`, with the
    /// CMB in column `i_cmb`.
    ///
    /// # Errors
    /// - [`ForecastError::ShapeMismatch`] for any other shape of `A`, or an
    ///   `i_cmb` outside the components.
    #[allow(clippy::too_many_arguments)]
    pub fn with_model<M: MixingModel + ?Sized>(
        fit: SeparationFit, model: &M, i_cmb: usize, weights: InvNoise, inv_nl: &InvNoise,
        n_true: Option<ArrayViewD<'_, f64>>, opts: ForecastOptions,
    ) -> ForecastResult<Self> {
        opts.validate()?;
        let a = model.evaluate(fit.x())?;
        let nd = a.ndim();
        if !(2..=3).contains(&nd)
            || a.shape()[nd - 2..] != [model.n_freq(), model.n_comp()]
            || i_cmb >= model.n_comp()
        {
            return Err(ForecastError::ShapeMismatch {
                what: "mixing matrix",
                expected: vec![model.n_freq(), model.n_comp()],
                found: a.shape().to_vec(),
            });
        }
        let a_db = model.gradient(fit.x())?;
        let a_dbdb = model.hessian(fit.x())?;

        let sandwich = n_true.is_some();
        let noise = noise_spectrum(a.view(), inv_nl, n_true, i_cmb, opts.lmin, opts.lmax)?;
        let mut log = fit.log().clone();
        log.record(PipelineEvent::NoiseComputed { lmin: opts.lmin, lmax: opts.lmax, sandwich });

        Ok(Self { fit, opts, i_cmb, a, a_db, a_dbdb, weights, noise, log })
    }

    pub fn fit(&self) -> &SeparationFit {
        &self.fit
    }

    pub fn options(&self) -> &ForecastOptions {
        &self.opts
    }

    pub fn ell(&self) -> Array1<usize> {
        self.opts.ell()
    }

    /// `A` at the fitted parameters, `(n_freq, n_comp)` or batched over ℓ.
    pub fn mixing_matrix(&self) -> &ArrayD<f64> {
        &self.a
    }

    /// CMB noise over `[lmin, lmax]`.
    pub fn noise(&self) -> &Array1<f64> {
        &self.noise
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Add the foreground residuals for spectra `(n_freq, n_freq, ≥ lmax+1)`
    /// starting at ℓ = 0 and not yet divided by `fsky`.
    pub fn into_residuals(mut self, cl_fgs: ArrayView3<'_, f64>) -> ForecastResult<ResidualStage> {
        let (lmin, lmax) = (self.opts.lmin, self.opts.lmax);
        let n_freq = self.a.shape()[self.a.ndim() - 2];
        if cl_fgs.len_of(Axis(0)) != n_freq {
            return Err(ForecastError::ShapeMismatch {
                what: "foreground spectra",
                expected: vec![n_freq, n_freq, lmax + 1],
                found: cl_fgs.shape().to_vec(),
            });
        }
        let cl_fgs = windowed_spectra(cl_fgs, lmin, lmax, self.opts.fsky)?;
        let projector = CmbProjector::new(
            self.a.view(),
            &self.a_db,
            &self.a_dbdb,
            &self.weights,
            self.fit.sigma(),
            self.i_cmb,
            lmin,
            lmax,
        )?;
        let terms = ResidualTerms::compute(&projector, cl_fgs.view())?;
        let sigma = self.fit.sigma();
        let (bias, stat, var) = (terms.bias(), terms.stat(sigma), terms.var(sigma));
        self.log.record(PipelineEvent::ResidualsComputed { n_ell: terms.n_ell(), n_params: projector.n_params() });

        Ok(ResidualStage { noise: self, cl_fgs, projector, terms, bias, stat, var })
    }
}

/// Noise stage plus foreground residual spectra.
#[derive(Debug, Clone)]
pub struct ResidualStage {
    noise: NoiseStage,
    cl_fgs: Array3<f64>,
    projector: CmbProjector,
    terms: ResidualTerms,
    bias: Array1<f64>,
    stat: Array1<f64>,
    var: Array1<f64>,
}

impl ResidualStage {
    pub fn noise_stage(&self) -> &NoiseStage {
        &self.noise
    }

    /// Windowed foreground spectra divided by `fsky`.
    pub fn cl_fgs(&self) -> &Array3<f64> {
        &self.cl_fgs
    }

    pub fn projector(&self) -> &CmbProjector {
        &self.projector
    }

    pub fn terms(&self) -> &ResidualTerms {
        &self.terms
    }

    /// Systematic residual `yy + 2yz`.
    pub fn bias(&self) -> &Array1<f64> {
        &self.bias
    }

    /// Statistical residual `tr(Σ YY)`.
    pub fn stat(&self) -> &Array1<f64> {
        &self.stat
    }

    pub fn var(&self) -> &Array1<f64> {
        &self.var
    }

    /// Build the cosmological likelihood on the fiducial spectra and profile
    /// it in r.
    pub fn into_forecast<S: FiducialSpectra + ?Sized>(mut self, fiducial: &S) -> ForecastResult<XForecast> {
        let opts = self.noise.opts.clone();
        let templates = BbTemplates::from_fiducial(fiducial, opts.alens, opts.r, opts.lmin, opts.lmax)?;
        let likelihood = CosmoLikelihood::new(
            opts.lmin,
            opts.fsky,
            opts.alens,
            &templates,
            &self.noise.noise,
            self.terms.clone(),
            self.noise.fit.sigma(),
            self.noise.fit.fisher(),
        )?;
        let profile = profile_r(|r| likelihood.neg2_log_l(r), &opts.profile, &mut self.noise.log)?;
        Ok(XForecast { residuals: self, templates, likelihood, profile })
    }
}

/// Complete forecast: fit, spectra, likelihood and the profile in r.
#[derive(Debug, Clone)]
pub struct XForecast {
    residuals: ResidualStage,
    templates: BbTemplates,
    likelihood: CosmoLikelihood,
    profile: ProfileOutcome,
}

impl XForecast {
    pub fn fit(&self) -> &SeparationFit {
        &self.residuals.noise.fit
    }

    pub fn residual_stage(&self) -> &ResidualStage {
        &self.residuals
    }

    pub fn ell(&self) -> Array1<usize> {
        self.residuals.noise.ell()
    }

    pub fn noise(&self) -> &Array1<f64> {
        &self.residuals.noise.noise
    }

    pub fn bias(&self) -> &Array1<f64> {
        &self.residuals.bias
    }

    pub fn stat(&self) -> &Array1<f64> {
        &self.residuals.stat
    }

    pub fn var(&self) -> &Array1<f64> {
        &self.residuals.var
    }

    /// Fiducial `BB`, `BuBu` and `BlBl` over the window.
    pub fn templates(&self) -> &BbTemplates {
        &self.templates
    }

    pub fn likelihood(&self) -> &CosmoLikelihood {
        &self.likelihood
    }

    pub fn profile(&self) -> &ProfileOutcome {
        &self.profile
    }

    pub fn r_hat(&self) -> f64 {
        self.profile.r_hat
    }

    pub fn sigma_r(&self) -> f64 {
        self.profile.sigma_r
    }

    /// Events of every stage, separation included.
    pub fn log(&self) -> &EventLog {
        &self.residuals.noise.log
    }
}

/// Outcome of [`harmonic_x_forecast`] and [`harmonic_x_forecast_fsl`].
#[derive(Debug, Clone)]
pub enum HarmonicForecast {
    /// Only the separation ran.
    Separation(HarmonicSeparation),
    Forecast(Box<XForecast>),
}

/// xForecast from noiseless foreground maps.
///
/// # Arguments
/// - `data_fgs`: `(n_freq, n_pix)` or `(n_freq, n_stokes, n_pix)` full-sky
///   HEALPix maps (or a single pixel).
/// - `cl_fgs`: foreground cross-spectra `(n_freq, n_freq, ≥ lmax+1)` of the
///   same maps, from ℓ = 0.
///
/// # Errors
/// - [`ForecastError::Instrument`] without `depth_p`.
/// - Separation, residual and likelihood failures of the stages.
pub fn x_forecast<S: FiducialSpectra + ?Sized>(
    mixing: &MixingMatrix, instrument: &Instrument, data_fgs: ArrayViewD<'_, f64>, cl_fgs: ArrayView3<'_, f64>,
    fiducial: &S, opts: &ForecastOptions, sep: &SeparationOptions,
) -> ForecastResult<XForecast> {
    opts.validate()?;
    let mixing = mixing.clone().without_prewhitening();
    let internal = internal_maps(&mixing, instrument, data_fgs)?;
    let resol = nside2resol_arcmin(map_nside(internal.len_of(Axis(0)))?);
    let depth = instrument.require_depth_p("x_forecast")?;
    let weights = InvNoise::diagonal(depth.mapv(|d| (resol / d).powi(2)).into_dyn())?;

    let fit = comp_sep(&mixing, internal.view(), &weights, sep)?;
    let inv_nl = InvNoise::diagonal(harmonic_noise_cov(instrument, opts.lmax)?.into_dyn())?;
    NoiseStage::new(fit, &mixing, weights, &inv_nl, None, opts.clone())?
        .into_residuals(cl_fgs)?
        .into_forecast(fiducial)
}

/// Shape checks shared by the alm drivers, and the per-ℓ weights of the fit.
fn alm_inputs(
    mixing: &MixingMatrix, instrument: &Instrument, alms_fgs: &ArrayViewD<'_, Complex<f64>>,
    inv_nl: Option<&InvNoise>, opts: &ForecastOptions,
) -> ForecastResult<(AlmLayout, InvNoise)> {
    if !(2..=3).contains(&alms_fgs.ndim()) {
        return Err(ForecastError::ShapeMismatch {
            what: "foreground alms",
            expected: vec![mixing.n_freq(), 0],
            found: alms_fgs.shape().to_vec(),
        });
    }
    let layout = AlmLayout::from_size(alms_fgs.len_of(Axis(alms_fgs.ndim() - 1)))?;
    if layout.lmax() < opts.lmax {
        return Err(ForecastError::InvalidRange {
            lmin: opts.lmin,
            lmax: opts.lmax,
            reason: "alms stop before lmax",
        });
    }
    let inv_nl = match inv_nl {
        Some(w) => w.clone(),
        None => InvNoise::diagonal(harmonic_noise_cov(instrument, layout.lmax())?.into_dyn())?,
    };
    Ok((layout, inv_nl))
}

/// Cross-spectra of the B-mode (last Stokes) foreground alms.
fn b_mode_spectra(
    alms_fgs: ArrayViewD<'_, Complex<f64>>, n_freq: usize, layout: &AlmLayout,
) -> ForecastResult<Array3<f64>> {
    let b_alms = match alms_fgs.ndim() {
        3 => alms_fgs.index_axis(Axis(1), alms_fgs.len_of(Axis(1)) - 1),
        _ => alms_fgs.view(),
    };
    let b_alms = b_alms.into_dimensionality::<Ix2>().map_err(|_| ForecastError::ShapeMismatch {
        what: "foreground alms",
        expected: vec![n_freq, layout.size()],
        found: alms_fgs.shape().to_vec(),
    })?;
    Ok(cross_spectra(b_alms)?)
}

/// xForecast from noiseless foreground alms.
///
/// # Arguments
/// - `alms_fgs`: `(n_freq, n_lm)` B-mode alms, or `(n_freq, n_stokes, n_lm)`
///   with B last; every Stokes channel enters the fit.
/// - `inv_nl`: per-ℓ inverse noise batched over `0..=lmax_alm`; the
///   instrument's beam-aware white noise when `None`.
/// - `n_true`: true per-ℓ noise covariance for the sandwich form.
/// - `lite`: stop after the separation.
///
/// # Errors
/// - [`ForecastError::InvalidRange`] when the alms stop before `lmax`.
/// - Separation, residual and likelihood failures of the stages.
#[allow(clippy::too_many_arguments)]
pub fn harmonic_x_forecast<S: FiducialSpectra + ?Sized>(
    mixing: &MixingMatrix, instrument: &Instrument, alms_fgs: ArrayViewD<'_, Complex<f64>>,
    inv_nl: Option<&InvNoise>, n_true: Option<ArrayViewD<'_, f64>>, fiducial: &S, opts: &ForecastOptions,
    sep: &SeparationOptions, lite: bool,
) -> ForecastResult<HarmonicForecast> {
    opts.validate()?;
    let mixing = mixing.clone().without_prewhitening();
    let (layout, inv_nl) = alm_inputs(&mixing, instrument, &alms_fgs, inv_nl, opts)?;

    let separation = harmonic_comp_sep(&mixing, alms_fgs.view(), Some(&inv_nl), opts.lmin, Some(opts.fsky), sep)?;
    if lite {
        return Ok(HarmonicForecast::Separation(separation));
    }

    let cl_fgs = b_mode_spectra(alms_fgs.view(), mixing.n_freq(), &layout)?;
    let forecast = NoiseStage::new(separation.into_fit(), &mixing, inv_nl.clone(), &inv_nl, n_true, opts.clone())?
        .into_residuals(cl_fgs.view())?
        .into_forecast(fiducial)?;
    Ok(HarmonicForecast::Forecast(Box::new(forecast)))
}

/// [`harmonic_x_forecast`] for alms observed through far sidelobes whose
/// per-frequency amplitude is fitted next to β.
///
/// The calibration factors enter Σ like any spectral parameter. Noise and
/// residuals use the B-mode transfer function at the fitted calibration,
/// evaluated for every ℓ up to the lmax of the alms, so `A` changes with ℓ.
///
/// # Arguments
/// - `beams`: main-lobe and sidelobe tables, with no Stokes axis or the one
///   of `alms_fgs`.
/// - `nfix`: leading frequencies whose calibration stays at 1.
/// - Others as in [`harmonic_x_forecast`]; `sep.x0` covers `[α…, β…]`.
///
/// # Errors
/// - Beam validation errors, wrapped as [`ForecastError::Separation`].
/// - As [`harmonic_x_forecast`] otherwise.
#[allow(clippy::too_many_arguments)]
pub fn harmonic_x_forecast_fsl<S: FiducialSpectra + ?Sized>(
    mixing: &MixingMatrix, instrument: &Instrument, alms_fgs: ArrayViewD<'_, Complex<f64>>, beams: &SidelobeBeams,
    nfix: usize, inv_nl: Option<&InvNoise>, n_true: Option<ArrayViewD<'_, f64>>, fiducial: &S,
    opts: &ForecastOptions, sep: &SeparationOptions, lite: bool,
) -> ForecastResult<HarmonicForecast> {
    opts.validate()?;
    let mixing = mixing.clone().without_prewhitening();
    let (layout, inv_nl) = alm_inputs(&mixing, instrument, &alms_fgs, inv_nl, opts)?;

    let separation = harmonic_comp_sep_fsl(
        &mixing,
        alms_fgs.view(),
        beams,
        nfix,
        Some(&inv_nl),
        opts.lmin,
        Some(opts.fsky),
        sep,
    )?;
    if lite {
        return Ok(HarmonicForecast::Separation(separation));
    }

    let cl_fgs = b_mode_spectra(alms_fgs.view(), mixing.n_freq(), &layout)?;
    let ells: Vec<usize> = (0..=layout.lmax()).collect();
    let b_modes = beams.b_modes();
    let per_ell = BeamCalibrated::new(&mixing, &b_modes, &ells, None, nfix)?;
    let i_cmb = mixing.cmb_index()?;
    let forecast =
        NoiseStage::with_model(separation.into_fit(), &per_ell, i_cmb, inv_nl.clone(), &inv_nl, n_true, opts.clone())?
            .into_residuals(cl_fgs.view())?
            .into_forecast(fiducial)?;
    Ok(HarmonicForecast::Forecast(Box::new(forecast)))
}
