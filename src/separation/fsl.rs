//! separation::fsl — harmonic separation with far-sidelobe calibration.
//!
//! Purpose
//! -------
//! Fit alms observed through a beam made of a main lobe and far sidelobes
//! whose amplitude at each frequency is only known up to a factor `α_f`.
//! The effective transfer function of frequency `f` at multipole ℓ is
//!
//! ```text
//! B_f(ℓ) = (b_f(ℓ) + α_f g_f(ℓ)) / (b_f(1) + α_f g_f(1)) · (b_f(1) + g_f(1))
//! ```
//!
//! with `b` the main-lobe and `g` the sidelobe beam; the ratio keeps the
//! dipole response at its nominal value. The modelled alms are
//! `B_f(ℓ) Σ_c A_fc(β) s_c(ℓm)`.
//!
//! Key behaviors
//! -------------
//! - [`SidelobeBeams`] validates the two beam tables and derives the dipole
//!   values (temperature ℓ = 1, or no correction for polarization-only
//!   tables).
//! - [`BeamCalibrated`] wraps any [`MixingModel`] and prepends one `α_f` per
//!   calibrated frequency; the first `nfix` frequencies keep `α = 1` and
//!   anchor the calibration.
//! - [`harmonic_comp_sep_fsl`] is [`harmonic_comp_sep`] on the calibrated
//!   model.
//!
//! Invariants & assumptions
//! ------------------------
//! - Beams are real and finite, dipole values satisfy `b(1) > 0` and
//!   `g(1) ≥ 0`, so `α ∈ [0, ∞)` never cancels the denominator.
//! - `B` depends on ℓ only; it is evaluated for the slots that enter the fit
//!   and broadcast over a Stokes axis when the beams have none.
//!
//! [`harmonic_comp_sep`]: crate::separation::harmonic::harmonic_comp_sep
use crate::{
    algebra::{batched::mul, noise_weights::InvNoise},
    components::errors::{ModelError, ModelResult},
    optimization::numerical_stability::bounds::{Bound, BoundTransform},
    separation::{
        comp_sep::SeparationOptions,
        errors::{SeparationError, SeparationResult},
        harmonic::{HarmonicSeparation, PreparedAlms},
        likelihood::MixingModel,
        masking::swap_outer_axes,
    },
};
use nalgebra::Complex;
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn, s};

/// Box of every calibration factor.
pub const ALPHA_RANGE: (f64, f64) = (0.0, 10.0);

/// Main-lobe and sidelobe beam transfer functions of an instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct SidelobeBeams {
    main: ArrayD<f64>,
    fsl: ArrayD<f64>,
    b1_main: Array1<f64>,
    b1_fsl: Array1<f64>,
}

impl SidelobeBeams {
    /// # Arguments
    /// - `main`, `fsl`: `(n_freq, lmax + 1)` or `(n_freq, n_stokes, lmax + 1)`
    ///   with the same shape. Tables with one or three Stokes entries (T, E,
    ///   B) take the dipole values from the first entry at ℓ = 1; two entries
    ///   (E, B) carry no temperature and get `b(1) = 1`, `g(1) = 0`.
    ///
    /// # Errors
    /// - [`SeparationError::DataShape`] for a wrong rank, mismatched shapes,
    ///   no ℓ = 1 entry or non-finite values.
    /// - [`SeparationError::InvalidOption`] for unusable dipole values.
    pub fn new(main: ArrayD<f64>, fsl: ArrayD<f64>) -> SeparationResult<Self> {
        if !(2..=3).contains(&main.ndim()) {
            return Err(beam_shape(main.shape(), "expected (n_freq, n_ell) or (n_freq, n_stokes, n_ell)"));
        }
        if main.shape() != fsl.shape() {
            return Err(beam_shape(fsl.shape(), "sidelobe and main beams differ in shape"));
        }
        if main.shape()[main.ndim() - 1] < 2 {
            return Err(beam_shape(main.shape(), "beams must reach ell = 1"));
        }
        if main.iter().chain(fsl.iter()).any(|b| !b.is_finite()) {
            return Err(beam_shape(main.shape(), "beams must be finite"));
        }
        let n_freq = main.shape()[0];
        let (b1_main, b1_fsl) = match main.ndim() {
            3 if main.shape()[1] == 2 => (Array1::ones(n_freq), Array1::zeros(n_freq)),
            3 => (main.slice(s![.., 0, 1]).to_owned(), fsl.slice(s![.., 0, 1]).to_owned()),
            _ => (main.slice(s![.., 1]).to_owned(), fsl.slice(s![.., 1]).to_owned()),
        };
        Self { main, fsl, b1_main, b1_fsl }.checked()
    }

    /// Replace the dipole values, e.g. with temperature beams when the tables
    /// only hold polarization.
    pub fn with_dipole(mut self, b1_main: Array1<f64>, b1_fsl: Array1<f64>) -> SeparationResult<Self> {
        if b1_main.len() != self.n_freq() || b1_fsl.len() != self.n_freq() {
            return Err(SeparationError::FrequencyMismatch {
                expected: self.n_freq(),
                found: b1_main.len().max(b1_fsl.len()),
            });
        }
        self.b1_main = b1_main;
        self.b1_fsl = b1_fsl;
        self.checked()
    }

    fn checked(self) -> SeparationResult<Self> {
        if self.b1_main.iter().any(|b| !(b.is_finite() && *b > 0.0)) {
            return Err(SeparationError::InvalidOption { name: "dipole", reason: "main-lobe b(1) must be > 0" });
        }
        if self.b1_fsl.iter().any(|g| !(g.is_finite() && *g >= 0.0)) {
            return Err(SeparationError::InvalidOption { name: "dipole", reason: "sidelobe g(1) must be >= 0" });
        }
        Ok(self)
    }

    pub fn n_freq(&self) -> usize {
        self.main.shape()[0]
    }

    pub fn lmax(&self) -> usize {
        self.main.shape()[self.main.ndim() - 1] - 1
    }

    pub fn n_stokes(&self) -> Option<usize> {
        (self.main.ndim() == 3).then(|| self.main.shape()[1])
    }

    /// `(b(1), g(1))` per frequency.
    pub fn dipole(&self) -> (&Array1<f64>, &Array1<f64>) {
        (&self.b1_main, &self.b1_fsl)
    }

    /// The last Stokes entry (B modes) with the same dipole values.
    pub fn b_modes(&self) -> Self {
        let last = |b: &ArrayD<f64>| match b.ndim() {
            3 => b.index_axis(Axis(1), b.shape()[1] - 1).to_owned(),
            _ => b.clone(),
        };
        Self {
            main: last(&self.main),
            fsl: last(&self.fsl),
            b1_main: self.b1_main.clone(),
            b1_fsl: self.b1_fsl.clone(),
        }
    }

    /// Main and sidelobe beams at `ells`, in the internal layout
    /// `(n_ells, [n_stokes | 1,] n_freq)`.
    fn at_ells(&self, ells: &[usize], n_stokes: Option<usize>) -> SeparationResult<(ArrayD<f64>, ArrayD<f64>)> {
        if ells.iter().any(|&l| l > self.lmax()) {
            return Err(beam_shape(self.main.shape(), "beams stop before the lmax of the alms"));
        }
        let lay_out = |b: &ArrayD<f64>| -> SeparationResult<ArrayD<f64>> {
            let picked = swap_outer_axes(b.select(Axis(b.ndim() - 1), ells).view());
            match (self.n_stokes(), n_stokes) {
                (None, None) => Ok(picked),
                (None, Some(_)) => Ok(picked.insert_axis(Axis(1))),
                (Some(1), None) => Ok(picked.index_axis_move(Axis(1), 0)),
                (Some(s), Some(n)) if s == n || s == 1 => Ok(picked),
                _ => Err(beam_shape(b.shape(), "Stokes axis of the beams does not match the alms")),
            }
        };
        Ok((lay_out(&self.main)?, lay_out(&self.fsl)?))
    }
}

fn beam_shape(shape: &[usize], reason: &'static str) -> SeparationError {
    SeparationError::DataShape { what: "beams", shape: shape.to_vec(), reason }
}

/// A mixing model seen through calibrated sidelobe beams.
///
/// Parameters are `[α_nfix, …, α_(n_freq−1), β…]`, with `β` those of the
/// base model.
#[derive(Debug, Clone)]
pub struct BeamCalibrated<'a, M: ?Sized> {
    base: &'a M,
    main: ArrayD<f64>,
    fsl: ArrayD<f64>,
    b1_main: Array1<f64>,
    b1_fsl: Array1<f64>,
    nfix: usize,
}

impl<'a, M: MixingModel + ?Sized> BeamCalibrated<'a, M> {
    /// # Arguments
    /// - `ells`: ℓ of each leading entry of the data the model is fitted to.
    /// - `n_stokes`: Stokes axis of the data after the leading one, if any.
    /// - `nfix`: leading frequencies whose `α` stays at 1.
    ///
    /// # Errors
    /// - [`SeparationError::FrequencyMismatch`] when beams and model differ.
    /// - [`SeparationError::InvalidOption`] for `nfix > n_freq`.
    /// - Beam layout errors of [`SidelobeBeams`].
    pub fn new(
        base: &'a M, beams: &SidelobeBeams, ells: &[usize], n_stokes: Option<usize>, nfix: usize,
    ) -> SeparationResult<Self> {
        if beams.n_freq() != base.n_freq() {
            return Err(SeparationError::FrequencyMismatch { expected: base.n_freq(), found: beams.n_freq() });
        }
        if nfix > base.n_freq() {
            return Err(SeparationError::InvalidOption { name: "nfix", reason: "cannot exceed the frequency count" });
        }
        let (main, fsl) = beams.at_ells(ells, n_stokes)?;
        let (b1_main, b1_fsl) = beams.dipole();
        Ok(Self { base, main, fsl, b1_main: b1_main.clone(), b1_fsl: b1_fsl.clone(), nfix })
    }

    pub fn base(&self) -> &M {
        self.base
    }

    pub fn n_alpha(&self) -> usize {
        self.base.n_freq() - self.nfix
    }

    /// `α` of every frequency (1 for the fixed ones) and the base `β`.
    fn split(&self, x: &Array1<f64>) -> ModelResult<(Array1<f64>, Array1<f64>)> {
        let n_alpha = self.n_alpha();
        if x.len() != n_alpha + self.base.n_params() {
            return Err(ModelError::ParamLengthMismatch { expected: n_alpha + self.base.n_params(), found: x.len() });
        }
        let mut alpha = Array1::ones(self.base.n_freq());
        alpha.slice_mut(s![self.nfix..]).assign(&x.slice(s![..n_alpha]));
        Ok((alpha, x.slice(s![n_alpha..]).to_owned()))
    }

    /// `Σ_f (c_f b_f + d_f g_f)` as a column `(…, n_freq, 1)`.
    fn combine(&self, c_main: &Array1<f64>, c_fsl: &Array1<f64>) -> ArrayD<f64> {
        let b = &self.main * c_main + &(&self.fsl * c_fsl);
        let nd = b.ndim();
        b.insert_axis(Axis(nd))
    }

    /// `B`, `∂B/∂α_f` and `∂²B/∂α_f²` (calibrated frequencies only) as
    /// columns ready to scale `A`.
    fn transfer(&self, alpha: &Array1<f64>) -> (ArrayD<f64>, Vec<ArrayD<f64>>, Vec<ArrayD<f64>>) {
        let n_freq = alpha.len();
        let norm = &self.b1_main + &self.b1_fsl;
        let den = &self.b1_main + &(&self.b1_fsl * alpha);
        let c_main = &norm / &den;
        let c_fsl = &c_main * alpha;
        let b = self.combine(&c_main, &c_fsl);

        let (mut d1, mut d2) = (Vec::with_capacity(n_freq - self.nfix), Vec::with_capacity(n_freq - self.nfix));
        for f in self.nfix..n_freq {
            // ∂B_f/∂α_f = n (g p − b q) / (p + q α)²
            let sq = norm[f] / (den[f] * den[f]);
            let mut g_main = Array1::zeros(n_freq);
            let mut g_fsl = Array1::zeros(n_freq);
            g_main[f] = -self.b1_fsl[f] * sq;
            g_fsl[f] = self.b1_main[f] * sq;
            let first = self.combine(&g_main, &g_fsl);
            d2.push(&first * (-2.0 * self.b1_fsl[f] / den[f]));
            d1.push(first);
        }
        (b, d1, d2)
    }
}

impl<M: MixingModel + ?Sized> MixingModel for BeamCalibrated<'_, M> {
    fn n_params(&self) -> usize {
        self.n_alpha() + self.base.n_params()
    }

    fn n_freq(&self) -> usize {
        self.base.n_freq()
    }

    fn n_comp(&self) -> usize {
        self.base.n_comp()
    }

    fn param_names(&self) -> Vec<String> {
        (self.nfix..self.base.n_freq()).map(|f| format!("Beam.alpha_{f}")).chain(self.base.param_names()).collect()
    }

    fn defaults(&self) -> Array1<f64> {
        let mut x = Array1::ones(self.n_params());
        x.slice_mut(s![self.n_alpha()..]).assign(&self.base.defaults());
        x
    }

    fn bounds(&self) -> BoundTransform {
        let alpha = Bound::Interval { lower: ALPHA_RANGE.0, upper: ALPHA_RANGE.1 };
        let base = self.base.bounds();
        BoundTransform::new(std::iter::repeat_n(alpha, self.n_alpha()).chain(base.bounds().iter().copied()).collect())
    }

    fn evaluate(&self, x: &Array1<f64>) -> ModelResult<ArrayD<f64>> {
        let (alpha, beta) = self.split(x)?;
        let (b, _, _) = self.transfer(&alpha);
        Ok(mul(b.view(), self.base.evaluate(&beta)?.view())?)
    }

    fn gradient(&self, x: &Array1<f64>) -> ModelResult<Vec<ArrayD<f64>>> {
        let (alpha, beta) = self.split(x)?;
        let (b, d1, _) = self.transfer(&alpha);
        let a = self.base.evaluate(&beta)?;
        let mut out = Vec::with_capacity(self.n_params());
        for d in &d1 {
            out.push(mul(d.view(), a.view())?);
        }
        for a_j in self.base.gradient(&beta)? {
            out.push(mul(b.view(), a_j.view())?);
        }
        Ok(out)
    }

    fn hessian(&self, x: &Array1<f64>) -> ModelResult<Vec<Vec<ArrayD<f64>>>> {
        let (alpha, beta) = self.split(x)?;
        let (b, d1, d2) = self.transfer(&alpha);
        let a = self.base.evaluate(&beta)?;
        let a_db = self.base.gradient(&beta)?;
        let a_dbdb = self.base.hessian(&beta)?;
        let n_alpha = self.n_alpha();
        let p = self.n_params();
        let zero = ArrayD::<f64>::zeros(IxDyn(&[self.n_freq(), self.n_comp()]));

        let mut grid = vec![vec![zero.clone(); p]; p];
        for i in 0..n_alpha {
            // α_f only acts on frequency f, so the α–α block is diagonal.
            grid[i][i] = mul(d2[i].view(), a.view())?;
            for (j, a_j) in a_db.iter().enumerate() {
                let cross = mul(d1[i].view(), a_j.view())?;
                grid[n_alpha + j][i] = cross.clone();
                grid[i][n_alpha + j] = cross;
            }
        }
        for (j, row) in a_dbdb.iter().enumerate() {
            for (k, a_jk) in row.iter().enumerate() {
                grid[n_alpha + j][n_alpha + k] = mul(b.view(), a_jk.view())?;
            }
        }
        Ok(grid)
    }
}

/// [`harmonic_comp_sep`](crate::separation::harmonic::harmonic_comp_sep)
/// jointly fitting the sidelobe calibration of every frequency after the
/// first `nfix`.
///
/// The fit reports `[α…, β…]` named `"Beam.alpha_<f>"` then the base names;
/// `opts.x0` and `opts.bounds`, when given, cover that full vector. The
/// amplitude alms are those of the sky before the beam.
///
/// # Errors
/// - Beam validation errors of [`BeamCalibrated::new`].
/// - As [`harmonic_comp_sep`](crate::separation::harmonic::harmonic_comp_sep)
///   otherwise.
#[allow(clippy::too_many_arguments)]
pub fn harmonic_comp_sep_fsl<M: MixingModel + ?Sized>(
    model: &M, alms: ArrayViewD<'_, Complex<f64>>, beams: &SidelobeBeams, nfix: usize, inv_n: Option<&InvNoise>,
    lmin: usize, fsky: Option<f64>, opts: &SeparationOptions,
) -> SeparationResult<HarmonicSeparation> {
    let prepared = PreparedAlms::new(model.n_freq(), alms, inv_n, lmin, fsky)?;
    let calibrated = BeamCalibrated::new(model, beams, &prepared.fitted_ells(), prepared.n_stokes, nfix)?;
    prepared.separate(&calibrated, opts)
}
