//! components::emission — spectral emission laws.
//!
//! Purpose
//! -------
//! Define the [`EmissionLaw`] trait that every sky component implements and
//! the three built-in laws: [`Cmb`], [`Dust`] (modified blackbody) and
//! [`Synchrotron`] (power law with optional running).
//!
//! Key behaviors
//! -------------
//! - A law reports its *free* parameters in a fixed order
//!   ([`EmissionLaw::params`]) and evaluates its frequency response
//!   `f(ν; β)` from exactly that many values.
//! - First and second derivatives w.r.t. the free parameters are analytic
//!   for the built-in laws. User laws that only implement `eval` inherit
//!   finite-difference defaults.
//! - Any parameter can be pinned ([`ParamSpec::Fixed`]); pinned parameters
//!   disappear from the free list and from the derivatives.
//!
//! Invariants & assumptions
//! ------------------------
//! - `beta.len()` equals `params().len()`; the mixing matrix guarantees
//!   this before calling into a law.
//! - Laws are immutable values; `eval` is pure and thread-safe.
//!
//! Conventions
//! -----------
//! - Frequencies in GHz; dust temperature in K.
//! - Foreground laws are normalized to 1 at their reference frequency
//!   `nu0` in the chosen [`Units`].
use crate::{
    components::{
        errors::{ModelError, ModelResult},
        units::{H_OVER_K, Units, k_rj_to_k_cmb},
    },
    optimization::{
        loglik_optimizer::finite_diff::{central_gradient, hessian_from_values},
        numerical_stability::bounds::Bound,
    },
};
use ndarray::{Array1, Array2};

/// A free parameter as exposed by a law.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeParam {
    pub name: &'static str,
    pub default: f64,
    pub bound: Bound,
}

/// How a physical parameter of a law is treated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamSpec {
    /// Fitted, starting from `default`, constrained to `bound`.
    Free { default: f64, bound: Bound },
    /// Pinned to a constant.
    Fixed(f64),
}

impl ParamSpec {
    /// Free and unbounded.
    pub fn free(default: f64) -> Self {
        ParamSpec::Free { default, bound: Bound::Free }
    }

    /// Free within `[lower, upper]`.
    pub fn bounded(default: f64, lower: f64, upper: f64) -> Self {
        ParamSpec::Free { default, bound: Bound::Interval { lower, upper } }
    }

    pub fn is_free(&self) -> bool {
        matches!(self, ParamSpec::Free { .. })
    }
}

/// A named frequency response.
pub trait EmissionLaw: std::fmt::Debug + Send + Sync {
    /// Component name; also the prefix of its parameter names.
    fn name(&self) -> &str;

    /// Free parameters, in the order `eval` expects them.
    fn params(&self) -> Vec<FreeParam>;

    /// Frequency response at `nu` GHz.
    fn eval(&self, nu: f64, beta: &Array1<f64>) -> f64;

    /// `∂f/∂β_i` for every free parameter.
    fn diff(&self, nu: f64, beta: &Array1<f64>) -> ModelResult<Array1<f64>> {
        central_gradient(&|b: &Array1<f64>| self.eval(nu, b), beta).map_err(|_| {
            ModelError::NonFiniteDerivative { component: self.name().to_string(), nu }
        })
    }

    /// `∂²f/∂β_i∂β_j`, symmetric.
    fn diff_diff(&self, nu: f64, beta: &Array1<f64>) -> ModelResult<Array2<f64>> {
        hessian_from_values(&|b: &Array1<f64>| self.eval(nu, b), beta).map_err(|_| {
            ModelError::NonFiniteDerivative { component: self.name().to_string(), nu }
        })
    }
}

// ---- Shared helpers ----

/// Keep the entries of a full derivative vector that belong to free slots.
fn select_free(full: &[f64], free: &[bool]) -> Array1<f64> {
    full.iter().zip(free).filter(|&(_, &f)| f).map(|(&v, _)| v).collect()
}

/// Keep the free rows and columns of a full second-derivative matrix.
fn select_free_2d(full: &Array2<f64>, free: &[bool]) -> Array2<f64> {
    let idx: Vec<usize> = free.iter().enumerate().filter(|&(_, &f)| f).map(|(i, _)| i).collect();
    Array2::from_shape_fn((idx.len(), idx.len()), |(i, j)| full[[idx[i], idx[j]]])
}

/// Resolve physical values from the free vector, in declaration order.
fn resolve<const N: usize>(specs: [&ParamSpec; N], beta: &Array1<f64>) -> [f64; N] {
    let mut out = [0.0; N];
    let mut k = 0;
    for (slot, spec) in out.iter_mut().zip(specs) {
        *slot = match *spec {
            ParamSpec::Fixed(v) => v,
            ParamSpec::Free { .. } => {
                let v = beta.get(k).copied().unwrap_or(f64::NAN);
                k += 1;
                v
            }
        };
    }
    out
}

fn free_params<const N: usize>(names: [&'static str; N], specs: [&ParamSpec; N]) -> Vec<FreeParam> {
    names
        .into_iter()
        .zip(specs)
        .filter_map(|(name, spec)| match *spec {
            ParamSpec::Free { default, bound } => Some(FreeParam { name, default, bound }),
            ParamSpec::Fixed(_) => None,
        })
        .collect()
}

// ---- CMB ----

/// The CMB: unit response in K_CMB.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Cmb {
    units: Units,
}

impl Cmb {
    pub fn new(units: Units) -> Self {
        Self { units }
    }
}

impl EmissionLaw for Cmb {
    fn name(&self) -> &str {
        "CMB"
    }

    fn params(&self) -> Vec<FreeParam> {
        Vec::new()
    }

    fn eval(&self, nu: f64, _beta: &Array1<f64>) -> f64 {
        match self.units {
            Units::KCmb => 1.0,
            Units::KRj => 1.0 / k_rj_to_k_cmb(nu),
        }
    }

    fn diff(&self, _nu: f64, _beta: &Array1<f64>) -> ModelResult<Array1<f64>> {
        Ok(Array1::zeros(0))
    }

    fn diff_diff(&self, _nu: f64, _beta: &Array1<f64>) -> ModelResult<Array2<f64>> {
        Ok(Array2::zeros((0, 0)))
    }
}

// ---- Default boxes of the built-in laws ----
//
// Fits search these ranges unless the caller supplies other bounds. They are
// wide compared to any observed dust or synchrotron sky, and narrow enough
// that `eval` stays finite everywhere inside them.

const BETA_D_RANGE: (f64, f64) = (0.5, 5.0);
const TEMP_RANGE: (f64, f64) = (3.0, 100.0);
const BETA_PL_RANGE: (f64, f64) = (-6.0, 0.0);

// ---- Dust ----

/// Modified blackbody `(ν/ν₀)^(β_d+1) · (e^{x₀} − 1)/(e^{x} − 1)`, with
/// `x = hν / (k T_d)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dust {
    nu0: f64,
    beta_d: ParamSpec,
    temp: ParamSpec,
    units: Units,
}

impl Dust {
    /// Dust normalized at `nu0` GHz with `beta_d = 1.54` in `[0.5, 5]` and
    /// `temp = 20 K` in `[3, 100]` K, both free.
    pub fn new(nu0: f64) -> Self {
        Self {
            nu0,
            beta_d: ParamSpec::bounded(1.54, BETA_D_RANGE.0, BETA_D_RANGE.1),
            temp: ParamSpec::bounded(20.0, TEMP_RANGE.0, TEMP_RANGE.1),
            units: Units::KCmb,
        }
    }

    pub fn with_beta_d(mut self, spec: ParamSpec) -> Self {
        self.beta_d = spec;
        self
    }

    pub fn with_temp(mut self, spec: ParamSpec) -> Self {
        self.temp = spec;
        self
    }

    /// Pin the temperature, leaving `beta_d` as the only free parameter.
    pub fn with_fixed_temp(self, temp: f64) -> Self {
        self.with_temp(ParamSpec::Fixed(temp))
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    pub fn nu0(&self) -> f64 {
        self.nu0
    }

    fn free_mask(&self) -> [bool; 2] {
        [self.beta_d.is_free(), self.temp.is_free()]
    }

    /// `(f, ln r, L_T, dL_T/dT)` at the resolved physical values.
    fn pieces(&self, nu: f64, beta: &Array1<f64>) -> (f64, f64, f64, f64) {
        let [_, t] = resolve([&self.beta_d, &self.temp], beta);
        let f = self.eval(nu, beta);
        let ln_r = (nu / self.nu0).ln();
        let x = H_OVER_K * nu / t;
        let x0 = H_OVER_K * self.nu0 / t;
        let (gx, gx0) = (planck_g(x), planck_g(x0));
        let lt = (gx - gx0) / t;
        let dlt = (-(gx - gx0) - x * planck_g_prime(x) + x0 * planck_g_prime(x0)) / (t * t);
        (f, ln_r, lt, dlt)
    }
}

/// `g(x) = x / (1 − e^{−x})`.
fn planck_g(x: f64) -> f64 {
    x / -(-x).exp_m1()
}

/// `g'(x) = eˣ (eˣ − 1 − x) / (eˣ − 1)²`.
fn planck_g_prime(x: f64) -> f64 {
    let em1 = x.exp_m1();
    (em1 + 1.0) * (em1 - x) / (em1 * em1)
}

impl EmissionLaw for Dust {
    fn name(&self) -> &str {
        "Dust"
    }

    fn params(&self) -> Vec<FreeParam> {
        free_params(["beta_d", "temp"], [&self.beta_d, &self.temp])
    }

    fn eval(&self, nu: f64, beta: &Array1<f64>) -> f64 {
        let [b, t] = resolve([&self.beta_d, &self.temp], beta);
        let x = H_OVER_K * nu / t;
        let x0 = H_OVER_K * self.nu0 / t;
        (nu / self.nu0).powf(b + 1.0) * x0.exp_m1() / x.exp_m1()
            * self.units.rj_law_factor(nu, self.nu0)
    }

    fn diff(&self, nu: f64, beta: &Array1<f64>) -> ModelResult<Array1<f64>> {
        let (f, ln_r, lt, _) = self.pieces(nu, beta);
        Ok(select_free(&[f * ln_r, f * lt], &self.free_mask()))
    }

    fn diff_diff(&self, nu: f64, beta: &Array1<f64>) -> ModelResult<Array2<f64>> {
        let (f, ln_r, lt, dlt) = self.pieces(nu, beta);
        let cross = f * ln_r * lt;
        let full = ndarray::array![[f * ln_r * ln_r, cross], [cross, f * (lt * lt + dlt)]];
        Ok(select_free_2d(&full, &self.free_mask()))
    }
}

// ---- Synchrotron ----

/// Power law `(ν/ν₀)^(β_pl + C ln(ν/ν₀))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Synchrotron {
    nu0: f64,
    beta_pl: ParamSpec,
    running: ParamSpec,
    units: Units,
}

impl Synchrotron {
    /// Synchrotron normalized at `nu0` GHz with `beta_pl = −3` free in
    /// `[−6, 0]` and no running.
    pub fn new(nu0: f64) -> Self {
        Self {
            nu0,
            beta_pl: ParamSpec::bounded(-3.0, BETA_PL_RANGE.0, BETA_PL_RANGE.1),
            running: ParamSpec::Fixed(0.0),
            units: Units::KCmb,
        }
    }

    pub fn with_beta_pl(mut self, spec: ParamSpec) -> Self {
        self.beta_pl = spec;
        self
    }

    pub fn with_running(mut self, spec: ParamSpec) -> Self {
        self.running = spec;
        self
    }

    pub fn with_units(mut self, units: Units) -> Self {
        self.units = units;
        self
    }

    fn free_mask(&self) -> [bool; 2] {
        [self.beta_pl.is_free(), self.running.is_free()]
    }
}

impl EmissionLaw for Synchrotron {
    fn name(&self) -> &str {
        "Synchrotron"
    }

    fn params(&self) -> Vec<FreeParam> {
        free_params(["beta_pl", "running"], [&self.beta_pl, &self.running])
    }

    fn eval(&self, nu: f64, beta: &Array1<f64>) -> f64 {
        let [b, c] = resolve([&self.beta_pl, &self.running], beta);
        let ln_r = (nu / self.nu0).ln();
        (ln_r * (b + c * ln_r)).exp() * self.units.rj_law_factor(nu, self.nu0)
    }

    fn diff(&self, nu: f64, beta: &Array1<f64>) -> ModelResult<Array1<f64>> {
        let f = self.eval(nu, beta);
        let l = (nu / self.nu0).ln();
        Ok(select_free(&[f * l, f * l * l], &self.free_mask()))
    }

    fn diff_diff(&self, nu: f64, beta: &Array1<f64>) -> ModelResult<Array2<f64>> {
        let f = self.eval(nu, beta);
        let l = (nu / self.nu0).ln();
        let (l2, l3, l4) = (l * l, l * l * l, l * l * l * l);
        let full = ndarray::array![[f * l2, f * l3], [f * l3, f * l4]];
        Ok(select_free_2d(&full, &self.free_mask()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::loglik_optimizer::finite_diff::compute_hessian;
    use approx::assert_relative_eq;
    use finitediff::FiniteDiff;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Normalization of the foreground laws at their reference frequency.
    // - Finiteness of the built-in laws over their default boxes.
    // - Analytic first and second derivatives against finite differences,
    //   including laws with pinned parameters.
    // - The finite-difference defaults available to user-defined laws.
    // -------------------------------------------------------------------------

    /// Compare `diff` with central differences of `eval`, and `diff_diff`
    /// with central differences of `diff`.
    fn assert_derivatives_match_fd(law: &dyn EmissionLaw, nu: f64, beta: &Array1<f64>) {
        let fd_grad = beta.central_diff(&|b: &Array1<f64>| law.eval(nu, b));
        let fd_hess = compute_hessian(&|b: &Array1<f64>| law.diff(nu, b).unwrap(), beta).unwrap();
        let g = law.diff(nu, beta).unwrap();
        let h = law.diff_diff(nu, beta).unwrap();
        for (a, e) in g.iter().zip(fd_grad.iter()) {
            assert_relative_eq!(*a, *e, max_relative = 1e-6, epsilon = 1e-9);
        }
        for (a, e) in h.iter().zip(fd_hess.iter()) {
            assert_relative_eq!(*a, *e, max_relative = 1e-4, epsilon = 1e-7);
        }
    }

    #[test]
    // Purpose
    // -------
    // Foreground laws equal 1 at their reference frequency in both units,
    // and the CMB is flat in K_CMB.
    //
    // Given
    // -----
    // - Dust(353), Synchrotron(23) with default parameters; Cmb.
    //
    // Expect
    // ------
    // - f(ν₀) = 1; Cmb(ν) = 1 in K_CMB and 1/k_rj_to_k_cmb(ν) in K_RJ.
    fn laws_are_normalized_at_reference_frequency() {
        let dust = Dust::new(353.0);
        let sync = Synchrotron::new(23.0).with_units(Units::KRj);
        assert_relative_eq!(dust.eval(353.0, &array![1.54, 20.0]), 1.0, max_relative = 1e-14);
        assert_relative_eq!(sync.eval(23.0, &array![-3.0]), 1.0, max_relative = 1e-14);
        assert_eq!(Cmb::default().eval(150.0, &array![]), 1.0);
        assert_relative_eq!(
            Cmb::new(Units::KRj).eval(150.0, &array![]),
            1.0 / k_rj_to_k_cmb(150.0),
            max_relative = 1e-14
        );
    }

    #[test]
    // Purpose
    // -------
    // Analytic dust derivatives match finite differences, with and without
    // the temperature free.
    //
    // Given
    // -----
    // - Dust(353) at (β_d, T) = (1.6, 19) and Dust(353) with T pinned.
    // - ν ∈ {30, 150, 500} GHz.
    //
    // Expect
    // ------
    // - `diff`, `diff_diff` ≈ FD; pinned law has one free parameter.
    fn dust_derivatives_match_finite_differences() {
        let free = Dust::new(353.0);
        let pinned = Dust::new(353.0).with_fixed_temp(19.0);
        assert_eq!(pinned.params().len(), 1);
        assert_eq!(pinned.params()[0].name, "beta_d");
        for nu in [30.0, 150.0, 500.0] {
            assert_derivatives_match_fd(&free, nu, &array![1.6, 19.0]);
            assert_derivatives_match_fd(&pinned, nu, &array![1.6]);
        }
    }

    #[test]
    // Purpose
    // -------
    // Analytic synchrotron derivatives match finite differences with the
    // running free.
    //
    // Given
    // -----
    // - Synchrotron(23) with running free at (β, C) = (−3.1, 0.05).
    //
    // Expect
    // ------
    // - `diff`, `diff_diff` ≈ FD at several frequencies.
    fn synchrotron_derivatives_match_finite_differences() {
        let sync = Synchrotron::new(23.0).with_running(ParamSpec::free(0.0));
        assert_eq!(sync.params().len(), 2);
        for nu in [30.0, 90.0, 220.0] {
            assert_derivatives_match_fd(&sync, nu, &array![-3.1, 0.05]);
        }
    }

    /// Free-free-like law with only `eval`; derivatives fall back to FD.
    #[derive(Debug)]
    struct FreeFree;

    impl EmissionLaw for FreeFree {
        fn name(&self) -> &str {
            "FreeFree"
        }

        fn params(&self) -> Vec<FreeParam> {
            vec![FreeParam { name: "beta_ff", default: -2.14, bound: Bound::Free }]
        }

        fn eval(&self, nu: f64, beta: &Array1<f64>) -> f64 {
            (nu / 30.0).powf(beta[0])
        }
    }

    #[test]
    // Purpose
    // -------
    // A law that implements only `eval` still gets usable derivatives.
    //
    // Given
    // -----
    // - f = (ν/30)^β at ν = 90, β = −2.14.
    //
    // Expect
    // ------
    // - diff ≈ f ln 3; diff_diff ≈ f ln² 3.
    fn user_law_inherits_finite_difference_derivatives() {
        // Arrange
        let beta = array![-2.14];
        let f = 3.0_f64.powf(-2.14);
        let l = 3.0_f64.ln();

        // Act
        let g = FreeFree.diff(90.0, &beta).unwrap();
        let h = FreeFree.diff_diff(90.0, &beta).unwrap();

        // Assert
        assert_relative_eq!(g[0], f * l, max_relative = 1e-7);
        assert_relative_eq!(h[[0, 0]], f * l * l, max_relative = 1e-4);
    }

    #[test]
    // Purpose
    // -------
    // The built-in laws ship finite boxes, and every corner of those boxes
    // evaluates to finite responses and derivatives across the band.
    //
    // Given
    // -----
    // - Dust(353) and Synchrotron(23) with default parameters.
    // - ν ∈ {10, 100, 1000} GHz at each corner of the default boxes.
    //
    // Expect
    // ------
    // - Every bound is an `Interval` containing its default.
    // - `eval`, `diff` and `diff_diff` finite at every corner.
    fn default_boxes_are_finite_and_evaluable() {
        let dust = Dust::new(353.0);
        let sync = Synchrotron::new(23.0);
        for law in [&dust as &dyn EmissionLaw, &sync] {
            let params = law.params();
            for p in &params {
                assert!(matches!(p.bound, Bound::Interval { .. }), "{} is unbounded", p.name);
                assert!(p.bound.contains(p.default));
            }
            let corners: Vec<Array1<f64>> = match params.as_slice() {
                [a, b] => [a.bound.lower(), a.bound.upper()]
                    .iter()
                    .flat_map(|&x| [b.bound.lower(), b.bound.upper()].map(|y| array![x, y]))
                    .collect(),
                [a] => vec![array![a.bound.lower()], array![a.bound.upper()]],
                _ => unreachable!(),
            };
            for beta in &corners {
                for nu in [10.0, 100.0, 1000.0] {
                    assert!(law.eval(nu, beta).is_finite(), "{} at {beta} and {nu} GHz", law.name());
                    assert!(law.diff(nu, beta).unwrap().iter().all(|v| v.is_finite()));
                    assert!(law.diff_diff(nu, beta).unwrap().iter().all(|v| v.is_finite()));
                }
            }
        }
    }
}
