//! Physical constants and brightness-temperature conversions.
//!
//! # Provided items
//! - [`H_OVER_K`]: Planck over Boltzmann in K/GHz.
//! - [`T_CMB`]: CMB monopole temperature in K.
//! - [`k_rj_to_k_cmb`]: multiplicative factor taking K_RJ to K_CMB.
//! - [`Units`]: output units of an emission law.

/// `h / k_B` in K/GHz.
pub const H_OVER_K: f64 = 0.047_992_430_73;

/// CMB temperature in K.
pub const T_CMB: f64 = 2.7255;

/// Output units of an emission law.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    /// Thermodynamic CMB units.
    #[default]
    KCmb,
    /// Rayleigh–Jeans brightness temperature.
    KRj,
}

/// `(eˣ − 1)² / (x² eˣ)` with `x = hν / (k T_CMB)`.
///
/// Multiplies a K_RJ amplitude at `nu` GHz into K_CMB. Tends to 1 as
/// `nu → 0`.
pub fn k_rj_to_k_cmb(nu: f64) -> f64 {
    let x = H_OVER_K * nu / T_CMB;
    let em1 = x.exp_m1();
    em1 * em1 / (x * x * x.exp())
}

impl Units {
    /// Factor applied to a K_RJ spectral law so that it is expressed in
    /// `self`, normalized at the reference frequency `nu0`.
    pub fn rj_law_factor(&self, nu: f64, nu0: f64) -> f64 {
        match self {
            Units::KRj => 1.0,
            Units::KCmb => k_rj_to_k_cmb(nu) / k_rj_to_k_cmb(nu0),
        }
    }
}
