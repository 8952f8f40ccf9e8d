//! alm — spherical-harmonic coefficients for harmonic-domain separation.
//!
//! Purpose
//! -------
//! Pack complex alms into real vectors the separation kernel can weight,
//! unpack the fitted amplitudes, and measure empirical power spectra.
//!
//! Conventions
//! -----------
//! - HEALPix m-major layout, `0 ≤ m ≤ ℓ ≤ lmax`; see [`AlmLayout`].
//! - The coefficient axis is always last.

pub mod codec;
pub mod errors;
pub mod spectra;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::codec::{AlmLayout, format_alms, format_bls, r_to_c_alms, real_alm_ells};
pub use self::errors::{AlmError, AlmResult};
pub use self::spectra::{alm2cl, cross_spectra, empirical_harmonic_covariance};
