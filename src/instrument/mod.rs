//! instrument — channel frequencies, sensitivities and beams.
//!
//! Purpose
//! -------
//! Validate an instrument description once and derive from it the noise
//! weights used by the separation recipes and the forecasts.
//!
//! Key behaviors
//! -------------
//! - [`InstrumentDescriptor::validate`] produces an [`Instrument`] whose
//!   arrays all have one finite entry per channel.
//! - [`noise`] turns depths and beams into harmonic inverse noise and
//!   pixel-domain prewhitening factors.
//!
//! Conventions
//! -----------
//! - GHz for frequencies, μK·arcmin for depths, arcmin for FWHM.

pub mod descriptor;
pub mod errors;
pub mod noise;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::descriptor::{Instrument, InstrumentDescriptor};
pub use self::errors::{InstrumentError, InstrumentResult};
pub use self::noise::{gauss_beam, harmonic_noise_cov, npix2nside, nside2resol_arcmin, prewhiten_factors};
