//! separation — parametric component separation.
//!
//! Purpose
//! -------
//! Estimate the spectral parameters `β` of a mixing matrix from
//! multi-frequency maps or alms by maximizing the likelihood with the
//! component amplitudes profiled out, and return the amplitudes, residuals
//! and uncertainties at the optimum.
//!
//! Key behaviors
//! -------------
//! - [`likelihood`]: the [`MixingModel`] seam and the spectral likelihood
//!   with its gradient, Fisher matrix and observed information.
//! - [`comp_sep`]: the fit engine on internal-layout data (joint and
//!   per-patch).
//! - [`adaptive`]: per-parameter cluster maps as a [`MixingModel`].
//! - [`recipes`]: caller-layout map entry points (depth prewhitening,
//!   variance maps, clusters).
//! - [`harmonic`]: the alm entry point with per-ℓ weights.
//! - [`fsl`]: the alm entry point with per-frequency far-sidelobe
//!   calibration fitted next to β.
//! - [`masking`]: UNSEEN handling and the layout swap.
//!
//! Conventions
//! -----------
//! - Caller layout `(n_freq, ..., n_pix)`; internal layout
//!   `(n_pix, ..., n_freq)`.
//! - Masked inputs are never an error; their outputs are UNSEEN.
//!
//! Downstream usage
//! ----------------
//! - `forecast` consumes a [`SeparationFit`] together with the mixing matrix
//!   it was fitted with.
pub mod adaptive;
pub mod comp_sep;
pub mod errors;
pub mod fsl;
pub mod harmonic;
pub mod likelihood;
pub mod masking;
pub mod recipes;
pub mod result;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::adaptive::{AdaptiveSeparation, ClusteredMixing, clustered_comp_sep};
pub use self::comp_sep::{SeparationOptions, comp_sep, comp_sep_masked, multi_comp_sep};
pub use self::errors::{SeparationError, SeparationResult};
pub use self::fsl::{ALPHA_RANGE, BeamCalibrated, SidelobeBeams, harmonic_comp_sep_fsl};
pub use self::harmonic::{HarmonicSeparation, harmonic_comp_sep};
pub use self::likelihood::{MixingModel, SpectralData, SpectralLikelihood};
pub use self::masking::{PixelMask, UNSEEN, is_unseen};
pub use self::recipes::{adaptive_comp_sep, basic_comp_sep, basic_comp_sep_patches, weighted_comp_sep};
pub use self::result::{FitDiagnostics, PatchSeparation, SeparationFit};
