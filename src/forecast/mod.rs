//! forecast — residual foregrounds and the constraint on r.
//!
//! Purpose
//! -------
//! Turn a spectral fit into a forecast on the tensor-to-scalar ratio: the
//! CMB noise after separation, the foreground residual spectra implied by
//! the parameter uncertainty, and a profile of the noise-averaged
//! cosmological likelihood in r.
//!
//! Key behaviors
//! -------------
//! - [`residuals`]: noise spectrum, CMB projector rows and the elementary
//!   residual terms (bias, stat, var).
//! - [`cosmo`]: −2 log L(r) marginalized over Σ.
//! - [`profile`]: grid scan plus Brent refinement for r̂ and σ(r).
//! - [`templates`]: fiducial spectra keyed by (Alens, r).
//! - [`pipeline`]: the staged chain and the map / alm drivers, including
//!   the far-sidelobe variant.
//!
//! Conventions
//! -----------
//! - Spectra indexed by multipole start at ℓ = 0 on input and cover
//!   `[lmin, lmax]` on output.
//! - Foreground spectra are `(n_freq, n_freq, n_ell)`.
pub mod cosmo;
pub mod errors;
pub mod pipeline;
pub mod profile;
pub mod residuals;
pub mod templates;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::cosmo::CosmoLikelihood;
pub use self::errors::{ForecastError, ForecastResult};
pub use self::pipeline::{
    ForecastOptions, HarmonicForecast, NoiseStage, ResidualStage, XForecast, harmonic_x_forecast,
    harmonic_x_forecast_fsl, x_forecast,
};
pub use self::profile::{ProfileOptions, ProfileOutcome, profile_r};
pub use self::residuals::{CmbProjector, ResidualTerms, noise_spectrum, windowed_spectra};
pub use self::templates::{BbTemplates, FiducialCls, FiducialSpectra, TabulatedSpectra};
