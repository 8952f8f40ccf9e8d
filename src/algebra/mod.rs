//! algebra — batched linear algebra and the weighted least-squares kernel.
//!
//! Purpose
//! -------
//! Collect the array plumbing every other layer relies on: NumPy-style
//! broadcasting over leading batch axes, small dense factorizations via
//! `nalgebra`, inverse noise weights, and the `W` operator family of the
//! generalized least-squares component estimator.
//!
//! Key behaviors
//! -------------
//! - [`broadcast`]: batch-shape broadcasting and the per-position loop.
//! - [`batched`]: `mv`, `mtv`, `mm`, `mtm`, `mmm`, `mtmm`, `mmv`, `utmv`,
//!   `transpose`, `solve`, `inv`, `ln_det`, `regularized_inverse`.
//! - [`noise_weights`]: the [`InvNoise`] enum.
//! - [`weights`]: [`WlsKernel`] with `W`, `W_dB`, `W_dBdB` and `(AᵗN⁻¹A)⁻¹`.
//!
//! Conventions
//! -----------
//! - Arrays are `ndarray::ArrayD<f64>` with the frequency axis last for
//!   vectors and the two trailing axes as the core matrix.
//! - Failures are [`LinalgError`] values; nothing in this module panics on
//!   malformed input.
pub mod batched;
pub mod broadcast;
pub mod errors;
pub mod noise_weights;
pub mod weights;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::errors::{LinalgError, LinalgResult};
pub use self::noise_weights::InvNoise;
pub use self::weights::{WlsKernel, inv_atna, w, w_db, w_dbdb};
