//! rust_compsep — parametric component separation of multi-frequency CMB
//! observations and forecasting of the tensor-to-scalar ratio.
//!
//! Purpose
//! -------
//! Serve as the crate root. Multi-frequency sky maps (or spherical-harmonic
//! coefficients) are modelled as `d = A(β) s + n`, where the mixing matrix
//! `A` is built from parametric emission laws. The crate fits `β` by
//! maximizing the spectral likelihood with the amplitudes `s` profiled out,
//! then propagates the residual foreground uncertainty into a likelihood on
//! the tensor-to-scalar ratio r.
//!
//! Key behaviors
//! -------------
//! - [`components`]: emission laws, unit conversions and the mixing matrix
//!   with analytic first and second derivatives.
//! - [`instrument`]: frequencies, depths and beams, plus the derived noise
//!   weights.
//! - [`algebra`]: batched small-matrix kernels and the weighted
//!   least-squares projector `W` with its derivatives.
//! - [`optimization`]: bounded L-BFGS on argmin with finite-difference
//!   fallbacks.
//! - [`inference`]: Fisher inversion and standard errors.
//! - [`separation`]: pixel, patch, cluster and alm fits.
//! - [`alm`]: the real/complex alm codec and empirical spectra.
//! - [`forecast`]: noise, residual spectra, the cosmological likelihood and
//!   the profile search on r.
//! - [`diagnostics`]: structured events recorded by every stage.
//!
//! Invariants & assumptions
//! ------------------------
//! - Caller-facing maps use the layout `(n_freq, ..., n_pix)`; fits run on
//!   `(n_pix, ..., n_freq)`.
//! - Masked samples carry the HEALPix UNSEEN sentinel (or NaN) and are
//!   excluded from every computation; their outputs are UNSEEN.
//!
//! Conventions
//! -----------
//! - Every module owns an error enum with a `*Result<T>` alias; `From`
//!   conversions chain model and linear-algebra errors up to the
//!   separation and forecast layers.
//! - The library never prints. Optimizer progress goes through the optional
//!   `obs_slog` observer, pipeline progress through [`diagnostics::EventLog`].
//!
//! Testing notes
//! -------------
//! - Unit tests live next to the code; `tests/` holds end-to-end separation
//!   and forecast runs on synthetic skies.

pub mod algebra;
pub mod alm;
pub mod components;
pub mod diagnostics;
pub mod forecast;
pub mod inference;
pub mod instrument;
pub mod optimization;
pub mod separation;
