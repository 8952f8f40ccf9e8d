//! components — sky emission laws and the parametric mixing matrix.
//!
//! Purpose
//! -------
//! Describe how each sky component scales with frequency and assemble an
//! ordered list of components into the mixing matrix `A(β)` consumed by the
//! least-squares kernel and the spectral likelihood.
//!
//! Key behaviors
//! -------------
//! - [`EmissionLaw`] is the extension point: a name, a list of free
//!   parameters and a frequency response, with analytic or
//!   finite-difference derivatives.
//! - Built-in laws: [`Cmb`], [`Dust`] and [`Synchrotron`], each usable in
//!   K_CMB or K_RJ ([`Units`]).
//! - [`MixingMatrix`] evaluates `A`, `∂A/∂β` and `∂²A/∂β²`, with optional
//!   prewhitening and per-pixel parameter maps.
//!
//! Invariants & assumptions
//! ------------------------
//! - Columns of `A` follow component order; parameters are concatenated in
//!   the same order.
//! - Every model-layer failure is a [`ModelError`]; nothing panics on bad
//!   input.
//!
//! Downstream usage
//! ----------------
//! - `separation` builds a [`MixingMatrix`] once per fit and calls
//!   `evaluate` / `gradient` / `hessian` inside the objective.
//! - `forecast` looks up the CMB column via [`MixingMatrix::cmb_index`].

pub mod emission;
pub mod errors;
pub mod mixing_matrix;
pub mod units;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::emission::{Cmb, Dust, EmissionLaw, FreeParam, ParamSpec, Synchrotron};
pub use self::errors::{ModelError, ModelResult};
pub use self::mixing_matrix::{MixingMatrix, MixingMatrixBuilder};
pub use self::units::{H_OVER_K, T_CMB, Units, k_rj_to_k_cmb};
