//! inference — uncertainty of fitted spectral parameters.
//!
//! Purpose
//! -------
//! Convert the information matrix of a spectral-likelihood fit into the
//! parameter covariance `Σ` and standard errors.
//!
//! Key behaviors
//! -------------
//! - [`invert_fisher`]: eigen-based inversion that refuses unconstrained
//!   directions with [`LinalgError::Singular`](crate::algebra::LinalgError).
//! - [`standard_errors`]: `√diag(Σ)`.
//! - [`numerical_information`]: finite-difference observed information,
//!   used to cross-check analytic Fisher and Hessian matrices.
//!
//! Conventions
//! -----------
//! - Parameters live in model space `β` (bounds are already undone by the
//!   optimizer), and matrices use the total log-likelihood `ℓ = −χ²/2`.
//! - Failures are reported through `LinalgResult` / `OptResult`; nothing
//!   here logs or panics.

pub mod fisher;

// ---- Re-exports (primary surface) -----------------------------------------

pub use self::fisher::{invert_fisher, numerical_information, standard_errors, symmetrized};
