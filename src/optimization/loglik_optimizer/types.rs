//! loglik_optimizer::types — numeric aliases for spectral-parameter fits.
//!
//! The fits in this crate move small dense vectors of spectral parameters
//! (β_d, T_d, β_s, ...) through argmin. Every optimizer module refers to the
//! aliases below rather than to `ndarray` or argmin generics directly.
//!
//! Conventions
//! -----------
//! - [`Theta`] and [`Grad`] have one entry per free parameter, or per
//!   unconstrained coordinate on the bounded path.
//! - [`Cost`] is the minimized quantity `c(θ) = −log L(θ)`; for the
//!   spectral likelihood that is `½ χ²` up to a constant.
use argmin::solver::{
    linesearch::{BacktrackingLineSearch, HagerZhangLineSearch, MoreThuenteLineSearch, condition::ArmijoCondition},
    quasinewton::LBFGS,
};
use ndarray::{Array1, Array2};
use std::collections::HashMap;

/// Spectral parameters, or their unconstrained images.
pub type Theta = Array1<f64>;

/// Gradient with respect to [`Theta`].
pub type Grad = Array1<f64>;

/// Dense `n × n` second-derivative matrix, `n = θ.len()`.
pub type Hessian = Array2<f64>;

/// Objective handed to argmin.
pub type Cost = f64;

/// Evaluation counters keyed by argmin's names (`"cost_count"`, ...).
pub type FnEvalMap = HashMap<String, u64>;

/// L-BFGS history length when the caller does not choose one.
pub const DEFAULT_LBFGS_MEM: usize = 7;

pub type HagerZhangLS = HagerZhangLineSearch<Theta, Grad, Cost>;
pub type MoreThuenteLS = MoreThuenteLineSearch<Theta, Grad, Cost>;
pub type BacktrackingLS = BacktrackingLineSearch<Theta, Grad, ArmijoCondition<Cost>, Cost>;

/// L-BFGS with a Hager–Zhang line search.
pub type LbfgsHagerZhang = LBFGS<HagerZhangLS, Theta, Grad, Cost>;

/// L-BFGS with a More–Thuente line search.
pub type LbfgsMoreThuente = LBFGS<MoreThuenteLS, Theta, Grad, Cost>;

/// L-BFGS with an Armijo backtracking line search.
pub type LbfgsBacktracking = LBFGS<BacktrackingLS, Theta, Grad, Cost>;
