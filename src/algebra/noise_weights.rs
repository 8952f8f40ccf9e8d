//! algebra::noise_weights — inverse noise covariance representations.
//!
//! Purpose
//! -------
//! Represent the inverse noise covariance `N⁻¹` that weights the WLS kernel
//! and the spectral likelihood, in whichever form the caller has it:
//! nothing (identity), a per-frequency diagonal, or a dense
//! frequency × frequency block. All three broadcast against the data batch
//! shape (pixels, Stokes, multipoles).
//!
//! Key behaviors
//! -------------
//! - [`InvNoise::apply_vec`] / [`InvNoise::apply_mat`] compute `N⁻¹ v` and
//!   `N⁻¹ X` without materializing a dense matrix for the diagonal case.
//! - [`InvNoise::from_covariance`] builds a dense weight from a covariance
//!   through [`regularized_inverse`].
//! - [`InvNoise::compact_pixels`] and [`InvNoise::select_leading`] restrict
//!   per-pixel / per-multipole weights to a subset of the leading axis.
//!
//! Invariants & assumptions
//! ------------------------
//! - `Diagonal` arrays have the frequency axis last; `Full` arrays have two
//!   trailing frequency axes.
//! - Weights are symmetric; `apply_mat` therefore also serves `Xᵗ N⁻¹`
//!   after a transpose.
use crate::algebra::{
    batched::{mm, mul, mv, regularized_inverse},
    errors::{LinalgError, LinalgResult},
};
use ndarray::{Array2, ArrayD, ArrayViewD, Axis, Dimension, IxDyn};

/// Inverse noise covariance, broadcast over the data batch axes.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum InvNoise {
    /// `N⁻¹ = I`: the kernel reduces to ordinary least squares.
    #[default]
    Identity,
    /// Per-frequency weights with shape `(..., n_freq)`.
    Diagonal(ArrayD<f64>),
    /// Dense weights with shape `(..., n_freq, n_freq)`.
    Full(ArrayD<f64>),
}

impl InvNoise {
    /// Diagonal weights; the array must have at least one axis.
    pub fn diagonal(weights: ArrayD<f64>) -> LinalgResult<Self> {
        if weights.ndim() < 1 {
            return Err(LinalgError::RankTooLow {
                op: "InvNoise::diagonal",
                operand: "weights",
                ndim: 0,
                core: 1,
            });
        }
        Ok(InvNoise::Diagonal(weights))
    }

    /// Dense weights; the trailing block must be square.
    pub fn full(weights: ArrayD<f64>) -> LinalgResult<Self> {
        let nd = weights.ndim();
        if nd < 2 {
            return Err(LinalgError::RankTooLow {
                op: "InvNoise::full",
                operand: "weights",
                ndim: nd,
                core: 2,
            });
        }
        let (r, c) = (weights.shape()[nd - 2], weights.shape()[nd - 1]);
        if r != c {
            return Err(LinalgError::CoreShape {
                op: "InvNoise::full",
                left: vec![r, c],
                right: vec![r, c],
                reason: "frequency block must be square",
            });
        }
        Ok(InvNoise::Full(weights))
    }

    /// `diag(1 / variance)`, with non-finite reciprocals set to zero.
    pub fn from_variances(variances: ArrayViewD<'_, f64>) -> Self {
        InvNoise::Diagonal(variances.mapv(|v| {
            let w = 1.0 / v;
            if w.is_finite() { w } else { 0.0 }
        }))
    }

    /// Dense weights from a (batched) covariance via the regularized inverse.
    pub fn from_covariance(cov: ArrayViewD<'_, f64>) -> LinalgResult<Self> {
        Ok(InvNoise::Full(regularized_inverse(cov)?))
    }

    /// Number of frequencies, when the weights carry that information.
    pub fn n_freq(&self) -> Option<usize> {
        match self {
            InvNoise::Identity => None,
            InvNoise::Diagonal(d) => d.shape().last().copied(),
            InvNoise::Full(m) => m.shape().last().copied(),
        }
    }

    /// Number of leading (batch) axes of the weights.
    pub fn batch_ndim(&self) -> usize {
        match self {
            InvNoise::Identity => 0,
            InvNoise::Diagonal(d) => d.ndim().saturating_sub(1),
            InvNoise::Full(m) => m.ndim().saturating_sub(2),
        }
    }

    /// `N⁻¹ v` for vectors with the frequency axis last.
    pub fn apply_vec(&self, v: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
        match self {
            InvNoise::Identity => Ok(v.to_owned()),
            InvNoise::Diagonal(d) => mul(d.view(), v),
            InvNoise::Full(m) => mv(m.view(), v),
        }
    }

    /// `N⁻¹ X` for matrices whose rows are frequencies.
    pub fn apply_mat(&self, x: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
        match self {
            InvNoise::Identity => Ok(x.to_owned()),
            InvNoise::Diagonal(d) => {
                let col = d.view().insert_axis(Axis(d.ndim()));
                mul(col, x)
            }
            InvNoise::Full(m) => mm(m.view(), x),
        }
    }

    /// Dense `(..., n_freq, n_freq)` form of the weights.
    pub fn to_full(&self, n_freq: usize) -> ArrayD<f64> {
        match self {
            InvNoise::Identity => Array2::<f64>::eye(n_freq).into_dyn(),
            InvNoise::Diagonal(d) => {
                let mut shape = d.shape().to_vec();
                let f = shape.last().copied().unwrap_or(0);
                shape.push(f);
                let mut out = ArrayD::<f64>::zeros(IxDyn(&shape));
                for (ix, &w) in d.indexed_iter() {
                    let mut full_ix = ix.slice().to_vec();
                    full_ix.push(ix[ix.ndim() - 1]);
                    out[IxDyn(&full_ix)] = w;
                }
                out
            }
            InvNoise::Full(m) => m.clone(),
        }
    }

    /// Pick entries of the leading weight axis (repeats allowed).
    ///
    /// Identity weights and weights without batch axes are returned as is.
    pub fn select_leading(&self, indices: &[usize]) -> Self {
        if self.batch_ndim() == 0 {
            return self.clone();
        }
        match self {
            InvNoise::Identity => InvNoise::Identity,
            InvNoise::Diagonal(d) => InvNoise::Diagonal(d.select(Axis(0), indices)),
            InvNoise::Full(m) => InvNoise::Full(m.select(Axis(0), indices)),
        }
    }

    /// Restrict per-pixel weights to the kept pixels.
    ///
    /// Weights are treated as per-pixel when they have as many batch axes as
    /// the data and their leading axis has length `n_pix`; anything else is
    /// broadcast and stays untouched.
    pub fn compact_pixels(&self, data_batch_ndim: usize, n_pix: usize, keep: &[usize]) -> Self {
        let leading = match self {
            InvNoise::Identity => None,
            InvNoise::Diagonal(d) => d.shape().first().copied(),
            InvNoise::Full(m) => m.shape().first().copied(),
        };
        if self.batch_ndim() == data_batch_ndim && data_batch_ndim > 0 && leading == Some(n_pix) {
            self.select_leading(keep)
        } else {
            self.clone()
        }
    }

    /// Insert a size-1 batch axis at `axis` (counted among batch axes).
    pub fn insert_batch_axis(&self, axis: usize) -> Self {
        match self {
            InvNoise::Identity => InvNoise::Identity,
            InvNoise::Diagonal(d) => InvNoise::Diagonal(d.clone().insert_axis(Axis(axis))),
            InvNoise::Full(m) => InvNoise::Full(m.clone().insert_axis(Axis(axis))),
        }
    }
}
