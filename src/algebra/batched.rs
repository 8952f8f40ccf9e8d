//! algebra::batched — broadcasting matrix/vector primitives over stacked arrays.
//!
//! Purpose
//! -------
//! Provide the contraction vocabulary used by the WLS kernel, the spectral
//! likelihood and the residual forecasts: matrix–vector and matrix–matrix
//! products (optionally transposed), quadratic forms, transposes, linear
//! solves, inverses and log-determinants, all applied independently to every
//! batch entry of a stacked array.
//!
//! Key behaviors
//! -------------
//! - Vector operands have core rank 1, matrix operands core rank 2. Leading
//!   axes are batch axes and broadcast with NumPy rules
//!   (see [`crate::algebra::broadcast`]).
//! - Solves go through a Cholesky factorization first and fall back to LU,
//!   so SPD normal matrices take the cheap path and indefinite ones still
//!   work.
//! - [`regularized_inverse`] inverts a covariance through its correlation
//!   matrix and zeroes every non-finite entry on the way.
//!
//! Invariants & assumptions
//! ------------------------
//! - Inputs to solves must be finite; a non-finite entry is reported as
//!   [`LinalgError::NonFinite`] with the batch index.
//! - A matrix that neither Cholesky nor LU can factorize is reported as
//!   [`LinalgError::Singular`] with its diagonal.
//!
//! Conventions
//! -----------
//! | routine        | left core | right core | output core |
//! |----------------|-----------|------------|-------------|
//! | `mv(m, v)`     | (i, j)    | (j)        | (i)         |
//! | `mtv(m, v)`    | (j, i)    | (j)        | (i)         |
//! | `mm(a, b)`     | (i, j)    | (j, k)     | (i, k)      |
//! | `mtm(a, b)`    | (j, i)    | (j, k)     | (i, k)      |
//! | `vdot(u, v)`   | (i)       | (i)        | ()          |
//! | `solve(m, b)`  | (k, k)    | (k, n)     | (k, n)      |
//!
//! Composites (`mmm`, `mtmm`, `mmv`, `utmv`) chain the primitives above.
//!
//! Testing notes
//! -------------
//! - Unit tests compare each primitive against explicit loops on small
//!   stacks, check broadcasting of unbatched operands, and exercise the
//!   singular and non-finite error paths.
use crate::algebra::{
    broadcast::{broadcast_shapes, broadcast_to, core_shape, map_batches, zip_batches},
    errors::{LinalgError, LinalgResult},
};
use nalgebra::DMatrix;
use ndarray::{Array2, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Ix1, Ix2, Zip};

// ---- Products ----

/// Batched matrix–vector product `m v`.
pub fn mv(m: ArrayViewD<'_, f64>, v: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "mv";
    let mc = core_shape(OP, "m", m.shape(), 2)?;
    let vc = core_shape(OP, "v", v.shape(), 1)?;
    conform(OP, &mc, &vc, mc[1] == vc[0], "columns of m must match the length of v")?;
    zip_batches(OP, m, 2, v, 1, &[mc[0]], |_, m, v, mut out| {
        out.assign(&as_matrix(OP, m)?.dot(&as_vector(OP, v)?));
        Ok(())
    })
}

/// Batched transposed matrix–vector product `mᵗ v`.
pub fn mtv(m: ArrayViewD<'_, f64>, v: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "mtv";
    let mc = core_shape(OP, "m", m.shape(), 2)?;
    let vc = core_shape(OP, "v", v.shape(), 1)?;
    conform(OP, &mc, &vc, mc[0] == vc[0], "rows of m must match the length of v")?;
    zip_batches(OP, m, 2, v, 1, &[mc[1]], |_, m, v, mut out| {
        out.assign(&as_matrix(OP, m)?.t().dot(&as_vector(OP, v)?));
        Ok(())
    })
}

/// Batched matrix product `a b`.
pub fn mm(a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "mm";
    let ac = core_shape(OP, "a", a.shape(), 2)?;
    let bc = core_shape(OP, "b", b.shape(), 2)?;
    conform(OP, &ac, &bc, ac[1] == bc[0], "columns of a must match rows of b")?;
    zip_batches(OP, a, 2, b, 2, &[ac[0], bc[1]], |_, a, b, mut out| {
        out.assign(&as_matrix(OP, a)?.dot(&as_matrix(OP, b)?));
        Ok(())
    })
}

/// Batched transposed matrix product `aᵗ b`.
pub fn mtm(a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "mtm";
    let ac = core_shape(OP, "a", a.shape(), 2)?;
    let bc = core_shape(OP, "b", b.shape(), 2)?;
    conform(OP, &ac, &bc, ac[0] == bc[0], "rows of a must match rows of b")?;
    zip_batches(OP, a, 2, b, 2, &[ac[1], bc[1]], |_, a, b, mut out| {
        out.assign(&as_matrix(OP, a)?.t().dot(&as_matrix(OP, b)?));
        Ok(())
    })
}

/// Batched inner product `uᵗ v`; the output has the batch shape only.
pub fn vdot(u: ArrayViewD<'_, f64>, v: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "vdot";
    let uc = core_shape(OP, "u", u.shape(), 1)?;
    let vc = core_shape(OP, "v", v.shape(), 1)?;
    conform(OP, &uc, &vc, uc[0] == vc[0], "vectors must have equal length")?;
    zip_batches(OP, u, 1, v, 1, &[], |_, u, v, mut out| {
        out.fill(as_vector(OP, u)?.dot(&as_vector(OP, v)?));
        Ok(())
    })
}

/// Swap the two trailing axes.
pub fn transpose(a: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    let nd = a.ndim();
    if nd < 2 {
        return Err(LinalgError::RankTooLow { op: "transpose", operand: "a", ndim: nd, core: 2 });
    }
    let mut t = a;
    t.swap_axes(nd - 2, nd - 1);
    Ok(t.as_standard_layout().into_owned())
}

/// `a b c`.
pub fn mmm(
    a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>, c: ArrayViewD<'_, f64>,
) -> LinalgResult<ArrayD<f64>> {
    mm(mm(a, b)?.view(), c)
}

/// `aᵗ b c`.
pub fn mtmm(
    a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>, c: ArrayViewD<'_, f64>,
) -> LinalgResult<ArrayD<f64>> {
    mm(mtm(a, b)?.view(), c)
}

/// `a b v`.
pub fn mmv(
    a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>, v: ArrayViewD<'_, f64>,
) -> LinalgResult<ArrayD<f64>> {
    mv(a, mv(b, v)?.view())
}

/// Quadratic form `uᵗ m v`.
pub fn utmv(
    u: ArrayViewD<'_, f64>, m: ArrayViewD<'_, f64>, v: ArrayViewD<'_, f64>,
) -> LinalgResult<ArrayD<f64>> {
    vdot(u, mv(m, v)?.view())
}

// ---- Elementwise (broadcasting) ----

/// Broadcasting elementwise sum.
pub fn add(a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    elementwise("add", a, b, |x, y| x + y)
}

/// Broadcasting elementwise difference.
pub fn sub(a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    elementwise("sub", a, b, |x, y| x - y)
}

/// Broadcasting elementwise product.
pub fn mul(a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    elementwise("mul", a, b, |x, y| x * y)
}

fn elementwise<F: Fn(f64, f64) -> f64>(
    op: &'static str, a: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>, f: F,
) -> LinalgResult<ArrayD<f64>> {
    let shape = broadcast_shapes(op, a.shape(), b.shape())?;
    let a_full = broadcast_to(op, &a, &shape)?;
    let b_full = broadcast_to(op, &b, &shape)?;
    Ok(Zip::from(&a_full).and(&b_full).map_collect(|&x, &y| f(x, y)))
}

// ---- Factorizations ----

/// Batched solve of `m x = b` for a matrix right-hand side.
///
/// # Errors
/// - [`LinalgError::CoreShape`] if `m` is not square or `b` has the wrong
///   number of rows.
/// - [`LinalgError::NonFinite`] / [`LinalgError::Singular`] per batch entry.
pub fn solve(m: ArrayViewD<'_, f64>, b: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "solve";
    let mc = core_shape(OP, "m", m.shape(), 2)?;
    let bc = core_shape(OP, "b", b.shape(), 2)?;
    conform(OP, &mc, &mc, mc[0] == mc[1], "m must be square")?;
    conform(OP, &mc, &bc, mc[1] == bc[0], "rows of b must match the order of m")?;
    zip_batches(OP, m, 2, b, 2, &bc, |idx, m, b, mut out| {
        out.assign(&solve_block(OP, idx, as_matrix(OP, m)?, as_matrix(OP, b)?)?);
        Ok(())
    })
}

/// Batched inverse of square matrices.
pub fn inv(m: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "inv";
    let mc = core_shape(OP, "m", m.shape(), 2)?;
    conform(OP, &mc, &mc, mc[0] == mc[1], "m must be square")?;
    let eye = Array2::<f64>::eye(mc[0]);
    map_batches(OP, m, 2, &mc, |idx, m, mut out| {
        out.assign(&solve_block(OP, idx, as_matrix(OP, m)?, eye.view())?);
        Ok(())
    })
}

/// Batched `ln det m` for symmetric positive-definite matrices.
///
/// # Errors
/// [`LinalgError::Singular`] when an entry is not positive definite.
pub fn ln_det(m: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "ln_det";
    let mc = core_shape(OP, "m", m.shape(), 2)?;
    conform(OP, &mc, &mc, mc[0] == mc[1], "m must be square")?;
    map_batches(OP, m, 2, &[], |idx, m, mut out| {
        let m = as_matrix(OP, m)?;
        let chol = to_dmatrix(&m).cholesky().ok_or_else(|| singular(OP, idx, &m))?;
        out.fill(2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>());
        Ok(())
    })
}

/// Regularized pseudo-inverse of (batched) covariance matrices.
///
/// The covariance is rescaled to a correlation matrix with `1/sqrt(diag)`,
/// pseudo-inverted, and scaled back. Non-finite values in the scale factors
/// and in the covariance are set to zero first, so a row with zero or
/// exploding variance drops out of the inverse instead of poisoning it.
pub fn regularized_inverse(cov: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
    const OP: &str = "regularized_inverse";
    let cc = core_shape(OP, "cov", cov.shape(), 2)?;
    conform(OP, &cc, &cc, cc[0] == cc[1], "cov must be square")?;
    map_batches(OP, cov, 2, &cc, |_, c, mut out| {
        let c = as_matrix(OP, c)?;
        let n = c.nrows();
        let inv_std: Vec<f64> = (0..n).map(|i| finite_or_zero(1.0 / c[[i, i]].sqrt())).collect();
        let corr = DMatrix::from_fn(n, n, |i, j| finite_or_zero(c[[i, j]]) * inv_std[i] * inv_std[j]);
        let pinv = symmetric_pinv(corr);
        out.assign(&Array2::from_shape_fn((n, n), |(i, j)| pinv[(i, j)] * inv_std[i] * inv_std[j]));
        Ok(())
    })
}

// ---- nalgebra bridge ----

/// Copy a 2-D `ndarray` view into a `nalgebra::DMatrix`.
pub fn to_dmatrix(m: &ArrayView2<'_, f64>) -> DMatrix<f64> {
    DMatrix::from_fn(m.nrows(), m.ncols(), |i, j| m[[i, j]])
}

/// Copy a `nalgebra::DMatrix` back into an `ndarray::Array2`.
pub fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Relative eigenvalue cutoff of [`symmetric_pinv`].
pub const PINV_RCOND: f64 = 1e-15;

/// Moore–Penrose pseudo-inverse of a symmetric matrix.
///
/// Eigen-directions with `|λ| ≤ PINV_RCOND · max|λ|` are discarded.
pub fn symmetric_pinv(m: DMatrix<f64>) -> DMatrix<f64> {
    let n = m.nrows();
    let eig = m.symmetric_eigen();
    let lambda_max = eig.eigenvalues.iter().fold(0.0_f64, |acc, l| acc.max(l.abs()));
    let cutoff = PINV_RCOND * lambda_max;
    let q = &eig.eigenvectors;
    let mut out = DMatrix::<f64>::zeros(n, n);
    for (k, &lambda) in eig.eigenvalues.iter().enumerate() {
        if lambda.abs() <= cutoff || lambda == 0.0 {
            continue;
        }
        for i in 0..n {
            for j in 0..n {
                out[(i, j)] += q[(i, k)] * q[(j, k)] / lambda;
            }
        }
    }
    out
}

// ---- Helper methods ----

fn solve_block(
    op: &'static str, index: &[usize], m: ArrayView2<'_, f64>, b: ArrayView2<'_, f64>,
) -> LinalgResult<Array2<f64>> {
    if m.iter().chain(b.iter()).any(|x| !x.is_finite()) {
        return Err(LinalgError::NonFinite { op, batch_index: index.to_vec() });
    }
    let lhs = to_dmatrix(&m);
    let rhs = to_dmatrix(&b);
    let x = match lhs.clone().cholesky() {
        Some(chol) => chol.solve(&rhs),
        None => lhs.lu().solve(&rhs).ok_or_else(|| singular(op, index, &m))?,
    };
    if x.iter().any(|v| !v.is_finite()) {
        return Err(singular(op, index, &m));
    }
    Ok(from_dmatrix(&x))
}

fn singular(op: &'static str, index: &[usize], m: &ArrayView2<'_, f64>) -> LinalgError {
    LinalgError::Singular { op, batch_index: index.to_vec(), diagonal: m.diag().to_vec() }
}

fn conform(
    op: &'static str, left: &[usize], right: &[usize], ok: bool, reason: &'static str,
) -> LinalgResult<()> {
    if ok {
        Ok(())
    } else {
        Err(LinalgError::CoreShape { op, left: left.to_vec(), right: right.to_vec(), reason })
    }
}

fn as_matrix<'a>(op: &'static str, v: ArrayViewD<'a, f64>) -> LinalgResult<ArrayView2<'a, f64>> {
    let ndim = v.ndim();
    v.into_dimensionality::<Ix2>().map_err(|_| LinalgError::RankTooLow {
        op,
        operand: "core block",
        ndim,
        core: 2,
    })
}

fn as_vector<'a>(op: &'static str, v: ArrayViewD<'a, f64>) -> LinalgResult<ArrayView1<'a, f64>> {
    let ndim = v.ndim();
    v.into_dimensionality::<Ix1>().map_err(|_| LinalgError::RankTooLow {
        op,
        operand: "core block",
        ndim,
        core: 1,
    })
}

fn finite_or_zero(x: f64) -> f64 {
    if x.is_finite() { x } else { 0.0 }
}
