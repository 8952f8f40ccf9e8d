//! algebra::weights — the generalized least-squares operator `W` and its
//! derivatives with respect to the spectral parameters.
//!
//! Purpose
//! -------
//! Given a mixing matrix `A` (frequencies × components, possibly stacked
//! over pixels or multipoles) and inverse noise weights `N⁻¹`, compute
//!
//! ```text
//! M = Aᵗ N⁻¹ A,      W = M⁻¹ Aᵗ N⁻¹
//! ```
//!
//! and the first and second parameter derivatives of `W`, which feed the
//! spectral-likelihood gradient and the residual-foreground forecasts.
//!
//! Key behaviors
//! -------------
//! - [`WlsKernel::new`] factorizes the normal equations once and caches
//!   `N⁻¹A`, `M` and `W` for the derivative routines.
//! - `W` is always obtained by solving `M W = (N⁻¹A)ᵗ`; `M⁻¹` is never
//!   formed unless explicitly requested through [`WlsKernel::inv_atna`].
//! - Derivatives use `∂(M⁻¹) = −M⁻¹ (∂M) M⁻¹`:
//!   - `W_i = M⁻¹ (A_iᵗ N⁻¹ − M_i W)` with `M_i = A_iᵗN⁻¹A + AᵗN⁻¹A_i`;
//!   - `W_ij = M⁻¹ (A_ijᵗ N⁻¹ − M_ij W − M_i W_j − M_j W_i)` with
//!     `M_ij = A_ijᵗN⁻¹A + A_iᵗN⁻¹A_j + A_jᵗN⁻¹A_i + AᵗN⁻¹A_ij`.
//!
//! Invariants & assumptions
//! ------------------------
//! - `N⁻¹` is symmetric, so `(N⁻¹ X)ᵗ = Xᵗ N⁻¹`.
//! - `M` is SPD on its support; a singular `M` surfaces as
//!   [`LinalgError::Singular`] from the batched solve.
//! - Derivative lists are ordered like the mixing-matrix parameters;
//!   `W_dBdB` is returned as a full symmetric grid.
//!
//! Downstream usage
//! ----------------
//! - The spectral likelihood builds one kernel per evaluation and reads
//!   `W` (amplitudes) and `M⁻¹` (amplitude covariance).
//! - Forecasting evaluates `W`, `W_dB` and `W_dBdB` at the best fit and
//!   extracts the CMB row.
//!
//! Testing notes
//! -------------
//! - `W` is checked against the closed-form projector for a hand-picked
//!   3×2 mixing matrix, and `W A = I`.
//! - `W_dB` / `W_dBdB` are checked against finite differences of `W` on a
//!   one-parameter family of mixing matrices.
use crate::algebra::{
    batched::{add, inv, mm, mtm, mv, solve, sub, transpose},
    errors::{LinalgError, LinalgResult},
    noise_weights::InvNoise,
};
use ndarray::{ArrayD, ArrayViewD};

/// Cached normal equations for one mixing matrix and one noise weighting.
#[derive(Debug, Clone)]
pub struct WlsKernel {
    a: ArrayD<f64>,
    na: ArrayD<f64>,
    m: ArrayD<f64>,
    w: ArrayD<f64>,
}

impl WlsKernel {
    /// Build the kernel for `A` of shape `(..., n_freq, n_comp)`.
    pub fn new(a: ArrayViewD<'_, f64>, inv_n: &InvNoise) -> LinalgResult<Self> {
        let na = inv_n.apply_mat(a.view())?;
        let m = mtm(a.view(), na.view())?;
        let w = solve(m.view(), transpose(na.view())?.view())?;
        Ok(Self { a: a.to_owned(), na, m, w })
    }

    /// `A` as given to [`WlsKernel::new`].
    pub fn mixing(&self) -> &ArrayD<f64> {
        &self.a
    }

    /// `W = (AᵗN⁻¹A)⁻¹AᵗN⁻¹`, shape `(..., n_comp, n_freq)`.
    pub fn w(&self) -> &ArrayD<f64> {
        &self.w
    }

    /// `AᵗN⁻¹A`, shape `(..., n_comp, n_comp)`.
    pub fn atna(&self) -> &ArrayD<f64> {
        &self.m
    }

    /// `(AᵗN⁻¹A)⁻¹`, the covariance of the amplitude estimates.
    pub fn inv_atna(&self) -> LinalgResult<ArrayD<f64>> {
        inv(self.m.view())
    }

    /// Amplitudes `s = W d` for data with the frequency axis last.
    pub fn amplitudes(&self, d: ArrayViewD<'_, f64>) -> LinalgResult<ArrayD<f64>> {
        mv(self.w.view(), d)
    }

    /// First derivatives `[W_i]`, one per entry of `a_db`.
    pub fn w_db(&self, a_db: &[ArrayD<f64>], inv_n: &InvNoise) -> LinalgResult<Vec<ArrayD<f64>>> {
        let parts = self.first_order(a_db, inv_n)?;
        Ok(parts.into_iter().map(|p| p.w_i).collect())
    }

    /// Second derivatives `[[W_ij]]` (symmetric), given `[A_i]` and `[[A_ij]]`.
    pub fn w_dbdb(
        &self, a_db: &[ArrayD<f64>], a_dbdb: &[Vec<ArrayD<f64>>], inv_n: &InvNoise,
    ) -> LinalgResult<Vec<Vec<ArrayD<f64>>>> {
        let p = a_db.len();
        if a_dbdb.len() != p {
            return Err(LinalgError::LengthMismatch {
                what: "rows of the second-derivative grid",
                expected: p,
                found: a_dbdb.len(),
            });
        }
        if let Some(row) = a_dbdb.iter().find(|row| row.len() != p) {
            return Err(LinalgError::LengthMismatch {
                what: "columns of the second-derivative grid",
                expected: p,
                found: row.len(),
            });
        }
        let first = self.first_order(a_db, inv_n)?;

        let mut grid: Vec<Vec<Option<ArrayD<f64>>>> = vec![vec![None; p]; p];
        for i in 0..p {
            for j in 0..=i {
                let a_ij = &a_dbdb[i][j];
                let na_ij = inv_n.apply_mat(a_ij.view())?;
                // M_ij = A_ijᵗN⁻¹A + AᵗN⁻¹A_ij + A_iᵗN⁻¹A_j + A_jᵗN⁻¹A_i
                let m_ij = add(
                    add(mtm(a_ij.view(), self.na.view())?.view(), mtm(self.na.view(), a_ij.view())?.view())?
                        .view(),
                    add(
                        mtm(a_db[i].view(), first[j].na_i.view())?.view(),
                        mtm(a_db[j].view(), first[i].na_i.view())?.view(),
                    )?
                    .view(),
                )?;
                let rhs = sub(
                    sub(transpose(na_ij.view())?.view(), mm(m_ij.view(), self.w.view())?.view())?
                        .view(),
                    add(
                        mm(first[i].m_i.view(), first[j].w_i.view())?.view(),
                        mm(first[j].m_i.view(), first[i].w_i.view())?.view(),
                    )?
                    .view(),
                )?;
                let w_ij = solve(self.m.view(), rhs.view())?;
                if i != j {
                    grid[j][i] = Some(w_ij.clone());
                }
                grid[i][j] = Some(w_ij);
            }
        }
        Ok(grid.into_iter().map(|row| row.into_iter().flatten().collect()).collect())
    }

    fn first_order(&self, a_db: &[ArrayD<f64>], inv_n: &InvNoise) -> LinalgResult<Vec<FirstOrder>> {
        a_db.iter()
            .map(|a_i| {
                let na_i = inv_n.apply_mat(a_i.view())?;
                // M_i = A_iᵗN⁻¹A + AᵗN⁻¹A_i
                let m_i = add(mtm(a_i.view(), self.na.view())?.view(), mtm(self.na.view(), a_i.view())?.view())?;
                let rhs = sub(transpose(na_i.view())?.view(), mm(m_i.view(), self.w.view())?.view())?;
                let w_i = solve(self.m.view(), rhs.view())?;
                Ok(FirstOrder { na_i, m_i, w_i })
            })
            .collect()
    }
}

struct FirstOrder {
    na_i: ArrayD<f64>,
    m_i: ArrayD<f64>,
    w_i: ArrayD<f64>,
}

// ---- Free-function surface ----

/// `W(A, N⁻¹)`; with [`InvNoise::Identity`] this is the OLS projector.
pub fn w(a: ArrayViewD<'_, f64>, inv_n: &InvNoise) -> LinalgResult<ArrayD<f64>> {
    Ok(WlsKernel::new(a, inv_n)?.w)
}

/// `(AᵗN⁻¹A)⁻¹` per batch entry.
pub fn inv_atna(a: ArrayViewD<'_, f64>, inv_n: &InvNoise) -> LinalgResult<ArrayD<f64>> {
    WlsKernel::new(a, inv_n)?.inv_atna()
}

/// `[W_i]` for the derivatives `[A_i]`.
pub fn w_db(
    a: ArrayViewD<'_, f64>, a_db: &[ArrayD<f64>], inv_n: &InvNoise,
) -> LinalgResult<Vec<ArrayD<f64>>> {
    WlsKernel::new(a, inv_n)?.w_db(a_db, inv_n)
}

/// `[[W_ij]]` for the derivatives `[A_i]` and `[[A_ij]]`.
pub fn w_dbdb(
    a: ArrayViewD<'_, f64>, a_db: &[ArrayD<f64>], a_dbdb: &[Vec<ArrayD<f64>>], inv_n: &InvNoise,
) -> LinalgResult<Vec<Vec<ArrayD<f64>>>> {
    WlsKernel::new(a, inv_n)?.w_dbdb(a_db, a_dbdb, inv_n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, array};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - W against the closed-form GLS projector and the identity W A = I.
    // - Diagonal weights versus their dense equivalent.
    // - W_dB and W_dBdB against central finite differences of W on an
    //   analytic one-parameter mixing family.
    // -------------------------------------------------------------------------

    /// A(β) = [[1, 1], [1, 2^β], [1, 3^β]] and its first two β-derivatives.
    fn family(beta: f64) -> (Array2<f64>, Array2<f64>, Array2<f64>) {
        let l2 = 2.0_f64.ln();
        let l3 = 3.0_f64.ln();
        let a = array![[1.0, 1.0], [1.0, 2.0_f64.powf(beta)], [1.0, 3.0_f64.powf(beta)]];
        let da = array![[0.0, 0.0], [0.0, l2 * 2.0_f64.powf(beta)], [0.0, l3 * 3.0_f64.powf(beta)]];
        let dda = array![
            [0.0, 0.0],
            [0.0, l2 * l2 * 2.0_f64.powf(beta)],
            [0.0, l3 * l3 * 3.0_f64.powf(beta)]
        ];
        (a, da, dda)
    }

    #[test]
    // Purpose
    // -------
    // With identity weights W is the OLS projector (AᵗA)⁻¹Aᵗ.
    //
    // Given
    // -----
    // - A = [[1, 0], [1, 1], [1, 2]]; AᵗA = [[3, 3], [3, 5]].
    //
    // Expect
    // ------
    // - W = [[5/6, 1/3, −1/6], [−1/2, 0, 1/2]] and W A = I.
    fn w_matches_closed_form_projector() {
        // Arrange
        let a = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0]];

        // Act
        let wm = w(a.view().into_dyn(), &InvNoise::Identity).unwrap();

        // Assert
        let want = array![[5.0 / 6.0, 1.0 / 3.0, -1.0 / 6.0], [-0.5, 0.0, 0.5]];
        for ((i, j), v) in want.indexed_iter() {
            assert_abs_diff_eq!(wm[[i, j]], *v, epsilon = 1e-12);
        }
        let wa = mm(wm.view(), a.view().into_dyn()).unwrap();
        assert_abs_diff_eq!(wa[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wa[[0, 1]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wa[[1, 0]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(wa[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Diagonal and dense weights give the same W and (AᵗN⁻¹A)⁻¹.
    //
    // Given
    // -----
    // - The family at β = 1.5 and weights diag(1, 4, 0.25).
    //
    // Expect
    // ------
    // - Identical outputs up to round-off.
    fn diagonal_weights_match_dense_weights() {
        // Arrange
        let (a, _, _) = family(1.5);
        let diag = InvNoise::Diagonal(array![1.0, 4.0, 0.25].into_dyn());
        let full = InvNoise::Full(diag.to_full(3));

        // Act
        let wd = w(a.view().into_dyn(), &diag).unwrap();
        let wf = w(a.view().into_dyn(), &full).unwrap();
        let cd = inv_atna(a.view().into_dyn(), &diag).unwrap();
        let cf = inv_atna(a.view().into_dyn(), &full).unwrap();

        // Assert
        for (x, y) in wd.iter().zip(wf.iter()).chain(cd.iter().zip(cf.iter())) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Analytic W_dB and W_dBdB agree with finite differences of W.
    //
    // Given
    // -----
    // - The family at β = 1.2, diagonal weights, step h = 1e-5.
    //
    // Expect
    // ------
    // - |W_β − ΔW/Δβ| < 1e-7 and |W_ββ − Δ²W/Δβ²| < 1e-4 entrywise.
    fn w_derivatives_match_finite_differences() {
        // Arrange
        let beta = 1.2;
        let h = 1e-5;
        let inv_n = InvNoise::Diagonal(array![2.0, 1.0, 0.5].into_dyn());
        let (a, da, dda) = family(beta);
        let (a_p, _, _) = family(beta + h);
        let (a_m, _, _) = family(beta - h);

        // Act
        let kernel = WlsKernel::new(a.view().into_dyn(), &inv_n).unwrap();
        let wdb = kernel.w_db(&[da.clone().into_dyn()], &inv_n).unwrap();
        let wdbdb = kernel.w_dbdb(&[da.into_dyn()], &[vec![dda.into_dyn()]], &inv_n).unwrap();
        let w0 = kernel.w().clone();
        let wp = w(a_p.view().into_dyn(), &inv_n).unwrap();
        let wm = w(a_m.view().into_dyn(), &inv_n).unwrap();

        // Assert
        assert_eq!(wdb.len(), 1);
        assert_eq!(wdbdb.len(), 1);
        assert_eq!(wdbdb[0].len(), 1);
        for (ix, v) in wdb[0].indexed_iter() {
            let fd = (wp[&ix] - wm[&ix]) / (2.0 * h);
            assert_abs_diff_eq!(*v, fd, epsilon = 1e-7);
            let fd2 = (wp[&ix] - 2.0 * w0[&ix] + wm[&ix]) / (h * h);
            assert_abs_diff_eq!(wdbdb[0][0][&ix], fd2, epsilon = 1e-4);
        }
    }

    #[test]
    // Purpose
    // -------
    // The kernel broadcasts over a stack of per-pixel mixing matrices.
    //
    // Given
    // -----
    // - A (2, 3, 2) stack built from the family at β = 1 and β = 2.
    //
    // Expect
    // ------
    // - Each slice of the batched W equals the W of the single matrix.
    fn kernel_broadcasts_over_pixel_stack() {
        // Arrange
        let (a1, _, _) = family(1.0);
        let (a2, _, _) = family(2.0);
        let stack = ndarray::stack(ndarray::Axis(0), &[a1.view(), a2.view()]).unwrap();

        // Act
        let wb = w(stack.view().into_dyn(), &InvNoise::Identity).unwrap();
        let w1 = w(a1.view().into_dyn(), &InvNoise::Identity).unwrap();
        let w2 = w(a2.view().into_dyn(), &InvNoise::Identity).unwrap();

        // Assert
        assert_eq!(wb.shape(), &[2, 2, 3]);
        for i in 0..2 {
            for j in 0..3 {
                assert_abs_diff_eq!(wb[[0, i, j]], w1[[i, j]], epsilon = 1e-12);
                assert_abs_diff_eq!(wb[[1, i, j]], w2[[i, j]], epsilon = 1e-12);
            }
        }
    }
}
