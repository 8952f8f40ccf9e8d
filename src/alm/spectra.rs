//! alm::spectra — empirical angular power spectra from alms.
//!
//! `C_ℓ^{ab} = [Re(a_ℓ0 b*_ℓ0) + 2 Σ_{m≥1} Re(a_ℓm b*_ℓm)] / (2ℓ + 1)`.
//!
//! [`cross_spectra`] builds the full `(n_freq, n_freq, lmax + 1)` table
//! used by the forecast; [`empirical_harmonic_covariance`] does the same
//! per Stokes component for `(n_stokes, n_freq, n_lm)` inputs.
use crate::alm::{
    codec::AlmLayout,
    errors::{AlmError, AlmResult},
};
use nalgebra::Complex;
use ndarray::{Array1, Array3, ArrayD, ArrayView1, ArrayView2, ArrayViewD, Axis, Ix2, IxDyn, s};

/// Cross-spectrum of two alm vectors of the same layout.
///
/// # Errors
/// [`AlmError::LengthMismatch`] or [`AlmError::InvalidSize`] for
/// incompatible inputs.
pub fn alm2cl(
    a: ArrayView1<'_, Complex<f64>>,
    b: ArrayView1<'_, Complex<f64>>,
) -> AlmResult<Array1<f64>> {
    if a.len() != b.len() {
        return Err(AlmError::LengthMismatch { what: "alm2cl operands", expected: a.len(), found: b.len() });
    }
    let layout = AlmLayout::from_size(a.len())?;
    let (ls, ms) = layout.getlm();
    let mut cl = Array1::<f64>::zeros(layout.lmax() + 1);
    for k in 0..a.len() {
        let w = if ms[k] == 0 { 1.0 } else { 2.0 };
        cl[ls[k]] += w * (a[k] * b[k].conj()).re;
    }
    for (l, c) in cl.iter_mut().enumerate() {
        *c /= (2 * l + 1) as f64;
    }
    Ok(cl)
}

/// All auto- and cross-spectra of `(n_freq, n_lm)` alms.
pub fn cross_spectra(alms: ArrayView2<'_, Complex<f64>>) -> AlmResult<Array3<f64>> {
    let (n_freq, n_lm) = alms.dim();
    let layout = AlmLayout::from_size(n_lm)?;
    let mut out = Array3::<f64>::zeros((n_freq, n_freq, layout.lmax() + 1));
    for i in 0..n_freq {
        for j in i..n_freq {
            let cl = alm2cl(alms.row(i), alms.row(j))?;
            out.slice_mut(s![i, j, ..]).assign(&cl);
            out.slice_mut(s![j, i, ..]).assign(&cl);
        }
    }
    Ok(out)
}

/// Empirical covariance of alms per Stokes component.
///
/// Input `(n_freq, n_lm)` gives `(n_freq, n_freq, lmax + 1)`; input
/// `(n_stokes, n_freq, n_lm)` gives `(n_stokes, n_freq, n_freq, lmax + 1)`.
///
/// # Errors
/// [`AlmError::RankTooLow`] for fewer than two axes or more than three.
pub fn empirical_harmonic_covariance(alms: ArrayViewD<'_, Complex<f64>>) -> AlmResult<ArrayD<f64>> {
    match alms.ndim() {
        2 => {
            let two = alms.into_dimensionality::<Ix2>().map_err(|_| AlmError::RankTooLow {
                what: "alms",
                ndim: 2,
                needed: 2,
            })?;
            Ok(cross_spectra(two)?.into_dyn())
        }
        3 => {
            let n_stokes = alms.shape()[0];
            let n_freq = alms.shape()[1];
            let layout = AlmLayout::from_size(alms.shape()[2])?;
            let mut out =
                ArrayD::<f64>::zeros(IxDyn(&[n_stokes, n_freq, n_freq, layout.lmax() + 1]));
            for (s, stokes) in alms.axis_iter(Axis(0)).enumerate() {
                let two = stokes.into_dimensionality::<Ix2>().map_err(|_| AlmError::RankTooLow {
                    what: "alms",
                    ndim: 3,
                    needed: 3,
                })?;
                out.index_axis_mut(Axis(0), s).assign(&cross_spectra(two)?.into_dyn());
            }
            Ok(out)
        }
        ndim => Err(AlmError::RankTooLow { what: "alms (2 or 3 axes)", ndim, needed: 2 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alm::codec::format_alms;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - The power spectrum of a hand-built alm vector.
    // - Symmetry of the cross-spectra table and the per-Stokes layout.
    // - The identity between real-packed inner products and C_ℓ.
    // -------------------------------------------------------------------------

    fn alms(lmax: usize, seed: f64) -> Array1<Complex<f64>> {
        let (ls, ms) = AlmLayout::new(lmax).getlm();
        Array1::from_iter(ls.iter().zip(&ms).map(|(&l, &m)| {
            let im = if m == 0 { 0.0 } else { (seed - 0.4 * m as f64 + 0.1 * l as f64).sin() };
            Complex::new((seed + 0.9 * l as f64 - 0.2 * m as f64).cos(), im)
        }))
    }

    #[test]
    // Purpose
    // -------
    // C_ℓ weights m = 0 once and m ≥ 1 twice over 2ℓ + 1.
    //
    // Given
    // -----
    // - lmax = 1 alms: a_00 = 2, a_10 = 1, a_11 = 1 + i.
    //
    // Expect
    // ------
    // - C_0 = 4, C_1 = (1 + 2·2)/3 = 5/3.
    fn auto_spectrum_by_hand() {
        let a = ndarray::array![Complex::new(2.0, 0.0), Complex::new(1.0, 0.0), Complex::new(1.0, 1.0)];
        let cl = alm2cl(a.view(), a.view()).unwrap();
        assert_relative_eq!(cl[0], 4.0);
        assert_relative_eq!(cl[1], 5.0 / 3.0);
    }

    #[test]
    // Purpose
    // -------
    // The cross table is symmetric in frequency, and the 3-axis form
    // repeats it per Stokes component.
    //
    // Given
    // -----
    // - Two frequencies at lmax = 4, stacked as two Stokes components.
    //
    // Expect
    // ------
    // - out[i, j] == out[j, i]; per-Stokes blocks equal the 2-axis result.
    fn cross_table_is_symmetric_and_stacks() {
        // Arrange
        let n_lm = AlmLayout::new(4).size();
        let mut two = Array2::<Complex<f64>>::zeros((2, n_lm));
        two.row_mut(0).assign(&alms(4, 0.3));
        two.row_mut(1).assign(&alms(4, 1.7));
        let mut three = Array3::<Complex<f64>>::zeros((2, 2, n_lm));
        three.index_axis_mut(Axis(0), 0).assign(&two);
        three.index_axis_mut(Axis(0), 1).assign(&two);

        // Act
        let table = cross_spectra(two.view()).unwrap();
        let stacked = empirical_harmonic_covariance(three.view().into_dyn()).unwrap();

        // Assert
        assert_eq!(table.dim(), (2, 2, 5));
        assert_eq!(stacked.shape(), &[2, 2, 2, 5]);
        for l in 0..5 {
            assert_relative_eq!(table[[0, 1, l]], table[[1, 0, l]]);
            assert_relative_eq!(stacked[[1, 0, 1, l]], table[[0, 1, l]]);
        }
    }

    #[test]
    // Purpose
    // -------
    // Real packing preserves the spectrum: summing products of real slots
    // at ℓ over 2ℓ + 1 gives C_ℓ.
    //
    // Given
    // -----
    // - Two alm vectors at lmax = 5.
    //
    // Expect
    // ------
    // - Σ_{slots at ℓ} x_a x_b / (2ℓ + 1) == alm2cl(a, b)[ℓ] to 1e-12.
    fn real_packing_preserves_inner_products() {
        // Arrange
        let a = alms(5, 0.4);
        let b = alms(5, -1.1);
        let ra = format_alms(a.view().into_dyn(), 0).unwrap();
        let rb = format_alms(b.view().into_dyn(), 0).unwrap();
        let ells = AlmLayout::new(5).real_alm_ells();

        // Act
        let mut packed = Array1::<f64>::zeros(6);
        for (slot, &l) in ells.iter().enumerate() {
            packed[l] += ra[slot] * rb[slot];
        }
        for (l, v) in packed.iter_mut().enumerate() {
            *v /= (2 * l + 1) as f64;
        }

        // Assert
        let cl = alm2cl(a.view(), b.view()).unwrap();
        for l in 0..6 {
            assert_relative_eq!(packed[l], cl[l], epsilon = 1e-12);
        }
    }
}
