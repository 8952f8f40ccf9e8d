//! alm::codec — complex ↔ real packing of spherical-harmonic coefficients.
//!
//! Purpose
//! -------
//! The separation kernel works on real vectors. This module maps complex
//! alms in the HEALPix m-major layout onto real vectors whose Euclidean
//! inner product reproduces the angular power spectrum, and back.
//!
//! Key behaviors
//! -------------
//! - [`AlmLayout`] indexes `(ℓ, m)` as `m(2 lmax + 1 − m)/2 + ℓ`.
//! - [`format_alms`]: `(…, n_lm)` complex → `(…, 2 n_lm)` real with
//!   interleaved `(re, im)`, `m ≠ 0` entries scaled by `√2`, the imaginary
//!   slots of `m = 0` zeroed, and `ℓ < lmin` zeroed. A slot that is UNSEEN
//!   or NaN in any channel is zeroed in every channel.
//! - [`r_to_c_alms`] undoes the packing (zeroed slots stay zero).
//! - [`format_bls`] expands per-ℓ beams onto the real layout.
//!
//! Invariants & assumptions
//! ------------------------
//! - `r_to_c_alms(format_alms(a, 0))` returns `a` with the imaginary part
//!   of every `m = 0` coefficient dropped, which is zero for real fields.
//!
//! Testing notes
//! -------------
//! - Round trip, the `m = 0` masking, the `lmin` cut and the inner-product
//!   identity are covered below and in `spectra`.
use crate::{
    alm::errors::{AlmError, AlmResult},
    separation::masking::is_unseen,
};
use nalgebra::Complex;
use ndarray::{ArrayD, ArrayViewD, Axis, IxDyn};
use std::f64::consts::SQRT_2;

/// Triangular `(ℓ, m)` layout with `0 ≤ m ≤ ℓ ≤ lmax`, m-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlmLayout {
    lmax: usize,
}

impl AlmLayout {
    pub fn new(lmax: usize) -> Self {
        Self { lmax }
    }

    /// Layout holding exactly `n_lm` coefficients.
    ///
    /// # Errors
    /// [`AlmError::InvalidSize`] when `n_lm` is not triangular.
    pub fn from_size(n_lm: usize) -> AlmResult<Self> {
        let lmax = (((1.0 + 8.0 * n_lm as f64).sqrt() - 3.0) / 2.0).round();
        if lmax < 0.0 {
            return Err(AlmError::InvalidSize { n_lm });
        }
        let layout = Self { lmax: lmax as usize };
        if layout.size() != n_lm {
            return Err(AlmError::InvalidSize { n_lm });
        }
        Ok(layout)
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    /// Number of complex coefficients.
    pub fn size(&self) -> usize {
        (self.lmax + 1) * (self.lmax + 2) / 2
    }

    /// Flat index of `(ℓ, m)`.
    pub fn index(&self, l: usize, m: usize) -> AlmResult<usize> {
        if m > l || l > self.lmax {
            return Err(AlmError::InvalidIndex { l, m, lmax: self.lmax });
        }
        Ok(m * (2 * self.lmax + 1 - m) / 2 + l)
    }

    /// `(ℓ, m)` of every flat index, in order.
    pub fn getlm(&self) -> (Vec<usize>, Vec<usize>) {
        let mut ls = Vec::with_capacity(self.size());
        let mut ms = Vec::with_capacity(self.size());
        for m in 0..=self.lmax {
            for l in m..=self.lmax {
                ls.push(l);
                ms.push(m);
            }
        }
        (ls, ms)
    }

    /// ℓ of every slot of the real layout (each ℓ appears for re and im).
    pub fn real_alm_ells(&self) -> Vec<usize> {
        self.getlm().0.into_iter().flat_map(|l| [l, l]).collect()
    }

    /// m of every slot of the real layout.
    pub fn real_alm_ms(&self) -> Vec<usize> {
        self.getlm().1.into_iter().flat_map(|m| [m, m]).collect()
    }
}

/// Complex alms `(…, n_lm)` → real alms `(…, 2 n_lm)`.
///
/// # Errors
/// - [`AlmError::RankTooLow`] for a 0-d input.
/// - [`AlmError::InvalidSize`] if the last axis is not triangular.
pub fn format_alms(alms: ArrayViewD<'_, Complex<f64>>, lmin: usize) -> AlmResult<ArrayD<f64>> {
    let nd = alms.ndim();
    if nd == 0 {
        return Err(AlmError::RankTooLow { what: "alms", ndim: 0, needed: 1 });
    }
    let layout = AlmLayout::from_size(alms.shape()[nd - 1])?;
    let (ls, ms) = layout.getlm();

    let mut shape = alms.shape().to_vec();
    shape[nd - 1] *= 2;
    let mut out = ArrayD::<f64>::zeros(IxDyn(&shape));
    for (ix, a) in alms.indexed_iter() {
        let k = ix[nd - 1];
        let scale = if ms[k] == 0 { 1.0 } else { SQRT_2 };
        let mut dst = ix.clone();
        dst[nd - 1] = 2 * k;
        out[dst.clone()] = a.re * scale;
        dst[nd - 1] = 2 * k + 1;
        out[dst] = if ms[k] == 0 { 0.0 } else { a.im * scale };
    }

    // A coefficient masked in any channel, or below lmin, carries no
    // information in any channel.
    let dropped: Vec<bool> = alms
        .axis_iter(Axis(nd - 1))
        .enumerate()
        .map(|(k, lane)| ls[k] < lmin || lane.iter().any(|c| is_unseen(c.re) || is_unseen(c.im)))
        .collect();
    for (slot, mut lane) in out.axis_iter_mut(Axis(nd - 1)).enumerate() {
        if dropped[slot / 2] {
            lane.fill(0.0);
        }
    }
    Ok(out)
}

/// Real alms `(…, 2 n_lm)` → complex alms `(…, n_lm)`.
///
/// # Errors
/// [`AlmError::OddRealLength`] / [`AlmError::InvalidSize`] for a last axis
/// that is not a real triangular layout.
pub fn r_to_c_alms(alms: ArrayViewD<'_, f64>) -> AlmResult<ArrayD<Complex<f64>>> {
    let nd = alms.ndim();
    if nd == 0 {
        return Err(AlmError::RankTooLow { what: "real alms", ndim: 0, needed: 1 });
    }
    let len = alms.shape()[nd - 1];
    if len % 2 != 0 {
        return Err(AlmError::OddRealLength { len });
    }
    let layout = AlmLayout::from_size(len / 2)?;
    let ms = layout.getlm().1;

    let mut shape = alms.shape().to_vec();
    shape[nd - 1] = len / 2;
    let mut out = ArrayD::<Complex<f64>>::zeros(IxDyn(&shape));
    for (ix, c) in out.indexed_iter_mut() {
        let k = ix[nd - 1];
        let mut src = ix.clone();
        src[nd - 1] = 2 * k;
        let re = alms[src.clone()];
        src[nd - 1] = 2 * k + 1;
        let im = alms[src];
        let scale = if ms[k] == 0 { 1.0 } else { 1.0 / SQRT_2 };
        *c = Complex::new(re * scale, im * scale);
    }
    Ok(out)
}

/// Per-ℓ beams `(…, lmax + 1)` expanded to the real layout `(…, 2 n_lm)`.
pub fn format_bls(bls: ArrayViewD<'_, f64>) -> AlmResult<ArrayD<f64>> {
    let nd = bls.ndim();
    if nd == 0 {
        return Err(AlmError::RankTooLow { what: "beams", ndim: 0, needed: 1 });
    }
    let lmax = bls.shape()[nd - 1].saturating_sub(1);
    let ells = AlmLayout::new(lmax).real_alm_ells();
    Ok(bls.select(Axis(nd - 1), &ells))
}

/// ℓ of each real-layout slot for a layout of size `n_lm`.
pub fn real_alm_ells(n_lm: usize) -> AlmResult<Vec<usize>> {
    Ok(AlmLayout::from_size(n_lm)?.real_alm_ells())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::separation::masking::UNSEEN;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2, array};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Layout indexing against the m-major convention.
    // - The real packing: scaling, m = 0 masking, lmin cut, UNSEEN slots.
    // - Complex → real → complex round trip.
    // - Beam expansion.
    // -------------------------------------------------------------------------

    /// Deterministic complex alms for `lmax` with real m = 0 coefficients.
    fn sample_alms(lmax: usize, seed: f64) -> Array1<Complex<f64>> {
        let layout = AlmLayout::new(lmax);
        let (ls, ms) = layout.getlm();
        Array1::from_iter(ls.iter().zip(&ms).map(|(&l, &m)| {
            let re = (seed + 0.7 * l as f64 + 0.3 * m as f64).sin();
            let im = if m == 0 { 0.0 } else { (seed * 1.3 + 0.2 * l as f64 - 0.5 * m as f64).cos() };
            Complex::new(re, im)
        }))
    }

    #[test]
    // Purpose
    // -------
    // Flat indices follow the m-major triangular layout.
    //
    // Given
    // -----
    // - lmax = 3 (10 coefficients).
    //
    // Expect
    // ------
    // - index(0,0)=0, index(3,0)=3, index(1,1)=4, index(3,3)=9; size
    //   inversion works and rejects 11.
    // - The real layout repeats each (ℓ, m) for the re and im slots.
    fn layout_indexing() {
        let layout = AlmLayout::new(3);
        assert_eq!(layout.size(), 10);
        assert_eq!(layout.index(0, 0), Ok(0));
        assert_eq!(layout.index(3, 0), Ok(3));
        assert_eq!(layout.index(1, 1), Ok(4));
        assert_eq!(layout.index(3, 3), Ok(9));
        assert!(matches!(layout.index(1, 2), Err(AlmError::InvalidIndex { .. })));
        assert_eq!(AlmLayout::from_size(10), Ok(layout));
        assert_eq!(AlmLayout::from_size(11), Err(AlmError::InvalidSize { n_lm: 11 }));
        let (ls, ms) = layout.getlm();
        assert_eq!((ls[4], ms[4]), (1, 1));
        let (real_ls, real_ms) = (layout.real_alm_ells(), layout.real_alm_ms());
        assert_eq!(real_ls.len(), 20);
        assert_eq!((real_ls[8], real_ls[9], real_ms[8], real_ms[9]), (1, 1, 1, 1));
    }

    #[test]
    // Purpose
    // -------
    // Packing scales m ≠ 0 by √2 and masks the m = 0 imaginary slots.
    //
    // Given
    // -----
    // - lmax = 2 alms where every coefficient is 1 + 2i.
    //
    // Expect
    // ------
    // - m = 0 slots: (1, 0); m ≠ 0 slots: (√2, 2√2).
    fn packing_scales_and_masks() {
        // Arrange
        let alms = Array1::from_elem(6, Complex::new(1.0, 2.0)).into_dyn();

        // Act
        let real = format_alms(alms.view(), 0).unwrap();

        // Assert
        assert_eq!(real.shape(), &[12]);
        for k in 0..3 {
            assert_eq!(real[2 * k], 1.0);
            assert_eq!(real[2 * k + 1], 0.0);
        }
        for k in 3..6 {
            assert_relative_eq!(real[2 * k], SQRT_2);
            assert_relative_eq!(real[2 * k + 1], 2.0 * SQRT_2);
        }
    }

    #[test]
    // Purpose
    // -------
    // Unpacking inverts packing for real fields, across leading axes.
    //
    // Given
    // -----
    // - Two channels of lmax = 6 alms with real m = 0 coefficients.
    //
    // Expect
    // ------
    // - r_to_c_alms(format_alms(a)) == a to 1e-14.
    fn round_trip_is_identity() {
        // Arrange
        let mut alms = Array2::<Complex<f64>>::zeros((2, AlmLayout::new(6).size()));
        alms.row_mut(0).assign(&sample_alms(6, 0.1));
        alms.row_mut(1).assign(&sample_alms(6, 2.3));

        // Act
        let back = r_to_c_alms(format_alms(alms.view().into_dyn(), 0).unwrap().view()).unwrap();

        // Assert
        for (a, b) in alms.iter().zip(back.iter()) {
            assert_relative_eq!(a.re, b.re, epsilon = 1e-14);
            assert_relative_eq!(a.im, b.im, epsilon = 1e-14);
        }
    }

    #[test]
    // Purpose
    // -------
    // Slots below lmin, or UNSEEN in any channel, are zeroed everywhere.
    //
    // Given
    // -----
    // - Two channels, lmax = 3, lmin = 2; channel 1 has UNSEEN at (3, 1).
    //
    // Expect
    // ------
    // - ℓ < 2 slots are 0 in both channels; both slots of (3, 1) are 0 in
    //   both channels; other slots are untouched.
    fn lmin_cut_and_unseen_slots_are_zeroed() {
        // Arrange
        let layout = AlmLayout::new(3);
        let mut alms = Array2::from_elem((2, layout.size()), Complex::new(1.0, 1.0));
        let k = layout.index(3, 1).unwrap();
        alms[[1, k]] = Complex::new(UNSEEN, 0.0);

        // Act
        let real = format_alms(alms.view().into_dyn(), 2).unwrap();

        // Assert
        let ells = layout.real_alm_ells();
        for c in 0..2 {
            for (slot, &l) in ells.iter().enumerate() {
                let v = real[[c, slot]];
                if l < 2 || slot / 2 == k {
                    assert_eq!(v, 0.0);
                }
            }
            assert_eq!(real[[c, 2 * layout.index(2, 0).unwrap()]], 1.0);
        }
    }

    #[test]
    // Purpose
    // -------
    // Beams are repeated for the (re, im) slots of every (ℓ, m).
    //
    // Given
    // -----
    // - b = [1, 0.5, 0.25] (lmax = 2).
    //
    // Expect
    // ------
    // - 12 entries following real_alm_ells.
    fn format_bls_follows_real_layout() {
        let bls = array![1.0, 0.5, 0.25].into_dyn();
        let out = format_bls(bls.view()).unwrap();
        assert_eq!(out.shape(), &[12]);
        assert_eq!(out[0], 1.0);
        assert_eq!(out[4], 0.25);
        assert_eq!(out[11], 0.25);
        assert_eq!(real_alm_ells(6).unwrap(), vec![0, 0, 1, 1, 2, 2, 1, 1, 2, 2, 2, 2]);
    }
}
