//! separation::masking — UNSEEN handling and pixel layout.
//!
//! Masked map entries carry the HEALPix sentinel [`UNSEEN`]. A pixel is
//! dropped from a fit when any of its entries (any frequency, any Stokes
//! component) is UNSEEN or NaN; dropped pixels come back as UNSEEN in the
//! outputs. [`PixelMask`] does the compaction and the expansion, always on
//! the leading (pixel) axis of the internal layout.
//!
//! [`swap_outer_axes`] converts between the caller layout
//! `(n_freq, ..., n_pix)` and the internal layout `(n_pix, ..., n_freq)`;
//! it is its own inverse.
use crate::separation::errors::{SeparationError, SeparationResult};
use ndarray::{Array1, ArrayD, ArrayViewD, Axis, IxDyn};

/// HEALPix sentinel for missing data.
pub const UNSEEN: f64 = -1.6375e30;

/// `true` for NaN and for values within `1e-5` (relative) of [`UNSEEN`].
pub fn is_unseen(value: f64) -> bool {
    value.is_nan() || (value - UNSEEN).abs() <= 1e-5 * UNSEEN.abs()
}

/// Swap the first and last axes into a standard-layout copy.
pub fn swap_outer_axes(a: ArrayViewD<'_, f64>) -> ArrayD<f64> {
    let nd = a.ndim();
    let mut v = a;
    if nd > 1 {
        v.swap_axes(0, nd - 1);
    }
    v.as_standard_layout().into_owned()
}

/// Which pixels (leading-axis entries) take part in a fit.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelMask {
    good: Array1<bool>,
    keep: Vec<usize>,
}

impl PixelMask {
    /// Mask from explicit per-pixel flags (`true` = usable).
    pub fn from_good(good: Array1<bool>) -> Self {
        let keep = good.iter().enumerate().filter_map(|(i, &g)| g.then_some(i)).collect();
        Self { good, keep }
    }

    /// Every pixel usable.
    pub fn all_good(n_pix: usize) -> Self {
        Self::from_good(Array1::from_elem(n_pix, true))
    }

    /// Mask of internal-layout data: a pixel is bad when any of its entries
    /// is UNSEEN or NaN.
    ///
    /// # Errors
    /// [`SeparationError::DataShape`] for 0-d data.
    pub fn from_data(data: ArrayViewD<'_, f64>) -> SeparationResult<Self> {
        if data.ndim() == 0 {
            return Err(SeparationError::DataShape {
                what: "data",
                shape: Vec::new(),
                reason: "data needs at least a pixel axis",
            });
        }
        let good = data
            .axis_iter(Axis(0))
            .map(|pixel| !pixel.iter().any(|&v| is_unseen(v)))
            .collect::<Array1<bool>>();
        Ok(Self::from_good(good))
    }

    /// Pixels usable in both masks.
    pub fn intersect(&self, other: &PixelMask) -> SeparationResult<Self> {
        if self.n_pix() != other.n_pix() {
            return Err(SeparationError::DataShape {
                what: "mask",
                shape: vec![other.n_pix()],
                reason: "masks must cover the same pixels",
            });
        }
        let good = self.good.iter().zip(other.good.iter()).map(|(&a, &b)| a && b).collect();
        Ok(Self::from_good(good))
    }

    pub fn n_pix(&self) -> usize {
        self.good.len()
    }

    pub fn n_good(&self) -> usize {
        self.keep.len()
    }

    pub fn n_masked(&self) -> usize {
        self.n_pix() - self.n_good()
    }

    pub fn good(&self) -> &Array1<bool> {
        &self.good
    }

    /// Indices of the usable pixels, ascending.
    pub fn keep(&self) -> &[usize] {
        &self.keep
    }

    /// Usable rows of `a` (leading axis).
    pub fn compact(&self, a: ArrayViewD<'_, f64>) -> ArrayD<f64> {
        a.select(Axis(0), &self.keep)
    }

    /// Scatter compacted rows back to `n_pix` rows, filling the rest.
    pub fn expand(&self, a: ArrayViewD<'_, f64>, fill: f64) -> ArrayD<f64> {
        let mut shape = a.shape().to_vec();
        if shape.is_empty() {
            return a.to_owned();
        }
        shape[0] = self.n_pix();
        let mut out = ArrayD::<f64>::from_elem(IxDyn(&shape), fill);
        for (row, &pix) in a.axis_iter(Axis(0)).zip(&self.keep) {
            out.index_axis_mut(Axis(0), pix).assign(&row);
        }
        out
    }

    /// Zero every entry of the masked rows of `a`.
    pub fn zero_masked(&self, a: &mut ArrayD<f64>) {
        for (mut row, &g) in a.axis_iter_mut(Axis(0)).zip(self.good.iter()) {
            if !g {
                row.fill(0.0);
            }
        }
    }
}
