//! forecast::templates — fiducial CMB spectra keyed by (Alens, r).
//!
//! Purpose
//! -------
//! Provide the theory B-mode spectra the cosmological likelihood is built
//! on. A [`FiducialSpectra`] source returns TT/EE/BB/TE for a lensing
//! amplitude and a tensor-to-scalar ratio; [`BbTemplates`] slices the three
//! BB combinations the likelihood needs out of it.
//!
//! Key behaviors
//! -------------
//! - [`TabulatedSpectra`] combines a lensed-scalar table with a tensor table
//!   computed at r = 1: `Cl = lensed + r·tensor`, with the lensed BB scaled by
//!   Alens.
//! - [`BbTemplates::from_fiducial`] builds, over `[lmin, lmax]`:
//!   `BB = BB(Alens, r)`, `BuBu = BB(0, 1)` and `BlBl = BB(1, 0)`.
//!
//! Conventions
//! -----------
//! - Every spectrum array starts at ℓ = 0.
//! - Tables are supplied by the caller; nothing is read from disk.
use crate::forecast::errors::{ForecastError, ForecastResult};
use ndarray::{Array1, s};

/// TT, EE, BB and TE spectra from ℓ = 0.
#[derive(Debug, Clone, PartialEq)]
pub struct FiducialCls {
    pub tt: Array1<f64>,
    pub ee: Array1<f64>,
    pub bb: Array1<f64>,
    pub te: Array1<f64>,
}

impl FiducialCls {
    /// The four spectra must have the same, non-zero length and finite
    /// values.
    pub fn new(tt: Array1<f64>, ee: Array1<f64>, bb: Array1<f64>, te: Array1<f64>) -> ForecastResult<Self> {
        let n = tt.len();
        for other in [&ee, &bb, &te] {
            if other.len() != n {
                return Err(ForecastError::ShapeMismatch {
                    what: "fiducial spectra",
                    expected: vec![n],
                    found: vec![other.len()],
                });
            }
        }
        if n == 0 {
            return Err(ForecastError::InvalidOption { name: "fiducial spectra", reason: "must not be empty" });
        }
        if [&tt, &ee, &bb, &te].iter().any(|c| c.iter().any(|v| !v.is_finite())) {
            return Err(ForecastError::InvalidOption { name: "fiducial spectra", reason: "must be finite" });
        }
        Ok(Self { tt, ee, bb, te })
    }

    /// Only BB; the other spectra are zero.
    pub fn bb_only(bb: Array1<f64>) -> ForecastResult<Self> {
        let zeros = Array1::zeros(bb.len());
        Self::new(zeros.clone(), zeros.clone(), bb, zeros)
    }

    /// Largest multipole covered.
    pub fn lmax(&self) -> usize {
        self.tt.len() - 1
    }
}

/// Source of theory spectra for a lensing amplitude and a tensor ratio.
pub trait FiducialSpectra {
    fn spectra(&self, alens: f64, r: f64) -> ForecastResult<FiducialCls>;
}

/// Lensed-scalar table plus a tensor table at r = 1.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedSpectra {
    lensed: FiducialCls,
    tensor_r1: FiducialCls,
}

impl TabulatedSpectra {
    pub fn new(lensed: FiducialCls, tensor_r1: FiducialCls) -> ForecastResult<Self> {
        if lensed.tt.len() != tensor_r1.tt.len() {
            return Err(ForecastError::ShapeMismatch {
                what: "tensor spectra",
                expected: vec![lensed.tt.len()],
                found: vec![tensor_r1.tt.len()],
            });
        }
        Ok(Self { lensed, tensor_r1 })
    }
}

impl FiducialSpectra for TabulatedSpectra {
    fn spectra(&self, alens: f64, r: f64) -> ForecastResult<FiducialCls> {
        if !alens.is_finite() || alens < 0.0 {
            return Err(ForecastError::InvalidOption { name: "alens", reason: "must be finite and >= 0" });
        }
        if !r.is_finite() || r < 0.0 {
            return Err(ForecastError::InvalidOption { name: "r", reason: "must be finite and >= 0" });
        }
        let (l, t) = (&self.lensed, &self.tensor_r1);
        Ok(FiducialCls {
            tt: &l.tt + &(&t.tt * r),
            ee: &l.ee + &(&t.ee * r),
            bb: &l.bb * alens + &(&t.bb * r),
            te: &l.te + &(&t.te * r),
        })
    }
}

/// BB combinations over `[lmin, lmax]` entering the likelihood on r.
#[derive(Debug, Clone, PartialEq)]
pub struct BbTemplates {
    /// Observed fiducial `BB(Alens, r)`.
    pub bb: Array1<f64>,
    /// Primordial BB at r = 1.
    pub bu_bu: Array1<f64>,
    /// Lensing BB at Alens = 1.
    pub bl_bl: Array1<f64>,
}

impl BbTemplates {
    pub fn from_fiducial<S: FiducialSpectra + ?Sized>(
        source: &S, alens: f64, r: f64, lmin: usize, lmax: usize,
    ) -> ForecastResult<Self> {
        if lmin > lmax {
            return Err(ForecastError::InvalidRange { lmin, lmax, reason: "lmin exceeds lmax" });
        }
        let window = |cls: FiducialCls| -> ForecastResult<Array1<f64>> {
            if cls.bb.len() <= lmax {
                return Err(ForecastError::InvalidRange {
                    lmin,
                    lmax,
                    reason: "fiducial spectra end before lmax",
                });
            }
            Ok(cls.bb.slice(s![lmin..=lmax]).to_owned())
        };
        Ok(Self {
            bb: window(source.spectra(alens, r)?)?,
            bu_bu: window(source.spectra(0.0, 1.0)?)?,
            bl_bl: window(source.spectra(1.0, 0.0)?)?,
        })
    }
}
