//! instrument::descriptor — raw and validated instrument specifications.
//!
//! Purpose
//! -------
//! Turn a loosely filled [`InstrumentDescriptor`] (plain vectors, optional
//! fields) into a canonical [`Instrument`] whose arrays all have one entry
//! per frequency channel and whose values are finite and positive.
//!
//! Conventions
//! -----------
//! - Frequencies in GHz, depths in μK·arcmin, beam FWHM in arcmin.
//! - Validation happens once; an [`Instrument`] is read-only afterwards.
use crate::instrument::errors::{InstrumentError, InstrumentResult};
use ndarray::Array1;

/// Unvalidated per-channel description of an instrument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentDescriptor {
    pub frequency: Vec<f64>,
    pub depth_i: Option<Vec<f64>>,
    pub depth_p: Option<Vec<f64>>,
    pub fwhm: Option<Vec<f64>>,
}

impl InstrumentDescriptor {
    /// Descriptor with frequencies only.
    pub fn new(frequency: &[f64]) -> Self {
        Self { frequency: frequency.to_vec(), ..Self::default() }
    }

    pub fn with_depth_i(mut self, depth_i: &[f64]) -> Self {
        self.depth_i = Some(depth_i.to_vec());
        self
    }

    pub fn with_depth_p(mut self, depth_p: &[f64]) -> Self {
        self.depth_p = Some(depth_p.to_vec());
        self
    }

    pub fn with_fwhm(mut self, fwhm: &[f64]) -> Self {
        self.fwhm = Some(fwhm.to_vec());
        self
    }

    /// Validate into an [`Instrument`].
    ///
    /// # Errors
    /// - [`InstrumentError::NoChannels`] for an empty frequency list.
    /// - [`InstrumentError::LengthMismatch`] when an optional field does not
    ///   have `n_freq` entries.
    /// - [`InstrumentError::NonFinite`] / [`InstrumentError::NonPositive`]
    ///   for bad frequencies or depths. A FWHM of zero is accepted and means
    ///   "no beam".
    pub fn validate(self) -> InstrumentResult<Instrument> {
        let n = self.frequency.len();
        if n == 0 {
            return Err(InstrumentError::NoChannels);
        }
        let frequency = checked("frequency", self.frequency, n, true)?;
        let depth_i = self.depth_i.map(|d| checked("depth_i", d, n, true)).transpose()?;
        let depth_p = self.depth_p.map(|d| checked("depth_p", d, n, true)).transpose()?;
        let fwhm = self.fwhm.map(|b| checked("fwhm", b, n, false)).transpose()?;
        Ok(Instrument { frequency, depth_i, depth_p, fwhm })
    }
}

fn checked(
    field: &'static str, values: Vec<f64>, n: usize, strictly_positive: bool,
) -> InstrumentResult<Array1<f64>> {
    if values.len() != n {
        return Err(InstrumentError::LengthMismatch { field, expected: n, found: values.len() });
    }
    for (index, &value) in values.iter().enumerate() {
        if !value.is_finite() {
            return Err(InstrumentError::NonFinite { field, index, value });
        }
        if value < 0.0 || (strictly_positive && value == 0.0) {
            return Err(InstrumentError::NonPositive { field, index, value });
        }
    }
    Ok(Array1::from(values))
}

/// Validated instrument: every present array has length `n_freq`.
#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    frequency: Array1<f64>,
    depth_i: Option<Array1<f64>>,
    depth_p: Option<Array1<f64>>,
    fwhm: Option<Array1<f64>>,
}

impl Instrument {
    pub fn n_freq(&self) -> usize {
        self.frequency.len()
    }

    pub fn frequency(&self) -> &Array1<f64> {
        &self.frequency
    }

    pub fn depth_i(&self) -> Option<&Array1<f64>> {
        self.depth_i.as_ref()
    }

    pub fn depth_p(&self) -> Option<&Array1<f64>> {
        self.depth_p.as_ref()
    }

    pub fn fwhm(&self) -> Option<&Array1<f64>> {
        self.fwhm.as_ref()
    }

    /// `depth_p`, or an error naming the caller that needed it.
    pub fn require_depth_p(&self, needed_by: &'static str) -> InstrumentResult<&Array1<f64>> {
        self.depth_p.as_ref().ok_or(InstrumentError::MissingField { field: "depth_p", needed_by })
    }

    /// `depth_i`, or an error naming the caller that needed it.
    pub fn require_depth_i(&self, needed_by: &'static str) -> InstrumentResult<&Array1<f64>> {
        self.depth_i.as_ref().ok_or(InstrumentError::MissingField { field: "depth_i", needed_by })
    }
}

impl TryFrom<InstrumentDescriptor> for Instrument {
    type Error = InstrumentError;

    fn try_from(desc: InstrumentDescriptor) -> InstrumentResult<Self> {
        desc.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Acceptance of a complete descriptor.
    // - Each rejection path of `validate`.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // A complete, well-formed descriptor validates and keeps its values.
    //
    // Given
    // -----
    // - Three channels with depths and beams.
    //
    // Expect
    // ------
    // - All accessors return the input values; `require_depth_p` succeeds.
    fn complete_descriptor_validates() {
        // Arrange
        let desc = InstrumentDescriptor::new(&[90.0, 150.0, 220.0])
            .with_depth_p(&[3.0, 4.0, 10.0])
            .with_fwhm(&[30.0, 20.0, 0.0]);

        // Act
        let inst = Instrument::try_from(desc).unwrap();

        // Assert
        assert_eq!(inst.n_freq(), 3);
        assert_eq!(inst.depth_p().unwrap()[2], 10.0);
        assert_eq!(inst.fwhm().unwrap()[2], 0.0);
        assert!(inst.require_depth_p("test").is_ok());
        assert!(matches!(
            inst.require_depth_i("test"),
            Err(InstrumentError::MissingField { field: "depth_i", .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Malformed descriptors are rejected with the offending field.
    //
    // Given
    // -----
    // - No channels; a short depth array; a zero depth; a NaN frequency.
    //
    // Expect
    // ------
    // - NoChannels, LengthMismatch, NonPositive, NonFinite respectively.
    fn malformed_descriptors_are_rejected() {
        assert_eq!(InstrumentDescriptor::new(&[]).validate(), Err(InstrumentError::NoChannels));
        assert!(matches!(
            InstrumentDescriptor::new(&[90.0, 150.0]).with_depth_p(&[1.0]).validate(),
            Err(InstrumentError::LengthMismatch { field: "depth_p", expected: 2, found: 1 })
        ));
        assert!(matches!(
            InstrumentDescriptor::new(&[90.0]).with_depth_i(&[0.0]).validate(),
            Err(InstrumentError::NonPositive { field: "depth_i", index: 0, .. })
        ));
        assert!(matches!(
            InstrumentDescriptor::new(&[f64::NAN]).validate(),
            Err(InstrumentError::NonFinite { field: "frequency", .. })
        ));
    }
}
