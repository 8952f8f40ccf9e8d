//! components::mixing_matrix — the parametric mixing matrix `A(β)`.
//!
//! Purpose
//! -------
//! Assemble an ordered list of emission laws and a frequency list into the
//! mixing matrix `A(β)` (frequencies × components) together with its first
//! and second derivatives w.r.t. the free spectral parameters.
//!
//! Key behaviors
//! -------------
//! - Parameters of all components are concatenated in component order and
//!   named `"<Component>.<param>"`; `comp_of_param[p]` records the owner.
//! - [`MixingMatrix::evaluate`], [`MixingMatrix::gradient`] and
//!   [`MixingMatrix::hessian`] are pure functions of `β`. A derivative
//!   matrix only has a non-zero column for the owning component; the
//!   second-derivative grid is zero between parameters of different
//!   components.
//! - Optional prewhitening factors (shape `(..., n_freq)`) scale the rows
//!   of `A`, `dA` and `d²A`, adding their leading axes as batch axes.
//! - [`MixingMatrix::evaluate_maps`] / [`MixingMatrix::gradient_maps`]
//!   evaluate with one parameter vector per pixel for adaptive fits.
//!
//! Invariants & assumptions
//! ------------------------
//! - At least one component and one frequency; frequencies finite and
//!   positive; parameter names unique.
//! - Every evaluated entry is finite, otherwise
//!   [`ModelError::NonFiniteEvaluation`] names the component and frequency.
//!
//! Conventions
//! -----------
//! - Output arrays are `ArrayD<f64>` so they can be fed straight into the
//!   batched algebra: `(n_freq, n_comp)` without prewhitening,
//!   `(..., n_freq, n_comp)` with it, `(n_pix, ..., n_freq, n_comp)` for maps.
//!
//! Testing notes
//! -------------
//! - Zero-parameter matrices are constant; derivatives agree with finite
//!   differences of `evaluate`; repeated calls are bit-identical;
//!   prewhitening scales rows.
use crate::{
    algebra::batched::mul,
    components::{
        emission::EmissionLaw,
        errors::{ModelError, ModelResult},
    },
    optimization::numerical_stability::bounds::{Bound, BoundTransform},
};
use ndarray::{Array1, Array2, Array3, ArrayD, ArrayView2, Axis, s};
use std::{ops::Range, sync::Arc};

/// Builder collecting frequencies and components.
#[derive(Debug, Clone, Default)]
pub struct MixingMatrixBuilder {
    freqs: Vec<f64>,
    components: Vec<Arc<dyn EmissionLaw>>,
}

impl MixingMatrixBuilder {
    /// Append a component; order defines the columns of `A`.
    pub fn with<C: EmissionLaw + 'static>(mut self, component: C) -> Self {
        self.components.push(Arc::new(component));
        self
    }

    /// Append an already shared component.
    pub fn with_shared(mut self, component: Arc<dyn EmissionLaw>) -> Self {
        self.components.push(component);
        self
    }

    /// Validate and freeze.
    ///
    /// # Errors
    /// - [`ModelError::NoFrequencies`] / [`ModelError::NoComponents`].
    /// - [`ModelError::InvalidFrequency`] for a non-finite or non-positive
    ///   frequency.
    /// - [`ModelError::DuplicateParameter`] when two components share a
    ///   parameter name.
    /// - [`ModelError::InvalidParameterValue`] for a non-finite default.
    pub fn build(self) -> ModelResult<MixingMatrix> {
        if self.freqs.is_empty() {
            return Err(ModelError::NoFrequencies);
        }
        if self.components.is_empty() {
            return Err(ModelError::NoComponents);
        }
        for (index, &value) in self.freqs.iter().enumerate() {
            if !value.is_finite() || value <= 0.0 {
                return Err(ModelError::InvalidFrequency {
                    index,
                    value,
                    reason: "Frequencies must be finite and strictly positive.",
                });
            }
        }

        let mut param_names = Vec::new();
        let mut comp_of_param = Vec::new();
        let mut defaults = Vec::new();
        let mut bounds = Vec::new();
        let mut ranges = Vec::with_capacity(self.components.len());
        for (c, comp) in self.components.iter().enumerate() {
            let start = param_names.len();
            for p in comp.params() {
                let name = format!("{}.{}", comp.name(), p.name);
                if param_names.contains(&name) {
                    return Err(ModelError::DuplicateParameter { name });
                }
                if !p.default.is_finite() {
                    return Err(ModelError::InvalidParameterValue {
                        name,
                        value: p.default,
                        reason: "Defaults must be finite.",
                    });
                }
                param_names.push(name);
                comp_of_param.push(c);
                defaults.push(p.default);
                bounds.push(p.bound);
            }
            ranges.push(start..param_names.len());
        }

        Ok(MixingMatrix {
            freqs: Array1::from(self.freqs),
            components: self.components,
            param_names,
            comp_of_param,
            ranges,
            defaults: Array1::from(defaults),
            bounds,
            prewhiten: None,
        })
    }
}

/// Frequencies plus an ordered component list, evaluated at `β`.
#[derive(Debug, Clone)]
pub struct MixingMatrix {
    freqs: Array1<f64>,
    components: Vec<Arc<dyn EmissionLaw>>,
    param_names: Vec<String>,
    comp_of_param: Vec<usize>,
    ranges: Vec<Range<usize>>,
    defaults: Array1<f64>,
    bounds: Vec<Bound>,
    prewhiten: Option<ArrayD<f64>>,
}

impl MixingMatrix {
    /// Start a builder for the given frequencies (GHz).
    pub fn builder(freqs: &[f64]) -> MixingMatrixBuilder {
        MixingMatrixBuilder { freqs: freqs.to_vec(), components: Vec::new() }
    }

    /// Scale the rows of every output by `factors` (shape `(..., n_freq)`).
    ///
    /// # Errors
    /// [`ModelError::PrewhiteningShape`] when the trailing axis is not
    /// `n_freq`.
    pub fn with_prewhitening(mut self, factors: ArrayD<f64>) -> ModelResult<Self> {
        if factors.shape().last() != Some(&self.n_freq()) {
            return Err(ModelError::PrewhiteningShape {
                expected_last: self.n_freq(),
                found: factors.shape().to_vec(),
            });
        }
        self.prewhiten = Some(factors);
        Ok(self)
    }

    /// Drop any prewhitening.
    pub fn without_prewhitening(mut self) -> Self {
        self.prewhiten = None;
        self
    }

    pub fn prewhitening(&self) -> Option<&ArrayD<f64>> {
        self.prewhiten.as_ref()
    }

    // ---- Metadata ----

    pub fn freqs(&self) -> &Array1<f64> {
        &self.freqs
    }

    pub fn n_freq(&self) -> usize {
        self.freqs.len()
    }

    pub fn n_comp(&self) -> usize {
        self.components.len()
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    pub fn comp_of_param(&self) -> &[usize] {
        &self.comp_of_param
    }

    pub fn defaults(&self) -> &Array1<f64> {
        &self.defaults
    }

    pub fn bounds(&self) -> BoundTransform {
        BoundTransform::new(self.bounds.clone())
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.iter().map(|c| c.name().to_string()).collect()
    }

    /// Column of the component called `name`.
    pub fn component_index(&self, name: &str) -> ModelResult<usize> {
        self.components
            .iter()
            .position(|c| c.name() == name)
            .ok_or_else(|| ModelError::UnknownComponent { name: name.to_string() })
    }

    /// Column of the CMB component.
    pub fn cmb_index(&self) -> ModelResult<usize> {
        self.component_index("CMB")
    }

    /// Position of `name` in the parameter vector.
    pub fn param_index(&self, name: &str) -> ModelResult<usize> {
        self.param_names
            .iter()
            .position(|p| p == name)
            .ok_or_else(|| ModelError::UnknownParameter { name: name.to_string() })
    }

    // ---- Evaluation ----

    /// `A(β)`.
    pub fn evaluate(&self, beta: &Array1<f64>) -> ModelResult<ArrayD<f64>> {
        self.check_len(beta.len())?;
        self.whiten(self.base(beta)?.into_dyn())
    }

    /// `[∂A/∂β_p]`, one matrix per free parameter.
    pub fn gradient(&self, beta: &Array1<f64>) -> ModelResult<Vec<ArrayD<f64>>> {
        self.check_len(beta.len())?;
        self.base_gradient(beta)?.into_iter().map(|m| self.whiten(m.into_dyn())).collect()
    }

    /// `[[∂²A/∂β_p∂β_q]]`, a symmetric `n_params × n_params` grid.
    pub fn hessian(&self, beta: &Array1<f64>) -> ModelResult<Vec<Vec<ArrayD<f64>>>> {
        self.check_len(beta.len())?;
        let p = self.n_params();
        let (f, c) = (self.n_freq(), self.n_comp());
        let mut grid = vec![vec![Array2::<f64>::zeros((f, c)); p]; p];
        for (ci, comp) in self.components.iter().enumerate() {
            let range = self.ranges[ci].clone();
            if range.is_empty() {
                continue;
            }
            let local = beta.slice(s![range.clone()]).to_owned();
            for (fi, &nu) in self.freqs.iter().enumerate() {
                let h = comp.diff_diff(nu, &local)?;
                for (a, pa) in range.clone().enumerate() {
                    for (b, pb) in range.clone().enumerate() {
                        let v = h[[a, b]];
                        self.check_finite(ci, nu, v)?;
                        grid[pa][pb][[fi, ci]] = v;
                    }
                }
            }
        }
        grid.into_iter()
            .map(|row| row.into_iter().map(|m| self.whiten(m.into_dyn())).collect())
            .collect()
    }

    /// `A` per pixel from parameter maps of shape `(n_pix, n_params)`.
    ///
    /// Returns `(n_pix, ..., n_freq, n_comp)`; prewhitening factors must
    /// broadcast against the pixel axis.
    pub fn evaluate_maps(&self, beta_maps: ArrayView2<'_, f64>) -> ModelResult<ArrayD<f64>> {
        self.check_maps(&beta_maps)?;
        let (f, c) = (self.n_freq(), self.n_comp());
        let mut out = Array3::<f64>::zeros((beta_maps.nrows(), f, c));
        for (row, mut slot) in beta_maps.outer_iter().zip(out.outer_iter_mut()) {
            slot.assign(&self.base(&row.to_owned())?);
        }
        self.whiten(out.into_dyn())
    }

    /// `[∂A/∂β_p]` per pixel, each `(n_pix, ..., n_freq, n_comp)`.
    pub fn gradient_maps(&self, beta_maps: ArrayView2<'_, f64>) -> ModelResult<Vec<ArrayD<f64>>> {
        self.check_maps(&beta_maps)?;
        let (f, c) = (self.n_freq(), self.n_comp());
        let n_pix = beta_maps.nrows();
        let mut outs = vec![Array3::<f64>::zeros((n_pix, f, c)); self.n_params()];
        for (pix, row) in beta_maps.outer_iter().enumerate() {
            for (p, m) in self.base_gradient(&row.to_owned())?.into_iter().enumerate() {
                outs[p].index_axis_mut(Axis(0), pix).assign(&m);
            }
        }
        outs.into_iter().map(|m| self.whiten(m.into_dyn())).collect()
    }

    /// `[[∂²A/∂β_p∂β_q]]` per pixel, each `(n_pix, ..., n_freq, n_comp)`.
    pub fn hessian_maps(&self, beta_maps: ArrayView2<'_, f64>) -> ModelResult<Vec<Vec<ArrayD<f64>>>> {
        self.check_maps(&beta_maps)?;
        let (f, c, p) = (self.n_freq(), self.n_comp(), self.n_params());
        let n_pix = beta_maps.nrows();
        let mut grid = vec![vec![Array3::<f64>::zeros((n_pix, f, c)); p]; p];
        for (ci, comp) in self.components.iter().enumerate() {
            let range = self.ranges[ci].clone();
            if range.is_empty() {
                continue;
            }
            for (pix, row) in beta_maps.outer_iter().enumerate() {
                let local = self.local(ci, &row.to_owned());
                for (fi, &nu) in self.freqs.iter().enumerate() {
                    let h = comp.diff_diff(nu, &local)?;
                    for (a, pa) in range.clone().enumerate() {
                        for (b, pb) in range.clone().enumerate() {
                            self.check_finite(ci, nu, h[[a, b]])?;
                            grid[pa][pb][[pix, fi, ci]] = h[[a, b]];
                        }
                    }
                }
            }
        }
        grid.into_iter()
            .map(|row| row.into_iter().map(|m| self.whiten(m.into_dyn())).collect())
            .collect()
    }

    // ---- Helpers ----

    fn check_len(&self, found: usize) -> ModelResult<()> {
        if found != self.n_params() {
            return Err(ModelError::ParamLengthMismatch { expected: self.n_params(), found });
        }
        Ok(())
    }

    fn check_maps(&self, maps: &ArrayView2<'_, f64>) -> ModelResult<()> {
        if maps.ncols() != self.n_params() {
            return Err(ModelError::ParamMapShape {
                expected_cols: self.n_params(),
                found: maps.shape().to_vec(),
            });
        }
        Ok(())
    }

    fn check_finite(&self, comp: usize, nu: f64, value: f64) -> ModelResult<()> {
        if !value.is_finite() {
            return Err(ModelError::NonFiniteEvaluation {
                component: self.components[comp].name().to_string(),
                nu,
                value,
            });
        }
        Ok(())
    }

    fn local(&self, comp: usize, beta: &Array1<f64>) -> Array1<f64> {
        beta.slice(s![self.ranges[comp].clone()]).to_owned()
    }

    fn base(&self, beta: &Array1<f64>) -> ModelResult<Array2<f64>> {
        let mut a = Array2::<f64>::zeros((self.n_freq(), self.n_comp()));
        for (ci, comp) in self.components.iter().enumerate() {
            let local = self.local(ci, beta);
            for (fi, &nu) in self.freqs.iter().enumerate() {
                let v = comp.eval(nu, &local);
                self.check_finite(ci, nu, v)?;
                a[[fi, ci]] = v;
            }
        }
        Ok(a)
    }

    fn base_gradient(&self, beta: &Array1<f64>) -> ModelResult<Vec<Array2<f64>>> {
        let (f, c) = (self.n_freq(), self.n_comp());
        let mut out = vec![Array2::<f64>::zeros((f, c)); self.n_params()];
        for (ci, comp) in self.components.iter().enumerate() {
            let range = self.ranges[ci].clone();
            if range.is_empty() {
                continue;
            }
            let local = self.local(ci, beta);
            for (fi, &nu) in self.freqs.iter().enumerate() {
                let g = comp.diff(nu, &local)?;
                for (k, p) in range.clone().enumerate() {
                    self.check_finite(ci, nu, g[k])?;
                    out[p][[fi, ci]] = g[k];
                }
            }
        }
        Ok(out)
    }

    /// Row scaling by the prewhitening factors, if any.
    fn whiten(&self, m: ArrayD<f64>) -> ModelResult<ArrayD<f64>> {
        match &self.prewhiten {
            None => Ok(m),
            Some(pw) => {
                let col = pw.view().insert_axis(Axis(pw.ndim()));
                Ok(mul(col, m.view())?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::emission::{Cmb, Dust, ParamSpec, Synchrotron};
    use approx::assert_relative_eq;
    use finitediff::FiniteDiff;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Metadata (names, owners, defaults) and construction errors.
    // - Constant matrices when nothing is free.
    // - Derivatives against finite differences of `evaluate`.
    // - Idempotence, prewhitening and per-pixel evaluation.
    // -------------------------------------------------------------------------

    /// [CMB, Dust(353), Synchrotron(23)] at four frequencies.
    fn three_component_matrix() -> MixingMatrix {
        MixingMatrix::builder(&[30.0, 90.0, 150.0, 353.0])
            .with(Cmb::default())
            .with(Dust::new(353.0))
            .with(Synchrotron::new(23.0))
            .build()
            .unwrap()
    }

    #[test]
    // Purpose
    // -------
    // Parameter bookkeeping follows component order and naming rules.
    //
    // Given
    // -----
    // - [CMB, Dust, Synchrotron] with default parameter specs.
    //
    // Expect
    // ------
    // - Names Dust.beta_d, Dust.temp, Synchrotron.beta_pl owned by columns
    //   1, 1, 2; unknown names are errors.
    fn metadata_follows_component_order() {
        let mm = three_component_matrix();
        assert_eq!(mm.param_names(), &["Dust.beta_d", "Dust.temp", "Synchrotron.beta_pl"]);
        assert_eq!(mm.comp_of_param(), &[1, 1, 2]);
        assert_eq!(mm.defaults(), &array![1.54, 20.0, -3.0]);
        assert_eq!(mm.cmb_index(), Ok(0));
        assert_eq!(mm.param_index("Dust.temp"), Ok(1));
        assert!(matches!(mm.param_index("Dust.nu0"), Err(ModelError::UnknownParameter { .. })));
        assert!(matches!(
            mm.evaluate(&array![1.5]),
            Err(ModelError::ParamLengthMismatch { expected: 3, found: 1 })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Shared and owned components assemble the same matrix, and pinning a
    // parameter removes it from the free set.
    //
    // Given
    // -----
    // - [CMB, Synchrotron] built once with `with` and once with
    //   `with_shared`, and a variant with β_pl pinned to −3.
    //
    // Expect
    // ------
    // - Equal names and equal A at β_pl = −3; the pinned variant has no
    //   free parameters and evaluates to the same A.
    fn shared_and_pinned_components() {
        let freqs = [30.0, 90.0, 150.0];
        let owned = MixingMatrix::builder(&freqs)
            .with(Cmb::default())
            .with(Synchrotron::new(23.0))
            .build()
            .unwrap();
        let shared = MixingMatrix::builder(&freqs)
            .with_shared(Arc::new(Cmb::default()))
            .with_shared(Arc::new(Synchrotron::new(23.0)))
            .build()
            .unwrap();
        let pinned = MixingMatrix::builder(&freqs)
            .with(Cmb::default())
            .with(Synchrotron::new(23.0).with_beta_pl(ParamSpec::Fixed(-3.0)))
            .build()
            .unwrap();

        assert_eq!(owned.component_names(), shared.component_names());
        assert_eq!(owned.component_names()[1], "Synchrotron");
        let a_owned = owned.evaluate(&array![-3.0]).unwrap();
        let a_shared = shared.evaluate(&array![-3.0]).unwrap();
        let a_pinned = pinned.evaluate(&array![]).unwrap();
        assert_eq!(pinned.n_params(), 0);
        for ((x, y), z) in a_owned.iter().zip(a_shared.iter()).zip(a_pinned.iter()) {
            assert_relative_eq!(*x, *y, max_relative = 1e-14);
            assert_relative_eq!(*x, *z, max_relative = 1e-14);
        }
    }

    #[test]
    // Purpose
    // -------
    // Malformed definitions are rejected at build time.
    //
    // Given
    // -----
    // - No components; a negative frequency; two dust components.
    //
    // Expect
    // ------
    // - NoComponents, InvalidFrequency, DuplicateParameter.
    fn build_rejects_malformed_definitions() {
        assert_eq!(MixingMatrix::builder(&[100.0]).build().unwrap_err(), ModelError::NoComponents);
        assert!(matches!(
            MixingMatrix::builder(&[100.0, -1.0]).with(Cmb::default()).build(),
            Err(ModelError::InvalidFrequency { index: 1, .. })
        ));
        assert!(matches!(
            MixingMatrix::builder(&[100.0])
                .with(Dust::new(353.0))
                .with(Dust::new(545.0))
                .build(),
            Err(ModelError::DuplicateParameter { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // With every parameter pinned, `A` is constant and derivatives are empty.
    //
    // Given
    // -----
    // - [CMB, Dust with β_d and T fixed].
    //
    // Expect
    // ------
    // - Zero parameters; evaluate(∅) equals itself and has CMB column of ones.
    fn zero_parameter_matrix_is_constant() {
        // Arrange
        let mm = MixingMatrix::builder(&[100.0, 150.0, 220.0])
            .with(Cmb::default())
            .with(Dust::new(353.0).with_beta_d(ParamSpec::Fixed(1.5)).with_fixed_temp(20.0))
            .build()
            .unwrap();
        let empty = Array1::<f64>::zeros(0);

        // Act
        let a1 = mm.evaluate(&empty).unwrap();
        let a2 = mm.evaluate(&empty).unwrap();

        // Assert
        assert_eq!(mm.n_params(), 0);
        assert_eq!(a1, a2);
        assert_eq!(a1.shape(), &[3, 2]);
        assert!(a1.slice(s![.., 0]).iter().all(|&v| v == 1.0));
        assert!(mm.gradient(&empty).unwrap().is_empty());
        assert!(mm.hessian(&empty).unwrap().is_empty());
    }

    #[test]
    // Purpose
    // -------
    // `gradient` and `hessian` agree with finite differences of `evaluate`
    // and `gradient`, and cross-component blocks vanish.
    //
    // Given
    // -----
    // - [CMB, Dust, Synchrotron] at β = (1.6, 18, −3.1).
    //
    // Expect
    // ------
    // - Entry-wise agreement to 1e-6 relative; d²A/dβ_d dβ_pl = 0.
    fn derivatives_match_finite_differences() {
        // Arrange
        let mm = three_component_matrix();
        let beta = array![1.6, 18.0, -3.1];

        // Act
        let grad = mm.gradient(&beta).unwrap();
        let hess = mm.hessian(&beta).unwrap();

        // Assert
        for p in 0..3 {
            for (fi, ci) in [(0, 1), (2, 1), (3, 2), (1, 2)] {
                let fd = beta.central_diff(&|b: &Array1<f64>| mm.evaluate(b).unwrap()[[fi, ci]]);
                assert_relative_eq!(grad[p][[fi, ci]], fd[p], max_relative = 1e-6, epsilon = 1e-10);
                let fd2 = beta.central_diff(&|b: &Array1<f64>| mm.gradient(b).unwrap()[p][[fi, ci]]);
                for q in 0..3 {
                    assert_relative_eq!(hess[p][q][[fi, ci]], fd2[q], max_relative = 1e-5, epsilon = 1e-8);
                }
            }
        }
        assert!(hess[0][2].iter().all(|&v| v == 0.0));
        assert!(grad[0].slice(s![.., 0]).iter().all(|&v| v == 0.0));
    }

    #[test]
    // Purpose
    // -------
    // Repeated evaluations are bit-identical.
    //
    // Given
    // -----
    // - The three-component matrix at the defaults.
    //
    // Expect
    // ------
    // - evaluate / gradient / hessian return equal arrays on a second call.
    fn evaluation_is_idempotent() {
        let mm = three_component_matrix();
        let beta = mm.defaults().clone();
        assert_eq!(mm.evaluate(&beta).unwrap(), mm.evaluate(&beta).unwrap());
        assert_eq!(mm.gradient(&beta).unwrap(), mm.gradient(&beta).unwrap());
        assert_eq!(mm.hessian(&beta).unwrap(), mm.hessian(&beta).unwrap());
    }

    #[test]
    // Purpose
    // -------
    // Prewhitening scales rows and adds its batch axes; parameter maps give
    // one matrix per pixel.
    //
    // Given
    // -----
    // - Factors of shape (2, 4) (two Stokes-like rows) and three pixels with
    //   different β.
    //
    // Expect
    // ------
    // - Shape (2, 4, 3) with row fi of batch k scaled by factors[k, fi].
    // - Map evaluation at pixel i equals evaluate(β_i), and likewise for
    //   the second derivatives.
    fn prewhitening_and_maps_broadcast() {
        // Arrange
        let factors = array![[1.0, 2.0, 3.0, 4.0], [0.5, 0.5, 0.5, 0.5]].into_dyn();
        let plain = three_component_matrix();
        let mm = three_component_matrix().with_prewhitening(factors.clone()).unwrap();
        let beta = plain.defaults().clone();
        let maps = array![[1.5, 20.0, -3.0], [1.6, 19.0, -2.9], [1.4, 21.0, -3.1]];

        // Act
        let a = mm.evaluate(&beta).unwrap();
        let a0 = plain.evaluate(&beta).unwrap();
        let amaps = plain.evaluate_maps(maps.view()).unwrap();
        let hmaps = plain.hessian_maps(maps.view()).unwrap();

        // Assert
        assert_eq!(a.shape(), &[2, 4, 3]);
        for k in 0..2 {
            for fi in 0..4 {
                for ci in 0..3 {
                    assert_relative_eq!(a[[k, fi, ci]], factors[[k, fi]] * a0[[fi, ci]]);
                }
            }
        }
        for (pix, row) in maps.outer_iter().enumerate() {
            let expected = plain.evaluate(&row.to_owned()).unwrap();
            assert_eq!(amaps.index_axis(Axis(0), pix), expected.view());
            let h = plain.hessian(&row.to_owned()).unwrap();
            assert_eq!(hmaps[0][1].index_axis(Axis(0), pix), h[0][1].view());
        }
        assert!(matches!(
            plain.clone().with_prewhitening(array![1.0, 2.0].into_dyn()),
            Err(ModelError::PrewhiteningShape { .. })
        ));
    }
}
