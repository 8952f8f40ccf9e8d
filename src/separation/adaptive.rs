//! separation::adaptive — spectral parameters that vary over pixel clusters.
//!
//! Each free parameter of the mixing matrix gets its own cluster map: one
//! label per pixel, and one fitted value per label present among the
//! unmasked pixels. [`ClusteredMixing`] exposes that layout as a
//! [`MixingModel`] whose parameter vector is the concatenation of the
//! per-cluster values (parameter-major, labels ascending), so the whole sky
//! is fitted jointly by the ordinary engine.
//!
//! Labels whose pixels are all masked drop out of the fit and come back as
//! UNSEEN.
use crate::{
    algebra::noise_weights::InvNoise,
    components::{
        errors::{ModelError, ModelResult},
        mixing_matrix::MixingMatrix,
    },
    optimization::numerical_stability::bounds::BoundTransform,
    separation::{
        comp_sep::{SeparationOptions, comp_sep_masked},
        errors::{SeparationError, SeparationResult},
        likelihood::MixingModel,
        masking::{PixelMask, UNSEEN},
        result::SeparationFit,
    },
};
use ndarray::{Array1, Array2, ArrayD, ArrayViewD, Axis};

/// A mixing matrix whose parameters are piecewise constant over clusters.
#[derive(Debug, Clone)]
pub struct ClusteredMixing<'a> {
    base: &'a MixingMatrix,
    /// Per base parameter, the position of each pixel's label in `ids`.
    assignment: Vec<Vec<usize>>,
    /// Per base parameter, the labels present, ascending.
    ids: Vec<Vec<usize>>,
    /// `(base parameter, cluster position)` of every flat parameter.
    layout: Vec<(usize, usize)>,
    extra_axes: usize,
}

impl<'a> ClusteredMixing<'a> {
    /// # Arguments
    /// - `labels`: one label map per free parameter of `base`, all of the same
    ///   length (the number of pixels being fitted).
    /// - `extra_axes`: batch axes of the data after the pixel axis (e.g. one
    ///   for a Stokes axis); `A` gets size-1 axes there.
    ///
    /// # Errors
    /// - [`SeparationError::ClusterCount`] when the number of maps differs
    ///   from the free-parameter count.
    /// - [`SeparationError::PatchLabels`] when the maps differ in length.
    pub fn new(base: &'a MixingMatrix, labels: &[Vec<usize>], extra_axes: usize) -> SeparationResult<Self> {
        if labels.len() != base.n_params() {
            return Err(SeparationError::ClusterCount { expected: base.n_params(), found: labels.len() });
        }
        let n_pix = labels.first().map_or(0, Vec::len);
        if let Some(bad) = labels.iter().find(|l| l.len() != n_pix) {
            return Err(SeparationError::PatchLabels { expected: n_pix, found: bad.len() });
        }

        let mut ids = Vec::with_capacity(labels.len());
        let mut assignment = Vec::with_capacity(labels.len());
        let mut layout = Vec::new();
        for (param, map) in labels.iter().enumerate() {
            let mut present = map.clone();
            present.sort_unstable();
            present.dedup();
            let positions = map
                .iter()
                .map(|label| present.binary_search(label).unwrap_or_default())
                .collect::<Vec<_>>();
            layout.extend((0..present.len()).map(|k| (param, k)));
            ids.push(present);
            assignment.push(positions);
        }
        Ok(Self { base, assignment, ids, layout, extra_axes })
    }

    pub fn base(&self) -> &MixingMatrix {
        self.base
    }

    pub fn n_pix(&self) -> usize {
        self.assignment.first().map_or(0, Vec::len)
    }

    /// Labels fitted for each base parameter.
    pub fn cluster_ids(&self) -> &[Vec<usize>] {
        &self.ids
    }

    /// Parameter maps `(n_pix, n_base_params)` for a flat vector.
    pub fn beta_maps(&self, beta: &Array1<f64>) -> ModelResult<Array2<f64>> {
        if beta.len() != self.layout.len() {
            return Err(ModelError::ParamLengthMismatch { expected: self.layout.len(), found: beta.len() });
        }
        let offsets = self.offsets();
        let mut maps = Array2::<f64>::zeros((self.n_pix(), self.base.n_params()));
        for (param, positions) in self.assignment.iter().enumerate() {
            for (pix, &k) in positions.iter().enumerate() {
                maps[[pix, param]] = beta[offsets[param] + k];
            }
        }
        Ok(maps)
    }

    fn offsets(&self) -> Vec<usize> {
        let mut offsets = Vec::with_capacity(self.ids.len());
        let mut acc = 0;
        for ids in &self.ids {
            offsets.push(acc);
            acc += ids.len();
        }
        offsets
    }

    fn with_extra_axes(&self, mut a: ArrayD<f64>) -> ArrayD<f64> {
        for _ in 0..self.extra_axes {
            a = a.insert_axis(Axis(1));
        }
        a
    }

    /// Zero the pixel rows of `a` where `keep` is false.
    fn restrict(&self, mut a: ArrayD<f64>, keep: impl Fn(usize) -> bool) -> ArrayD<f64> {
        for (pix, mut row) in a.axis_iter_mut(Axis(0)).enumerate() {
            if !keep(pix) {
                row.fill(0.0);
            }
        }
        self.with_extra_axes(a)
    }
}

impl MixingModel for ClusteredMixing<'_> {
    fn n_params(&self) -> usize {
        self.layout.len()
    }

    fn n_freq(&self) -> usize {
        self.base.n_freq()
    }

    fn n_comp(&self) -> usize {
        self.base.n_comp()
    }

    fn param_names(&self) -> Vec<String> {
        let names = self.base.param_names();
        self.layout
            .iter()
            .map(|&(param, k)| format!("{}[{}]", names[param], self.ids[param][k]))
            .collect()
    }

    fn defaults(&self) -> Array1<f64> {
        let defaults = self.base.defaults();
        self.layout.iter().map(|&(param, _)| defaults[param]).collect()
    }

    fn bounds(&self) -> BoundTransform {
        let bounds = self.base.bounds();
        BoundTransform::new(self.layout.iter().map(|&(param, _)| bounds.bounds()[param]).collect())
    }

    fn evaluate(&self, beta: &Array1<f64>) -> ModelResult<ArrayD<f64>> {
        let maps = self.beta_maps(beta)?;
        Ok(self.with_extra_axes(self.base.evaluate_maps(maps.view())?))
    }

    fn gradient(&self, beta: &Array1<f64>) -> ModelResult<Vec<ArrayD<f64>>> {
        let maps = self.beta_maps(beta)?;
        let per_param = self.base.gradient_maps(maps.view())?;
        Ok(self
            .layout
            .iter()
            .map(|&(param, k)| {
                let positions = &self.assignment[param];
                self.restrict(per_param[param].clone(), |pix| positions[pix] == k)
            })
            .collect())
    }

    fn hessian(&self, beta: &Array1<f64>) -> ModelResult<Vec<Vec<ArrayD<f64>>>> {
        let maps = self.beta_maps(beta)?;
        let grid = self.base.hessian_maps(maps.view())?;
        Ok(self
            .layout
            .iter()
            .map(|&(pi, ki)| {
                self.layout
                    .iter()
                    .map(|&(pj, kj)| {
                        let (ai, aj) = (&self.assignment[pi], &self.assignment[pj]);
                        self.restrict(grid[pi][pj].clone(), |pix| ai[pix] == ki && aj[pix] == kj)
                    })
                    .collect()
            })
            .collect())
    }
}

/// Result of a clustered fit.
#[derive(Debug, Clone)]
pub struct AdaptiveSeparation {
    fit: SeparationFit,
    x_clusters: Vec<Array1<f64>>,
    x_maps: Array2<f64>,
}

impl AdaptiveSeparation {
    /// The underlying joint fit; its parameters are the fitted clusters,
    /// named `"<param>[<label>]"`.
    pub fn fit(&self) -> &SeparationFit {
        &self.fit
    }

    /// Per base parameter, one value per label `0..=max(label)`; UNSEEN for
    /// labels without an unmasked pixel.
    pub fn x_clusters(&self) -> &[Array1<f64>] {
        &self.x_clusters
    }

    /// `(n_base_params, n_pix)`; UNSEEN at masked pixels.
    pub fn x_maps(&self) -> &Array2<f64> {
        &self.x_maps
    }

    pub fn into_fit(self) -> SeparationFit {
        self.fit
    }
}

/// Joint fit with per-cluster spectral parameters.
///
/// # Arguments
/// - `data`: internal layout `(n_pix, ..., n_freq)`.
/// - `labels`: one label map of length `n_pix` per free parameter of `base`.
/// - `opts`: `x0` and `bounds`, when given, are per *base* parameter and are
///   repeated for every cluster.
///
/// # Errors
/// As [`comp_sep_masked`](crate::separation::comp_sep::comp_sep_masked),
/// plus [`SeparationError::ClusterCount`] / [`SeparationError::PatchLabels`]
/// for malformed label maps.
pub fn clustered_comp_sep(
    base: &MixingMatrix, data: ArrayViewD<'_, f64>, inv_n: &InvNoise, labels: &[Vec<usize>],
    opts: &SeparationOptions,
) -> SeparationResult<AdaptiveSeparation> {
    if data.ndim() < 2 {
        return Err(SeparationError::DataShape {
            what: "data",
            shape: data.shape().to_vec(),
            reason: "expected (n_pix, ..., n_freq)",
        });
    }
    let n_pix = data.shape()[0];
    if labels.len() != base.n_params() {
        return Err(SeparationError::ClusterCount { expected: base.n_params(), found: labels.len() });
    }
    if let Some(bad) = labels.iter().find(|l| l.len() != n_pix) {
        return Err(SeparationError::PatchLabels { expected: n_pix, found: bad.len() });
    }
    let mask = PixelMask::from_data(data.view())?;
    let compact_labels =
        labels.iter().map(|l| mask.keep().iter().map(|&pix| l[pix]).collect()).collect::<Vec<Vec<_>>>();
    let model = ClusteredMixing::new(base, &compact_labels, data.ndim() - 2)?;

    let repeat = |per_param: &Array1<f64>| -> Array1<f64> {
        model.layout.iter().map(|&(param, _)| per_param[param]).collect()
    };
    let mut cluster_opts = opts.clone();
    if let Some(x0) = &opts.x0 {
        if x0.len() != base.n_params() {
            return Err(SeparationError::InvalidOption {
                name: "x0",
                reason: "adaptive starting values are given per free parameter",
            });
        }
        cluster_opts.x0 = Some(repeat(x0));
    }
    if let Some(bounds) = &opts.bounds {
        if bounds.len() != base.n_params() {
            return Err(SeparationError::InvalidOption {
                name: "bounds",
                reason: "adaptive bounds are given per free parameter",
            });
        }
        cluster_opts.bounds =
            Some(BoundTransform::new(model.layout.iter().map(|&(param, _)| bounds.bounds()[param]).collect()));
    }

    let fit = comp_sep_masked(&model, data, inv_n, &mask, &cluster_opts)?;

    let offsets = model.offsets();
    let x_clusters = labels
        .iter()
        .enumerate()
        .map(|(param, map)| {
            let n_labels = map.iter().max().map_or(0, |&m| m + 1);
            let mut values = Array1::from_elem(n_labels, UNSEEN);
            for (k, &id) in model.ids[param].iter().enumerate() {
                values[id] = fit.x()[offsets[param] + k];
            }
            values
        })
        .collect::<Vec<_>>();
    let mut x_maps = Array2::from_elem((base.n_params(), n_pix), UNSEEN);
    for (param, map) in labels.iter().enumerate() {
        for &pix in mask.keep() {
            x_maps[[param, pix]] = x_clusters[param][map[pix]];
        }
    }

    Ok(AdaptiveSeparation { fit, x_clusters, x_maps })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        algebra::batched::mv,
        components::emission::{Cmb, Dust, Synchrotron},
        optimization::loglik_optimizer::finite_diff::central_gradient,
        separation::masking::is_unseen,
    };
    use approx::assert_relative_eq;
    use ndarray::{IxDyn, array};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - The flat parameter layout and the cluster-restricted derivatives.
    // - Recovery of per-cluster parameters, with an all-masked cluster.
    // -------------------------------------------------------------------------

    fn model() -> MixingMatrix {
        MixingMatrix::builder(&[30.0, 90.0, 150.0, 220.0, 353.0])
            .with(Cmb::default())
            .with(Dust::new(353.0).with_fixed_temp(20.0))
            .with(Synchrotron::new(23.0))
            .build()
            .unwrap()
    }

    #[test]
    // Purpose
    // -------
    // The derivative of A with respect to one cluster value is the
    // per-pixel derivative restricted to that cluster.
    //
    // Given
    // -----
    // - beta_d labels [0, 0, 1, 1], beta_s labels [3, 3, 3, 3] (one label,
    //   not starting at zero).
    //
    // Expect
    // ------
    // - Three flat parameters named with their labels; each gradient entry
    //   matches central differences of A.
    fn cluster_gradient_matches_finite_differences() {
        // Arrange
        let mm = model();
        let labels = vec![vec![0, 0, 1, 1], vec![3, 3, 3, 3]];
        let clustered = ClusteredMixing::new(&mm, &labels, 0).unwrap();
        let beta = array![1.5, 1.7, -3.0];

        // Act
        let grads = clustered.gradient(&beta).unwrap();

        // Assert
        assert_eq!(clustered.n_params(), 3);
        assert_eq!(clustered.param_names()[1], "Dust.beta_d[1]");
        assert_eq!(clustered.param_names()[2], "Synchrotron.beta_pl[3]");
        assert_eq!(clustered.defaults(), array![1.54, 1.54, -3.0]);
        for (k, g) in grads.iter().enumerate() {
            for pix in 0..4 {
                for f in 0..5 {
                    let entry = |b: &Array1<f64>| clustered.evaluate(b).unwrap()[[pix, f, 1]];
                    let fd = central_gradient(&entry, &beta).unwrap();
                    assert_relative_eq!(g[[pix, f, 1]], fd[k], max_relative = 1e-5, epsilon = 1e-8);
                }
            }
        }
        assert_eq!(grads[0][[2, 3, 1]], 0.0);
    }

    #[test]
    // Purpose
    // -------
    // A clustered fit recovers a different beta_d per cluster and reports
    // an all-masked cluster as UNSEEN.
    //
    // Given
    // -----
    // - 10 pixels; beta_d = 1.45 on label 0 (pixels 0..5) and 1.75 on
    //   label 1 (pixels 5..9); pixel 9 alone carries label 2 and is masked;
    //   beta_s = −3.0 everywhere with a single label.
    //
    // Expect
    // ------
    // - x_clusters[0] ≈ [1.45, 1.75, UNSEEN]; x_clusters[1] ≈ [−3.0];
    //   x_maps UNSEEN at pixel 9.
    fn per_cluster_parameters_are_recovered() {
        // Arrange
        let mm = model();
        let beta_d = [1.45, 1.45, 1.45, 1.45, 1.45, 1.75, 1.75, 1.75, 1.75, 1.75];
        let mut d = ArrayD::<f64>::zeros(IxDyn(&[10, 5]));
        for (pix, &bd) in beta_d.iter().enumerate() {
            let a = mm.evaluate(&array![bd, -3.0]).unwrap();
            let s = Array1::from_shape_fn(3, |c| 3.0 + (pix as f64 * 1.1 + c as f64 * 0.8).cos() * 2.0);
            d.index_axis_mut(Axis(0), pix).assign(&mv(a.view(), s.into_dyn().view()).unwrap());
        }
        d[[9, 0]] = UNSEEN;
        let labels = vec![vec![0, 0, 0, 0, 0, 1, 1, 1, 1, 2], vec![0; 10]];

        // Act
        let out = clustered_comp_sep(&mm, d.view(), &InvNoise::Identity, &labels, &SeparationOptions::default())
            .unwrap();

        // Assert
        assert_eq!(out.fit().x().len(), 3);
        assert_relative_eq!(out.x_clusters()[0][0], 1.45, epsilon = 1e-4);
        assert_relative_eq!(out.x_clusters()[0][1], 1.75, epsilon = 1e-4);
        assert!(is_unseen(out.x_clusters()[0][2]));
        assert_relative_eq!(out.x_clusters()[1][0], -3.0, epsilon = 1e-4);
        assert_eq!(out.x_maps().shape(), &[2, 10]);
        assert_eq!(out.x_maps()[[0, 6]], out.x_clusters()[0][1]);
        assert!(is_unseen(out.x_maps()[[1, 9]]));
        assert!(is_unseen(out.fit().s()[[9, 0]]));
    }

    #[test]
    // Purpose
    // -------
    // Label maps must match the free parameters and the pixels.
    //
    // Given
    // -----
    // - One map for two free parameters; maps of the wrong length.
    //
    // Expect
    // ------
    // - ClusterCount and PatchLabels errors.
    fn malformed_label_maps_are_rejected() {
        let mm = model();
        let d = ArrayD::<f64>::ones(IxDyn(&[4, 5]));
        let opts = SeparationOptions::default();
        assert!(matches!(
            clustered_comp_sep(&mm, d.view(), &InvNoise::Identity, &[vec![0; 4]], &opts),
            Err(SeparationError::ClusterCount { expected: 2, found: 1 })
        ));
        assert!(matches!(
            clustered_comp_sep(&mm, d.view(), &InvNoise::Identity, &[vec![0; 4], vec![0; 3]], &opts),
            Err(SeparationError::PatchLabels { expected: 4, found: 3 })
        ));
    }
}
