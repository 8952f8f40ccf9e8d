//! loglik_optimizer::adapter — objectives as argmin problems.
//!
//! - [`ArgMinAdapter`] exposes `c(θ) = −ℓ(θ)` and its gradient to argmin.
//!   Analytic gradients of `ℓ` are negated; without one the cost itself is
//!   differenced, so no sign flip is needed on that path.
//! - [`Reparameterized`] presents a likelihood with box-bounded spectral
//!   parameters `β` as an unconstrained one in `θ`, `β = β(θ)` given by a
//!   [`BoundTransform`].
//! - [`Preconditioned`] rescales coordinates, `θ = θ₀ + D u`, so that unit
//!   steps in `u` are Newton-sized whatever the amplitude of the data.
use std::cell::RefCell;

use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{
        finite_diff::run_fd_diff,
        traits::LogLikelihood,
        types::{Cost, Grad, Theta},
        validation::validate_grad,
    },
    numerical_stability::{bounds::BoundTransform, transformations::EIGEN_EPS},
};
use argmin::core::{CostFunction, Error, Gradient};
use finitediff::FiniteDiff;

/// A [`LogLikelihood`] and its data, borrowed for one argmin run.
#[derive(Debug, Clone)]
pub struct ArgMinAdapter<'a, F: LogLikelihood> {
    pub f: &'a F,
    pub data: &'a F::Data,
}

impl<'a, F: LogLikelihood> ArgMinAdapter<'a, F> {
    pub fn new(f: &'a F, data: &'a F::Data) -> Self {
        Self { f, data }
    }

    /// Finite-difference gradient of the cost.
    ///
    /// Central differences first. A failed cost evaluation during the
    /// central pass, or a non-finite result, falls back to forward
    /// differences, whose failures are returned.
    fn fd_gradient(&self, theta: &Theta) -> Result<Grad, Error> {
        let first_err: RefCell<Option<Error>> = RefCell::new(None);
        let cost = |t: &Theta| -> f64 {
            self.cost(t).unwrap_or_else(|e| {
                first_err.borrow_mut().get_or_insert(e);
                f64::NAN
            })
        };
        let central = theta.central_diff(&cost);
        if first_err.borrow().is_none() && validate_grad(&central, theta.len()).is_ok() {
            return Ok(central);
        }
        Ok(run_fd_diff(theta, &cost, &first_err)?)
    }
}

impl<'a, F: LogLikelihood> CostFunction for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Output = Cost;

    /// `−ℓ(θ)`. Where the objective cannot be evaluated (see
    /// [`OptError::is_evaluation_failure`]) or `ℓ` is not finite, the cost
    /// is `+∞`; other errors propagate.
    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        match self.f.value(theta, self.data) {
            Ok(log_l) if log_l.is_finite() => Ok(-log_l),
            Ok(_) => Ok(f64::INFINITY),
            Err(e) if e.is_evaluation_failure() => Ok(f64::INFINITY),
            Err(e) => Err(e.into()),
        }
    }
}

impl<'a, F: LogLikelihood> Gradient for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Gradient = Grad;

    /// `−∇ℓ(θ)` when the objective has an analytic gradient, finite
    /// differences of the cost otherwise. Other gradient errors propagate.
    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        match self.f.grad(theta, self.data) {
            Ok(g) => {
                validate_grad(&g, theta.len())?;
                Ok(-g)
            }
            Err(OptError::GradientNotImplemented) => self.fd_gradient(theta),
            Err(e) => Err(e.into()),
        }
    }
}

/// A bounded log-likelihood seen through its unconstrained coordinates.
///
/// `value(θ) = ℓ(β(θ))` and `grad(θ) = ∇_β ℓ ⊙ dβ/dθ`. When the inner model
/// has no analytic gradient, `GradientNotImplemented` is passed through and
/// the optimizer differentiates in `θ` directly.
#[derive(Debug, Clone)]
pub struct Reparameterized<'a, F: LogLikelihood> {
    pub inner: &'a F,
    pub bounds: &'a BoundTransform,
}

impl<'a, F: LogLikelihood> Reparameterized<'a, F> {
    pub fn new(inner: &'a F, bounds: &'a BoundTransform) -> Self {
        Self { inner, bounds }
    }
}

impl<'a, F: LogLikelihood> LogLikelihood for Reparameterized<'a, F> {
    type Data = F::Data;

    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<Cost> {
        self.inner.value(&self.bounds.to_model(theta), data)
    }

    fn check(&self, theta: &Theta, data: &Self::Data) -> OptResult<()> {
        if theta.len() != self.bounds.len() {
            return Err(OptError::ParamLengthMismatch {
                what: "unconstrained parameters",
                expected: self.bounds.len(),
                found: theta.len(),
            });
        }
        self.inner.check(&self.bounds.to_model(theta), data)
    }

    fn grad(&self, theta: &Theta, data: &Self::Data) -> OptResult<Grad> {
        let g_beta = self.inner.grad(&self.bounds.to_model(theta), data)?;
        Ok(self.bounds.chain_grad(theta, &g_beta))
    }

    /// `c_θ = c_β ⊙ (dβ/dθ)²`.
    fn curvature(&self, theta: &Theta, data: &Self::Data) -> OptResult<Option<Grad>> {
        let Some(c_beta) = self.inner.curvature(&self.bounds.to_model(theta), data)? else {
            return Ok(None);
        };
        let once = self.bounds.chain_grad(theta, &c_beta);
        Ok(Some(self.bounds.chain_grad(theta, &once)))
    }
}

/// An objective in rescaled coordinates `u`, with `θ = origin + scale ⊙ u`.
///
/// `value(u) = ℓ(θ(u))`, `grad(u) = scale ⊙ ∇ℓ` and the curvature picks up
/// `scale²`. [`maximize`](super::api::maximize) starts it at `u = 0`.
#[derive(Debug, Clone)]
pub struct Preconditioned<'a, F: LogLikelihood> {
    pub inner: &'a F,
    pub origin: Theta,
    pub scale: Theta,
}

impl<'a, F: LogLikelihood> Preconditioned<'a, F> {
    pub fn new(inner: &'a F, origin: Theta, scale: Theta) -> Self {
        Self { inner, origin, scale }
    }

    /// Scales `1/√c_i` from a curvature vector.
    ///
    /// Entries that are not finite or not above `EIGEN_EPS · max c` carry no
    /// usable information and get the smallest valid scale; with no valid
    /// entry at all every scale is 1.
    pub fn from_curvature(inner: &'a F, origin: Theta, curvature: &Grad) -> OptResult<Self> {
        if curvature.len() != origin.len() {
            return Err(OptError::ParamLengthMismatch {
                what: "curvature",
                expected: origin.len(),
                found: curvature.len(),
            });
        }
        let c_max = curvature.iter().filter(|c| c.is_finite()).fold(0.0_f64, |acc, &c| acc.max(c));
        let floor = EIGEN_EPS * c_max;
        let fallback = if c_max > 0.0 { 1.0 / c_max.sqrt() } else { 1.0 };
        let scale = curvature.mapv(|c| if c.is_finite() && c > floor && c > 0.0 { 1.0 / c.sqrt() } else { fallback });
        Ok(Self::new(inner, origin, scale))
    }

    /// `θ(u)`.
    pub fn to_inner(&self, u: &Theta) -> Theta {
        &self.origin + &(&self.scale * u)
    }
}

impl<'a, F: LogLikelihood> LogLikelihood for Preconditioned<'a, F> {
    type Data = F::Data;

    fn value(&self, u: &Theta, data: &Self::Data) -> OptResult<Cost> {
        self.inner.value(&self.to_inner(u), data)
    }

    fn check(&self, u: &Theta, data: &Self::Data) -> OptResult<()> {
        if u.len() != self.scale.len() {
            return Err(OptError::ParamLengthMismatch {
                what: "rescaled parameters",
                expected: self.scale.len(),
                found: u.len(),
            });
        }
        self.inner.check(&self.to_inner(u), data)
    }

    fn grad(&self, u: &Theta, data: &Self::Data) -> OptResult<Grad> {
        Ok(&self.scale * &self.inner.grad(&self.to_inner(u), data)?)
    }

    fn curvature(&self, u: &Theta, data: &Self::Data) -> OptResult<Option<Grad>> {
        Ok(self.inner.curvature(&self.to_inner(u), data)?.map(|c| c * &self.scale * &self.scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{algebra::errors::LinalgError, optimization::numerical_stability::bounds::Bound};
    use approx::assert_relative_eq;
    use ndarray::array;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - Sign conventions of `ArgMinAdapter` with analytic and FD gradients.
    // - The cost of trial points where the objective cannot be evaluated.
    // - Chain rule of `Reparameterized` against finite differences in θ.
    // - Scaling, gradient and curvature of `Preconditioned`.
    // -------------------------------------------------------------------------

    /// ℓ(β) = -½ Σ (β_i - 1)²; optional analytic gradient.
    struct Quadratic {
        analytic: bool,
    }

    impl LogLikelihood for Quadratic {
        type Data = ();

        fn value(&self, theta: &Theta, _: &()) -> OptResult<Cost> {
            Ok(-0.5 * theta.mapv(|b| (b - 1.0).powi(2)).sum())
        }

        fn check(&self, _: &Theta, _: &()) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, _: &()) -> OptResult<Grad> {
            if self.analytic {
                Ok(theta.mapv(|b| 1.0 - b))
            } else {
                Err(OptError::GradientNotImplemented)
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // The adapter returns the cost `-ℓ` and its gradient on both gradient
    // paths.
    //
    // Given
    // -----
    // - The quadratic model at β = [2, -1], with and without an analytic
    //   gradient.
    //
    // Expect
    // ------
    // - cost = 2.5; gradient of the cost ≈ [1, -2] either way.
    fn adapter_flips_sign_for_analytic_and_fd_gradients() {
        for analytic in [true, false] {
            // Arrange
            let model = Quadratic { analytic };
            let adapter = ArgMinAdapter::new(&model, &());
            let beta = array![2.0, -1.0];

            // Act
            let c = adapter.cost(&beta).unwrap();
            let g = adapter.gradient(&beta).unwrap();

            // Assert
            assert_relative_eq!(c, 2.5, max_relative = 1e-12);
            assert_relative_eq!(g[0], 1.0, epsilon = 1e-6);
            assert_relative_eq!(g[1], -2.0, epsilon = 1e-6);
        }
    }

    #[test]
    // Purpose
    // -------
    // The reparameterized gradient equals the θ-space finite difference of
    // the reparameterized value.
    //
    // Given
    // -----
    // - The quadratic model under bounds [Interval(0, 3), Lower(0.5)].
    //
    // Expect
    // ------
    // - `grad(θ)` ≈ central difference of `value(θ)`.
    fn reparameterized_gradient_matches_finite_differences() {
        // Arrange
        let model = Quadratic { analytic: true };
        let bounds = BoundTransform::new(vec![
            Bound::Interval { lower: 0.0, upper: 3.0 },
            Bound::Lower(0.5),
        ]);
        let wrapped = Reparameterized::new(&model, &bounds);
        let theta = bounds.to_unconstrained(&array![2.2, 0.9]).unwrap();

        // Act
        let g = wrapped.grad(&theta, &()).unwrap();
        let fd = theta.central_diff(&|t: &Theta| wrapped.value(t, &()).unwrap_or(f64::NAN));

        // Assert
        for (a, b) in g.iter().zip(fd.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-6);
        }
    }

    /// ℓ(β) = -½ β², failing with a singular system for β > 1, returning
    /// NaN for β < -1, and rejecting β = 0.5 as a misconfiguration.
    struct Fragile;

    impl LogLikelihood for Fragile {
        type Data = ();

        fn value(&self, theta: &Theta, _: &()) -> OptResult<Cost> {
            let b = theta[0];
            if b > 1.0 {
                return Err(LinalgError::Singular { op: "solve", batch_index: vec![], diagonal: vec![0.0] }.into());
            }
            if b < -1.0 {
                return Ok(f64::NAN);
            }
            if b == 0.5 {
                return Err(OptError::ParamLengthMismatch { what: "data frequencies", expected: 5, found: 4 });
            }
            Ok(-0.5 * b * b)
        }

        fn check(&self, _: &Theta, _: &()) -> OptResult<()> {
            Ok(())
        }
    }

    #[test]
    // Purpose
    // -------
    // Trial points where the objective fails cost `+∞`, while errors that
    // are not evaluation failures still surface.
    //
    // Given
    // -----
    // - `Fragile` at β = 2 (singular), β = -2 (NaN), β = 0.5 (configuration
    //   error) and β = 0.2 (regular).
    //
    // Expect
    // ------
    // - Costs +∞, +∞, an error, and 0.02.
    fn adapter_maps_evaluation_failures_to_infinite_cost() {
        // Arrange
        let adapter = ArgMinAdapter::new(&Fragile, &());

        // Act
        let singular = adapter.cost(&array![2.0]).unwrap();
        let nan = adapter.cost(&array![-2.0]).unwrap();
        let misuse = adapter.cost(&array![0.5]);
        let regular = adapter.cost(&array![0.2]).unwrap();

        // Assert
        assert_eq!(singular, f64::INFINITY);
        assert_eq!(nan, f64::INFINITY);
        assert!(matches!(OptError::from(misuse.unwrap_err()), OptError::ParamLengthMismatch { .. }));
        assert_relative_eq!(regular, 0.02, max_relative = 1e-12);
    }

    /// ℓ(β) = -½ Σ k_i (β_i - m_i)² with curvature k.
    struct Stiff {
        k: Theta,
        m: Theta,
    }

    impl LogLikelihood for Stiff {
        type Data = ();

        fn value(&self, theta: &Theta, _: &()) -> OptResult<Cost> {
            Ok(-0.5 * (&self.k * &(theta - &self.m).mapv(|d| d * d)).sum())
        }

        fn check(&self, _: &Theta, _: &()) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, _: &()) -> OptResult<Grad> {
            Ok(&self.k * &(&self.m - theta))
        }

        fn curvature(&self, _: &Theta, _: &()) -> OptResult<Option<Grad>> {
            Ok(Some(self.k.clone()))
        }
    }

    #[test]
    // Purpose
    // -------
    // Rescaling by the curvature turns a badly scaled quadratic into a unit
    // one: the rescaled curvature is 1 and a unit step along −∇c lands on
    // the optimum.
    //
    // Given
    // -----
    // - Curvatures (1e10, 4e-6) around the center (1e-5, 500), origin at 0.
    //
    // Expect
    // ------
    // - scale = (1e-5, 500); rescaled curvature ≈ 1; grad = (1, 1) and
    //   matches FD; θ(u₀ + ∇ℓ(u₀)) = center.
    fn preconditioned_coordinates_have_unit_curvature() {
        // Arrange
        let model = Stiff { k: array![1e10, 4e-6], m: array![1e-5, 500.0] };
        let pre = Preconditioned::from_curvature(&model, array![0.0, 0.0], &model.k).unwrap();
        let u0 = array![0.0, 0.0];

        // Act
        let curv = pre.curvature(&u0, &()).unwrap().unwrap();
        let g = pre.grad(&u0, &()).unwrap();
        let fd = u0.central_diff(&|u: &Theta| pre.value(u, &()).unwrap_or(f64::NAN));
        let landed = pre.to_inner(&(&u0 + &g));

        // Assert
        assert_relative_eq!(pre.scale[0], 1e-5, max_relative = 1e-12);
        assert_relative_eq!(pre.scale[1], 500.0, max_relative = 1e-12);
        for c in curv.iter() {
            assert_relative_eq!(*c, 1.0, max_relative = 1e-12);
        }
        for (a, b) in g.iter().zip(fd.iter()) {
            assert_relative_eq!(*a, 1.0, max_relative = 1e-12);
            assert_relative_eq!(*a, *b, max_relative = 1e-6);
        }
        assert_relative_eq!(landed[0], 1e-5, max_relative = 1e-12);
        assert_relative_eq!(landed[1], 500.0, max_relative = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Curvature entries with no information fall back to the smallest valid
    // scale, and a curvature of the wrong length is rejected.
    //
    // Given
    // -----
    // - Curvatures (4, 0, NaN) and a curvature of length 2 for 3 parameters.
    //
    // Expect
    // ------
    // - scale = (½, ½, ½); `ParamLengthMismatch`.
    fn preconditioner_handles_degenerate_curvature() {
        let model = Quadratic { analytic: true };
        let pre = Preconditioned::from_curvature(&model, array![0.0, 0.0, 0.0], &array![4.0, 0.0, f64::NAN])
            .unwrap();
        assert_eq!(pre.scale, array![0.5, 0.5, 0.5]);
        assert!(matches!(
            Preconditioned::from_curvature(&model, array![0.0, 0.0, 0.0], &array![1.0, 1.0]),
            Err(OptError::ParamLengthMismatch { what: "curvature", .. })
        ));
    }
}
