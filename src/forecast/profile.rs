//! forecast::profile — grid-plus-Brent search of a 1-D likelihood in r.
//!
//! Purpose
//! -------
//! Locate the minimum r̂ of −2 log L(r) and the 1σ upper offset σ(r) where
//! the curve has risen by a Δχ² threshold, robustly for curves whose
//! minimum sits on the boundary r = 0.
//!
//! Key behaviors
//! -------------
//! - A log-spaced grid scan picks the start r₀ and a bracket:
//!   the two grid neighbours, widened to the lower limit (0 for r̂, r̂ for
//!   σ) at the first index and to the upper limit at the last.
//! - Refinement runs argmin's `BrentOpt` inside the bracket. Its result
//!   replaces r₀ only when it is no worse; either way it lies in the bracket.
//! - σ(r) minimizes `|L(r) − L(r̂) − Δχ²|` on logspace(log10 r̂, max) with
//!   the same scan-then-refine protocol.
//! - Each scan and refinement records a [`PipelineEvent`].
//!
//! Conventions
//! -----------
//! - Grid limits are log10 values; the upper limit `10^max` also closes the
//!   last bracket.
//! - The diagnostic curve is reported as `L − min L` over its own grid.
use crate::{
    diagnostics::{EventLog, PipelineEvent},
    forecast::errors::{ForecastError, ForecastResult},
};
use argmin::{
    core::{CostFunction, Error, Executor, State},
    solver::brent::BrentOpt,
};
use ndarray::Array1;
use statrs::{
    distribution::{ChiSquared, ContinuousCDF},
    function::erf::erf,
};

/// Grid, threshold and refinement settings of the profile search.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOptions {
    /// log10 of the smallest scanned r.
    pub log10_r_min: f64,
    /// log10 of the largest scanned r.
    pub log10_r_max: f64,
    pub grid_points: usize,
    pub sigma_points: usize,
    /// Rise of −2 log L that defines σ(r).
    pub delta_chi2: f64,
    /// Relative tolerance of Brent's method.
    pub brent_eps: f64,
    /// Absolute tolerance of Brent's method.
    pub brent_tol: f64,
    pub brent_max_iter: u64,
    /// log10 limits and size of the diagnostic curve.
    pub curve_log10_min: f64,
    pub curve_log10_max: f64,
    pub curve_points: usize,
}

impl Default for ProfileOptions {
    fn default() -> Self {
        Self {
            log10_r_min: -5.0,
            log10_r_max: 0.0,
            grid_points: 500,
            sigma_points: 25,
            delta_chi2: 1.0,
            brent_eps: f64::EPSILON.sqrt(),
            brent_tol: 1.0e-10,
            brent_max_iter: 200,
            curve_log10_min: -5.0,
            curve_log10_max: 5.0e-3f64.log10(),
            curve_points: 500,
        }
    }
}

impl ProfileOptions {
    /// Default settings with a validated threshold.
    pub fn new(delta_chi2: f64) -> ForecastResult<Self> {
        let opts = Self { delta_chi2, ..Self::default() };
        opts.validate()?;
        Ok(opts)
    }

    /// Threshold for an `n_sigma` interval with `dof` fitted parameters,
    /// the χ²_dof quantile at `erf(n_sigma / √2)`.
    pub fn for_confidence(n_sigma: f64, dof: usize) -> ForecastResult<Self> {
        if !n_sigma.is_finite() || n_sigma <= 0.0 {
            return Err(ForecastError::InvalidOption { name: "n_sigma", reason: "must be finite and > 0" });
        }
        let chi2 = ChiSquared::new(dof as f64)
            .map_err(|_| ForecastError::InvalidOption { name: "dof", reason: "must be >= 1" })?;
        Self::new(chi2.inverse_cdf(erf(n_sigma / std::f64::consts::SQRT_2)))
    }

    pub fn validate(&self) -> ForecastResult<()> {
        if !(self.log10_r_min.is_finite() && self.log10_r_max.is_finite()) || self.log10_r_min >= self.log10_r_max {
            return Err(ForecastError::InvalidOption { name: "r range", reason: "need finite min < max" });
        }
        if self.grid_points < 3 || self.sigma_points < 3 {
            return Err(ForecastError::InvalidOption { name: "grid size", reason: "need at least 3 points" });
        }
        if !self.delta_chi2.is_finite() || self.delta_chi2 <= 0.0 {
            return Err(ForecastError::InvalidOption { name: "delta_chi2", reason: "must be finite and > 0" });
        }
        if !(self.brent_eps > 0.0 && self.brent_tol > 0.0) || self.brent_max_iter == 0 {
            return Err(ForecastError::InvalidOption { name: "brent", reason: "need positive tolerances and iterations" });
        }
        if self.curve_points == 0 || self.curve_log10_min > self.curve_log10_max {
            return Err(ForecastError::InvalidOption { name: "curve", reason: "need points and min <= max" });
        }
        Ok(())
    }

    fn r_max(&self) -> f64 {
        10f64.powf(self.log10_r_max)
    }
}

/// Outcome of [`profile_r`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileOutcome {
    pub r_hat: f64,
    /// −2 log L at r̂.
    pub neg2_log_l_min: f64,
    pub r_1sigma: f64,
    /// `r_1sigma − r̂`.
    pub sigma_r: f64,
    pub grid: Array1<f64>,
    pub grid_neg2_log_l: Array1<f64>,
    pub curve_r: Array1<f64>,
    /// `L − min L` along `curve_r`.
    pub curve_delta: Array1<f64>,
}

/// Minimize `objective` over r and find σ(r).
///
/// # Errors
/// Any error of `objective`, unchanged; invalid options.
pub fn profile_r<F>(objective: F, opts: &ProfileOptions, log: &mut EventLog) -> ForecastResult<ProfileOutcome>
where
    F: Fn(f64) -> ForecastResult<f64>,
{
    opts.validate()?;
    let r_max = opts.r_max();

    let grid = Array1::logspace(10.0, opts.log10_r_min, opts.log10_r_max, opts.grid_points);
    let values = evaluate(&objective, &grid)?;
    let idx = argmin(&values);
    let bracket = bracket_at(&grid, idx, 0.0, r_max);
    log.record(PipelineEvent::GridScanned { target: "r", argmin_index: idx, start: grid[idx], bracket });
    let (r_hat, l_hat) = refine(&objective, bracket, grid[idx], values[idx], opts, "r", log)?;

    let lower = if r_hat > 0.0 { r_hat.log10() } else { opts.log10_r_min };
    let sigma_grid = Array1::logspace(10.0, lower, opts.log10_r_max, opts.sigma_points);
    let distance = |r: f64| -> ForecastResult<f64> { Ok((objective(r)? - l_hat - opts.delta_chi2).abs()) };
    let distances = evaluate(&distance, &sigma_grid)?;
    let idx = argmin(&distances);
    let bracket = bracket_at(&sigma_grid, idx, r_hat, r_max);
    log.record(PipelineEvent::GridScanned {
        target: "sigma(r)",
        argmin_index: idx,
        start: sigma_grid[idx],
        bracket,
    });
    let (r_1sigma, _) = refine(&distance, bracket, sigma_grid[idx], distances[idx], opts, "sigma(r)", log)?;

    let curve_r = Array1::logspace(10.0, opts.curve_log10_min, opts.curve_log10_max, opts.curve_points);
    let curve = evaluate(&objective, &curve_r)?;
    let floor = curve.iter().copied().fold(f64::INFINITY, f64::min);

    Ok(ProfileOutcome {
        r_hat,
        neg2_log_l_min: l_hat,
        r_1sigma,
        sigma_r: r_1sigma - r_hat,
        grid,
        grid_neg2_log_l: values,
        curve_r,
        curve_delta: curve.mapv(|v| v - floor),
    })
}

// ---- Scan helpers ----

fn evaluate<F: Fn(f64) -> ForecastResult<f64>>(f: &F, grid: &Array1<f64>) -> ForecastResult<Array1<f64>> {
    grid.iter().map(|&r| f(r)).collect::<ForecastResult<Vec<f64>>>().map(Array1::from)
}

/// First index of the smallest non-NaN value (0 if all are NaN).
fn argmin(values: &Array1<f64>) -> usize {
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| !v.is_nan())
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b <= v => best,
            _ => Some((i, v)),
        })
        .map_or(0, |(i, _)| i)
}

/// Neighbours of `idx`, widened to `lower` / `upper` at the ends of the grid.
pub(crate) fn bracket_at(grid: &Array1<f64>, idx: usize, lower: f64, upper: f64) -> (f64, f64) {
    let last = grid.len() - 1;
    if idx == 0 {
        (lower, grid[1])
    } else if idx == last {
        (grid[last - 1], upper)
    } else {
        (grid[idx - 1], grid[idx + 1])
    }
}

// ---- Refinement ----

struct Scalar<'a, F> {
    f: &'a F,
}

impl<F: Fn(f64) -> ForecastResult<f64>> CostFunction for Scalar<'_, F> {
    type Param = f64;
    type Output = f64;

    fn cost(&self, r: &Self::Param) -> Result<Self::Output, Error> {
        Ok((self.f)(*r)?)
    }
}

/// Brent's method on `bracket`; keeps `start` unless the refined point is no
/// worse.
fn refine<F: Fn(f64) -> ForecastResult<f64>>(
    f: &F, bracket: (f64, f64), start: f64, start_value: f64, opts: &ProfileOptions, target: &'static str,
    log: &mut EventLog,
) -> ForecastResult<(f64, f64)> {
    let (lo, hi) = bracket;
    let refined = if lo < hi {
        let solver = BrentOpt::new(lo, hi).set_tolerance(opts.brent_eps, opts.brent_tol);
        let result = Executor::new(Scalar { f }, solver)
            .configure(|state| state.max_iters(opts.brent_max_iter))
            .run()?;
        let state = result.state();
        state.get_best_param().copied().map(|r| (r, state.get_best_cost()))
    } else {
        None
    };

    let (r, value, kept_start) = match refined {
        Some((r, value)) if value <= start_value && (lo..=hi).contains(&r) => (r, value, false),
        _ => (start, start_value, true),
    };
    log.record(PipelineEvent::Refined { target, start, result: r, objective: value, kept_start });
    Ok((r, value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover:
    // - r̂ and σ(r) on a parabola with an interior minimum.
    // - Brackets and refined values at the first, last and interior index.
    // - The χ² threshold for a confidence level and option validation.
    // - Propagation of objective errors through the minimizer.
    // -------------------------------------------------------------------------

    /// Bracket and refined value of the r̂ stage.
    fn first_refinement(log: &EventLog) -> ((f64, f64), f64) {
        let bracket = log
            .events()
            .iter()
            .find_map(|e| match e {
                PipelineEvent::GridScanned { target: "r", bracket, .. } => Some(*bracket),
                _ => None,
            })
            .unwrap();
        let result = log
            .events()
            .iter()
            .find_map(|e| match e {
                PipelineEvent::Refined { target: "r", result, .. } => Some(*result),
                _ => None,
            })
            .unwrap();
        (bracket, result)
    }

    #[test]
    // Purpose
    // -------
    // A parabola in r gives its vertex and the Δχ² = 1 offset.
    //
    // Given
    // -----
    // - L(r) = ((r − 0.01) / 0.002)².
    //
    // Expect
    // ------
    // - r̂ ≈ 0.01 and σ(r) ≈ 0.002.
    fn parabola_gives_vertex_and_width() {
        // Arrange
        let objective = |r: f64| -> ForecastResult<f64> { Ok(((r - 0.01) / 0.002).powi(2)) };
        let mut log = EventLog::new();

        // Act
        let out = profile_r(objective, &ProfileOptions::default(), &mut log).unwrap();

        // Assert
        assert_abs_diff_eq!(out.r_hat, 0.01, epsilon = 1e-7);
        assert_abs_diff_eq!(out.sigma_r, 0.002, epsilon = 1e-6);
        assert_abs_diff_eq!(out.neg2_log_l_min, 0.0, epsilon = 1e-6);
        assert_eq!(out.grid.len(), 500);
        assert_eq!(out.curve_delta.len(), 500);
        assert!(out.curve_delta.iter().all(|&v| v >= 0.0));
        assert_eq!(log.len(), 4);
    }

    #[test]
    // Purpose
    // -------
    // The refined r̂ stays inside its bracket wherever the grid minimum is.
    //
    // Given
    // -----
    // - L(r) = r (minimum at the first index), L(r) = −r (last index),
    //   L(r) = (r − 0.3)² (interior).
    //
    // Expect
    // ------
    // - bracket.0 ≤ r̂ ≤ bracket.1, with bracket (0, grid[1]) and
    //   (grid[−2], 1) at the ends.
    fn refinement_stays_inside_bracket() {
        // Arrange
        let opts = ProfileOptions::default();
        let grid = Array1::logspace(10.0, -5.0, 0.0, 500);
        let cases: [(&dyn Fn(f64) -> ForecastResult<f64>, (f64, f64)); 3] = [
            (&|r| Ok(r), (0.0, grid[1])),
            (&|r| Ok(-r), (grid[498], 1.0)),
            (&|r| Ok((r - 0.3) * (r - 0.3)), bracket_at(&grid, argmin(&grid.mapv(|r| (r - 0.3) * (r - 0.3))), 0.0, 1.0)),
        ];

        for (objective, expected) in cases {
            // Act
            let mut log = EventLog::new();
            let out = profile_r(objective, &opts, &mut log).unwrap();
            let (bracket, result) = first_refinement(&log);

            // Assert
            assert_abs_diff_eq!(bracket.0, expected.0, epsilon = 1e-15);
            assert_abs_diff_eq!(bracket.1, expected.1, epsilon = 1e-15);
            assert!(bracket.0 <= result && result <= bracket.1);
            assert_eq!(out.r_hat, result);
        }
    }

    #[test]
    // Purpose
    // -------
    // The threshold for 1σ with one parameter is 1, and bad options fail.
    //
    // Given
    // -----
    // - n_sigma = 1, dof = 1; then dof = 0 and a two-point grid.
    //
    // Expect
    // ------
    // - delta_chi2 ≈ 1; InvalidOption otherwise.
    fn confidence_threshold_and_validation() {
        // Arrange
        let bad_grid = ProfileOptions { grid_points: 2, ..ProfileOptions::default() };

        // Act
        let one_sigma = ProfileOptions::for_confidence(1.0, 1).unwrap();
        let no_dof = ProfileOptions::for_confidence(1.0, 0);

        // Assert
        assert_abs_diff_eq!(one_sigma.delta_chi2, 1.0, epsilon = 1e-4);
        assert!(matches!(no_dof, Err(ForecastError::InvalidOption { name: "dof", .. })));
        assert!(matches!(bad_grid.validate(), Err(ForecastError::InvalidOption { name: "grid size", .. })));
    }

    #[test]
    // Purpose
    // -------
    // An error raised by the objective inside Brent's method is returned as
    // is.
    //
    // Given
    // -----
    // - L(r) = r, failing with NonPositiveModel below every grid point, so
    //   only the refinement on (0, grid[1]) reaches the failing region.
    //
    // Expect
    // ------
    // - The same NonPositiveModel error.
    fn objective_errors_propagate() {
        // Arrange
        let objective = |r: f64| -> ForecastResult<f64> {
            if r < 0.9e-5 { Err(ForecastError::NonPositiveModel { ell: 7, value: -r }) } else { Ok(r) }
        };
        let mut log = EventLog::new();

        // Act
        let err = profile_r(objective, &ProfileOptions::default(), &mut log).unwrap_err();

        // Assert
        assert!(matches!(err, ForecastError::NonPositiveModel { ell: 7, .. }));
    }
}
