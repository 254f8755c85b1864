//! Box-constrained nonlinear least squares
//!
//! Levenberg (1944), Marquardt (1963) with a forward-difference Jacobian and
//! projection of every trial step back into the parameter box. Fixed
//! parameters (low == high) are supported; their Jacobian column is zero.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use crate::core::{PremiaError, PremiaResult};

/// Per-parameter [low, high] box
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> PremiaResult<Self> {
        if lower.len() != upper.len() {
            return Err(PremiaError::invalid_input("bounds dimension mismatch"));
        }
        if lower
            .iter()
            .zip(upper.iter())
            .any(|(l, u)| !l.is_finite() || !u.is_finite() || l > u)
        {
            return Err(PremiaError::invalid_input("bounds must be finite with low <= high"));
        }
        Ok(Self { lower, upper })
    }

    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    pub fn clamp(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(v, (l, u))| v.clamp(*l, *u))
            .collect()
    }

    /// Point at fractions `u ∈ [0, 1]` of each range
    pub fn lerp(&self, u: &[f64]) -> Vec<f64> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .zip(u.iter())
            .map(|((l, h), t)| l + t * (h - l))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    GradientTolerance,
    StepTolerance,
    ObjectiveTolerance,
    /// Damping exhausted without further improvement: a stationary point
    Stagnation,
    MaxIterations,
    NumericalFailure,
}

impl TerminationReason {
    pub fn is_converged(&self) -> bool {
        !matches!(
            self,
            TerminationReason::MaxIterations | TerminationReason::NumericalFailure
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct LmOptions {
    pub max_iterations: usize,
    pub initial_lambda: f64,
    pub lambda_up: f64,
    pub lambda_down: f64,
    pub gradient_tolerance: f64,
    pub step_tolerance: f64,
    /// Relative objective improvement below which the search stops
    pub objective_tolerance: f64,
    /// Objective at or below which the fit is treated as exact
    pub absolute_tolerance: f64,
    pub finite_diff_epsilon: f64,
    pub max_stagnation: usize,
}

impl Default for LmOptions {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            initial_lambda: 1e-2,
            lambda_up: 3.0,
            lambda_down: 0.35,
            gradient_tolerance: 1e-12,
            step_tolerance: 1e-10,
            objective_tolerance: 1e-10,
            absolute_tolerance: 1e-20,
            finite_diff_epsilon: 1e-6,
            max_stagnation: 30,
        }
    }
}

/// Outcome of one least-squares search
#[derive(Debug, Clone)]
pub struct LeastSquaresResult {
    pub x: Vec<f64>,
    /// Sum of squared residuals at `x`
    pub sse: f64,
    pub iterations: usize,
    pub reason: TerminationReason,
}

impl LeastSquaresResult {
    pub fn converged(&self) -> bool {
        self.reason.is_converged()
    }
}

#[inline]
fn sum_of_squares(residuals: &[f64]) -> f64 {
    residuals.iter().map(|r| r * r).sum()
}

fn finite_difference_jacobian<F>(
    x: &[f64],
    base_residuals: &[f64],
    bounds: &Bounds,
    eps_scale: f64,
    residual_fn: &F,
) -> DMatrix<f64>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    let m = base_residuals.len();
    let n = x.len();
    let mut j = DMatrix::zeros(m, n);

    for c in 0..n {
        let mut xp = x.to_vec();
        let h = (x[c].abs() * eps_scale).max(eps_scale);

        xp[c] = (x[c] + h).min(bounds.upper[c]);
        if (xp[c] - x[c]).abs() < 1e-14 {
            xp[c] = (x[c] - h).max(bounds.lower[c]);
        }

        let denom = xp[c] - x[c];
        if denom.abs() < 1e-14 {
            continue;
        }

        let rp = residual_fn(&xp);
        for r in 0..m {
            j[(r, c)] = (rp[r] - base_residuals[r]) / denom;
        }
    }

    j
}

/// Minimise Σ r_i(x)² over the box, starting from `initial` (clamped).
pub fn levenberg_marquardt<F>(
    initial: &[f64],
    bounds: &Bounds,
    options: &LmOptions,
    residual_fn: F,
) -> PremiaResult<LeastSquaresResult>
where
    F: Fn(&[f64]) -> Vec<f64>,
{
    if initial.len() != bounds.dimension() {
        return Err(PremiaError::invalid_input(
            "initial vector dimension does not match bounds",
        ));
    }

    let mut x = bounds.clamp(initial);
    let mut residuals = residual_fn(&x);
    if residuals.is_empty() {
        return Err(PremiaError::invalid_input("empty residual vector"));
    }

    let mut sse = sum_of_squares(&residuals);
    if !sse.is_finite() {
        return Err(PremiaError::numerical("objective not finite at initial point"));
    }

    let mut lambda = options.initial_lambda.max(1e-12);
    let mut iterations = 0usize;
    let mut reason = TerminationReason::MaxIterations;
    let mut stagnation = 0usize;

    for iter in 0..options.max_iterations {
        iterations = iter + 1;

        if sse <= options.absolute_tolerance {
            reason = TerminationReason::ObjectiveTolerance;
            break;
        }

        let jacobian = finite_difference_jacobian(
            &x,
            &residuals,
            bounds,
            options.finite_diff_epsilon.max(1e-10),
            &residual_fn,
        );

        let r_vec = DVector::from_column_slice(&residuals);
        let jt = jacobian.transpose();
        let mut a = &jt * &jacobian;
        let g = &jt * r_vec;

        let gradient_norm = g.norm();
        if !gradient_norm.is_finite() {
            reason = TerminationReason::NumericalFailure;
            break;
        }
        if gradient_norm <= options.gradient_tolerance {
            reason = TerminationReason::GradientTolerance;
            break;
        }

        for i in 0..a.nrows() {
            a[(i, i)] += lambda * (a[(i, i)].abs() + 1.0);
        }

        let Some(delta) = a.lu().solve(&(-g)) else {
            lambda = (lambda * options.lambda_up).min(1e12);
            stagnation += 1;
            if stagnation >= options.max_stagnation {
                reason = TerminationReason::Stagnation;
                break;
            }
            continue;
        };

        if delta.norm() <= options.step_tolerance {
            reason = TerminationReason::StepTolerance;
            break;
        }

        let trial: Vec<f64> = x.iter().zip(delta.iter()).map(|(xi, di)| xi + di).collect();
        let candidate = bounds.clamp(&trial);

        let candidate_residuals = residual_fn(&candidate);
        let candidate_sse = sum_of_squares(&candidate_residuals);

        if candidate_sse.is_finite() && candidate_sse < sse {
            let improvement = sse - candidate_sse;
            let relative = improvement / sse;
            x = candidate;
            residuals = candidate_residuals;
            sse = candidate_sse;
            lambda = (lambda * options.lambda_down).max(1e-12);
            stagnation = 0;

            if relative <= options.objective_tolerance {
                reason = TerminationReason::ObjectiveTolerance;
                break;
            }
        } else {
            lambda = (lambda * options.lambda_up).min(1e12);
            stagnation += 1;
            if stagnation >= options.max_stagnation {
                reason = TerminationReason::Stagnation;
                break;
            }
        }
    }

    Ok(LeastSquaresResult {
        x,
        sse,
        iterations,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_exponential_decay() {
        let ts: Vec<f64> = (0..20).map(|i| i as f64 * 0.25).collect();
        let ys: Vec<f64> = ts.iter().map(|t| 2.0 * (-0.7 * t).exp()).collect();
        let bounds = Bounds::new(vec![0.0, 0.0], vec![10.0, 5.0]).unwrap();

        let result = levenberg_marquardt(&[1.0, 0.1], &bounds, &LmOptions::default(), |p| {
            ts.iter()
                .zip(ys.iter())
                .map(|(t, y)| p[0] * (-p[1] * t).exp() - y)
                .collect()
        })
        .unwrap();

        assert!(result.converged());
        assert!((result.x[0] - 2.0).abs() < 1e-5);
        assert!((result.x[1] - 0.7).abs() < 1e-5);
        assert!(result.sse < 1e-10);
    }

    #[test]
    fn test_respects_box() {
        // Unconstrained optimum at 3.0, box caps at 1.0
        let bounds = Bounds::new(vec![-1.0], vec![1.0]).unwrap();
        let result =
            levenberg_marquardt(&[0.0], &bounds, &LmOptions::default(), |p| vec![p[0] - 3.0])
                .unwrap();
        assert!((result.x[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_fixed_parameter() {
        let bounds = Bounds::new(vec![0.5, -10.0], vec![0.5, 10.0]).unwrap();
        let result = levenberg_marquardt(&[0.5, 0.0], &bounds, &LmOptions::default(), |p| {
            vec![p[0] + p[1] - 2.0, p[1] - 1.5]
        })
        .unwrap();
        assert_eq!(result.x[0], 0.5);
        assert!((result.x[1] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_max_iterations_not_converged() {
        let bounds = Bounds::new(vec![0.0, 0.0], vec![10.0, 5.0]).unwrap();
        let options = LmOptions {
            max_iterations: 1,
            ..LmOptions::default()
        };
        let result = levenberg_marquardt(&[9.0, 4.0], &bounds, &options, |p| {
            (0..10)
                .map(|i| p[0] * (-p[1] * i as f64).exp() - (-(i as f64)).exp())
                .collect()
        })
        .unwrap();
        assert_eq!(result.reason, TerminationReason::MaxIterations);
        assert!(!result.converged());
    }

    #[test]
    fn test_invalid_bounds() {
        assert!(Bounds::new(vec![1.0], vec![0.0]).is_err());
        assert!(Bounds::new(vec![0.0, 1.0], vec![1.0]).is_err());
    }
}
