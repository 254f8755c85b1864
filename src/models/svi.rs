//! SVI smile fitting
//!
//! Fits the raw SVI implied-variance curve to one (date, maturity bucket) of
//! quotes by multi-start box-constrained least squares:
//!
//! - attempt 0 starts from a data-driven guess (parabola through the smile)
//! - attempts 1.. start uniformly in the box, seeded with `seed + attempt`
//! - attempts run in parallel; the converged attempt with lowest SSE wins
//!
//! With slope bounds configured the fit has ten parameters and each quote is
//! evaluated at its own maturity: θ(τ) = θ_base + θ_slope·τ.

use nalgebra::{Matrix3, Vector3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

use crate::config::{OptimizationConfig, PipelineConfig, SviBounds};
use crate::core::{
    days_to_years, Exclusion, ExclusionReason, OptionQuote, PremiaError, PremiaResult,
    QuotePanel, QuoteSlice, SviParameterSet, SviParams,
};
use crate::math::{levenberg_marquardt, Bounds, LeastSquaresResult, LmOptions};

/// Observation used by the residual function
#[derive(Debug, Clone, Copy)]
struct SmilePoint {
    k: f64,
    tau: f64,
    variance: f64,
}

/// Multi-start SVI fitter
#[derive(Debug, Clone)]
pub struct SurfaceFitter {
    bounds: SviBounds,
    optimizer_box: Bounds,
    optimization: OptimizationConfig,
    lm: LmOptions,
}

impl SurfaceFitter {
    pub fn new(bounds: SviBounds, optimization: OptimizationConfig) -> PremiaResult<Self> {
        bounds.validate()?;
        optimization.validate()?;
        let optimizer_box = bounds.to_bounds()?;
        let lm = LmOptions {
            max_iterations: optimization.max_iterations,
            ..LmOptions::default()
        };
        Ok(Self {
            bounds,
            optimizer_box,
            optimization,
            lm,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> PremiaResult<Self> {
        Self::new(config.bounds.clone(), config.optimization.clone())
    }

    pub fn bounds(&self) -> &SviBounds {
        &self.bounds
    }

    /// Fit one bucket slice
    pub fn fit(&self, slice: &QuoteSlice) -> PremiaResult<SviParameterSet> {
        let quotes = slice.deduplicated(self.bounds.ttm_slope.is_some());
        self.fit_quotes(slice.date, slice.bucket_ttm, &quotes)
    }

    /// Fit already deduplicated quotes of one (date, bucket).
    ///
    /// Unit-level failures come back as [`PremiaError::RejectedFit`] carrying
    /// the reason code.
    pub fn fit_quotes(
        &self,
        date: chrono::NaiveDate,
        bucket_ttm: f64,
        quotes: &[OptionQuote],
    ) -> PremiaResult<SviParameterSet> {
        let min_quotes = self.optimization.min_quotes.max(1);
        if quotes.len() < min_quotes {
            return Err(PremiaError::rejected_fit(
                ExclusionReason::InsufficientQuotes,
                format!("{} quotes, need {}", quotes.len(), min_quotes),
            ));
        }

        let points: Vec<SmilePoint> = quotes
            .iter()
            .map(|q| SmilePoint {
                k: q.log_moneyness(),
                tau: q.tau(),
                variance: q.implied_variance(),
            })
            .collect();

        let slope_fit = self.bounds.ttm_slope.is_some();
        let residuals = |x: &[f64]| -> Vec<f64> {
            let base = SviParams::new(x[0], x[1], x[2], x[3], x[4]);
            if slope_fit {
                let slope = SviParams::new(x[5], x[6], x[7], x[8], x[9]);
                points
                    .iter()
                    .map(|p| base.with_slope(&slope, p.tau).variance(p.k) - p.variance)
                    .collect()
            } else {
                points.iter().map(|p| base.variance(p.k) - p.variance).collect()
            }
        };

        let guess = self.initial_guess(&points);
        let attempts: Vec<(usize, LeastSquaresResult)> = (0..self.optimization.attempts)
            .into_par_iter()
            .filter_map(|attempt| {
                let start = if attempt == 0 {
                    guess.clone()
                } else {
                    self.random_start(attempt)
                };
                match levenberg_marquardt(&start, &self.optimizer_box, &self.lm, residuals) {
                    Ok(result) => Some((attempt, result)),
                    Err(e) => {
                        tracing::debug!(%date, bucket_ttm, attempt, "attempt failed: {}", e);
                        None
                    }
                }
            })
            .collect();

        let converged_attempts = attempts.iter().filter(|(_, r)| r.converged()).count();
        let best = attempts
            .iter()
            .filter(|(_, r)| r.converged() && r.sse.is_finite())
            .min_by(|(ia, a), (ib, b)| a.sse.total_cmp(&b.sse).then(ia.cmp(ib)))
            .map(|(_, r)| r);

        let Some(best) = best else {
            return Err(PremiaError::rejected_fit(
                ExclusionReason::NoConvergence,
                format!(
                    "none of {} attempts converged within {} iterations",
                    self.optimization.attempts, self.optimization.max_iterations
                ),
            ));
        };

        let x = &best.x;
        let base = SviParams::new(x[0], x[1], x[2], x[3], x[4]);
        let slope = slope_fit.then(|| SviParams::new(x[5], x[6], x[7], x[8], x[9]));
        let bucket_tau = days_to_years(bucket_ttm);
        let effective = match &slope {
            Some(s) => base.with_slope(s, bucket_tau),
            None => base,
        };

        // Domain must hold at the bucket maturity and wherever a quote was priced
        let check_at = |tau: f64| -> Result<(), String> {
            match &slope {
                Some(s) => base.with_slope(s, tau).check_domain(),
                None => base.check_domain(),
            }
        };
        std::iter::once(bucket_tau)
            .chain(points.iter().map(|p| p.tau))
            .try_for_each(check_at)
            .map_err(|msg| PremiaError::rejected_fit(ExclusionReason::ConstraintViolation, msg))?;

        let fitted = residuals(x);
        let r_squared = r_squared(&points, &fitted);
        if !(r_squared >= self.optimization.min_r2_threshold) {
            return Err(PremiaError::rejected_fit(
                ExclusionReason::LowRSquared,
                format!(
                    "R² {:.4} below {:.4}",
                    r_squared, self.optimization.min_r2_threshold
                ),
            ));
        }

        tracing::debug!(
            %date,
            bucket_ttm,
            r_squared,
            sse = best.sse,
            iterations = best.iterations,
            converged_attempts,
            "accepted SVI fit"
        );

        Ok(SviParameterSet {
            date,
            time_to_maturity_bucket: bucket_ttm,
            a: effective.a,
            b: effective.b,
            rho: effective.rho,
            m: effective.m,
            sigma: effective.sigma,
            r_squared,
            ttm_slope: slope,
            n_quotes: quotes.len(),
            sse: best.sse,
            converged_attempts,
        })
    }

    /// Fit every slice of a panel in parallel. Rejected slices become
    /// exclusions; output is ordered by (date, bucket).
    pub fn fit_panel(&self, panel: &QuotePanel) -> PremiaResult<(Vec<SviParameterSet>, Vec<Exclusion>)> {
        let outcomes: Vec<(&QuoteSlice, PremiaResult<SviParameterSet>)> = panel
            .slices
            .par_iter()
            .map(|slice| (slice, self.fit(slice)))
            .collect();

        let mut fits = Vec::new();
        let mut exclusions = Vec::new();
        for (slice, outcome) in outcomes {
            match outcome {
                Ok(fit) => fits.push(fit),
                Err(e) => exclusions.push(Exclusion::from_error(
                    slice.date,
                    Some(slice.bucket_ttm),
                    e,
                )?),
            }
        }

        tracing::info!(
            "Fitted {} of {} slices ({} excluded)",
            fits.len(),
            panel.slices.len(),
            exclusions.len()
        );
        Ok((fits, exclusions))
    }

    fn random_start(&self, attempt: usize) -> Vec<f64> {
        let mut rng = ChaCha8Rng::seed_from_u64(self.optimization.seed.wrapping_add(attempt as u64));
        let u: Vec<f64> = (0..self.optimizer_box.dimension())
            .map(|_| rng.random::<f64>())
            .collect();
        self.optimizer_box.lerp(&u)
    }

    /// Vertex of a least-squares parabola through (k, v): m at the vertex,
    /// ρ = 0 and b/σ matching the parabola's curvature.
    fn initial_guess(&self, points: &[SmilePoint]) -> Vec<f64> {
        let k_min = points.iter().map(|p| p.k).fold(f64::INFINITY, f64::min);
        let k_max = points.iter().map(|p| p.k).fold(f64::NEG_INFINITY, f64::max);
        let v_min = points.iter().map(|p| p.variance).fold(f64::INFINITY, f64::min);
        let sigma = ((k_max - k_min) / 4.0).max(0.01);

        let mut guess = match fit_parabola(points) {
            Some((c0, c1, c2)) if c2 > 0.0 => {
                let m = (-c1 / (2.0 * c2)).clamp(k_min, k_max);
                let vertex = c0 + c1 * m + c2 * m * m;
                let b = 2.0 * c2 * sigma;
                vec![vertex - b * sigma, b, 0.0, m, sigma]
            }
            _ => vec![0.5 * v_min, 0.1, 0.0, 0.5 * (k_min + k_max), sigma],
        };

        if self.bounds.ttm_slope.is_some() {
            guess.extend_from_slice(&[0.0; SviParams::COUNT]);
        }
        self.optimizer_box.clamp(&guess)
    }
}

/// Least-squares v ≈ c0 + c1 k + c2 k²
fn fit_parabola(points: &[SmilePoint]) -> Option<(f64, f64, f64)> {
    if points.len() < 3 {
        return None;
    }
    let mut ata = Matrix3::<f64>::zeros();
    let mut atv = Vector3::<f64>::zeros();
    for p in points {
        let row = Vector3::new(1.0, p.k, p.k * p.k);
        ata += row * row.transpose();
        atv += row * p.variance;
    }
    let c = ata.lu().solve(&atv)?;
    c.iter().all(|v| v.is_finite()).then(|| (c[0], c[1], c[2]))
}

/// 1 - SS_res / SS_tot of the variance fit. A flat observed smile scores 1
/// only when it is matched exactly.
fn r_squared(points: &[SmilePoint], residuals: &[f64]) -> f64 {
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p.variance).sum::<f64>() / n;
    let ss_tot: f64 = points.iter().map(|p| (p.variance - mean).powi(2)).sum();
    let ss_res: f64 = residuals.iter().map(|r| r * r).sum();

    if ss_tot <= 1e-14 * mean.abs().max(1.0).powi(2) {
        return if ss_res <= 1e-14 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}
