//! Risk-neutral density extraction (Breeden-Litzenberger)
//!
//! For unit spot and strike K = e^k the density of the log return k is
//!
//! f(k) = e^{rT} · (C_kk - C_k) / K
//!
//! where C(k) is the call price curve. The curve is built on a fine, evenly
//! spaced k grid from PCHIP-interpolated implied volatilities, differentiated
//! with centred differences, brought back to the requested grid, then
//! repaired: negative values are clipped and the rest renormalised.

use chrono::NaiveDate;
use rayon::prelude::*;

use crate::config::DensityConfig;
use crate::core::{days_to_years, Exclusion, PremiaError, PremiaResult, RiskNeutralDensity};
use crate::math::{first_derivative, linspace, return_grid, second_derivative, trapz, Pchip};
use crate::models::black_scholes::normalized_call_prices;
use crate::models::interpolator::SurfaceInterpolator;

/// Deterministic density extractor
#[derive(Debug, Clone)]
pub struct DensityExtractor {
    config: DensityConfig,
}

impl DensityExtractor {
    pub fn new(config: DensityConfig) -> PremiaResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &DensityConfig {
        &self.config
    }

    /// Configured output grid of log returns
    pub fn return_grid(&self) -> PremiaResult<Vec<f64>> {
        return_grid(self.config.min_return, self.config.max_return, self.config.step)
    }

    /// Density for one (date, maturity) on `moneyness_grid`.
    ///
    /// Errors: `InvalidSurfaceQuery` when the date has no surface,
    /// `DegenerateDensity` when too little mass survives clipping.
    pub fn extract(
        &self,
        surface: &SurfaceInterpolator,
        date: NaiveDate,
        time_to_maturity: f64,
        moneyness_grid: &[f64],
        risk_free_rate: f64,
    ) -> PremiaResult<RiskNeutralDensity> {
        validate_grid(moneyness_grid)?;
        if !(time_to_maturity.is_finite() && time_to_maturity > 0.0) {
            return Err(PremiaError::invalid_input(format!(
                "maturity {} must be positive",
                time_to_maturity
            )));
        }

        let vols = surface.smile(date, time_to_maturity, moneyness_grid)?;
        let vol_curve = Pchip::new(moneyness_grid.to_vec(), vols)?;

        let n = moneyness_grid.len();
        let n_fine = (n - 1) * self.config.fine_grid_factor + 1;
        let fine = linspace(moneyness_grid[0], moneyness_grid[n - 1], n_fine);
        let h = fine[1] - fine[0];
        let fine_vols = vol_curve.values(&fine);

        let tau = days_to_years(time_to_maturity);
        let calls = normalized_call_prices(&fine, &fine_vols, risk_free_rate, tau);
        let c_k = first_derivative(&calls, h);
        let c_kk = second_derivative(&calls, h);

        let growth = (risk_free_rate * tau).exp();
        let fine_density: Vec<f64> = fine
            .iter()
            .zip(c_k.iter().zip(c_kk.iter()))
            .map(|(&k, (&d1, &d2))| growth * (d2 - d1) / k.exp())
            .collect();

        let raw = Pchip::new(fine, fine_density)?.values(moneyness_grid);
        let density = repair_density(moneyness_grid, &raw, self.config.min_mass)?;

        let mass = trapz(moneyness_grid, &density);
        if (mass - 1.0).abs() > self.config.mass_tolerance {
            return Err(PremiaError::numerical(format!(
                "repaired mass {:.6} outside tolerance",
                mass
            )));
        }

        Ok(RiskNeutralDensity::new(
            date,
            time_to_maturity,
            moneyness_grid.to_vec(),
            density,
        ))
    }

    /// Density on the configured return grid with the configured rate
    pub fn extract_default(
        &self,
        surface: &SurfaceInterpolator,
        date: NaiveDate,
        time_to_maturity: f64,
    ) -> PremiaResult<RiskNeutralDensity> {
        let grid = self.return_grid()?;
        self.extract(surface, date, time_to_maturity, &grid, self.config.risk_free_rate)
    }

    /// All (date, maturity) densities in parallel. Unit failures become
    /// exclusions; output is ordered by (date, maturity).
    pub fn extract_batch(
        &self,
        surface: &SurfaceInterpolator,
        dates: &[NaiveDate],
        maturities: &[f64],
    ) -> PremiaResult<(Vec<RiskNeutralDensity>, Vec<Exclusion>)> {
        let grid = self.return_grid()?;
        let units: Vec<(NaiveDate, f64)> = dates
            .iter()
            .flat_map(|&d| maturities.iter().map(move |&t| (d, t)))
            .collect();

        let outcomes: Vec<((NaiveDate, f64), PremiaResult<RiskNeutralDensity>)> = units
            .par_iter()
            .map(|&(date, ttm)| {
                let result = self.extract(surface, date, ttm, &grid, self.config.risk_free_rate);
                ((date, ttm), result)
            })
            .collect();

        let mut densities = Vec::new();
        let mut exclusions = Vec::new();
        for ((date, ttm), outcome) in outcomes {
            match outcome {
                Ok(d) => densities.push(d),
                Err(e) => exclusions.push(Exclusion::from_error(date, Some(ttm), e)?),
            }
        }

        tracing::info!(
            "Extracted {} of {} densities ({} excluded)",
            densities.len(),
            units.len(),
            exclusions.len()
        );
        Ok((densities, exclusions))
    }
}

/// Clip negative values to zero and renormalise to unit trapezoid mass.
///
/// Fails with `DegenerateDensity` when the clipped mass is below `min_mass`
/// or any value is not finite.
pub fn repair_density(grid: &[f64], raw: &[f64], min_mass: f64) -> PremiaResult<Vec<f64>> {
    if grid.len() != raw.len() {
        return Err(PremiaError::invalid_input("density and grid lengths differ"));
    }
    if raw.iter().any(|v| !v.is_finite()) {
        return Err(PremiaError::degenerate_density("non-finite density value"));
    }

    let clipped: Vec<f64> = raw.iter().map(|v| v.max(0.0)).collect();
    let mass = trapz(grid, &clipped);
    if !(mass >= min_mass) {
        return Err(PremiaError::degenerate_density(format!(
            "clipped mass {:.4} below {:.4}",
            mass, min_mass
        )));
    }

    Ok(clipped.into_iter().map(|v| v / mass).collect())
}

fn validate_grid(grid: &[f64]) -> PremiaResult<()> {
    if grid.len() < 3 {
        return Err(PremiaError::invalid_input("moneyness grid needs at least 3 points"));
    }
    if grid.iter().any(|v| !v.is_finite()) || grid.windows(2).any(|w| w[1] <= w[0]) {
        return Err(PremiaError::invalid_input(
            "moneyness grid must be finite and strictly increasing",
        ));
    }
    Ok(())
}
