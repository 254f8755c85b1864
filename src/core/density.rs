//! Risk-neutral density of log returns

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::math::trapz;

/// Risk-neutral density sampled on a return grid.
///
/// Returns are log returns ln(S_T / S_0). An accepted density is
/// non-negative everywhere and integrates to one under the trapezoid rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskNeutralDensity {
    pub date: NaiveDate,
    /// Horizon in days
    pub time_to_maturity: f64,
    /// Return grid, ascending
    pub returns: Vec<f64>,
    /// Density values on the grid
    pub density: Vec<f64>,
}

/// Mean and central moments 2..6 of a density, annualised by 365/ttm
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DensityMoments {
    pub m1: f64,
    pub m2: f64,
    pub m3: f64,
    pub m4: f64,
    pub m5: f64,
    pub m6: f64,
}

impl RiskNeutralDensity {
    pub fn new(date: NaiveDate, time_to_maturity: f64, returns: Vec<f64>, density: Vec<f64>) -> Self {
        Self {
            date,
            time_to_maturity,
            returns,
            density,
        }
    }

    /// Trapezoid integral of the density
    pub fn mass(&self) -> f64 {
        trapz(&self.returns, &self.density)
    }

    pub fn len(&self) -> usize {
        self.returns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.returns.is_empty()
    }

    /// Iterate `(return, density)` pairs
    pub fn points(&self) -> impl Iterator<Item = (f64, f64)> + '_ {
        self.returns.iter().copied().zip(self.density.iter().copied())
    }

    pub fn moments(&self) -> DensityMoments {
        let r = &self.returns;
        let f = &self.density;
        let m1 = trapz(r, &r.iter().zip(f).map(|(x, p)| x * p).collect::<Vec<_>>());

        let central = |n: i32| -> f64 {
            let integrand: Vec<f64> = r
                .iter()
                .zip(f)
                .map(|(x, p)| (x - m1).powi(n) * p)
                .collect();
            trapz(r, &integrand)
        };

        let scale = 365.0 / self.time_to_maturity;
        DensityMoments {
            m1: m1 * scale,
            m2: central(2) * scale,
            m3: central(3) * scale,
            m4: central(4) * scale,
            m5: central(5) * scale,
            m6: central(6) * scale,
        }
    }
}
