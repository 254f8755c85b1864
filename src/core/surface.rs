//! Volatility surface types
//!
//! - [`SviParams`]: raw SVI implied-variance smile over log-moneyness
//! - [`SviParameterSet`]: one accepted fit for a (date, maturity bucket)
//! - [`IvSurfacePoint`] / [`IvGrid`]: derived views of the interpolated surface

use chrono::NaiveDate;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Raw SVI parameters.
///
/// Implied variance at log-moneyness k:
///
/// v(k) = a + b * (ρ (k - m) + sqrt((k - m)² + σ²))
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SviParams {
    /// Level
    pub a: f64,
    /// Wing slope
    pub b: f64,
    /// Skew (rotation)
    pub rho: f64,
    /// Horizontal shift
    pub m: f64,
    /// ATM curvature
    pub sigma: f64,
}

impl SviParams {
    pub const COUNT: usize = 5;

    pub fn new(a: f64, b: f64, rho: f64, m: f64, sigma: f64) -> Self {
        Self { a, b, rho, m, sigma }
    }

    pub fn from_slice(x: &[f64]) -> Option<Self> {
        if x.len() != Self::COUNT {
            return None;
        }
        Some(Self::new(x[0], x[1], x[2], x[3], x[4]))
    }

    pub fn to_array(self) -> [f64; 5] {
        [self.a, self.b, self.rho, self.m, self.sigma]
    }

    /// Implied variance at log-moneyness k
    pub fn variance(&self, k: f64) -> f64 {
        let x = k - self.m;
        self.a + self.b * (self.rho * x + (x * x + self.sigma * self.sigma).sqrt())
    }

    /// Implied volatility at log-moneyness k, `None` where variance is not positive
    pub fn vol(&self, k: f64) -> Option<f64> {
        let v = self.variance(k);
        (v > 0.0 && v.is_finite()).then(|| v.sqrt())
    }

    /// Minimum of the smile: a + bσ√(1 - ρ²)
    pub fn min_variance(&self) -> f64 {
        self.a + self.b * self.sigma * (1.0 - self.rho * self.rho).max(0.0).sqrt()
    }

    /// Effective parameters base + slope·τ for the maturity-slope extension
    pub fn with_slope(&self, slope: &SviParams, tau: f64) -> SviParams {
        SviParams {
            a: self.a + slope.a * tau,
            b: self.b + slope.b * tau,
            rho: self.rho + slope.rho * tau,
            m: self.m + slope.m * tau,
            sigma: self.sigma + slope.sigma * tau,
        }
    }

    /// Check the admissible SVI domain: ρ ∈ [-1, 1], b ≥ 0, σ > 0 and a
    /// strictly positive minimum variance.
    pub fn check_domain(&self) -> Result<(), String> {
        if self.to_array().iter().any(|v| !v.is_finite()) {
            return Err("non-finite parameter".to_string());
        }
        if !(-1.0..=1.0).contains(&self.rho) {
            return Err(format!("rho {:.4} outside [-1, 1]", self.rho));
        }
        if self.b < 0.0 {
            return Err(format!("b {:.4} negative", self.b));
        }
        if self.sigma <= 0.0 {
            return Err(format!("sigma {:.4} not positive", self.sigma));
        }
        let floor = self.min_variance();
        if floor <= 0.0 {
            return Err(format!("minimum variance {:.6} not positive", floor));
        }
        Ok(())
    }
}

/// Accepted SVI fit for one (date, maturity bucket)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SviParameterSet {
    pub date: NaiveDate,
    /// Nominal bucket maturity in days
    pub time_to_maturity_bucket: f64,
    pub a: f64,
    pub b: f64,
    pub rho: f64,
    pub m: f64,
    pub sigma: f64,
    /// Coefficient of determination of fitted vs observed implied variance
    pub r_squared: f64,
    /// Maturity-slope coefficients (per year), when the extension was fitted
    pub ttm_slope: Option<SviParams>,
    /// Quotes used after deduplication
    pub n_quotes: usize,
    /// Sum of squared variance residuals of the retained attempt
    pub sse: f64,
    /// Number of optimization attempts that converged
    pub converged_attempts: usize,
}

impl SviParameterSet {
    /// Curve parameters at the bucket maturity
    pub fn params(&self) -> SviParams {
        SviParams::new(self.a, self.b, self.rho, self.m, self.sigma)
    }

    /// Implied volatility at log-moneyness k on the bucket's own curve
    pub fn vol(&self, k: f64) -> Option<f64> {
        self.params().vol(k)
    }
}

/// One point of the implied volatility surface
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IvSurfacePoint {
    pub date: NaiveDate,
    /// Log-moneyness ln(K/S)
    pub moneyness: f64,
    /// Maturity in days
    pub time_to_maturity: f64,
    pub implied_volatility: f64,
}

/// Implied volatility sampled on a moneyness × maturity grid for one date
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvGrid {
    /// Reference date
    pub date: NaiveDate,
    /// X-axis: log-moneyness (ascending)
    pub moneyness: Vec<f64>,
    /// Y-axis: maturities in days (ascending)
    pub maturities: Vec<f64>,
    /// Volatility grid [moneyness, maturity] -> vol
    pub vols: Array2<f64>,
}

impl IvGrid {
    pub fn new(date: NaiveDate, moneyness: Vec<f64>, maturities: Vec<f64>, vols: Array2<f64>) -> Self {
        Self {
            date,
            moneyness,
            maturities,
            vols,
        }
    }

    /// Flatten into surface points (maturity-major)
    pub fn points(&self) -> Vec<IvSurfacePoint> {
        let mut points = Vec::with_capacity(self.moneyness.len() * self.maturities.len());
        for (ti, &ttm) in self.maturities.iter().enumerate() {
            for (ki, &k) in self.moneyness.iter().enumerate() {
                points.push(IvSurfacePoint {
                    date: self.date,
                    moneyness: k,
                    time_to_maturity: ttm,
                    implied_volatility: self.vols[[ki, ti]],
                });
            }
        }
        points
    }
}
