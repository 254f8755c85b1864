//! Pipeline configuration
//!
//! One immutable [`PipelineConfig`] is loaded from JSON and handed by
//! reference to each stage. Every section has defaults, so a config file only
//! needs the values it changes.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::{PremiaError, PremiaResult};
use crate::math::Bounds;
use crate::regimes::ClusteringConfig;

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub optimization: OptimizationConfig,
    pub bounds: SviBounds,
    pub ttm_values: TtmConfig,
    pub quote_filter: QuoteFilterConfig,
    pub density: DensityConfig,
    pub clustering: ClusteringConfig,
}

impl PipelineConfig {
    /// Load from a JSON file and validate
    pub fn from_file(path: impl AsRef<Path>) -> PremiaResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn validate(&self) -> PremiaResult<()> {
        self.optimization.validate()?;
        self.bounds.validate()?;
        self.ttm_values.validate()?;
        self.density.validate()?;
        self.clustering.validate()
    }
}

/// Multi-start optimizer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Iteration cap per attempt
    /// Default: 500
    pub max_iterations: usize,

    /// Independent starts per fit
    /// Default: 10
    pub attempts: usize,

    /// Minimum R² of an accepted fit
    /// Default: 0.95
    pub min_r2_threshold: f64,

    /// Minimum distinct quotes per fit
    /// Default: 5
    pub min_quotes: usize,

    /// Base seed; attempt i draws its start from `seed + i`
    /// Default: 42
    pub seed: u64,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            max_iterations: 500,
            attempts: 10,
            min_r2_threshold: 0.95,
            min_quotes: 5,
            seed: 42,
        }
    }
}

impl OptimizationConfig {
    pub fn validate(&self) -> PremiaResult<()> {
        if self.attempts == 0 {
            return Err(PremiaError::config("attempts must be positive"));
        }
        if self.max_iterations == 0 {
            return Err(PremiaError::config("max_iterations must be positive"));
        }
        if !(self.min_r2_threshold.is_finite() && self.min_r2_threshold <= 1.0) {
            return Err(PremiaError::config("min_r2_threshold must be finite and <= 1"));
        }
        Ok(())
    }
}

/// `[low, high]` box for each raw SVI parameter.
///
/// The box only limits the search. It may reach outside the admissible SVI
/// domain (ρ ∈ [-1, 1], b ≥ 0, σ > 0, positive minimum variance); a fit that
/// lands there is rejected as a constraint violation and never clamped back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SviBounds {
    pub a: [f64; 2],
    pub b: [f64; 2],
    pub rho: [f64; 2],
    pub m: [f64; 2],
    pub sigma: [f64; 2],

    /// Per-year slope of each parameter in maturity; enables the
    /// ten-parameter fit when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttm_slope: Option<SviSlopeBounds>,
}

impl Default for SviBounds {
    fn default() -> Self {
        Self {
            a: [-1.0, 2.0],
            b: [0.001, 5.0],
            rho: [-0.999, 0.999],
            m: [-1.0, 1.0],
            sigma: [0.001, 2.0],
            ttm_slope: None,
        }
    }
}

/// Slope bounds for the maturity extension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SviSlopeBounds {
    pub a: [f64; 2],
    pub b: [f64; 2],
    pub rho: [f64; 2],
    pub m: [f64; 2],
    pub sigma: [f64; 2],
}

impl Default for SviSlopeBounds {
    fn default() -> Self {
        Self {
            a: [-1.0, 1.0],
            b: [-1.0, 1.0],
            rho: [-1.0, 1.0],
            m: [-1.0, 1.0],
            sigma: [-1.0, 1.0],
        }
    }
}

impl SviSlopeBounds {
    fn ranges(&self) -> [[f64; 2]; 5] {
        [self.a, self.b, self.rho, self.m, self.sigma]
    }
}

impl SviBounds {
    /// Same defaults with σ pinned to a single value
    pub fn with_fixed_sigma(sigma: f64) -> Self {
        Self {
            sigma: [sigma, sigma],
            ..Default::default()
        }
    }

    fn base_ranges(&self) -> [[f64; 2]; 5] {
        [self.a, self.b, self.rho, self.m, self.sigma]
    }

    /// Number of optimized parameters: 5, or 10 with the slope extension
    pub fn dimension(&self) -> usize {
        if self.ttm_slope.is_some() {
            10
        } else {
            5
        }
    }

    /// Flatten into an optimizer box, base parameters first
    pub fn to_bounds(&self) -> PremiaResult<Bounds> {
        let mut ranges = self.base_ranges().to_vec();
        if let Some(slope) = &self.ttm_slope {
            ranges.extend_from_slice(&slope.ranges());
        }
        let (lower, upper) = ranges.iter().map(|r| (r[0], r[1])).unzip();
        Bounds::new(lower, upper)
    }

    pub fn validate(&self) -> PremiaResult<()> {
        const NAMES: [&str; 5] = ["a", "b", "rho", "m", "sigma"];
        let check = |prefix: &str, ranges: [[f64; 2]; 5]| -> PremiaResult<()> {
            for (name, [lo, hi]) in NAMES.iter().zip(ranges) {
                if !(lo.is_finite() && hi.is_finite()) || lo > hi {
                    return Err(PremiaError::config(format!(
                        "bound {}{} = [{}, {}] is empty or not finite",
                        prefix, name, lo, hi
                    )));
                }
            }
            Ok(())
        };
        check("", self.base_ranges())?;
        if let Some(slope) = &self.ttm_slope {
            check("ttm_slope.", slope.ranges())?;
        }
        Ok(())
    }
}

/// Maturity buckets in days
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtmConfig {
    /// Buckets fitted and reported
    pub main_analysis: Vec<f64>,
    /// Buckets whose densities feed the regime classifier
    pub clustering: Vec<f64>,
    /// A quote joins the nearest bucket within this many days
    pub bucket_half_width: f64,
}

impl Default for TtmConfig {
    fn default() -> Self {
        Self {
            main_analysis: vec![9.0, 14.0, 27.0, 45.0],
            clustering: vec![9.0, 14.0, 27.0],
            bucket_half_width: 2.0,
        }
    }
}

impl TtmConfig {
    pub fn validate(&self) -> PremiaResult<()> {
        if self.main_analysis.is_empty() {
            return Err(PremiaError::config("ttm_values.main_analysis is empty"));
        }
        if self
            .main_analysis
            .iter()
            .chain(self.clustering.iter())
            .any(|t| !(t.is_finite() && *t > 0.0))
        {
            return Err(PremiaError::config("ttm values must be positive"));
        }
        if !(self.bucket_half_width.is_finite() && self.bucket_half_width >= 0.0) {
            return Err(PremiaError::config("bucket_half_width must be >= 0"));
        }
        Ok(())
    }

    /// Union of analysis and clustering maturities, ascending
    pub fn all(&self) -> Vec<f64> {
        let mut all: Vec<f64> = self
            .main_analysis
            .iter()
            .chain(self.clustering.iter())
            .copied()
            .collect();
        all.sort_by(|a, b| a.total_cmp(b));
        all.dedup();
        all
    }
}

/// Business filters applied to quotes before bucketing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteFilterConfig {
    /// Quotes priced at or below this are dropped
    /// Default: 0.0
    pub min_price: f64,
    /// Quotes with a lower underlying spot are dropped
    /// Default: 0.0
    pub min_spot: f64,
}

impl Default for QuoteFilterConfig {
    fn default() -> Self {
        Self {
            min_price: 0.0,
            min_spot: 0.0,
        }
    }
}

/// Density extraction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    /// Lowest log return on the output grid
    pub min_return: f64,
    /// Highest log return on the output grid
    pub max_return: f64,
    /// Output grid spacing
    pub step: f64,
    /// Fine-grid points per output-grid interval for differentiation
    /// Default: 10
    pub fine_grid_factor: usize,
    /// Continuously compounded rate used for discounting
    pub risk_free_rate: f64,
    /// Allowed deviation of the repaired mass from one
    /// Default: 1e-3
    pub mass_tolerance: f64,
    /// Minimum mass left after clipping negative values
    /// Default: 0.5
    pub min_mass: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            min_return: -1.0,
            max_return: 1.0,
            step: 0.01,
            fine_grid_factor: 10,
            risk_free_rate: 0.0,
            mass_tolerance: 1e-3,
            min_mass: 0.5,
        }
    }
}

impl DensityConfig {
    pub fn validate(&self) -> PremiaResult<()> {
        if !(self.step > 0.0 && self.max_return > self.min_return) {
            return Err(PremiaError::config("density return grid is empty"));
        }
        if self.fine_grid_factor == 0 {
            return Err(PremiaError::config("fine_grid_factor must be positive"));
        }
        if !self.risk_free_rate.is_finite() {
            return Err(PremiaError::config("risk_free_rate must be finite"));
        }
        if !(self.min_mass > 0.0 && self.min_mass <= 1.0) {
            return Err(PremiaError::config("min_mass must lie in (0, 1]"));
        }
        if !(self.mass_tolerance > 0.0) {
            return Err(PremiaError::config("mass_tolerance must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_valid() {
        let cfg = PipelineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.bounds.dimension(), 5);
        assert_eq!(cfg.ttm_values.all(), vec![9.0, 14.0, 27.0, 45.0]);
    }

    #[test]
    fn test_inverted_bound_rejected() {
        let mut cfg = PipelineConfig::default();
        cfg.bounds.rho = [0.5, -0.5];
        assert!(matches!(cfg.validate(), Err(PremiaError::Config(_))));
    }

    #[test]
    fn test_slope_bounds_extend_dimension() {
        let bounds = SviBounds {
            ttm_slope: Some(SviSlopeBounds::default()),
            ..Default::default()
        };
        let b = bounds.to_bounds().unwrap();
        assert_eq!(b.dimension(), 10);
        assert_eq!(b.lower[5], -1.0);
    }

    #[test]
    fn test_from_file_partial_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "optimization": {{"attempts": 4}},
                "bounds": {{"a": [-0.5, 1.0], "b": [0.01, 3.0], "rho": [-0.9, 0.9],
                           "m": [-0.5, 0.5], "sigma": [0.5, 0.5]}},
                "ttm_values": {{"main_analysis": [14], "clustering": [14]}},
                "clustering": {{"method": "ward", "n_clusters": 3}}
            }}"#
        )
        .unwrap();

        let cfg = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(cfg.optimization.attempts, 4);
        assert_eq!(cfg.optimization.max_iterations, 500);
        assert_eq!(cfg.bounds.sigma, [0.5, 0.5]);
        assert_eq!(cfg.ttm_values.main_analysis, vec![14.0]);
        assert_eq!(cfg.clustering.n_clusters, Some(3));
        assert_eq!(cfg.density.min_mass, 0.5);
    }

    #[test]
    fn test_from_file_rejects_zero_attempts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"optimization": {{"attempts": 0}}}}"#).unwrap();
        assert!(PipelineConfig::from_file(file.path()).is_err());
    }
}
