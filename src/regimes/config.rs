//! Configuration for regime classification

use serde::{Deserialize, Serialize};

use crate::core::{PremiaError, PremiaResult};

/// Agglomerative linkage criterion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkageMethod {
    /// Minimum increase in within-cluster variance
    Ward,
}

/// Pairwise distance between feature vectors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    Euclidean,
}

/// Configuration for regime classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub method: LinkageMethod,
    pub distance_metric: DistanceMetric,

    /// Number of regimes. Takes precedence over `height_threshold`.
    /// Default: 2
    pub n_clusters: Option<usize>,

    /// Cut height for the dendrogram when `n_clusters` is unset
    pub height_threshold: Option<f64>,

    /// Principal components kept before clustering; `None` skips PCA
    pub n_components: Option<usize>,

    /// Floor applied to density values before the log-ratio transform
    /// Default: 1e-8
    pub clr_floor: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            method: LinkageMethod::Ward,
            distance_metric: DistanceMetric::Euclidean,
            n_clusters: Some(2),
            height_threshold: None,
            n_components: None,
            clr_floor: 1e-8,
        }
    }
}

impl ClusteringConfig {
    pub fn with_clusters(n_clusters: usize) -> Self {
        Self {
            n_clusters: Some(n_clusters),
            ..Default::default()
        }
    }

    pub fn with_threshold(height_threshold: f64) -> Self {
        Self {
            n_clusters: None,
            height_threshold: Some(height_threshold),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> PremiaResult<()> {
        match (self.n_clusters, self.height_threshold) {
            (None, None) => {
                return Err(PremiaError::config(
                    "clustering needs n_clusters or height_threshold",
                ))
            }
            (Some(0), _) => return Err(PremiaError::config("n_clusters must be positive")),
            (_, Some(h)) if !(h.is_finite() && h >= 0.0) => {
                return Err(PremiaError::config("height_threshold must be finite and >= 0"))
            }
            _ => {}
        }
        if self.n_components == Some(0) {
            return Err(PremiaError::config("n_components must be positive"));
        }
        if !(self.clr_floor.is_finite() && self.clr_floor > 0.0) {
            return Err(PremiaError::config("clr_floor must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ClusteringConfig::default().validate().is_ok());
        assert!(ClusteringConfig::with_threshold(1.5).validate().is_ok());
    }

    #[test]
    fn test_requires_cut_criterion() {
        let cfg = ClusteringConfig {
            n_clusters: None,
            height_threshold: None,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
        assert!(ClusteringConfig::with_clusters(0).validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let cfg: ClusteringConfig =
            serde_json::from_str(r#"{"method": "ward", "n_clusters": 3}"#).unwrap();
        assert_eq!(cfg.n_clusters, Some(3));
        assert_eq!(cfg.distance_metric, DistanceMetric::Euclidean);
        assert!(serde_json::from_str::<ClusteringConfig>(r#"{"method": "single"}"#).is_err());
    }
}
