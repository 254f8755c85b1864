//! Regime classifier facade
//!
//! Densities of one trading day across the clustering maturities form one
//! observation: each maturity block is CLR-transformed and the blocks are
//! concatenated. Observations are optionally reduced with PCA, then grouped
//! with Ward linkage and cut into flat clusters.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ndarray::Array2;

use super::compositional::clr_concat;
use super::config::{ClusteringConfig, DistanceMetric, LinkageMethod};
use super::linkage::{pairwise_distances, ward_linkage};
use super::reduction::pca;
use crate::core::{
    Exclusion, ExclusionReason, PremiaError, PremiaResult, RegimeLabel, RiskNeutralDensity,
};

/// Labels for one batch plus diagnostics
#[derive(Debug, Clone)]
pub struct RegimeClassification {
    /// One label per classified date, ascending by date
    pub labels: Vec<RegimeLabel>,
    /// Number of distinct clusters in `labels`
    pub n_clusters: usize,
    /// Dendrogram merge heights, ascending
    pub merge_heights: Vec<f64>,
    /// Clusters the height threshold alone would give, when both cut
    /// criteria were configured
    pub threshold_clusters: Option<usize>,
    /// Variance share of each retained principal component
    pub explained_variance_ratio: Option<Vec<f64>>,
    /// Dates left out, e.g. for a missing maturity
    pub exclusions: Vec<Exclusion>,
}

impl RegimeClassification {
    pub fn label_for(&self, date: NaiveDate) -> Option<usize> {
        self.labels
            .binary_search_by(|l| l.date.cmp(&date))
            .ok()
            .map(|i| self.labels[i].cluster_id)
    }

    /// Observations per cluster id
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_clusters];
        for l in &self.labels {
            sizes[l.cluster_id] += 1;
        }
        sizes
    }
}

#[derive(Debug, Clone)]
pub struct RegimeClassifier {
    config: ClusteringConfig,
}

impl RegimeClassifier {
    pub fn new(config: ClusteringConfig) -> PremiaResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ClusteringConfig {
        &self.config
    }

    /// Classify every date that has a density at each of `maturities`.
    pub fn classify(
        &self,
        densities: &[RiskNeutralDensity],
        maturities: &[f64],
    ) -> PremiaResult<RegimeClassification> {
        if maturities.is_empty() {
            return Err(PremiaError::config("no clustering maturities"));
        }

        let (dates, features, exclusions) = self.feature_rows(densities, maturities)?;
        let n = dates.len();

        match self.config.n_clusters {
            Some(k) if n < k => {
                return Err(PremiaError::clustering_infeasible(format!(
                    "{} valid dates for {} clusters",
                    n, k
                )))
            }
            _ if n == 0 => {
                return Err(PremiaError::clustering_infeasible("no valid dates"));
            }
            _ => {}
        }

        let (points, explained_variance_ratio) = match self.config.n_components {
            Some(c) => {
                let projection = pca(&features, Some(c))?;
                tracing::debug!(
                    "PCA kept {} components ({:.1}% of variance)",
                    projection.n_components(),
                    100.0 * projection.explained_variance_ratio.iter().sum::<f64>()
                );
                (projection.scores, Some(projection.explained_variance_ratio))
            }
            None => (features, None),
        };

        let distances = match self.config.distance_metric {
            DistanceMetric::Euclidean => pairwise_distances(&points),
        };
        let dendrogram = match self.config.method {
            LinkageMethod::Ward => ward_linkage(&distances)?,
        };

        let threshold_labels = self.config.height_threshold.map(|h| dendrogram.cut_height(h));
        let cluster_ids = match (self.config.n_clusters, &threshold_labels) {
            (Some(k), _) => dendrogram.cut_clusters(k)?,
            (None, Some(labels)) => labels.clone(),
            (None, None) => {
                return Err(PremiaError::config("clustering needs n_clusters or height_threshold"))
            }
        };

        let n_clusters = count_clusters(&cluster_ids);
        let threshold_clusters = match (self.config.n_clusters, &threshold_labels) {
            (Some(_), Some(labels)) => {
                let t = count_clusters(labels);
                tracing::info!(
                    "height threshold would give {} clusters; using n_clusters = {}",
                    t,
                    n_clusters
                );
                Some(t)
            }
            _ => None,
        };

        let labels: Vec<RegimeLabel> = dates
            .into_iter()
            .zip(cluster_ids)
            .map(|(date, id)| RegimeLabel::new(date, id))
            .collect();

        tracing::info!(
            "Classified {} dates into {} regimes ({} excluded)",
            labels.len(),
            n_clusters,
            exclusions.len()
        );

        Ok(RegimeClassification {
            labels,
            n_clusters,
            merge_heights: dendrogram.heights(),
            threshold_clusters,
            explained_variance_ratio,
            exclusions,
        })
    }

    /// One CLR feature row per complete date, ascending by date
    fn feature_rows(
        &self,
        densities: &[RiskNeutralDensity],
        maturities: &[f64],
    ) -> PremiaResult<(Vec<NaiveDate>, Array2<f64>, Vec<Exclusion>)> {
        let mut by_date: BTreeMap<NaiveDate, Vec<&RiskNeutralDensity>> = BTreeMap::new();
        for d in densities {
            by_date.entry(d.date).or_default().push(d);
        }

        let mut block_len: Vec<Option<usize>> = vec![None; maturities.len()];
        let mut dates = Vec::new();
        let mut rows: Vec<Vec<f64>> = Vec::new();
        let mut exclusions = Vec::new();

        for (date, day) in by_date {
            let blocks: Vec<Option<&RiskNeutralDensity>> = maturities
                .iter()
                .map(|&t| day.iter().copied().find(|d| d.time_to_maturity == t))
                .collect();

            if let Some(i) = blocks.iter().position(|b| b.is_none()) {
                exclusions.push(Exclusion::new(
                    date,
                    Some(maturities[i]),
                    ExclusionReason::MissingMaturity,
                    format!("no density at {} days", maturities[i]),
                ));
                continue;
            }

            let blocks: Vec<&RiskNeutralDensity> = blocks.into_iter().flatten().collect();
            for (expected, block) in block_len.iter_mut().zip(blocks.iter()) {
                let len = *expected.get_or_insert(block.len());
                if len != block.len() {
                    return Err(PremiaError::data(format!(
                        "density on {} at {} days has {} points, expected {}",
                        date,
                        block.time_to_maturity,
                        block.len(),
                        len
                    )));
                }
            }

            rows.push(clr_concat(
                blocks.iter().map(|b| b.density.as_slice()),
                self.config.clr_floor,
            ));
            dates.push(date);
        }

        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        let features = Array2::from_shape_vec((dates.len(), width), flat)
            .map_err(|e| PremiaError::numerical(format!("feature matrix: {}", e)))?;

        Ok((dates, features, exclusions))
    }
}

fn count_clusters(labels: &[usize]) -> usize {
    labels.iter().max().map(|m| m + 1).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::linspace;

    fn gaussian(date: NaiveDate, ttm: f64, sd: f64, shift: f64) -> RiskNeutralDensity {
        let returns = linspace(-1.0, 1.0, 101);
        let density = returns
            .iter()
            .map(|x| {
                let z = (x - shift) / sd;
                (-0.5 * z * z).exp() / (sd * (2.0 * std::f64::consts::PI).sqrt())
            })
            .collect();
        RiskNeutralDensity::new(date, ttm, returns, density)
    }

    /// 40 days alternating between a calm and a stressed regime
    fn forty_days() -> Vec<RiskNeutralDensity> {
        let start = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let mut out = Vec::new();
        for i in 0..40 {
            let date = start + chrono::Duration::days(i);
            let jitter = 0.002 * ((i * 7 % 5) as f64);
            let (sd, shift) = if (i / 5) % 2 == 0 {
                (0.08 + jitter, 0.0)
            } else {
                (0.25 + jitter, -0.05)
            };
            for ttm in [14.0, 27.0] {
                out.push(gaussian(date, ttm, sd * (ttm / 14.0_f64).sqrt(), shift));
            }
        }
        out
    }

    #[test]
    fn test_forty_days_two_regimes() {
        let classifier = RegimeClassifier::new(ClusteringConfig::with_clusters(2)).unwrap();
        let result = classifier.classify(&forty_days(), &[14.0, 27.0]).unwrap();

        assert_eq!(result.labels.len(), 40);
        assert_eq!(result.n_clusters, 2);
        let sizes = result.cluster_sizes();
        assert!(sizes.iter().all(|&s| s > 0));
        assert_eq!(sizes.iter().sum::<usize>(), 40);

        // Calm and stressed blocks separate cleanly
        for (i, label) in result.labels.iter().enumerate() {
            let calm = (i / 5) % 2 == 0;
            assert_eq!(label.cluster_id == result.labels[0].cluster_id, calm);
        }
    }

    #[test]
    fn test_classification_deterministic() {
        let densities = forty_days();
        let cfg = ClusteringConfig {
            n_components: Some(5),
            ..ClusteringConfig::with_clusters(3)
        };
        let classifier = RegimeClassifier::new(cfg).unwrap();
        let a = classifier.classify(&densities, &[14.0, 27.0]).unwrap();
        let b = classifier.classify(&densities, &[14.0, 27.0]).unwrap();
        assert_eq!(a.labels, b.labels);
        assert_eq!(a.merge_heights, b.merge_heights);
    }

    #[test]
    fn test_pca_full_rank_keeps_labels() {
        let densities = forty_days();
        let plain = RegimeClassifier::new(ClusteringConfig::with_clusters(4))
            .unwrap()
            .classify(&densities, &[14.0, 27.0])
            .unwrap();
        let reduced = RegimeClassifier::new(ClusteringConfig {
            n_components: Some(1000),
            ..ClusteringConfig::with_clusters(4)
        })
        .unwrap()
        .classify(&densities, &[14.0, 27.0])
        .unwrap();

        assert_eq!(plain.labels, reduced.labels);
        for (a, b) in plain.merge_heights.iter().zip(reduced.merge_heights.iter()) {
            assert!((a - b).abs() < 1e-8);
        }
    }

    #[test]
    fn test_missing_maturity_excluded() {
        let mut densities = forty_days();
        let dropped = densities[3].date;
        densities.remove(3);

        let result = RegimeClassifier::new(ClusteringConfig::with_clusters(2))
            .unwrap()
            .classify(&densities, &[14.0, 27.0])
            .unwrap();
        assert_eq!(result.labels.len(), 39);
        assert_eq!(result.exclusions.len(), 1);
        assert_eq!(result.exclusions[0].date, dropped);
        assert_eq!(result.exclusions[0].reason, ExclusionReason::MissingMaturity);
        assert!(result.label_for(dropped).is_none());
    }

    #[test]
    fn test_fewer_dates_than_clusters() {
        let densities: Vec<_> = forty_days().into_iter().take(6).collect();
        let result = RegimeClassifier::new(ClusteringConfig::with_clusters(4))
            .unwrap()
            .classify(&densities, &[14.0, 27.0]);
        assert!(matches!(result, Err(PremiaError::ClusteringInfeasible(_))));
    }

    #[test]
    fn test_threshold_only_cut() {
        let densities = forty_days();
        let by_count = RegimeClassifier::new(ClusteringConfig::with_clusters(2))
            .unwrap()
            .classify(&densities, &[14.0, 27.0])
            .unwrap();

        // Cut between the last two merges
        let h = &by_count.merge_heights;
        assert_eq!(h.len(), 39);
        let cut = 0.5 * (h[h.len() - 2] + h[h.len() - 1]);

        let by_height = RegimeClassifier::new(ClusteringConfig::with_threshold(cut))
            .unwrap()
            .classify(&densities, &[14.0, 27.0])
            .unwrap();
        assert_eq!(by_height.n_clusters, 2);
        assert!(by_height.threshold_clusters.is_none());
        assert_eq!(by_height.labels, by_count.labels);

        // Above the last merge everything joins
        let single = RegimeClassifier::new(ClusteringConfig::with_threshold(h[h.len() - 1] + 1.0))
            .unwrap()
            .classify(&densities, &[14.0, 27.0])
            .unwrap();
        assert_eq!(single.n_clusters, 1);
        assert_eq!(single.cluster_sizes(), vec![40]);
    }

    #[test]
    fn test_both_criteria_prefers_count() {
        let cfg = ClusteringConfig {
            n_clusters: Some(2),
            height_threshold: Some(0.0),
            ..Default::default()
        };
        let result = RegimeClassifier::new(cfg)
            .unwrap()
            .classify(&forty_days(), &[14.0, 27.0])
            .unwrap();
        assert_eq!(result.n_clusters, 2);
        assert!(result.threshold_clusters.unwrap_or(0) > 2);
    }
}
