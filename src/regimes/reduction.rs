//! Principal component reduction of feature rows
//!
//! Rows are observations. Columns are centred and decomposed with a thin SVD,
//! X_c = U Σ Vᵀ; the scores are the leading columns of UΣ. Keeping every
//! component with a non-zero singular value is a rotation of the centred
//! data, so pairwise distances are unchanged.

use nalgebra::DMatrix;
use ndarray::{Array2, Axis};

use crate::core::{PremiaError, PremiaResult};

/// Singular values below this fraction of the largest count as zero
const RANK_TOLERANCE: f64 = 1e-10;

/// Scores and variance shares of a PCA projection
#[derive(Debug, Clone)]
pub struct PcaProjection {
    /// Observations × retained components
    pub scores: Array2<f64>,
    /// Singular values of the retained components, descending
    pub singular_values: Vec<f64>,
    /// Share of total variance per retained component
    pub explained_variance_ratio: Vec<f64>,
}

impl PcaProjection {
    pub fn n_components(&self) -> usize {
        self.scores.ncols()
    }
}

/// Project onto the leading principal components. `n_components` is capped at
/// the numerical rank; `None` keeps every non-zero component.
pub fn pca(features: &Array2<f64>, n_components: Option<usize>) -> PremiaResult<PcaProjection> {
    let (n, d) = features.dim();
    if n == 0 || d == 0 {
        return Err(PremiaError::invalid_input("PCA needs a non-empty feature matrix"));
    }

    let mean = features
        .mean_axis(Axis(0))
        .ok_or_else(|| PremiaError::numerical("column means of empty matrix"))?;
    let centred = features - &mean;

    let x = DMatrix::from_fn(n, d, |i, j| centred[[i, j]]);
    let svd = x.svd(true, false);
    let u = svd
        .u
        .ok_or_else(|| PremiaError::numerical("SVD did not return U"))?;

    let mut order: Vec<usize> = (0..svd.singular_values.len()).collect();
    order.sort_by(|&a, &b| {
        svd.singular_values[b]
            .total_cmp(&svd.singular_values[a])
            .then(a.cmp(&b))
    });

    let largest = order
        .first()
        .map(|&i| svd.singular_values[i])
        .unwrap_or(0.0);
    let tolerance = largest * RANK_TOLERANCE;
    let rank = order
        .iter()
        .filter(|&&i| svd.singular_values[i] > tolerance)
        .count();
    let keep = n_components.unwrap_or(rank).min(rank);

    let total: f64 = svd.singular_values.iter().map(|s| s * s).sum();
    let mut scores = Array2::zeros((n, keep));
    let mut singular_values = Vec::with_capacity(keep);
    let mut explained_variance_ratio = Vec::with_capacity(keep);

    for (c, &idx) in order.iter().take(keep).enumerate() {
        let s = svd.singular_values[idx];
        for r in 0..n {
            scores[[r, c]] = u[(r, idx)] * s;
        }
        singular_values.push(s);
        explained_variance_ratio.push(if total > 0.0 { s * s / total } else { 0.0 });
    }

    Ok(PcaProjection {
        scores,
        singular_values,
        explained_variance_ratio,
    })
}
