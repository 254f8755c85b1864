//! Ward hierarchical clustering
//!
//! Built with the nearest-neighbour chain algorithm (Murtagh 1983) and the
//! Lance-Williams update for Ward's criterion on Euclidean distances:
//!
//! d(k, i∪j) = sqrt(((n_i + n_k) d_ik² + (n_j + n_k) d_jk² - n_k d_ij²) / (n_i + n_j + n_k))
//!
//! Merge heights are on the same scale as the input distances. Ties resolve
//! to the lower index, so the dendrogram is a pure function of the input.

use ndarray::Array2;

use crate::core::{PremiaError, PremiaResult};

/// Symmetric Euclidean distance matrix between rows
pub fn pairwise_distances(rows: &Array2<f64>) -> Array2<f64> {
    let n = rows.nrows();
    let mut d = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let dist = rows
                .row(i)
                .iter()
                .zip(rows.row(j).iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f64>()
                .sqrt();
            d[[i, j]] = dist;
            d[[j, i]] = dist;
        }
    }
    d
}

/// One agglomeration step. `left` and `right` are observation indices that
/// represent the two merged clusters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub height: f64,
    /// Observations in the merged cluster
    pub size: usize,
}

/// Complete merge history, ascending in height
#[derive(Debug, Clone)]
pub struct Dendrogram {
    n_leaves: usize,
    merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    pub fn heights(&self) -> Vec<f64> {
        self.merges.iter().map(|m| m.height).collect()
    }

    /// Flat labels with exactly `k` clusters
    pub fn cut_clusters(&self, k: usize) -> PremiaResult<Vec<usize>> {
        if k == 0 || k > self.n_leaves {
            return Err(PremiaError::clustering_infeasible(format!(
                "cannot cut {} observations into {} clusters",
                self.n_leaves, k
            )));
        }
        Ok(self.apply(self.n_leaves - k))
    }

    /// Flat labels joining every merge at or below `height`
    pub fn cut_height(&self, height: f64) -> Vec<usize> {
        let n = self.merges.partition_point(|m| m.height <= height);
        self.apply(n)
    }

    /// Apply the first `n_merges` merges; labels by first appearance
    fn apply(&self, n_merges: usize) -> Vec<usize> {
        let mut uf = UnionFind::new(self.n_leaves);
        for m in self.merges.iter().take(n_merges) {
            uf.union(m.left, m.right);
        }

        let mut root_label: Vec<Option<usize>> = vec![None; self.n_leaves];
        let mut next = 0;
        (0..self.n_leaves)
            .map(|i| {
                let root = uf.find(i);
                *root_label[root].get_or_insert_with(|| {
                    next += 1;
                    next - 1
                })
            })
            .collect()
    }
}

/// Ward linkage of a Euclidean distance matrix
pub fn ward_linkage(distances: &Array2<f64>) -> PremiaResult<Dendrogram> {
    let n = distances.nrows();
    if distances.ncols() != n {
        return Err(PremiaError::invalid_input("distance matrix must be square"));
    }
    if distances.iter().any(|v| !v.is_finite()) {
        return Err(PremiaError::numerical("non-finite distance"));
    }

    let mut d = distances.clone();
    let mut size = vec![1usize; n];
    let mut active = vec![true; n];
    let mut chain: Vec<usize> = Vec::with_capacity(n);
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    while merges.len() + 1 < n {
        if chain.is_empty() {
            if let Some(first) = active.iter().position(|&a| a) {
                chain.push(first);
            }
        }

        // Grow the chain until two clusters are reciprocal nearest neighbours
        let (x, y) = loop {
            let x = chain[chain.len() - 1];
            let prev = chain.len().checked_sub(2).map(|i| chain[i]);

            let mut best = prev;
            let mut best_d = prev.map(|p| d[[x, p]]).unwrap_or(f64::INFINITY);
            for j in 0..n {
                if j == x || !active[j] || Some(j) == prev {
                    continue;
                }
                if d[[x, j]] < best_d {
                    best_d = d[[x, j]];
                    best = Some(j);
                }
            }

            let Some(y) = best else {
                return Err(PremiaError::numerical("nearest-neighbour chain stalled"));
            };
            if Some(y) == prev {
                break (x, y);
            }
            chain.push(y);
        };
        chain.truncate(chain.len() - 2);

        let (keep, drop) = (x.min(y), x.max(y));
        let height = d[[x, y]];
        let (n_x, n_y) = (size[x] as f64, size[y] as f64);

        for k in 0..n {
            if !active[k] || k == x || k == y {
                continue;
            }
            let n_k = size[k] as f64;
            let updated = (((n_x + n_k) * d[[x, k]].powi(2) + (n_y + n_k) * d[[y, k]].powi(2)
                - n_k * height * height)
                / (n_x + n_y + n_k))
                .max(0.0)
                .sqrt();
            d[[keep, k]] = updated;
            d[[k, keep]] = updated;
        }

        active[drop] = false;
        size[keep] += size[drop];
        merges.push(Merge {
            left: keep,
            right: drop,
            height,
            size: size[keep],
        });
    }

    // Chain order is not height order
    merges.sort_by(|a, b| a.height.total_cmp(&b.height));

    Ok(Dendrogram {
        n_leaves: n,
        merges,
    })
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            let (lo, hi) = (ra.min(rb), ra.max(rb));
            self.parent[hi] = lo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(coords: &[(f64, f64)]) -> Array2<f64> {
        Array2::from_shape_fn((coords.len(), 2), |(i, j)| if j == 0 { coords[i].0 } else { coords[i].1 })
    }

    #[test]
    fn test_two_groups() {
        let x = points(&[(0.0, 0.0), (10.0, 10.0), (0.1, 0.2), (10.2, 9.9), (0.2, 0.1), (9.8, 10.1)]);
        let tree = ward_linkage(&pairwise_distances(&x)).unwrap();
        assert_eq!(tree.merges().len(), 5);

        let labels = tree.cut_clusters(2).unwrap();
        assert_eq!(labels, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(tree.cut_clusters(6).unwrap(), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(tree.cut_clusters(1).unwrap(), vec![0; 6]);
    }

    #[test]
    fn test_ward_heights_match_closed_form() {
        // Three points on a line at 0, 1, 3
        let x = points(&[(0.0, 0.0), (1.0, 0.0), (3.0, 0.0)]);
        let tree = ward_linkage(&pairwise_distances(&x)).unwrap();
        let h = tree.heights();
        assert!((h[0] - 1.0).abs() < 1e-12);
        // Ward distance between {0,1} and {3}: sqrt(2·2·1/3)·|2.5 - 0.5|
        let expected = (2.0 * 2.0 * 1.0 / 3.0_f64).sqrt() * 2.5;
        assert!((h[1] - expected).abs() < 1e-12, "{} vs {}", h[1], expected);
    }

    #[test]
    fn test_every_cut_has_requested_size() {
        let coords: Vec<(f64, f64)> = (0..20)
            .map(|i| {
                let t = i as f64;
                ((t * 1.7).sin() * 5.0, (t * 0.9).cos() * 3.0 + t * 0.1)
            })
            .collect();
        let tree = ward_linkage(&pairwise_distances(&points(&coords))).unwrap();
        let h = tree.heights();
        assert!(h.windows(2).all(|w| w[0] <= w[1]));

        for k in 1..=20 {
            let labels = tree.cut_clusters(k).unwrap();
            let distinct = labels.iter().max().map(|m| m + 1).unwrap_or(0);
            assert_eq!(distinct, k);
        }
    }

    #[test]
    fn test_cut_height() {
        let x = points(&[(0.0, 0.0), (0.5, 0.0), (10.0, 0.0)]);
        let tree = ward_linkage(&pairwise_distances(&x)).unwrap();
        assert_eq!(tree.cut_height(1.0), vec![0, 0, 1]);
        assert_eq!(tree.cut_height(0.1), vec![0, 1, 2]);
        assert_eq!(tree.cut_height(100.0), vec![0, 0, 0]);
    }

    #[test]
    fn test_ties_are_deterministic() {
        // Square: all nearest distances tie
        let x = points(&[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (1.0, 1.0)]);
        let d = pairwise_distances(&x);
        let a = ward_linkage(&d).unwrap().cut_clusters(2).unwrap();
        let b = ward_linkage(&d).unwrap().cut_clusters(2).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.iter().filter(|&&l| l == 0).count(), 2);
    }

    #[test]
    fn test_too_many_clusters() {
        let x = points(&[(0.0, 0.0), (1.0, 0.0)]);
        let tree = ward_linkage(&pairwise_distances(&x)).unwrap();
        assert!(matches!(
            tree.cut_clusters(3),
            Err(PremiaError::ClusteringInfeasible(_))
        ));
    }
}
