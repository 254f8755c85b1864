//! Volatility Regime Classification
//!
//! Groups trading days by the shape of their risk-neutral densities.
//!
//! ## Pipeline
//!
//! 1. **Compositional transform**: floor, close and CLR each maturity block
//! 2. **Reduction** (optional): PCA via thin SVD
//! 3. **Linkage**: Ward agglomeration on Euclidean distances
//! 4. **Cut**: `n_clusters`, else `height_threshold`
//!
//! ## Usage
//!
//! ```rust,ignore
//! use premia::regimes::{ClusteringConfig, RegimeClassifier};
//!
//! let classifier = RegimeClassifier::new(ClusteringConfig::with_clusters(3))?;
//! let result = classifier.classify(&densities, &[9.0, 14.0, 27.0])?;
//! for label in &result.labels {
//!     println!("{} -> regime {}", label.date, label.cluster_id);
//! }
//! ```

pub mod classifier;
pub mod compositional;
pub mod config;
pub mod linkage;
pub mod reduction;

pub use classifier::{RegimeClassification, RegimeClassifier};
pub use compositional::{closure, clr, clr_concat};
pub use config::{ClusteringConfig, DistanceMetric, LinkageMethod};
pub use linkage::{pairwise_distances, ward_linkage, Dendrogram, Merge};
pub use reduction::{pca, PcaProjection};
