//! # premia - Option-Implied Densities and Volatility Regimes
//!
//! A batch pipeline that turns a daily panel of option quotes into
//! risk-neutral return densities and groups trading days into volatility
//! regimes.
//!
//! ## Overview
//!
//! For every trading day:
//! - **SVI fit**: one raw-SVI smile per maturity bucket, multi-start bounded
//!   least squares
//! - **Surface**: PCHIP interpolation of the SVI parameters across maturity
//! - **Density**: Breeden-Litzenberger on the interpolated smile, repaired to
//!   a non-negative unit-mass density
//!
//! Across days:
//! - **Regimes**: CLR-transformed densities, optional PCA, Ward clustering
//!
//! ## Usage
//!
//! ```rust,no_run
//! use premia::prelude::*;
//!
//! let quotes = read_quotes("options.csv").unwrap();
//! let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
//! let output = pipeline.run(quotes).unwrap();
//!
//! if let Some(regimes) = &output.classification {
//!     for label in &regimes.labels {
//!         println!("{} -> regime {}", label.date, label.cluster_id);
//!     }
//! }
//! ```
//!
//! ## Failure model
//!
//! A bucket or density that cannot be produced is recorded as an
//! [`Exclusion`](core::Exclusion) with a reason code; the batch continues.
//! Only batch-level failures (no surviving bucket, infeasible clustering)
//! abort a stage.

pub mod config;
pub mod core;
pub mod data;
pub mod math;
pub mod models;
pub mod pipeline;
pub mod regimes;

/// Prelude with commonly used types
pub mod prelude {
    // Core types
    pub use crate::core::{
        DensityMoments, Exclusion, ExclusionReason, IvGrid, IvSurfacePoint, OptionQuote,
        OptionType, PremiaError, PremiaResult, QuotePanel, QuoteSlice, RegimeLabel,
        RiskNeutralDensity, SviParameterSet, SviParams,
    };

    // Config
    pub use crate::config::{
        DensityConfig, OptimizationConfig, PipelineConfig, QuoteFilterConfig, SviBounds,
        SviSlopeBounds, TtmConfig,
    };

    // Data
    pub use crate::data::{apply_quote_filter, read_quotes, OutputStore};

    // Models
    pub use crate::models::{DensityExtractor, SurfaceFitter, SurfaceInterpolator};

    // Regimes
    pub use crate::regimes::{ClusteringConfig, RegimeClassification, RegimeClassifier};

    // Pipeline
    pub use crate::pipeline::{Pipeline, PipelineOutput, Stage};
}

// Re-export main types at crate root
pub use crate::core::{PremiaError, PremiaResult};
pub use crate::pipeline::Pipeline;
