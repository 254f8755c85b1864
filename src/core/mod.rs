//! Core data types for the premia pipeline
//!
//! Defines fundamental types:
//! - OptionQuote / QuotePanel: input option panel, bucketed by maturity
//! - SviParams / SviParameterSet: fitted smiles
//! - IvGrid / IvSurfacePoint: views of the interpolated surface
//! - RiskNeutralDensity: recovered density of log returns
//! - RegimeLabel: cluster id per trading day
//! - PremiaError / Exclusion: batch and per-unit failures

pub mod density;
pub mod error;
pub mod option;
pub mod quote;
pub mod regime;
pub mod surface;

pub use density::*;
pub use error::*;
pub use option::*;
pub use quote::*;
pub use regime::*;
pub use surface::*;
