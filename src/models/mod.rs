//! Volatility Models
//!
//! Implements:
//! - Black-Scholes (normalised call prices for density extraction)
//! - SVI smile fitting per (date, maturity bucket)
//! - Surface interpolation across maturities
//! - Breeden-Litzenberger density extraction

pub mod black_scholes;
pub mod density;
pub mod interpolator;
pub mod svi;

pub use black_scholes::{norm_cdf, normalized_call_prices};
pub use density::{repair_density, DensityExtractor};
pub use interpolator::SurfaceInterpolator;
pub use svi::SurfaceFitter;
