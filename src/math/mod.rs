//! Numerical building blocks
//!
//! - PCHIP interpolation
//! - Box-constrained Levenberg-Marquardt
//! - Grids, finite differences and trapezoid quadrature

pub mod interpolation;
pub mod numeric;
pub mod optimize;

pub use interpolation::*;
pub use numeric::*;
pub use optimize::*;
