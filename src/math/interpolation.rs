//! Shape-preserving interpolation
//!
//! Monotone piecewise cubic Hermite interpolation (PCHIP, Fritsch and Carlson
//! 1980). Between two nodes the interpolant never leaves the range of the node
//! values, so interpolated SVI parameters and call prices cannot overshoot.
//! Outside the node range the end values are held flat.

use crate::core::{PremiaError, PremiaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryLocation {
    Left,
    Inside(usize),
    Right,
}

fn validate_xy(x: &[f64], y: &[f64]) -> PremiaResult<()> {
    if x.len() != y.len() {
        return Err(PremiaError::invalid_input("x and y must have same length"));
    }
    if x.is_empty() {
        return Err(PremiaError::invalid_input("not enough interpolation nodes"));
    }
    if x.windows(2).any(|w| w[1] <= w[0]) {
        return Err(PremiaError::invalid_input("x must be strictly increasing"));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(PremiaError::invalid_input("x and y must be finite"));
    }
    Ok(())
}

fn query_location(x: &[f64], xq: f64) -> QueryLocation {
    if xq < x[0] {
        return QueryLocation::Left;
    }
    if xq > x[x.len() - 1] {
        return QueryLocation::Right;
    }
    let idx = x.partition_point(|v| *v <= xq);
    if idx == 0 {
        QueryLocation::Inside(0)
    } else if idx >= x.len() {
        QueryLocation::Inside(x.len() - 2)
    } else {
        QueryLocation::Inside(idx - 1)
    }
}

fn pchip_slopes(x: &[f64], y: &[f64]) -> Vec<f64> {
    let n = x.len();
    if n == 1 {
        return vec![0.0];
    }
    if n == 2 {
        let m = (y[1] - y[0]) / (x[1] - x[0]);
        return vec![m, m];
    }

    let h: Vec<f64> = x.windows(2).map(|w| w[1] - w[0]).collect();
    let delta: Vec<f64> = (0..n - 1).map(|i| (y[i + 1] - y[i]) / h[i]).collect();

    let mut d = vec![0.0; n];

    for k in 1..(n - 1) {
        if delta[k - 1] * delta[k] <= 0.0 {
            d[k] = 0.0;
        } else {
            let w1 = 2.0 * h[k] + h[k - 1];
            let w2 = h[k] + 2.0 * h[k - 1];
            d[k] = (w1 + w2) / (w1 / delta[k - 1] + w2 / delta[k]);
        }
    }

    d[0] = end_slope(h[0], h[1], delta[0], delta[1]);
    d[n - 1] = end_slope(h[n - 2], h[n - 3], delta[n - 2], delta[n - 3]);

    d
}

/// Non-centred three-point end slope, limited to keep monotonicity
fn end_slope(h0: f64, h1: f64, del0: f64, del1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * del0 - h0 * del1) / (h0 + h1);
    if d.signum() != del0.signum() || del0 == 0.0 {
        0.0
    } else if del0.signum() != del1.signum() && d.abs() > 3.0 * del0.abs() {
        3.0 * del0
    } else {
        d
    }
}

#[inline]
fn hermite_eval(x0: f64, x1: f64, y0: f64, y1: f64, m0: f64, m1: f64, xq: f64) -> f64 {
    let h = x1 - x0;
    let s = (xq - x0) / h;
    let s2 = s * s;
    let s3 = s2 * s;

    let h00 = 2.0 * s3 - 3.0 * s2 + 1.0;
    let h10 = s3 - 2.0 * s2 + s;
    let h01 = -2.0 * s3 + 3.0 * s2;
    let h11 = s3 - s2;

    h00 * y0 + h10 * h * m0 + h01 * y1 + h11 * h * m1
}

/// Monotone cubic (PCHIP) interpolator
#[derive(Debug, Clone)]
pub struct Pchip {
    x: Vec<f64>,
    y: Vec<f64>,
    slopes: Vec<f64>,
}

impl Pchip {
    /// Build from strictly increasing nodes. A single node gives a constant.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> PremiaResult<Self> {
        validate_xy(&x, &y)?;
        let slopes = pchip_slopes(&x, &y);
        Ok(Self { x, y, slopes })
    }

    pub fn value(&self, xq: f64) -> f64 {
        let n = self.x.len();
        if n == 1 {
            return self.y[0];
        }

        match query_location(&self.x, xq) {
            QueryLocation::Left => self.y[0],
            QueryLocation::Right => self.y[n - 1],
            QueryLocation::Inside(i) => hermite_eval(
                self.x[i],
                self.x[i + 1],
                self.y[i],
                self.y[i + 1],
                self.slopes[i],
                self.slopes[i + 1],
                xq,
            ),
        }
    }

    /// Evaluate at many points
    pub fn values(&self, xs: &[f64]) -> Vec<f64> {
        xs.iter().map(|&xq| self.value(xq)).collect()
    }
}
