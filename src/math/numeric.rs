//! Grid helpers, finite differences and quadrature

use crate::core::{PremiaError, PremiaResult};

/// `n` evenly spaced points from `start` to `end` inclusive
pub fn linspace(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n)
                .map(|i| if i == n - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

/// Return grid `min, min + step, ...` up to and including `max`.
///
/// Points are generated by index so the grid does not drift.
pub fn return_grid(min: f64, max: f64, step: f64) -> PremiaResult<Vec<f64>> {
    if !(min.is_finite() && max.is_finite() && step.is_finite()) || step <= 0.0 || max <= min {
        return Err(PremiaError::invalid_input(format!(
            "bad return grid [{}, {}] step {}",
            min, max, step
        )));
    }
    let n = ((max - min) / step + 1e-9).floor() as usize + 1;
    Ok((0..n).map(|i| min + step * i as f64).collect())
}

/// Trapezoid rule over possibly uneven nodes
pub fn trapz(x: &[f64], y: &[f64]) -> f64 {
    x.windows(2)
        .zip(y.windows(2))
        .map(|(xw, yw)| 0.5 * (xw[1] - xw[0]) * (yw[0] + yw[1]))
        .sum()
}

/// First derivative on an even grid: centred inside, one-sided at the ends
pub fn first_derivative(y: &[f64], h: f64) -> Vec<f64> {
    let n = y.len();
    if n < 2 {
        return vec![0.0; n];
    }
    let mut d = vec![0.0; n];
    d[0] = (y[1] - y[0]) / h;
    d[n - 1] = (y[n - 1] - y[n - 2]) / h;
    for i in 1..n - 1 {
        d[i] = (y[i + 1] - y[i - 1]) / (2.0 * h);
    }
    d
}

/// Second derivative on an even grid: centred inside, ends copy their neighbour
pub fn second_derivative(y: &[f64], h: f64) -> Vec<f64> {
    let n = y.len();
    if n < 3 {
        return vec![0.0; n];
    }
    let h2 = h * h;
    let mut d = vec![0.0; n];
    for i in 1..n - 1 {
        d[i] = (y[i + 1] - 2.0 * y[i] + y[i - 1]) / h2;
    }
    d[0] = d[1];
    d[n - 1] = d[n - 2];
    d
}
