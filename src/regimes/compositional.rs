//! Compositional transforms for density shapes
//!
//! A density sampled on a grid is treated as a composition: values are
//! floored, closed to sum one and mapped with the centred log-ratio (CLR),
//! so Euclidean distance compares relative shape rather than raw levels.

/// Floor every part at `floor` and rescale to sum one
pub fn closure(values: &[f64], floor: f64) -> Vec<f64> {
    let floored: Vec<f64> = values.iter().map(|v| v.max(floor)).collect();
    let total: f64 = floored.iter().sum();
    floored.into_iter().map(|v| v / total).collect()
}

/// Centred log-ratio: ln(x_i) - mean_j ln(x_j) of the closed composition
pub fn clr(values: &[f64], floor: f64) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }
    let logs: Vec<f64> = closure(values, floor).iter().map(|v| v.ln()).collect();
    let mean = logs.iter().sum::<f64>() / logs.len() as f64;
    logs.into_iter().map(|l| l - mean).collect()
}

/// CLR of each block, concatenated in order
pub fn clr_concat<'a>(blocks: impl IntoIterator<Item = &'a [f64]>, floor: f64) -> Vec<f64> {
    blocks.into_iter().flat_map(|b| clr(b, floor)).collect()
}
