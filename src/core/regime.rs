//! Volatility regime labels

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Cluster assignment of one trading day. Ids run 0..k-1 and are only
/// meaningful within the batch that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegimeLabel {
    pub date: NaiveDate,
    pub cluster_id: usize,
}

impl RegimeLabel {
    pub fn new(date: NaiveDate, cluster_id: usize) -> Self {
        Self { date, cluster_id }
    }
}
