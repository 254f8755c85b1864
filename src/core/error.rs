//! Error types for the premia pipeline
//!
//! Batch-level failures surface as [`PremiaError`]. Failures that only affect a
//! single (date, maturity) unit are recorded as an [`Exclusion`] so the batch can
//! continue without silently dropping anything.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PremiaError {
    #[error("Rejected fit ({reason}): {detail}")]
    RejectedFit {
        reason: ExclusionReason,
        detail: String,
    },

    #[error("Invalid surface query: {0}")]
    InvalidSurfaceQuery(String),

    #[error("Degenerate density: {0}")]
    DegenerateDensity(String),

    #[error("Clustering infeasible: {0}")]
    ClusteringInfeasible(String),

    #[error("Data error: {0}")]
    Data(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    IO(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type PremiaResult<T> = Result<T, PremiaError>;

impl PremiaError {
    pub fn rejected_fit(reason: ExclusionReason, detail: impl Into<String>) -> Self {
        Self::RejectedFit {
            reason,
            detail: detail.into(),
        }
    }

    pub fn invalid_surface_query(msg: impl Into<String>) -> Self {
        Self::InvalidSurfaceQuery(msg.into())
    }

    pub fn degenerate_density(msg: impl Into<String>) -> Self {
        Self::DegenerateDensity(msg.into())
    }

    pub fn clustering_infeasible(msg: impl Into<String>) -> Self {
        Self::ClusteringInfeasible(msg.into())
    }

    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn numerical(msg: impl Into<String>) -> Self {
        Self::Numerical(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Reason code when the error only invalidates a single unit of work
    pub fn exclusion_reason(&self) -> Option<ExclusionReason> {
        match self {
            Self::RejectedFit { reason, .. } => Some(*reason),
            Self::InvalidSurfaceQuery(_) => Some(ExclusionReason::NoSurface),
            Self::DegenerateDensity(_) => Some(ExclusionReason::DegenerateDensity),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for PremiaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Why a (date, maturity) unit was left out of a stage's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Fewer usable quotes than the fitter's minimum
    InsufficientQuotes,
    /// No optimization attempt converged within the iteration budget
    NoConvergence,
    /// Best fit's coefficient of determination below the threshold
    LowRSquared,
    /// Fitted parameters outside the admissible SVI domain
    ConstraintViolation,
    /// No accepted surface for the date
    NoSurface,
    /// Clipped density mass below the acceptable minimum
    DegenerateDensity,
    /// Structurally invalid input quote
    InvalidQuote,
    /// Date lacks a density for one of the clustering maturities
    MissingMaturity,
}

impl ExclusionReason {
    pub fn code(&self) -> &'static str {
        match self {
            ExclusionReason::InsufficientQuotes => "INSUFFICIENT_QUOTES",
            ExclusionReason::NoConvergence => "NO_CONVERGENCE",
            ExclusionReason::LowRSquared => "LOW_R_SQUARED",
            ExclusionReason::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ExclusionReason::NoSurface => "NO_SURFACE",
            ExclusionReason::DegenerateDensity => "DEGENERATE_DENSITY",
            ExclusionReason::InvalidQuote => "INVALID_QUOTE",
            ExclusionReason::MissingMaturity => "MISSING_MATURITY",
        }
    }
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Record of a unit of work dropped from a stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub date: NaiveDate,
    /// Maturity in days (bucket or requested), if the unit had one
    pub time_to_maturity: Option<f64>,
    pub reason: ExclusionReason,
    pub detail: String,
}

impl Exclusion {
    pub fn new(
        date: NaiveDate,
        time_to_maturity: Option<f64>,
        reason: ExclusionReason,
        detail: impl Into<String>,
    ) -> Self {
        let exclusion = Self {
            date,
            time_to_maturity,
            reason,
            detail: detail.into(),
        };
        tracing::warn!(
            date = %exclusion.date,
            ttm = ?exclusion.time_to_maturity,
            reason = %exclusion.reason,
            "excluded: {}",
            exclusion.detail
        );
        exclusion
    }

    /// Record a unit-level error. Batch-level errors are handed back.
    pub fn from_error(
        date: NaiveDate,
        time_to_maturity: Option<f64>,
        error: PremiaError,
    ) -> Result<Self, PremiaError> {
        match error.exclusion_reason() {
            Some(reason) => {
                let detail = match &error {
                    PremiaError::RejectedFit { detail, .. } => detail.clone(),
                    PremiaError::InvalidSurfaceQuery(msg) | PremiaError::DegenerateDensity(msg) => {
                        msg.clone()
                    }
                    other => other.to_string(),
                };
                Ok(Self::new(date, time_to_maturity, reason, detail))
            }
            None => Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PremiaError::rejected_fit(ExclusionReason::LowRSquared, "r2 0.41 < 0.95");
        assert_eq!(err.to_string(), "Rejected fit (LOW_R_SQUARED): r2 0.41 < 0.95");

        let err = PremiaError::clustering_infeasible("3 dates for 4 clusters");
        assert!(err.to_string().starts_with("Clustering infeasible"));
    }

    #[test]
    fn test_exclusion_from_error() {
        let date = NaiveDate::from_ymd_opt(2021, 1, 4).unwrap();

        let ex = Exclusion::from_error(
            date,
            Some(14.0),
            PremiaError::degenerate_density("mass 0.31"),
        )
        .unwrap();
        assert_eq!(ex.reason, ExclusionReason::DegenerateDensity);
        assert_eq!(ex.detail, "mass 0.31");

        let batch = Exclusion::from_error(date, None, PremiaError::config("no ttm"));
        assert!(matches!(batch, Err(PremiaError::Config(_))));
    }

    #[test]
    fn test_exclusion_reason_serde() {
        let json = serde_json::to_string(&ExclusionReason::LowRSquared).unwrap();
        assert_eq!(json, "\"low_r_squared\"");
        let back: ExclusionReason = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ExclusionReason::LowRSquared);
        assert_eq!(back.code(), "LOW_R_SQUARED");
    }
}
