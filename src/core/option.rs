//! Option type and moneyness conventions

use serde::{Deserialize, Serialize};

/// Option type (Call or Put)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionType {
    #[serde(alias = "C", alias = "Call", alias = "CALL")]
    Call,
    #[serde(alias = "P", alias = "Put", alias = "PUT")]
    Put,
}

impl OptionType {
    /// Intrinsic value at given spot
    pub fn intrinsic(&self, spot: f64, strike: f64) -> f64 {
        match self {
            OptionType::Call => (spot - strike).max(0.0),
            OptionType::Put => (strike - spot).max(0.0),
        }
    }
}

impl std::fmt::Display for OptionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptionType::Call => write!(f, "call"),
            OptionType::Put => write!(f, "put"),
        }
    }
}

/// Log-moneyness k = ln(K/S)
pub fn log_moneyness(strike: f64, spot: f64) -> f64 {
    (strike / spot).ln()
}

/// Days to year fraction (ACT/365, as the annualisation of the density moments)
pub fn days_to_years(days: f64) -> f64 {
    days / 365.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic() {
        assert_eq!(OptionType::Call.intrinsic(105.0, 100.0), 5.0);
        assert_eq!(OptionType::Put.intrinsic(105.0, 100.0), 0.0);
    }

    #[test]
    fn test_log_moneyness() {
        assert!(log_moneyness(32000.0, 30000.0) > 0.0);
        assert_eq!(log_moneyness(30000.0, 30000.0), 0.0);
        assert!((log_moneyness(30000.0 * 0.9_f64.exp(), 30000.0) - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_option_type_aliases() {
        let c: OptionType = serde_json::from_str("\"C\"").unwrap();
        let p: OptionType = serde_json::from_str("\"put\"").unwrap();
        assert_eq!(c, OptionType::Call);
        assert_eq!(p, OptionType::Put);
    }
}
