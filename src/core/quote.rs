//! Option quote data
//!
//! One row of the daily option panel, plus the per-(date, maturity-bucket)
//! slices the surface fitter consumes.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::{Exclusion, ExclusionReason};
use super::option::{days_to_years, log_moneyness, OptionType};

/// Option market quote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    /// Trading day of the quote
    pub date: NaiveDate,
    /// Strike price
    pub strike: f64,
    /// Time to maturity in days
    pub time_to_maturity: f64,
    /// Option type (Call/Put)
    pub option_type: OptionType,
    /// Underlying spot at quote time
    pub spot_price: f64,
    /// Mid price
    #[serde(rename = "price", alias = "mid_price")]
    pub mid_price: f64,
    /// Implied volatility (annualised)
    pub implied_volatility: f64,
}

impl OptionQuote {
    /// Structural validity only; business filters (minimum price, moneyness
    /// window) are applied upstream.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.strike.is_finite() && self.strike > 0.0) {
            return Err(format!("non-positive strike {}", self.strike));
        }
        if !(self.time_to_maturity.is_finite() && self.time_to_maturity > 0.0) {
            return Err(format!("non-positive maturity {}", self.time_to_maturity));
        }
        if !(self.spot_price.is_finite() && self.spot_price > 0.0) {
            return Err(format!("non-positive spot {}", self.spot_price));
        }
        if !(self.mid_price.is_finite() && self.mid_price >= 0.0) {
            return Err(format!("invalid price {}", self.mid_price));
        }
        if !(self.implied_volatility.is_finite() && self.implied_volatility > 0.0) {
            return Err(format!("non-positive implied vol {}", self.implied_volatility));
        }
        Ok(())
    }

    /// Log-moneyness ln(K/S) against the quote's own spot
    pub fn log_moneyness(&self) -> f64 {
        log_moneyness(self.strike, self.spot_price)
    }

    /// Implied variance σ²
    pub fn implied_variance(&self) -> f64 {
        self.implied_volatility * self.implied_volatility
    }

    /// Time to maturity in years
    pub fn tau(&self) -> f64 {
        days_to_years(self.time_to_maturity)
    }
}

/// Quotes for one trading day and one maturity bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteSlice {
    /// Trading day
    pub date: NaiveDate,
    /// Nominal bucket maturity in days
    pub bucket_ttm: f64,
    /// Quotes assigned to the bucket
    pub quotes: Vec<OptionQuote>,
}

impl QuoteSlice {
    pub fn new(date: NaiveDate, bucket_ttm: f64) -> Self {
        Self {
            date,
            bucket_ttm,
            quotes: Vec::new(),
        }
    }

    /// Add a quote
    pub fn add(&mut self, quote: OptionQuote) {
        self.quotes.push(quote);
    }

    /// Number of quotes
    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// Drop duplicate strikes, keeping the most liquid quote, i.e. the one
    /// with the highest traded price. With `per_maturity` a strike is unique
    /// per (maturity, strike) and the output is sorted by (maturity, strike);
    /// otherwise a strike counts once across the bucket and the output is
    /// sorted by strike.
    pub fn deduplicated(&self, per_maturity: bool) -> Vec<OptionQuote> {
        let mut sorted = self.quotes.clone();
        sorted.sort_by(|a, b| {
            let by_ttm = if per_maturity {
                a.time_to_maturity.total_cmp(&b.time_to_maturity)
            } else {
                std::cmp::Ordering::Equal
            };
            by_ttm
                .then(a.strike.total_cmp(&b.strike))
                .then(b.mid_price.total_cmp(&a.mid_price))
        });
        sorted.dedup_by(|later, kept| {
            later.strike == kept.strike
                && (!per_maturity || later.time_to_maturity == kept.time_to_maturity)
        });
        sorted
    }
}

/// Full option panel, bucketed by (date, maturity)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuotePanel {
    /// Bucket maturities in days, ascending
    pub buckets: Vec<f64>,
    /// Slices sorted by (date, bucket)
    pub slices: Vec<QuoteSlice>,
}

impl QuotePanel {
    /// Validate quotes and assign each to the nearest bucket within
    /// `half_width` days. Structurally invalid quotes come back as exclusions;
    /// quotes outside every bucket are ignored.
    pub fn from_quotes(
        quotes: impl IntoIterator<Item = OptionQuote>,
        buckets: &[f64],
        half_width: f64,
    ) -> (Self, Vec<Exclusion>) {
        let mut sorted_buckets = buckets.to_vec();
        sorted_buckets.sort_by(|a, b| a.total_cmp(b));
        sorted_buckets.dedup();

        let mut slices: BTreeMap<(NaiveDate, usize), QuoteSlice> = BTreeMap::new();
        let mut exclusions = Vec::new();
        let mut unbucketed = 0usize;

        for quote in quotes {
            if let Err(reason) = quote.validate() {
                exclusions.push(Exclusion::new(
                    quote.date,
                    Some(quote.time_to_maturity),
                    ExclusionReason::InvalidQuote,
                    format!("strike {}: {}", quote.strike, reason),
                ));
                continue;
            }

            let Some(idx) = nearest_bucket(&sorted_buckets, quote.time_to_maturity, half_width)
            else {
                unbucketed += 1;
                continue;
            };

            slices
                .entry((quote.date, idx))
                .or_insert_with(|| QuoteSlice::new(quote.date, sorted_buckets[idx]))
                .add(quote);
        }

        if unbucketed > 0 {
            tracing::debug!("{} quotes outside every maturity bucket", unbucketed);
        }

        let panel = Self {
            buckets: sorted_buckets,
            slices: slices.into_values().collect(),
        };
        (panel, exclusions)
    }

    /// All trading days in the panel
    pub fn dates(&self) -> Vec<NaiveDate> {
        let mut dates: Vec<NaiveDate> = self.slices.iter().map(|s| s.date).collect();
        dates.dedup();
        dates
    }

    /// Slice for a (date, bucket)
    pub fn slice(&self, date: NaiveDate, bucket_ttm: f64) -> Option<&QuoteSlice> {
        self.slices
            .iter()
            .find(|s| s.date == date && s.bucket_ttm == bucket_ttm)
    }

    /// Total number of quotes
    pub fn total_quotes(&self) -> usize {
        self.slices.iter().map(|s| s.len()).sum()
    }
}

fn nearest_bucket(buckets: &[f64], ttm: f64, half_width: f64) -> Option<usize> {
    buckets
        .iter()
        .enumerate()
        .map(|(i, b)| (i, (b - ttm).abs()))
        .filter(|(_, d)| *d <= half_width)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i)
}
