//! Black-Scholes Model
//!
//! Provides:
//! - European option pricing
//! - Call prices on a log-moneyness grid with the spot normalised to one
//!
//! The density extractor maps implied volatilities to call prices here before
//! differentiating twice in strike.

use std::f64::consts::SQRT_2;

use statrs::function::erf::erfc;

use crate::core::OptionType;

/// Standard normal CDF
pub fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Black-Scholes d1 parameter
pub fn d1(spot: f64, strike: f64, rate: f64, vol: f64, time: f64) -> f64 {
    ((spot / strike).ln() + (rate + 0.5 * vol * vol) * time) / (vol * time.sqrt())
}

/// Black-Scholes d2 parameter
pub fn d2(spot: f64, strike: f64, rate: f64, vol: f64, time: f64) -> f64 {
    d1(spot, strike, rate, vol, time) - vol * time.sqrt()
}

/// Black-Scholes European option price (`time` in years)
pub fn price(
    spot: f64,
    strike: f64,
    rate: f64,
    vol: f64,
    time: f64,
    option_type: OptionType,
) -> f64 {
    if time <= 0.0 {
        return option_type.intrinsic(spot, strike);
    }

    let df = (-rate * time).exp();

    if vol <= 0.0 {
        // Zero vol = intrinsic value of the forward, discounted
        let forward = spot / df;
        return df * option_type.intrinsic(forward, strike);
    }

    let d1 = d1(spot, strike, rate, vol, time);
    let d2 = d2(spot, strike, rate, vol, time);

    match option_type {
        OptionType::Call => spot * norm_cdf(d1) - strike * df * norm_cdf(d2),
        OptionType::Put => strike * df * norm_cdf(-d2) - spot * norm_cdf(-d1),
    }
}

/// Call prices for unit spot at strikes `e^k`, one vol per grid point
pub fn normalized_call_prices(log_moneyness: &[f64], vols: &[f64], rate: f64, time: f64) -> Vec<f64> {
    log_moneyness
        .iter()
        .zip(vols.iter())
        .map(|(&k, &vol)| price(1.0, k.exp(), rate, vol, time, OptionType::Call))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_cdf() {
        assert!((norm_cdf(0.0) - 0.5).abs() < 1e-12);
        assert!((norm_cdf(1.96) - 0.975).abs() < 0.001);
        assert!((norm_cdf(-1.96) - 0.025).abs() < 0.001);
        assert!((norm_cdf(3.0) + norm_cdf(-3.0) - 1.0).abs() < 1e-14);
    }

    #[test]
    fn test_bs_price() {
        // ATM call, 20% vol, 1 year, 5% rate
        let call_price = price(100.0, 100.0, 0.05, 0.20, 1.0, OptionType::Call);
        assert!((call_price - 10.4506).abs() < 1e-3);

        // Put-call parity
        let put_price = price(100.0, 100.0, 0.05, 0.20, 1.0, OptionType::Put);
        let df = (-0.05_f64).exp();
        let parity = call_price - put_price - (100.0 - df * 100.0);
        assert!(parity.abs() < 1e-10);
    }

    #[test]
    fn test_degenerate_inputs() {
        assert_eq!(price(100.0, 90.0, 0.05, 0.2, 0.0, OptionType::Call), 10.0);
        let zero_vol = price(100.0, 90.0, 0.0, 0.0, 1.0, OptionType::Put);
        assert_eq!(zero_vol, 0.0);
    }

    #[test]
    fn test_normalized_curve_shape() {
        let ks: Vec<f64> = (0..41).map(|i| -1.0 + 0.05 * i as f64).collect();
        let vols = vec![0.7; ks.len()];
        let calls = normalized_call_prices(&ks, &vols, 0.0, 30.0 / 365.0);

        // Decreasing and convex in strike
        for w in calls.windows(2) {
            assert!(w[1] < w[0]);
        }
        for i in 1..calls.len() - 1 {
            let (k0, k1, k2) = (ks[i - 1].exp(), ks[i].exp(), ks[i + 1].exp());
            let left = (calls[i] - calls[i - 1]) / (k1 - k0);
            let right = (calls[i + 1] - calls[i]) / (k2 - k1);
            assert!(right > left);
        }
    }
}
