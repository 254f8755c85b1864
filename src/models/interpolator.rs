//! Implied volatility surface across maturities
//!
//! Each trading day keeps its accepted SVI fits. Between bucket maturities the
//! five raw parameters are interpolated with PCHIP and the smile is rebuilt
//! from them; volatilities themselves are never interpolated. Outside the
//! fitted range the nearest bucket's parameters are held flat.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use ndarray::Array2;

use crate::core::{
    IvGrid, IvSurfacePoint, PremiaError, PremiaResult, SviParameterSet, SviParams,
};
use crate::math::Pchip;

/// Parameter curves of one trading day
#[derive(Debug, Clone)]
struct DaySurface {
    /// Bucket maturities in days, ascending
    maturities: Vec<f64>,
    /// Fitted parameters at each bucket
    nodes: Vec<SviParams>,
    /// One interpolator per parameter (a, b, rho, m, sigma)
    curves: Vec<Pchip>,
}

impl DaySurface {
    fn new(mut fits: Vec<&SviParameterSet>) -> PremiaResult<Self> {
        fits.sort_by(|x, y| x.time_to_maturity_bucket.total_cmp(&y.time_to_maturity_bucket));
        if let Some(w) = fits
            .windows(2)
            .find(|w| w[0].time_to_maturity_bucket == w[1].time_to_maturity_bucket)
        {
            return Err(PremiaError::data(format!(
                "two fits for {} at {} days",
                w[0].date, w[0].time_to_maturity_bucket
            )));
        }

        let maturities: Vec<f64> = fits.iter().map(|f| f.time_to_maturity_bucket).collect();
        let nodes: Vec<SviParams> = fits.iter().map(|f| f.params()).collect();

        let curves = (0..SviParams::COUNT)
            .map(|i| {
                let values = nodes.iter().map(|p| p.to_array()[i]).collect();
                Pchip::new(maturities.clone(), values)
            })
            .collect::<PremiaResult<Vec<_>>>()?;

        Ok(Self {
            maturities,
            nodes,
            curves,
        })
    }

    fn params_at(&self, ttm: f64) -> PremiaResult<SviParams> {
        if let Some(i) = self.maturities.iter().position(|&t| t == ttm) {
            return Ok(self.nodes[i]);
        }
        let values: Vec<f64> = self.curves.iter().map(|c| c.value(ttm)).collect();
        SviParams::from_slice(&values)
            .ok_or_else(|| PremiaError::numerical("parameter interpolation lost a component"))
    }
}

/// Immutable, thread-safe surface over all fitted trading days
#[derive(Debug, Clone, Default)]
pub struct SurfaceInterpolator {
    days: BTreeMap<NaiveDate, DaySurface>,
}

impl SurfaceInterpolator {
    /// Build from accepted fits. Dates without fits simply have no surface.
    pub fn from_fits(fits: &[SviParameterSet]) -> PremiaResult<Self> {
        let mut by_date: BTreeMap<NaiveDate, Vec<&SviParameterSet>> = BTreeMap::new();
        for fit in fits {
            by_date.entry(fit.date).or_default().push(fit);
        }

        let days = by_date
            .into_iter()
            .map(|(date, fits)| Ok((date, DaySurface::new(fits)?)))
            .collect::<PremiaResult<BTreeMap<_, _>>>()?;

        Ok(Self { days })
    }

    /// Dates with at least one accepted bucket, ascending
    pub fn dates(&self) -> Vec<NaiveDate> {
        self.days.keys().copied().collect()
    }

    pub fn has_date(&self, date: NaiveDate) -> bool {
        self.days.contains_key(&date)
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    /// Fitted maturity range of a date in days
    pub fn fitted_range(&self, date: NaiveDate) -> Option<(f64, f64)> {
        let day = self.days.get(&date)?;
        Some((*day.maturities.first()?, *day.maturities.last()?))
    }

    fn day(&self, date: NaiveDate) -> PremiaResult<&DaySurface> {
        self.days
            .get(&date)
            .ok_or_else(|| PremiaError::invalid_surface_query(format!("no accepted buckets on {}", date)))
    }

    /// SVI parameters at a maturity in days
    pub fn params_at(&self, date: NaiveDate, time_to_maturity: f64) -> PremiaResult<SviParams> {
        if !(time_to_maturity.is_finite() && time_to_maturity > 0.0) {
            return Err(PremiaError::invalid_surface_query(format!(
                "maturity {} must be positive",
                time_to_maturity
            )));
        }
        self.day(date)?.params_at(time_to_maturity)
    }

    /// Implied volatility at log-moneyness and maturity (days)
    pub fn surface_at(&self, date: NaiveDate, moneyness: f64, time_to_maturity: f64) -> PremiaResult<f64> {
        let params = self.params_at(date, time_to_maturity)?;
        vol_or_error(&params, date, moneyness, time_to_maturity)
    }

    /// Smile at one maturity over a moneyness grid
    pub fn smile(&self, date: NaiveDate, time_to_maturity: f64, moneyness: &[f64]) -> PremiaResult<Vec<f64>> {
        let params = self.params_at(date, time_to_maturity)?;
        moneyness
            .iter()
            .map(|&k| vol_or_error(&params, date, k, time_to_maturity))
            .collect()
    }

    /// Implied volatility matrix, moneyness × maturity
    pub fn iv_grid(&self, date: NaiveDate, moneyness: &[f64], maturities: &[f64]) -> PremiaResult<IvGrid> {
        let mut vols = Array2::zeros((moneyness.len(), maturities.len()));
        for (ti, &ttm) in maturities.iter().enumerate() {
            let smile = self.smile(date, ttm, moneyness)?;
            for (ki, v) in smile.into_iter().enumerate() {
                vols[[ki, ti]] = v;
            }
        }
        Ok(IvGrid::new(date, moneyness.to_vec(), maturities.to_vec(), vols))
    }

    /// Same values as [`Self::iv_grid`], as a flat list of points
    pub fn iv_points(&self, date: NaiveDate, moneyness: &[f64], maturities: &[f64]) -> PremiaResult<Vec<IvSurfacePoint>> {
        Ok(self.iv_grid(date, moneyness, maturities)?.points())
    }
}

fn vol_or_error(params: &SviParams, date: NaiveDate, k: f64, ttm: f64) -> PremiaResult<f64> {
    params.vol(k).ok_or_else(|| {
        PremiaError::invalid_surface_query(format!(
            "non-positive variance at k={:.4}, ttm={} on {}",
            k, ttm, date
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 5, 3).unwrap()
    }

    fn fit(ttm: f64, params: SviParams) -> SviParameterSet {
        SviParameterSet {
            date: date(),
            time_to_maturity_bucket: ttm,
            a: params.a,
            b: params.b,
            rho: params.rho,
            m: params.m,
            sigma: params.sigma,
            r_squared: 0.99,
            ttm_slope: None,
            n_quotes: 10,
            sse: 1e-6,
            converged_attempts: 10,
        }
    }

    fn surface() -> SurfaceInterpolator {
        SurfaceInterpolator::from_fits(&[
            fit(27.0, SviParams::new(0.30, 0.9, -0.1, 0.0, 0.2)),
            fit(9.0, SviParams::new(0.20, 1.5, -0.3, 0.02, 0.1)),
            fit(14.0, SviParams::new(0.25, 1.2, -0.2, 0.01, 0.15)),
        ])
        .unwrap()
    }

    #[test]
    fn test_interpolator_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SurfaceInterpolator>();
    }

    #[test]
    fn test_bucket_maturity_uses_fitted_curve() {
        let s = surface();
        let p = SviParams::new(0.25, 1.2, -0.2, 0.01, 0.15);
        for k in [-0.3, 0.0, 0.2] {
            assert_eq!(s.surface_at(date(), k, 14.0).unwrap(), p.vol(k).unwrap());
        }
    }

    #[test]
    fn test_continuous_across_buckets() {
        let s = surface();
        for bucket in [9.0, 14.0, 27.0] {
            for k in [-0.5, -0.1, 0.0, 0.1, 0.5] {
                let at = s.surface_at(date(), k, bucket).unwrap();
                let below = s.surface_at(date(), k, bucket - 1e-6).unwrap();
                let above = s.surface_at(date(), k, bucket + 1e-6).unwrap();
                assert!((at - below).abs() < 1e-5);
                assert!((at - above).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_flat_outside_fitted_range() {
        let s = surface();
        assert_eq!(
            s.params_at(date(), 3.0).unwrap(),
            s.params_at(date(), 9.0).unwrap()
        );
        assert_eq!(
            s.params_at(date(), 90.0).unwrap(),
            s.params_at(date(), 27.0).unwrap()
        );
        assert_eq!(s.fitted_range(date()), Some((9.0, 27.0)));
    }

    #[test]
    fn test_parameters_do_not_overshoot() {
        let s = surface();
        for i in 0..=180 {
            let t = 9.0 + 0.1 * i as f64;
            let p = s.params_at(date(), t).unwrap();
            assert!(p.a >= 0.20 - 1e-12 && p.a <= 0.30 + 1e-12);
            assert!(p.b >= 0.9 - 1e-12 && p.b <= 1.5 + 1e-12);
        }
    }

    #[test]
    fn test_missing_date_is_invalid_query() {
        let s = surface();
        let other = NaiveDate::from_ymd_opt(2021, 5, 4).unwrap();
        assert!(matches!(
            s.surface_at(other, 0.0, 14.0),
            Err(PremiaError::InvalidSurfaceQuery(_))
        ));
        assert!(SurfaceInterpolator::from_fits(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_bucket_rejected() {
        let p = SviParams::new(0.2, 1.0, 0.0, 0.0, 0.1);
        assert!(SurfaceInterpolator::from_fits(&[fit(14.0, p), fit(14.0, p)]).is_err());
    }

    #[test]
    fn test_iv_grid_matches_pointwise() {
        let s = surface();
        let ks = [-0.2, 0.0, 0.2];
        let ts = [9.0, 20.0, 27.0];
        let grid = s.iv_grid(date(), &ks, &ts).unwrap();
        assert_eq!(grid.vols.dim(), (3, 3));
        assert_eq!(grid.vols[[2, 1]], s.surface_at(date(), 0.2, 20.0).unwrap());
        assert_eq!(s.iv_points(date(), &ks, &ts).unwrap().len(), 9);
    }
}
