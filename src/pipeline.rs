//! Stage orchestration
//!
//! Runs the three stages in order:
//!
//! 1. `iv`: filter and bucket quotes, fit SVI per (date, bucket)
//! 2. `q_density`: interpolate each day's surface and extract densities
//! 3. `clustering`: label trading days by density shape
//!
//! Each stage returns its unit-level exclusions alongside its output. With an
//! [`OutputStore`] the stages persist their results, and a stage run on its
//! own reloads what the previous one wrote.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::core::{
    Exclusion, IvGrid, OptionQuote, PremiaError, PremiaResult, QuotePanel, RiskNeutralDensity,
    SviParameterSet,
};
use crate::data::{apply_quote_filter, OutputStore};
use crate::models::{DensityExtractor, SurfaceFitter, SurfaceInterpolator};
use crate::regimes::{RegimeClassification, RegimeClassifier};

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Iv,
    QDensity,
    Clustering,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Iv, Stage::QDensity, Stage::Clustering];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Iv => "iv",
            Stage::QDensity => "q_density",
            Stage::Clustering => "clustering",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of the surface stage
#[derive(Debug, Clone)]
pub struct IvStage {
    /// Accepted fits ordered by (date, bucket)
    pub fits: Vec<SviParameterSet>,
    /// IV matrices on the return grid, one per date with a surface
    pub grids: Vec<IvGrid>,
    /// Every trading day seen in the filtered panel
    pub dates: Vec<NaiveDate>,
    pub exclusions: Vec<Exclusion>,
}

/// Output of the density stage
#[derive(Debug, Clone)]
pub struct DensityStage {
    pub densities: Vec<RiskNeutralDensity>,
    pub exclusions: Vec<Exclusion>,
}

/// Everything a run produced
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub fits: Vec<SviParameterSet>,
    pub densities: Vec<RiskNeutralDensity>,
    pub classification: Option<RegimeClassification>,
    pub exclusions: Vec<(Stage, Exclusion)>,
}

impl PipelineOutput {
    pub fn exclusions_for(&self, stage: Stage) -> impl Iterator<Item = &Exclusion> + '_ {
        self.exclusions
            .iter()
            .filter(move |(s, _)| *s == stage)
            .map(|(_, e)| e)
    }
}

/// Configured pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    fitter: SurfaceFitter,
    extractor: DensityExtractor,
    classifier: RegimeClassifier,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> PremiaResult<Self> {
        config.validate()?;
        let fitter = SurfaceFitter::from_config(&config)?;
        let extractor = DensityExtractor::new(config.density.clone())?;
        let classifier = RegimeClassifier::new(config.clustering.clone())?;
        Ok(Self {
            config,
            fitter,
            extractor,
            classifier,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fit SVI surfaces. Fails when no bucket survives at all.
    pub fn run_iv(&self, quotes: Vec<OptionQuote>) -> PremiaResult<IvStage> {
        let quotes = apply_quote_filter(quotes, &self.config.quote_filter);
        let (panel, mut exclusions) = QuotePanel::from_quotes(
            quotes,
            &self.config.ttm_values.main_analysis,
            self.config.ttm_values.bucket_half_width,
        );
        tracing::info!(
            "Bucketed {} quotes into {} slices over {} dates",
            panel.total_quotes(),
            panel.slices.len(),
            panel.dates().len()
        );

        let (fits, fit_exclusions) = self.fitter.fit_panel(&panel)?;
        exclusions.extend(fit_exclusions);
        if fits.is_empty() {
            return Err(PremiaError::data(format!(
                "no (date, maturity) bucket survived fitting ({} excluded)",
                exclusions.len()
            )));
        }

        let surface = SurfaceInterpolator::from_fits(&fits)?;
        let moneyness = self.extractor.return_grid()?;
        let mut grids = Vec::new();
        for date in surface.dates() {
            match surface.iv_grid(date, &moneyness, &self.config.ttm_values.main_analysis) {
                Ok(grid) => grids.push(grid),
                Err(e) => exclusions.push(Exclusion::from_error(date, None, e)?),
            }
        }

        Ok(IvStage {
            fits,
            grids,
            dates: panel.dates(),
            exclusions,
        })
    }

    /// Extract densities at every configured maturity for `dates`. Dates
    /// without accepted fits come back as `NoSurface` exclusions.
    pub fn run_q_density(
        &self,
        fits: &[SviParameterSet],
        dates: &[NaiveDate],
    ) -> PremiaResult<DensityStage> {
        let surface = SurfaceInterpolator::from_fits(fits)?;
        let (densities, exclusions) =
            self.extractor
                .extract_batch(&surface, dates, &self.config.ttm_values.all())?;
        Ok(DensityStage {
            densities,
            exclusions,
        })
    }

    pub fn run_clustering(
        &self,
        densities: &[RiskNeutralDensity],
    ) -> PremiaResult<RegimeClassification> {
        self.classifier
            .classify(densities, &self.config.ttm_values.clustering)
    }

    /// All three stages in memory
    pub fn run(&self, quotes: Vec<OptionQuote>) -> PremiaResult<PipelineOutput> {
        let mut output = PipelineOutput::default();

        let iv = self.run_iv(quotes)?;
        tag(&mut output, Stage::Iv, iv.exclusions);

        let density = self.run_q_density(&iv.fits, &iv.dates)?;
        tag(&mut output, Stage::QDensity, density.exclusions);

        let classification = self.run_clustering(&density.densities)?;
        tag(&mut output, Stage::Clustering, classification.exclusions.clone());

        output.fits = iv.fits;
        output.densities = density.densities;
        output.classification = Some(classification);
        Ok(output)
    }

    /// Run the selected stages against an output store. Skipped stages'
    /// results are loaded from the store when a later stage needs them.
    pub fn run_with_store(
        &self,
        quotes: Option<Vec<OptionQuote>>,
        store: &OutputStore,
        stages: &[Stage],
    ) -> PremiaResult<PipelineOutput> {
        store.save_run_config(&self.config)?;
        let mut output = PipelineOutput::default();
        let mut dates: Option<Vec<NaiveDate>> = None;

        if stages.contains(&Stage::Iv) {
            let quotes = quotes
                .ok_or_else(|| PremiaError::config("the iv step needs a quotes file"))?;
            let iv = self.run_iv(quotes)?;
            store.save_svi_params(&iv.fits)?;
            for grid in &iv.grids {
                store.save_iv_grid(grid)?;
            }
            store.save_exclusions(Stage::Iv.name(), &iv.exclusions)?;
            tag(&mut output, Stage::Iv, iv.exclusions);
            dates = Some(iv.dates);
            output.fits = iv.fits;
        }

        if stages.contains(&Stage::QDensity) {
            if !stages.contains(&Stage::Iv) {
                output.fits = store.load_svi_params()?;
            }
            let dates = match dates {
                Some(d) => d,
                None => fit_dates(&output.fits),
            };
            let density = self.run_q_density(&output.fits, &dates)?;
            store.save_densities(&density.densities, &self.config.ttm_values.all())?;
            store.save_exclusions(Stage::QDensity.name(), &density.exclusions)?;
            tag(&mut output, Stage::QDensity, density.exclusions);
            output.densities = density.densities;
        }

        if stages.contains(&Stage::Clustering) {
            if !stages.contains(&Stage::QDensity) {
                output.densities = store.load_densities(&self.config.ttm_values.clustering)?;
            }
            let classification = self.run_clustering(&output.densities)?;
            store.save_labels(&classification.labels)?;
            store.save_exclusions(Stage::Clustering.name(), &classification.exclusions)?;
            tag(&mut output, Stage::Clustering, classification.exclusions.clone());
            output.classification = Some(classification);
        }

        Ok(output)
    }
}

fn tag(output: &mut PipelineOutput, stage: Stage, exclusions: Vec<Exclusion>) {
    output
        .exclusions
        .extend(exclusions.into_iter().map(|e| (stage, e)));
}

fn fit_dates(fits: &[SviParameterSet]) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = fits.iter().map(|f| f.date).collect();
    dates.sort();
    dates.dedup();
    dates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TtmConfig;
    use crate::core::{ExclusionReason, OptionType, SviParams};
    use crate::models::black_scholes;
    use tempfile::tempdir;

    const SPOT: f64 = 30000.0;

    fn calm() -> SviParams {
        SviParams::new(0.2, 0.3, -0.3, 0.0, 0.15)
    }

    fn stressed() -> SviParams {
        SviParams::new(0.6, 0.6, -0.5, 0.02, 0.2)
    }

    fn day(i: i64) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, 4).unwrap() + chrono::Duration::days(i)
    }

    /// OTM quotes priced off an exact SVI smile
    fn smile_quotes(date: NaiveDate, ttm: f64, params: &SviParams, n_strikes: usize) -> Vec<OptionQuote> {
        (0..n_strikes)
            .map(|j| {
                let k = -0.3 + 0.6 * j as f64 / (n_strikes - 1) as f64;
                let strike = SPOT * k.exp();
                let iv = params.variance(k).sqrt();
                let option_type = if k < 0.0 { OptionType::Put } else { OptionType::Call };
                OptionQuote {
                    date,
                    strike,
                    time_to_maturity: ttm,
                    option_type,
                    spot_price: SPOT,
                    mid_price: black_scholes::price(SPOT, strike, 0.0, iv, ttm / 365.0, option_type),
                    implied_volatility: iv,
                }
            })
            .collect()
    }

    /// Twelve days switching regime every three days, plus one thin day
    fn panel_quotes() -> Vec<OptionQuote> {
        let mut quotes = Vec::new();
        for i in 0..12 {
            let base = if (i / 3) % 2 == 0 { calm() } else { stressed() };
            let params = SviParams {
                a: base.a + 0.004 * (i % 3) as f64,
                ..base
            };
            for ttm in [14.0, 27.0] {
                quotes.extend(smile_quotes(day(i), ttm, &params, 13));
            }
        }
        quotes.extend(smile_quotes(day(12), 14.0, &calm(), 3));
        quotes
    }

    fn config() -> PipelineConfig {
        PipelineConfig {
            ttm_values: TtmConfig {
                main_analysis: vec![14.0, 27.0],
                clustering: vec![14.0, 27.0],
                bucket_half_width: 2.0,
            },
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_end_to_end() {
        let pipeline = Pipeline::new(config()).unwrap();
        let output = pipeline.run(panel_quotes()).unwrap();

        // 12 full days × 2 buckets; the thin day is excluded
        assert_eq!(output.fits.len(), 24);
        assert!(output.fits.iter().all(|f| f.r_squared >= 0.95));
        let iv_ex: Vec<_> = output.exclusions_for(Stage::Iv).collect();
        assert_eq!(iv_ex.len(), 1);
        assert_eq!(iv_ex[0].date, day(12));
        assert_eq!(iv_ex[0].reason, ExclusionReason::InsufficientQuotes);

        // The thin day has no surface at either maturity
        assert_eq!(output.densities.len(), 24);
        let no_surface: Vec<_> = output.exclusions_for(Stage::QDensity).collect();
        assert_eq!(no_surface.len(), 2);
        assert!(no_surface
            .iter()
            .all(|e| e.date == day(12) && e.reason == ExclusionReason::NoSurface));
        for d in &output.densities {
            assert!(d.density.iter().all(|&v| v >= 0.0));
            assert!((d.mass() - 1.0).abs() <= 1e-3);
        }

        let classification = output.classification.unwrap();
        assert_eq!(classification.labels.len(), 12);
        assert_eq!(classification.n_clusters, 2);
        let calm_id = classification.label_for(day(0)).unwrap();
        for i in 0..12 {
            let is_calm = (i / 3) % 2 == 0;
            assert_eq!(classification.label_for(day(i)) == Some(calm_id), is_calm);
        }
    }

    #[test]
    fn test_no_surviving_bucket() {
        let pipeline = Pipeline::new(config()).unwrap();
        let quotes = smile_quotes(day(0), 14.0, &calm(), 3);
        assert!(matches!(pipeline.run_iv(quotes), Err(PremiaError::Data(_))));
    }

    #[test]
    fn test_stages_resume_from_store() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();
        let pipeline = Pipeline::new(config()).unwrap();

        let first = pipeline
            .run_with_store(Some(panel_quotes()), &store, &[Stage::Iv])
            .unwrap();
        assert!(store.svi_params_path().exists());
        assert!(store.iv_surface_path(day(0)).exists());
        assert!(store.exclusions_path("iv").exists());
        assert!(first.classification.is_none());

        // Later stages reload from disk
        let rest = pipeline
            .run_with_store(None, &store, &[Stage::QDensity, Stage::Clustering])
            .unwrap();
        assert_eq!(rest.fits.len(), 24);
        assert!(store.density_path(14.0).exists());
        assert!(store.density_path(27.0).exists());
        // Only fitted dates are known without the quotes
        assert_eq!(rest.exclusions_for(Stage::QDensity).count(), 0);

        let labels = store.load_labels().unwrap();
        assert_eq!(labels, rest.classification.unwrap().labels);

        let clustered_only = pipeline
            .run_with_store(None, &store, &[Stage::Clustering])
            .unwrap();
        assert_eq!(clustered_only.densities.len(), 24);
        assert_eq!(clustered_only.classification.unwrap().labels, labels);
    }

    #[test]
    fn test_density_rerun_leaves_no_stale_files() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();
        let pipeline = Pipeline::new(config()).unwrap();

        pipeline
            .run_with_store(Some(panel_quotes()), &store, &Stage::ALL)
            .unwrap();
        assert_eq!(store.load_densities(&[14.0, 27.0]).unwrap().len(), 24);

        // Rerun the density step with no accepted fits left
        store.save_svi_params(&[]).unwrap();
        let rerun = pipeline
            .run_with_store(None, &store, &[Stage::QDensity])
            .unwrap();
        assert!(rerun.densities.is_empty());
        assert!(store.density_path(27.0).exists());
        assert!(store.load_densities(&[14.0, 27.0]).unwrap().is_empty());

        // Clustering sees the empty files, not the earlier densities
        let clustering = pipeline.run_with_store(None, &store, &[Stage::Clustering]);
        assert!(matches!(
            clustering,
            Err(PremiaError::ClusteringInfeasible(_))
        ));
    }

    #[test]
    fn test_iv_step_needs_quotes() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();
        let pipeline = Pipeline::new(config()).unwrap();
        assert!(matches!(
            pipeline.run_with_store(None, &store, &[Stage::Iv]),
            Err(PremiaError::Config(_))
        ));
    }
}
