//! Output directory layout
//!
//! Every stage writes into a fixed tree under a base directory:
//!
//! ```text
//! <base>/data/iv_surfaces/svi_params.csv
//! <base>/data/iv_surfaces/iv_surface_<date>.csv
//! <base>/data/q_densities/q_density_<ttm>day.csv
//! <base>/data/clusters/cluster_results.csv
//! <base>/data/<stage>_exclusions.csv
//! <base>/data/run_config.json
//! ```
//!
//! Later stages reload earlier outputs from here when run on their own.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use super::io;
use crate::config::PipelineConfig;
use crate::core::{
    Exclusion, IvGrid, PremiaError, PremiaResult, RegimeLabel, RiskNeutralDensity,
    SviParameterSet,
};

const SVI_PARAMS_FILE: &str = "svi_params.csv";
const CLUSTER_FILE: &str = "cluster_results.csv";
const RUN_CONFIG_FILE: &str = "run_config.json";

/// Output store manager
#[derive(Debug, Clone)]
pub struct OutputStore {
    data_dir: PathBuf,
}

impl OutputStore {
    /// Open (and create if needed) the tree under `base_dir`
    pub fn new(base_dir: impl AsRef<Path>) -> PremiaResult<Self> {
        let store = Self {
            data_dir: base_dir.as_ref().join("data"),
        };
        for dir in [store.iv_dir(), store.density_dir(), store.cluster_dir()] {
            fs::create_dir_all(&dir)?;
        }
        Ok(store)
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn iv_dir(&self) -> PathBuf {
        self.data_dir.join("iv_surfaces")
    }

    pub fn density_dir(&self) -> PathBuf {
        self.data_dir.join("q_densities")
    }

    pub fn cluster_dir(&self) -> PathBuf {
        self.data_dir.join("clusters")
    }

    pub fn svi_params_path(&self) -> PathBuf {
        self.iv_dir().join(SVI_PARAMS_FILE)
    }

    pub fn iv_surface_path(&self, date: NaiveDate) -> PathBuf {
        self.iv_dir().join(format!("iv_surface_{}.csv", date.format("%Y-%m-%d")))
    }

    pub fn density_path(&self, ttm: f64) -> PathBuf {
        self.density_dir().join(format!("q_density_{}day.csv", ttm_label(ttm)))
    }

    pub fn cluster_path(&self) -> PathBuf {
        self.cluster_dir().join(CLUSTER_FILE)
    }

    pub fn exclusions_path(&self, stage: &str) -> PathBuf {
        self.data_dir.join(format!("{}_exclusions.csv", stage))
    }

    pub fn save_svi_params(&self, params: &[SviParameterSet]) -> PremiaResult<PathBuf> {
        let path = self.svi_params_path();
        io::write_svi_params(create(&path)?, params)?;
        tracing::info!("Saved {} SVI fits to {:?}", params.len(), path);
        Ok(path)
    }

    pub fn load_svi_params(&self) -> PremiaResult<Vec<SviParameterSet>> {
        let path = self.svi_params_path();
        let params = io::read_svi_params(open(&path)?)?;
        tracing::info!("Loaded {} SVI fits from {:?}", params.len(), path);
        Ok(params)
    }

    pub fn save_iv_grid(&self, grid: &IvGrid) -> PremiaResult<PathBuf> {
        let path = self.iv_surface_path(grid.date);
        io::write_iv_points(create(&path)?, &grid.points())?;
        tracing::debug!("Saved IV surface for {} to {:?}", grid.date, path);
        Ok(path)
    }

    /// Write one file per maturity. Densities are grouped by their
    /// `time_to_maturity`; every maturity in `maturities` gets a file even
    /// when nothing survived there, so a rerun never leaves an older file
    /// behind for the clustering step to pick up.
    pub fn save_densities(
        &self,
        densities: &[RiskNeutralDensity],
        maturities: &[f64],
    ) -> PremiaResult<Vec<PathBuf>> {
        let mut all: Vec<f64> = densities
            .iter()
            .map(|d| d.time_to_maturity)
            .chain(maturities.iter().copied())
            .collect();
        all.sort_by(|a, b| a.total_cmp(b));
        all.dedup();

        let mut paths = Vec::with_capacity(all.len());
        for ttm in all {
            let mut batch: Vec<RiskNeutralDensity> = densities
                .iter()
                .filter(|d| d.time_to_maturity == ttm)
                .cloned()
                .collect();
            batch.sort_by_key(|d| d.date);

            let path = self.density_path(ttm);
            io::write_densities(create(&path)?, &batch)?;
            if batch.is_empty() {
                tracing::warn!("No densities at {} days; wrote empty {:?}", ttm, path);
            } else {
                tracing::info!("Saved {} densities at {} days to {:?}", batch.len(), ttm, path);
            }
            paths.push(path);
        }
        Ok(paths)
    }

    /// Reload densities for the given maturities; a missing file is an error
    pub fn load_densities(&self, maturities: &[f64]) -> PremiaResult<Vec<RiskNeutralDensity>> {
        let mut out = Vec::new();
        for &ttm in maturities {
            let path = self.density_path(ttm);
            let batch = io::read_densities(open(&path)?)?;
            tracing::info!("Loaded {} densities at {} days from {:?}", batch.len(), ttm, path);
            out.extend(batch);
        }
        Ok(out)
    }

    pub fn save_labels(&self, labels: &[RegimeLabel]) -> PremiaResult<PathBuf> {
        let path = self.cluster_path();
        io::write_labels(create(&path)?, labels)?;
        tracing::info!("Saved {} regime labels to {:?}", labels.len(), path);
        Ok(path)
    }

    pub fn load_labels(&self) -> PremiaResult<Vec<RegimeLabel>> {
        io::read_labels(open(&self.cluster_path())?)
    }

    pub fn save_exclusions(&self, stage: &str, exclusions: &[Exclusion]) -> PremiaResult<PathBuf> {
        let path = self.exclusions_path(stage);
        io::write_exclusions(create(&path)?, stage, exclusions)?;
        if !exclusions.is_empty() {
            tracing::info!("Saved {} {} exclusions to {:?}", exclusions.len(), stage, path);
        }
        Ok(path)
    }

    /// Snapshot of the configuration a run used
    pub fn save_run_config(&self, config: &PipelineConfig) -> PremiaResult<PathBuf> {
        let path = self.data_dir.join(RUN_CONFIG_FILE);
        let json = serde_json::to_string_pretty(config)?;
        fs::write(&path, json)?;
        Ok(path)
    }

    /// Dates with a saved IV surface file
    pub fn list_iv_surfaces(&self) -> PremiaResult<Vec<NaiveDate>> {
        let mut dates = Vec::new();
        for entry in fs::read_dir(self.iv_dir())? {
            let file_name = entry?.file_name().to_string_lossy().to_string();
            let Some(stem) = file_name
                .strip_prefix("iv_surface_")
                .and_then(|s| s.strip_suffix(".csv"))
            else {
                continue;
            };
            if let Ok(date) = NaiveDate::parse_from_str(stem, "%Y-%m-%d") {
                dates.push(date);
            }
        }
        dates.sort();
        Ok(dates)
    }
}

/// "14" for whole days, "7.5" otherwise
fn ttm_label(ttm: f64) -> String {
    if ttm.fract() == 0.0 {
        format!("{}", ttm as i64)
    } else {
        format!("{}", ttm)
    }
}

fn create(path: &Path) -> PremiaResult<BufWriter<File>> {
    Ok(BufWriter::new(File::create(path)?))
}

fn open(path: &Path) -> PremiaResult<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| PremiaError::data(format!("cannot open {:?}: {}", path, e)))?;
    Ok(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;
    use tempfile::tempdir;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 3, d).unwrap()
    }

    #[test]
    fn test_layout_created() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();
        assert!(dir.path().join("data/iv_surfaces").is_dir());
        assert!(dir.path().join("data/q_densities").is_dir());
        assert!(dir.path().join("data/clusters").is_dir());
        assert!(store
            .density_path(14.0)
            .ends_with("data/q_densities/q_density_14day.csv"));
        assert!(store
            .iv_surface_path(date(5))
            .ends_with("data/iv_surfaces/iv_surface_2021-03-05.csv"));
    }

    #[test]
    fn test_densities_split_by_maturity() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();

        let grid = vec![-0.1, 0.0, 0.1];
        let densities = vec![
            RiskNeutralDensity::new(date(2), 27.0, grid.clone(), vec![2.0, 6.0, 2.0]),
            RiskNeutralDensity::new(date(1), 14.0, grid.clone(), vec![1.0, 8.0, 1.0]),
            RiskNeutralDensity::new(date(2), 14.0, grid.clone(), vec![1.5, 7.0, 1.5]),
        ];
        let paths = store.save_densities(&densities, &[14.0]).unwrap();
        assert_eq!(paths.len(), 2);

        let loaded = store.load_densities(&[14.0]).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].date, date(1));
        assert_eq!(loaded[1].density, vec![1.5, 7.0, 1.5]);

        assert!(matches!(store.load_densities(&[45.0]), Err(PremiaError::Data(_))));
    }

    #[test]
    fn test_rewrite_clears_empty_maturity() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();

        let grid = vec![-0.1, 0.0, 0.1];
        let first = vec![
            RiskNeutralDensity::new(date(1), 14.0, grid.clone(), vec![1.0, 8.0, 1.0]),
            RiskNeutralDensity::new(date(1), 27.0, grid.clone(), vec![2.0, 6.0, 2.0]),
        ];
        store.save_densities(&first, &[14.0, 27.0]).unwrap();
        assert_eq!(store.load_densities(&[27.0]).unwrap().len(), 1);

        // Nothing survives at 27 days on the rerun
        let second = vec![RiskNeutralDensity::new(
            date(2),
            14.0,
            grid.clone(),
            vec![1.5, 7.0, 1.5],
        )];
        let paths = store.save_densities(&second, &[14.0, 27.0]).unwrap();
        assert_eq!(paths.len(), 2);

        assert!(store.load_densities(&[27.0]).unwrap().is_empty());
        let text = fs::read_to_string(store.density_path(27.0)).unwrap();
        assert_eq!(text.trim(), "date,time_to_maturity,return,density");

        let loaded = store.load_densities(&[14.0, 27.0]).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].date, date(2));
    }

    #[test]
    fn test_labels_and_iv_surfaces() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();

        let labels = vec![RegimeLabel::new(date(1), 0), RegimeLabel::new(date(2), 1)];
        store.save_labels(&labels).unwrap();
        assert_eq!(store.load_labels().unwrap(), labels);

        let grid = IvGrid::new(
            date(4),
            vec![-0.1, 0.0, 0.1],
            vec![14.0, 27.0],
            Array2::from_elem((3, 2), 0.6),
        );
        store.save_iv_grid(&grid).unwrap();
        assert_eq!(store.list_iv_surfaces().unwrap(), vec![date(4)]);

        let text = fs::read_to_string(store.iv_surface_path(date(4))).unwrap();
        assert_eq!(text.lines().count(), 7);
        assert!(text.starts_with("date,moneyness,time_to_maturity,implied_volatility"));
    }

    #[test]
    fn test_run_config_snapshot() {
        let dir = tempdir().unwrap();
        let store = OutputStore::new(dir.path()).unwrap();
        let path = store.save_run_config(&PipelineConfig::default()).unwrap();
        let json = fs::read_to_string(path).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ttm_values.main_analysis, vec![9.0, 14.0, 27.0, 45.0]);
    }

    #[test]
    fn test_ttm_label() {
        assert_eq!(ttm_label(14.0), "14");
        assert_eq!(ttm_label(7.5), "7.5");
    }
}
