//! premia CLI
//!
//! Runs the surface, density and regime stages over an option panel and
//! writes the results under `<base-dir>/data`.
//!
//! ```text
//! premia --quotes options.csv --config premia.json --steps all
//! premia --base-dir out --steps clustering
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use premia::config::PipelineConfig;
use premia::data::{read_quotes, OutputStore};
use premia::pipeline::{Pipeline, Stage};
use premia::PremiaResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Step {
    Iv,
    #[value(name = "q_density")]
    QDensity,
    Clustering,
    All,
}

#[derive(Parser)]
#[command(name = "premia")]
#[command(version, about = "Option-implied densities and volatility regimes", long_about = None)]
struct Cli {
    /// JSON pipeline configuration (defaults when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Option quote panel (CSV); needed by the iv step
    #[arg(short, long)]
    quotes: Option<PathBuf>,

    /// Directory holding the data/ output tree
    #[arg(long, default_value = ".")]
    base_dir: PathBuf,

    /// Steps to run, in pipeline order
    #[arg(long, value_enum, num_args = 1.., default_values_t = [Step::All])]
    steps: Vec<Step>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn selected_stages(steps: &[Step]) -> Vec<Stage> {
    if steps.contains(&Step::All) {
        return Stage::ALL.to_vec();
    }
    let mut stages: Vec<Stage> = steps
        .iter()
        .filter_map(|s| match s {
            Step::Iv => Some(Stage::Iv),
            Step::QDensity => Some(Stage::QDensity),
            Step::Clustering => Some(Stage::Clustering),
            Step::All => None,
        })
        .collect();
    stages.sort();
    stages.dedup();
    stages
}

fn run(cli: &Cli) -> PremiaResult<()> {
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::default(),
    };
    let stages = selected_stages(&cli.steps);

    let quotes = match &cli.quotes {
        Some(path) if stages.contains(&Stage::Iv) => Some(read_quotes(path)?),
        _ => None,
    };

    let store = OutputStore::new(&cli.base_dir)?;
    let pipeline = Pipeline::new(config)?;
    let output = pipeline.run_with_store(quotes, &store, &stages)?;

    for stage in &stages {
        tracing::info!(
            "{}: {} exclusions",
            stage,
            output.exclusions_for(*stage).count()
        );
    }
    if let Some(classification) = &output.classification {
        tracing::info!(
            "Regime sizes: {:?} over {} dates",
            classification.cluster_sizes(),
            classification.labels.len()
        );
    }
    tracing::info!("Outputs written under {:?}", store.data_dir());
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("premia failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
