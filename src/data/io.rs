//! CSV readers and writers for pipeline inputs and outputs
//!
//! Every table is a flat header + rows file read and written through
//! `csv` + `serde`. Densities use the long format (one row per grid point).

use std::io::{Read, Write};
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::QuoteFilterConfig;
use crate::core::{
    Exclusion, IvSurfacePoint, OptionQuote, PremiaError, PremiaResult, RegimeLabel,
    RiskNeutralDensity, SviParameterSet, SviParams,
};

/// Read the option panel from any reader
pub fn read_quotes_from<R: Read>(reader: R) -> PremiaResult<Vec<OptionQuote>> {
    let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let quotes = rdr
        .deserialize()
        .collect::<Result<Vec<OptionQuote>, csv::Error>>()?;
    Ok(quotes)
}

/// Read the option panel from a CSV file
pub fn read_quotes(path: impl AsRef<Path>) -> PremiaResult<Vec<OptionQuote>> {
    let path = path.as_ref();
    let file = std::fs::File::open(path)
        .map_err(|e| PremiaError::data(format!("cannot open quotes {:?}: {}", path, e)))?;
    let quotes = read_quotes_from(file)?;
    tracing::info!("Read {} quotes from {:?}", quotes.len(), path);
    Ok(quotes)
}

/// Keep quotes priced above `min_price` on a spot of at least `min_spot`
pub fn apply_quote_filter(quotes: Vec<OptionQuote>, filter: &QuoteFilterConfig) -> Vec<OptionQuote> {
    let before = quotes.len();
    let kept: Vec<OptionQuote> = quotes
        .into_iter()
        .filter(|q| q.mid_price > filter.min_price && q.spot_price >= filter.min_spot)
        .collect();
    if kept.len() < before {
        tracing::debug!("Quote filter dropped {} of {} quotes", before - kept.len(), before);
    }
    kept
}

/// Flat CSV row of an SVI fit; slope columns are empty for five-parameter fits
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SviParamsRow {
    date: NaiveDate,
    time_to_maturity_bucket: f64,
    a: f64,
    b: f64,
    rho: f64,
    m: f64,
    sigma: f64,
    r_squared: f64,
    n_quotes: usize,
    sse: f64,
    converged_attempts: usize,
    a_ttm: Option<f64>,
    b_ttm: Option<f64>,
    rho_ttm: Option<f64>,
    m_ttm: Option<f64>,
    sigma_ttm: Option<f64>,
}

impl From<&SviParameterSet> for SviParamsRow {
    fn from(p: &SviParameterSet) -> Self {
        let slope = p.ttm_slope;
        Self {
            date: p.date,
            time_to_maturity_bucket: p.time_to_maturity_bucket,
            a: p.a,
            b: p.b,
            rho: p.rho,
            m: p.m,
            sigma: p.sigma,
            r_squared: p.r_squared,
            n_quotes: p.n_quotes,
            sse: p.sse,
            converged_attempts: p.converged_attempts,
            a_ttm: slope.map(|s| s.a),
            b_ttm: slope.map(|s| s.b),
            rho_ttm: slope.map(|s| s.rho),
            m_ttm: slope.map(|s| s.m),
            sigma_ttm: slope.map(|s| s.sigma),
        }
    }
}

impl TryFrom<SviParamsRow> for SviParameterSet {
    type Error = PremiaError;

    fn try_from(row: SviParamsRow) -> PremiaResult<Self> {
        let ttm_slope = match (row.a_ttm, row.b_ttm, row.rho_ttm, row.m_ttm, row.sigma_ttm) {
            (Some(a), Some(b), Some(rho), Some(m), Some(sigma)) => {
                Some(SviParams::new(a, b, rho, m, sigma))
            }
            (None, None, None, None, None) => None,
            _ => {
                return Err(PremiaError::data(format!(
                    "partial slope columns for {} at {} days",
                    row.date, row.time_to_maturity_bucket
                )))
            }
        };
        Ok(Self {
            date: row.date,
            time_to_maturity_bucket: row.time_to_maturity_bucket,
            a: row.a,
            b: row.b,
            rho: row.rho,
            m: row.m,
            sigma: row.sigma,
            r_squared: row.r_squared,
            ttm_slope,
            n_quotes: row.n_quotes,
            sse: row.sse,
            converged_attempts: row.converged_attempts,
        })
    }
}

pub fn write_svi_params<W: Write>(writer: W, params: &[SviParameterSet]) -> PremiaResult<()> {
    write_rows(writer, params.iter().map(SviParamsRow::from))
}

pub fn read_svi_params<R: Read>(reader: R) -> PremiaResult<Vec<SviParameterSet>> {
    read_rows::<_, SviParamsRow>(reader)?
        .into_iter()
        .map(SviParameterSet::try_from)
        .collect()
}

/// One grid point of a density
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct DensityRow {
    date: NaiveDate,
    time_to_maturity: f64,
    #[serde(rename = "return")]
    ret: f64,
    density: f64,
}

const DENSITY_HEADER: [&str; 4] = ["date", "time_to_maturity", "return", "density"];

/// Long format, one row per grid point. An empty batch still gets the header.
pub fn write_densities<W: Write>(writer: W, densities: &[RiskNeutralDensity]) -> PremiaResult<()> {
    if densities.iter().all(|d| d.returns.is_empty()) {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(DENSITY_HEADER)?;
        wtr.flush()?;
        return Ok(());
    }
    write_rows(
        writer,
        densities.iter().flat_map(|d| {
            d.points().map(move |(ret, density)| DensityRow {
                date: d.date,
                time_to_maturity: d.time_to_maturity,
                ret,
                density,
            })
        }),
    )
}

/// Rebuild densities from long-format rows. Consecutive rows with the same
/// (date, maturity) form one density.
pub fn read_densities<R: Read>(reader: R) -> PremiaResult<Vec<RiskNeutralDensity>> {
    let rows: Vec<DensityRow> = read_rows(reader)?;
    let mut out: Vec<RiskNeutralDensity> = Vec::new();
    for row in rows {
        match out.last_mut() {
            Some(d) if d.date == row.date && d.time_to_maturity == row.time_to_maturity => {
                d.returns.push(row.ret);
                d.density.push(row.density);
            }
            _ => out.push(RiskNeutralDensity::new(
                row.date,
                row.time_to_maturity,
                vec![row.ret],
                vec![row.density],
            )),
        }
    }
    Ok(out)
}

pub fn write_iv_points<W: Write>(writer: W, points: &[IvSurfacePoint]) -> PremiaResult<()> {
    write_rows(writer, points.iter())
}

pub fn write_labels<W: Write>(writer: W, labels: &[RegimeLabel]) -> PremiaResult<()> {
    write_rows(writer, labels.iter())
}

pub fn read_labels<R: Read>(reader: R) -> PremiaResult<Vec<RegimeLabel>> {
    read_rows(reader)
}

/// Exclusion row with the stable reason code
#[derive(Debug, Clone, Serialize)]
struct ExclusionRow<'a> {
    stage: &'a str,
    date: NaiveDate,
    time_to_maturity: Option<f64>,
    reason: &'static str,
    detail: &'a str,
}

pub fn write_exclusions<W: Write>(writer: W, stage: &str, exclusions: &[Exclusion]) -> PremiaResult<()> {
    write_rows(
        writer,
        exclusions.iter().map(|e| ExclusionRow {
            stage,
            date: e.date,
            time_to_maturity: e.time_to_maturity,
            reason: e.reason.code(),
            detail: &e.detail,
        }),
    )
}

fn write_rows<W: Write, T: Serialize>(writer: W, rows: impl IntoIterator<Item = T>) -> PremiaResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

fn read_rows<R: Read, T: for<'de> Deserialize<'de>>(reader: R) -> PremiaResult<Vec<T>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let rows = rdr.deserialize().collect::<Result<Vec<T>, csv::Error>>()?;
    Ok(rows)
}
