//! Profile cleaning, quality control and pressure binning.
//!
//! [`clean_and_bin`] turns one raw Argo profile table into the lean table
//! that gets imported into the store:
//!
//! 1. calibration filter on `scientific_calib_*` columns,
//! 2. junk column removal and duplicate removal,
//! 3. adjusted/raw reconciliation using QC flags,
//! 4. profile-wide QC on the effective flags,
//! 5. fixed-width pressure binning plus one whole-profile `Mean` row.
//!
//! Filters that would discard most of a profile (at least `bad_fraction`
//! of the judged rows flagged `3`) are skipped rather than applied.
//!
//! QC flags follow the Argo convention: `1` good … `4` bad, `9` missing.

use anyhow::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::config::CleaningConfig;
use crate::table::{strip_byte_literal, Cell, Frame};

/// The measured variables every profile is cleaned and binned on.
pub const ESSENTIAL_COLUMNS: [&str; 3] = ["pres", "temp", "psal"];

/// Profile-level columns carried onto every output row.
pub const META_COLUMNS: [&str; 9] = [
    "platform_number",
    "cycle_number",
    "direction",
    "date_creation",
    "platform_type",
    "juld",
    "latitude",
    "longitude",
    "data_mode",
];

/// Row-type tag column.
pub const PROFILE_ID: &str = "profile_id";

pub const TAG_BINNED: &str = "Binned";
pub const TAG_MEAN: &str = "Mean";
pub const TAG_ORIGINAL: &str = "Original";

const JUNK_PREFIXES: [&str; 5] = ["history", "n_", "data_type", "format_version", "crs"];
const CALIB_PREFIX: &str = "scientific_calib";
const MISSING_FLAG: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CleanOptions {
    /// Width of a pressure bin in decibar.
    pub bin_size: f64,
    /// A filter is skipped when at least this share of judged rows is flagged `3`.
    pub bad_fraction: f64,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            bin_size: 10.0,
            bad_fraction: 0.8,
        }
    }
}

impl From<&CleaningConfig> for CleanOptions {
    fn from(c: &CleaningConfig) -> Self {
        Self {
            bin_size: c.bin_size,
            bad_fraction: c.bad_fraction,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CleanError {
    #[error("No data remaining after cleaning")]
    NoDataAfterCleaning,
    #[error("No data remaining after QC")]
    NoDataAfterQc,
    #[error("bin size must be a positive number, got {0}")]
    InvalidBinSize(f64),
    /// The file type cannot be read by this build.
    #[error("{0}")]
    UnsupportedInput(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableStats {
    pub mean: Option<f64>,
    /// Sample standard deviation; absent with fewer than two values.
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessingInfo {
    pub bin_size: f64,
    pub available_essential: Vec<String>,
    pub has_pressure_data: bool,
    pub unique_pressure_bins: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CleanMetadata {
    pub rows_loaded: usize,
    pub columns_loaded: Vec<String>,
    pub rows_before_binning: usize,
    pub rows_after_binning: usize,
    pub final_columns: Vec<String>,
    pub statistics: BTreeMap<String, VariableStats>,
    pub processing: ProcessingInfo,
}

#[derive(Debug, Clone)]
pub struct CleanOutcome {
    pub table: Frame,
    pub metadata: CleanMetadata,
}

/// Load a `.nc` or `.csv` profile file, clean it, and optionally write the
/// lean CSV to `save_path`.
pub fn clean_and_bin_file(
    input: &Path,
    save_path: Option<&Path>,
    options: &CleanOptions,
) -> anyhow::Result<CleanOutcome> {
    let frame = load_frame(input)?;
    let outcome = clean_and_bin(frame, options)?;

    if let Some(out) = save_path {
        outcome
            .table
            .write_csv(out)
            .with_context(|| format!("Failed to write {}", out.display()))?;
        debug!(path = %out.display(), rows = outcome.table.len(), "lean CSV written");
    }
    Ok(outcome)
}

/// CLI entry point: clean one file and print the metadata summary.
///
/// Without `--output`, the lean CSV lands next to the input as
/// `<stem>_clean.csv`.
pub fn run_clean(
    config: &crate::config::Config,
    input: &Path,
    output: Option<&Path>,
    bin_size: Option<f64>,
) -> anyhow::Result<()> {
    let mut options = CleanOptions::from(&config.cleaning);
    if let Some(b) = bin_size {
        options.bin_size = b;
    }

    let default_output = input.with_file_name(format!(
        "{}_clean.csv",
        input.file_stem().and_then(|s| s.to_str()).unwrap_or("profile")
    ));
    let output = output.unwrap_or(&default_output);

    let outcome = clean_and_bin_file(input, Some(output), &options)?;
    let meta = &outcome.metadata;

    println!("clean {}", input.display());
    println!("  rows loaded: {}", meta.rows_loaded);
    println!("  rows before binning: {}", meta.rows_before_binning);
    println!("  rows after binning: {}", meta.rows_after_binning);
    println!("  bin size: {}", meta.processing.bin_size);
    println!("  pressure bins: {}", meta.processing.unique_pressure_bins);
    for (var, s) in &meta.statistics {
        println!(
            "  {}: mean {} min {} max {} (n={})",
            var,
            fmt_stat(s.mean),
            fmt_stat(s.min),
            fmt_stat(s.max),
            s.count
        );
    }
    println!("  written: {}", output.display());
    Ok(())
}

fn fmt_stat(v: Option<f64>) -> String {
    v.map(|v| format!("{:.3}", v)).unwrap_or_else(|| "-".to_string())
}

/// Read a profile file into a frame, dispatching on the file extension.
pub fn load_frame(input: &Path) -> anyhow::Result<Frame> {
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "nc" => crate::netcdf_source::load(input),
        "csv" => Frame::read_csv(input),
        _ => Err(CleanError::UnsupportedInput(format!(
            "Unsupported input '{}': expected a .nc or .csv file",
            input.display()
        ))
        .into()),
    }
}

/// Run the full cleaning pipeline over one profile table.
pub fn clean_and_bin(mut frame: Frame, options: &CleanOptions) -> Result<CleanOutcome, CleanError> {
    if !options.bin_size.is_finite() || options.bin_size <= 0.0 {
        return Err(CleanError::InvalidBinSize(options.bin_size));
    }

    frame.lowercase_columns();
    let rows_loaded = frame.len();
    let columns_loaded = frame.columns().to_vec();
    log_shape("loaded", &frame);

    calibration_filter(&mut frame, options.bad_fraction);
    log_shape("after calibration filter", &frame);

    frame.drop_columns(|c| JUNK_PREFIXES.iter().any(|p| c.starts_with(p)));
    frame.dedup_rows();
    log_shape("after junk columns and duplicates", &frame);

    let available: Vec<&'static str> = ESSENTIAL_COLUMNS
        .iter()
        .copied()
        .filter(|c| frame.has_column(c))
        .collect();

    drop_empty_rows(&mut frame, &available);
    if frame.is_empty() {
        return Err(CleanError::NoDataAfterCleaning);
    }

    for var in &available {
        reconcile_adjusted(&mut frame, var);
    }
    log_shape("after adjusted/raw reconciliation", &frame);

    for var in &available {
        profile_qc(&mut frame, var, options.bad_fraction);
    }

    drop_empty_rows(&mut frame, &available);
    log_shape("before binning", &frame);
    if frame.is_empty() {
        return Err(CleanError::NoDataAfterQc);
    }

    let statistics: BTreeMap<String, VariableStats> = available
        .iter()
        .filter_map(|var| column_stats(&frame, var).map(|s| (var.to_string(), s)))
        .collect();

    let meta: Vec<(&str, Cell)> = META_COLUMNS
        .iter()
        .filter_map(|c| frame.cell(0, c).map(|cell| (*c, cell.clone())))
        .collect();

    let mut columns: Vec<String> = meta.iter().map(|(c, _)| c.to_string()).collect();
    columns.extend(available.iter().map(|c| c.to_string()));
    columns.push(PROFILE_ID.to_string());

    let has_pressure_data = frame
        .column("pres")
        .map(|mut cells| cells.any(|c| !c.is_missing()))
        .unwrap_or(false);

    let mut rows: Vec<Vec<Cell>> = Vec::new();
    let mut unique_pressure_bins = 0;

    if has_pressure_data {
        let bins = bin_by_pressure(&frame, &available, options.bin_size);
        unique_pressure_bins = bins.len();
        for means in bins {
            let mut row: Vec<Cell> = meta.iter().map(|(_, v)| v.clone()).collect();
            row.extend(means.into_iter().map(Cell::number));
            row.push(Cell::text(TAG_BINNED));
            rows.push(row);
        }
    } else {
        let names: Vec<&str> = columns[..columns.len() - 1].iter().map(String::as_str).collect();
        for row in frame.select(&names).rows() {
            let mut row = row.clone();
            row.push(Cell::text(TAG_ORIGINAL));
            rows.push(row);
        }
    }

    // Whole-profile mean over the unbinned rows, always last
    let mut mean_row: Vec<Cell> = meta.iter().map(|(_, v)| v.clone()).collect();
    for var in &available {
        let mean = statistics.get(*var).and_then(|s| s.mean);
        mean_row.push(mean.map(Cell::number).unwrap_or(Cell::Missing));
    }
    mean_row.push(Cell::text(TAG_MEAN));
    rows.push(mean_row);

    let table = Frame::from_rows(columns, rows);
    debug!(
        bins = unique_pressure_bins,
        rows = table.len(),
        "binning complete"
    );

    let metadata = CleanMetadata {
        rows_loaded,
        columns_loaded,
        rows_before_binning: frame.len(),
        rows_after_binning: table.len(),
        final_columns: table.columns().to_vec(),
        statistics,
        processing: ProcessingInfo {
            bin_size: options.bin_size,
            available_essential: available.iter().map(|c| c.to_string()).collect(),
            has_pressure_data,
            unique_pressure_bins,
        },
    };

    Ok(CleanOutcome { table, metadata })
}

/// Parse a QC flag from its first digit. Missing or unparsable flags are `9`.
pub fn parse_qc_flag(cell: &Cell) -> u8 {
    let Some(text) = cell.as_text() else {
        return MISSING_FLAG;
    };
    strip_byte_literal(text.trim())
        .trim()
        .chars()
        .next()
        .and_then(|c| c.to_digit(10))
        .map(|d| d as u8)
        .unwrap_or(MISSING_FLAG)
}

fn log_shape(stage: &str, frame: &Frame) {
    debug!(rows = frame.len(), columns = frame.width(), "{}", stage);
}

fn calibration_filter(frame: &mut Frame, bad_fraction: f64) {
    if !frame.columns().iter().any(|c| c.starts_with(CALIB_PREFIX)) {
        return;
    }

    if let Some(idx) = frame.column_index("scientific_calib_comment") {
        let bad: Vec<bool> = frame
            .rows()
            .iter()
            .map(|row| {
                row[idx]
                    .as_text()
                    .map(|t| t.to_lowercase().contains("bad"))
                    .unwrap_or(false)
            })
            .collect();
        if share(&bad) < bad_fraction {
            let keep: Vec<bool> = bad.iter().map(|b| !b).collect();
            frame.retain_rows(&keep);
        }
    }

    if let Some(idx) = frame.column_index("scientific_calib_qc") {
        let flags: Vec<u8> = frame.rows().iter().map(|row| parse_qc_flag(&row[idx])).collect();
        let flagged_three: Vec<bool> = flags.iter().map(|f| *f == 3).collect();
        if share(&flagged_three) < bad_fraction {
            let keep: Vec<bool> = flags.iter().map(|f| *f < 3).collect();
            frame.retain_rows(&keep);
        }
    }

    frame.drop_columns(|c| c.starts_with(CALIB_PREFIX));
}

/// Replace raw values with adjusted ones where the adjusted flag is better.
/// Leaves the effective flag in `{var}_qc` and drops the adjusted columns.
fn reconcile_adjusted(frame: &mut Frame, var: &str) {
    let qc_col = format!("{var}_qc");
    let adj_col = format!("{var}_adjusted");
    let adj_qc_col = format!("{var}_adjusted_qc");

    if let (Some(v), Some(qc), Some(adj), Some(adj_qc)) = (
        frame.column_index(var),
        frame.column_index(&qc_col),
        frame.column_index(&adj_col),
        frame.column_index(&adj_qc_col),
    ) {
        for i in 0..frame.len() {
            let row = &frame.rows()[i];
            let raw_flag = parse_qc_flag(&row[qc]);
            let adj_flag = parse_qc_flag(&row[adj_qc]);
            let adjusted = row[adj].clone();

            if !adjusted.is_missing() && adj_flag < raw_flag {
                frame.set_cell(i, v, adjusted);
                frame.set_cell(i, qc, Cell::Number(adj_flag as f64));
            } else {
                frame.set_cell(i, qc, Cell::Number(raw_flag as f64));
            }
        }
    }

    frame.drop_columns(|c| c == adj_col || c == adj_qc_col);
}

fn profile_qc(frame: &mut Frame, var: &str, bad_fraction: f64) {
    let qc_col = format!("{var}_qc");
    let (Some(v), Some(qc)) = (frame.column_index(var), frame.column_index(&qc_col)) else {
        return;
    };

    // None for rows that have no value to judge
    let flags: Vec<Option<u8>> = frame
        .rows()
        .iter()
        .map(|row| (!row[v].is_missing()).then(|| parse_qc_flag(&row[qc])))
        .collect();

    let judged: Vec<bool> = flags.iter().flatten().map(|f| *f == 3).collect();
    if !judged.is_empty() && share(&judged) < bad_fraction {
        let keep: Vec<bool> = flags.iter().map(|f| f.map_or(true, |f| f < 3)).collect();
        frame.retain_rows(&keep);
    }

    frame.drop_columns(|c| c == qc_col);
}

fn drop_empty_rows(frame: &mut Frame, essential: &[&str]) {
    let idx: Vec<usize> = essential
        .iter()
        .filter_map(|c| frame.column_index(c))
        .collect();
    if idx.is_empty() {
        return;
    }
    let keep: Vec<bool> = frame
        .rows()
        .iter()
        .map(|row| idx.iter().any(|i| !row[*i].is_missing()))
        .collect();
    frame.retain_rows(&keep);
}

fn share(mask: &[bool]) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|b| **b).count() as f64 / mask.len() as f64
}

fn column_stats(frame: &Frame, var: &str) -> Option<VariableStats> {
    let values: Vec<f64> = frame.column(var)?.filter_map(Cell::as_f64).collect();
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let std = (values.len() > 1).then(|| {
        let ss: f64 = values.iter().map(|x| (x - mean).powi(2)).sum();
        (ss / (n - 1.0)).sqrt()
    });
    Some(VariableStats {
        mean: Some(mean),
        std,
        min: values.iter().copied().reduce(f64::min),
        max: values.iter().copied().reduce(f64::max),
        count: values.len(),
    })
}

/// Average each essential variable within fixed-width pressure bins, in
/// ascending bin order. Rows without pressure are left out.
fn bin_by_pressure(frame: &Frame, essential: &[&str], bin_size: f64) -> Vec<Vec<f64>> {
    let Some(pres) = frame.column_index("pres") else {
        return Vec::new();
    };
    let idx: Vec<Option<usize>> = essential.iter().map(|c| frame.column_index(c)).collect();

    // bin -> (sum, count) per essential variable
    let mut bins: BTreeMap<i64, Vec<(f64, usize)>> = BTreeMap::new();
    for row in frame.rows() {
        let Some(p) = row[pres].as_f64() else {
            continue;
        };
        let key = (p / bin_size).floor() as i64;
        let acc = bins
            .entry(key)
            .or_insert_with(|| vec![(0.0, 0); essential.len()]);
        for (slot, col) in acc.iter_mut().zip(&idx) {
            if let Some(v) = col.and_then(|c| row[c].as_f64()) {
                slot.0 += v;
                slot.1 += 1;
            }
        }
    }

    bins.into_values()
        .map(|acc| {
            acc.into_iter()
                .map(|(sum, n)| if n == 0 { f64::NAN } else { sum / n as f64 })
                .collect()
        })
        .collect()
}
