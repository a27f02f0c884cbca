//! Argo NetCDF profile loader.
//!
//! Flattens the `N_PROF × N_LEVELS` grid of an Argo profile file into a
//! [`Frame`]: per-profile variables are repeated on every level, per-level
//! variables are laid out one row per level, and character arrays are
//! decoded into trimmed strings. `SCIENTIFIC_CALIB_*` entries fan out into
//! one row per calibration entry so the calibration filter can judge each
//! of them; the cleaner collapses those rows again once the calibration
//! columns are gone.
//!
//! Reading needs the `netcdf-source` feature (system libnetcdf). The
//! grid flattening and value decoding live outside the feature gate.

use anyhow::Result;
use chrono::{Duration, NaiveDate};
use std::path::Path;

use crate::table::{Cell, Frame};

/// Values at or beyond this magnitude are NetCDF default fill values.
const DEFAULT_FILL_LIMIT: f64 = 1e30;

/// How a variable maps onto output rows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    /// One value for the whole file.
    Scalar,
    /// One value per profile (`N_PROF`).
    Profile,
    /// One value per profile level (`N_PROF × N_LEVELS`).
    Level,
    /// `n` calibration entries per profile.
    Calib(usize),
}

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub shape: Shape,
    pub cells: Vec<Cell>,
}

/// Load one Argo profile file.
pub fn load(path: &Path) -> Result<Frame> {
    #[cfg(feature = "netcdf-source")]
    {
        reader::load(path)
    }
    #[cfg(not(feature = "netcdf-source"))]
    {
        Err(crate::clean::CleanError::UnsupportedInput(format!(
            "Cannot read {}: NetCDF support is not compiled in (rebuild with --features netcdf-source, or convert the file to CSV)",
            path.display()
        ))
        .into())
    }
}

/// Lay decoded columns out as rows, one per profile level and calibration entry.
pub fn assemble(n_prof: usize, n_levels: usize, columns: Vec<Column>) -> Frame {
    let n_entries = columns
        .iter()
        .filter_map(|c| match c.shape {
            Shape::Calib(n) => Some(n),
            _ => None,
        })
        .max()
        .unwrap_or(0);

    let pick = |col: &Column, p: usize, l: usize, e: usize| -> Cell {
        let idx = match col.shape {
            Shape::Scalar => 0,
            Shape::Profile => p,
            Shape::Level => p * n_levels + l,
            Shape::Calib(n) => p * n + e,
        };
        col.cells.get(idx).cloned().unwrap_or(Cell::Missing)
    };

    let mut rows = Vec::with_capacity(n_prof * n_levels * n_entries.max(1));
    for p in 0..n_prof {
        for l in 0..n_levels {
            for e in 0..n_entries.max(1) {
                rows.push(columns.iter().map(|c| pick(c, p, l, e)).collect());
            }
        }
    }

    let names = columns.into_iter().map(|c| c.name).collect();
    Frame::from_rows(names, rows)
}

/// Numeric values with fill values masked out.
pub fn mask_fill(values: Vec<f64>, fill: Option<f64>) -> Vec<Cell> {
    values
        .into_iter()
        .map(|v| {
            if v.is_nan() || v.abs() >= DEFAULT_FILL_LIMIT || Some(v) == fill {
                Cell::Missing
            } else {
                Cell::Number(v)
            }
        })
        .collect()
}

/// Split a character array into fixed-width strings, trimming padding.
pub fn decode_chars(bytes: &[u8], width: usize) -> Vec<Cell> {
    bytes
        .chunks(width.max(1))
        .map(|chunk| {
            let s = String::from_utf8_lossy(chunk);
            Cell::text(s.trim_matches(|c: char| c == '\0' || c.is_whitespace()))
        })
        .collect()
}

/// Argo `JULD`: days since 1950-01-01 00:00:00 UTC, rounded to the second.
pub fn juld_to_timestamp(days: f64) -> Option<String> {
    if !days.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1950, 1, 1)?.and_hms_opt(0, 0, 0)?;
    let secs = (days * 86_400.0).round() as i64;
    let ts = epoch.checked_add_signed(Duration::try_seconds(secs)?)?;
    Some(ts.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(feature = "netcdf-source")]
mod reader {
    use anyhow::{Context, Result};
    use std::path::Path;
    use tracing::{debug, trace};

    use super::{assemble, decode_chars, juld_to_timestamp, mask_fill, Column, Shape};
    use crate::table::{Cell, Frame};

    pub fn load(path: &Path) -> Result<Frame> {
        let file = netcdf::open(path)
            .with_context(|| format!("Failed to open NetCDF file: {}", path.display()))?;

        let dim_len = |name: &str| file.dimension(name).map(|d| d.len()).unwrap_or(1);
        let n_prof = dim_len("N_PROF");
        let n_levels = dim_len("N_LEVELS");

        let mut columns = Vec::new();
        for var in file.variables() {
            let name = var.name();
            let dims: Vec<(String, usize)> = var
                .dimensions()
                .iter()
                .map(|d| (d.name(), d.len()))
                .collect();

            let (grid, width) = match dims.split_last() {
                Some(((last, len), rest)) if is_string_dim(last) => (rest.to_vec(), *len),
                _ => (dims.clone(), 1),
            };
            let grid_names: Vec<&str> = grid.iter().map(|(n, _)| n.as_str()).collect();

            let shape = match grid_names.as_slice() {
                [] => Shape::Scalar,
                ["N_PROF"] => Shape::Profile,
                ["N_PROF", "N_LEVELS"] => Shape::Level,
                ["N_PROF", ..] if name.starts_with("SCIENTIFIC_CALIB") => {
                    Shape::Calib(grid[1..].iter().map(|(_, n)| n).product())
                }
                _ => {
                    trace!(variable = %name, dims = ?grid_names, "skipping variable");
                    continue;
                }
            };

            let cells = match read_numeric(&var) {
                Some(values) => {
                    let masked = mask_fill(values, fill_value(&var));
                    if name == "JULD" {
                        masked
                            .into_iter()
                            .map(|c| {
                                c.as_f64()
                                    .and_then(juld_to_timestamp)
                                    .map(Cell::Text)
                                    .unwrap_or(Cell::Missing)
                            })
                            .collect()
                    } else {
                        masked
                    }
                }
                None => {
                    let bytes = var
                        .get_raw_values(..)
                        .with_context(|| format!("Failed to read variable {name}"))?;
                    decode_chars(&bytes, width)
                }
            };

            columns.push(Column { name, shape, cells });
        }

        debug!(
            path = %path.display(),
            profiles = n_prof,
            levels = n_levels,
            variables = columns.len(),
            "NetCDF file loaded"
        );
        Ok(assemble(n_prof, n_levels, columns))
    }

    fn is_string_dim(name: &str) -> bool {
        name.starts_with("STRING") || name == "DATE_TIME"
    }

    fn read_numeric(var: &netcdf::Variable) -> Option<Vec<f64>> {
        if let Ok(v) = var.get_values::<f64, _>(..) {
            return Some(v);
        }
        if let Ok(v) = var.get_values::<f32, _>(..) {
            return Some(v.into_iter().map(f64::from).collect());
        }
        if let Ok(v) = var.get_values::<i32, _>(..) {
            return Some(v.into_iter().map(f64::from).collect());
        }
        if let Ok(v) = var.get_values::<i16, _>(..) {
            return Some(v.into_iter().map(f64::from).collect());
        }
        None
    }

    fn fill_value(var: &netcdf::Variable) -> Option<f64> {
        use netcdf::AttributeValue;
        match var.attribute_value("_FillValue")?.ok()? {
            AttributeValue::Double(v) => Some(v),
            AttributeValue::Float(v) => Some(f64::from(v)),
            AttributeValue::Int(v) => Some(f64::from(v)),
            AttributeValue::Short(v) => Some(f64::from(v)),
            _ => None,
        }
    }
}
