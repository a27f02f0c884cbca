//! Uniform row/column representation for profile data.
//!
//! Every input format (NetCDF, raw CSV exports) is loaded into a [`Frame`]:
//! an ordered list of column names plus rows of [`Cell`]s. The cleaning
//! pipeline in [`crate::clean`] is written purely against this type, so it
//! does not care where the measurements came from.
//!
//! Byte-string wrappers left behind by some NetCDF-to-CSV exports (`b'R'`) are
//! removed on parse, and `NaN` is always treated as a missing value.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::io;
use std::path::Path;

/// A single value in a [`Frame`].
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Missing,
    Number(f64),
    Text(String),
}

impl Cell {
    /// Parse a raw field. Empty strings, `nan` and non-finite numbers are missing.
    pub fn parse(raw: &str) -> Cell {
        let text = strip_byte_literal(raw.trim()).trim();
        if text.is_empty() || text.eq_ignore_ascii_case("nan") {
            return Cell::Missing;
        }
        match text.parse::<f64>() {
            Ok(v) if v.is_finite() => Cell::Number(v),
            Ok(_) => Cell::Missing,
            Err(_) => Cell::Text(text.to_string()),
        }
    }

    /// Wrap a float, mapping `NaN` to [`Cell::Missing`].
    pub fn number(v: f64) -> Cell {
        if v.is_nan() {
            Cell::Missing
        } else {
            Cell::Number(v)
        }
    }

    pub fn text(s: impl Into<String>) -> Cell {
        let s = s.into();
        if s.is_empty() {
            Cell::Missing
        } else {
            Cell::Text(s)
        }
    }

    pub fn is_missing(&self) -> bool {
        match self {
            Cell::Missing => true,
            Cell::Number(v) => v.is_nan(),
            Cell::Text(_) => false,
        }
    }

    /// Numeric view of the cell. Text is parsed when it holds a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Missing => None,
            Cell::Number(v) if v.is_nan() => None,
            Cell::Number(v) => Some(*v),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Missing => None,
            Cell::Number(v) if v.is_nan() => None,
            Cell::Number(v) => Some(format_number(*v)),
            Cell::Text(s) => Some(s.clone()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Cell::Missing => Value::Null,
            Cell::Number(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Cell::Text(s) => Value::String(s.clone()),
        }
    }

    fn key(&self) -> CellKey<'_> {
        match self {
            Cell::Missing => CellKey::Missing,
            Cell::Number(v) if v.is_nan() => CellKey::Missing,
            // -0.0 and 0.0 compare equal, so they must hash equal
            Cell::Number(v) if *v == 0.0 => CellKey::Number(0f64.to_bits()),
            Cell::Number(v) => CellKey::Number(v.to_bits()),
            Cell::Text(s) => CellKey::Text(s),
        }
    }
}

#[derive(Hash, PartialEq, Eq)]
enum CellKey<'a> {
    Missing,
    Number(u64),
    Text(&'a str),
}

/// Remove a byte-string wrapper (`b'…'` or `b"…"`) if present.
pub fn strip_byte_literal(s: &str) -> &str {
    for quote in ['\'', '"'] {
        if s.len() >= 3 && s.starts_with('b') && s[1..].starts_with(quote) && s.ends_with(quote) {
            return &s[2..s.len() - 1];
        }
    }
    s
}

fn format_number(v: f64) -> String {
    format!("{}", v)
}

/// Column-named table of cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    columns: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl Frame {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Build a frame from rows. Short rows are padded with missing cells,
    /// long rows truncated to the header width.
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Cell>>) -> Self {
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, Cell::Missing);
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Cell>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn push_row(&mut self, row: Vec<Cell>) -> Result<()> {
        if row.len() != self.columns.len() {
            bail!(
                "row has {} cells but frame has {} columns",
                row.len(),
                self.columns.len()
            );
        }
        self.rows.push(row);
        Ok(())
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// All cells of one column, top to bottom.
    pub fn column<'a>(&'a self, name: &str) -> Option<impl Iterator<Item = &'a Cell> + 'a> {
        let idx = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[idx]))
    }

    pub fn cell(&self, row: usize, name: &str) -> Option<&Cell> {
        let idx = self.column_index(name)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    pub fn set_cell(&mut self, row: usize, col: usize, cell: Cell) {
        self.rows[row][col] = cell;
    }

    /// Append a column with the same value in every row.
    pub fn add_column(&mut self, name: &str, fill: Cell) {
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(fill.clone());
        }
    }

    pub fn lowercase_columns(&mut self) {
        for c in &mut self.columns {
            *c = c.to_lowercase();
        }
    }

    /// Drop every column whose name matches `pred`. Returns the dropped names.
    pub fn drop_columns<F: Fn(&str) -> bool>(&mut self, pred: F) -> Vec<String> {
        let keep: Vec<bool> = self.columns.iter().map(|c| !pred(c)).collect();
        if keep.iter().all(|k| *k) {
            return Vec::new();
        }

        let mut dropped = Vec::new();
        let mut columns = Vec::with_capacity(self.columns.len());
        for (name, k) in self.columns.drain(..).zip(&keep) {
            if *k {
                columns.push(name);
            } else {
                dropped.push(name);
            }
        }
        self.columns = columns;

        for row in &mut self.rows {
            let mut i = 0;
            row.retain(|_| {
                let k = keep[i];
                i += 1;
                k
            });
        }
        dropped
    }

    /// Keep rows whose mask entry is `true`.
    pub fn retain_rows(&mut self, keep: &[bool]) {
        debug_assert_eq!(keep.len(), self.rows.len());
        let mut flags = keep.iter();
        self.rows.retain(|_| *flags.next().unwrap_or(&true));
    }

    /// Remove exact duplicate rows, keeping the first occurrence.
    pub fn dedup_rows(&mut self) -> usize {
        let before = self.rows.len();
        let mut seen: HashSet<Vec<CellKey<'_>>> = HashSet::with_capacity(before);
        let keep: Vec<bool> = self
            .rows
            .iter()
            .map(|row| seen.insert(row.iter().map(Cell::key).collect()))
            .collect();
        drop(seen);
        self.retain_rows(&keep);
        before - self.rows.len()
    }

    /// Project onto the named columns that exist, in the given order.
    pub fn select(&self, names: &[&str]) -> Frame {
        let picked: Vec<(usize, &str)> = names
            .iter()
            .filter_map(|n| self.column_index(n).map(|i| (i, *n)))
            .collect();
        Frame {
            columns: picked.iter().map(|(_, n)| n.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| picked.iter().map(|(i, _)| row[*i].clone()).collect())
                .collect(),
        }
    }

    pub fn read_csv(path: &Path) -> Result<Frame> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        Self::from_csv_reader(file).with_context(|| format!("Failed to parse {}", path.display()))
    }

    pub fn from_csv_reader<R: io::Read>(reader: R) -> Result<Frame> {
        let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let columns: Vec<String> = rdr
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for record in rdr.records() {
            rows.push(record?.iter().map(Cell::parse).collect());
        }
        Ok(Frame::from_rows(columns, rows))
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        self.write_csv_to(file)
    }

    pub fn write_csv_to<W: io::Write>(&self, writer: W) -> Result<()> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(&self.columns)?;
        for row in &self.rows {
            wtr.write_record(row.iter().map(|c| c.as_text().unwrap_or_default()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Rows as JSON objects keyed by column name, optionally truncated.
    pub fn to_json_rows(&self, limit: Option<usize>) -> Vec<Value> {
        self.rows
            .iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|row| {
                let mut obj = Map::new();
                for (name, cell) in self.columns.iter().zip(row) {
                    obj.insert(name.clone(), cell.to_json());
                }
                Value::Object(obj)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(columns: &[&str], rows: Vec<Vec<Cell>>) -> Frame {
        let mut f = Frame::new(columns.iter().map(|c| c.to_string()).collect());
        for row in rows {
            f.push_row(row).unwrap();
        }
        f
    }

    #[test]
    fn parse_cells() {
        assert_eq!(Cell::parse(""), Cell::Missing);
        assert_eq!(Cell::parse("  NaN "), Cell::Missing);
        assert_eq!(Cell::parse("12.5"), Cell::Number(12.5));
        assert_eq!(Cell::parse("b'1'"), Cell::Number(1.0));
        assert_eq!(Cell::parse("b'R'"), Cell::Text("R".to_string()));
        assert_eq!(Cell::parse("2902746 "), Cell::Number(2902746.0));
    }

    #[test]
    fn strip_byte_literal_only_when_wrapped() {
        assert_eq!(strip_byte_literal("b'A'"), "A");
        assert_eq!(strip_byte_literal("b\"D\""), "D");
        assert_eq!(strip_byte_literal("b'"), "b'");
        assert_eq!(strip_byte_literal("bad"), "bad");
    }

    #[test]
    fn dedup_keeps_first() {
        let mut f = frame(
            &["a", "b"],
            vec![
                vec![Cell::Number(1.0), Cell::text("x")],
                vec![Cell::Number(1.0), Cell::text("x")],
                vec![Cell::Number(-0.0), Cell::Missing],
                vec![Cell::Number(0.0), Cell::Missing],
            ],
        );
        assert_eq!(f.dedup_rows(), 2);
        assert_eq!(f.len(), 2);
    }

    #[test]
    fn drop_and_select_columns() {
        let mut f = frame(
            &["pres", "n_levels", "temp"],
            vec![vec![Cell::Number(5.0), Cell::Number(0.0), Cell::Number(20.0)]],
        );
        let dropped = f.drop_columns(|c| c.starts_with("n_"));
        assert_eq!(dropped, vec!["n_levels".to_string()]);
        assert_eq!(f.columns(), &["pres".to_string(), "temp".to_string()]);

        let s = f.select(&["temp", "missing", "pres"]);
        assert_eq!(s.columns(), &["temp".to_string(), "pres".to_string()]);
        assert_eq!(s.rows()[0], vec![Cell::Number(20.0), Cell::Number(5.0)]);
    }

    #[test]
    fn csv_reader_pads_short_rows() {
        let src = "\u{feff}PRES,TEMP,PSAL\n1.0,20.5\n2.0,,35.1\n";
        let f = Frame::from_csv_reader(src.as_bytes()).unwrap();
        assert_eq!(f.columns()[0], "PRES");
        assert_eq!(f.len(), 2);
        assert_eq!(f.rows()[0][2], Cell::Missing);
        assert_eq!(f.rows()[1][1], Cell::Missing);
    }

    #[test]
    fn csv_writer_leaves_missing_empty() {
        let f = frame(
            &["pres", "profile_id"],
            vec![vec![Cell::Missing, Cell::text("Mean")]],
        );
        let mut out = Vec::new();
        f.write_csv_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "pres,profile_id\n,Mean\n");
    }

    #[test]
    fn json_rows_respect_limit() {
        let f = frame(
            &["pres"],
            vec![vec![Cell::Number(1.0)], vec![Cell::Number(2.0)]],
        );
        let rows = f.to_json_rows(Some(1));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["pres"], serde_json::json!(1.0));
    }
}
