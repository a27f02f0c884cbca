//! CSV folder import into `argo_data`.
//!
//! Walks a folder of lean profile CSVs, parses each row into an
//! [`ArgoRecord`], and upserts them in batches keyed on
//! `(platform_number, juld, pres)`. Files whose content hash is unchanged
//! since the last import are skipped unless a full import is requested.

use anyhow::{bail, Context, Result};
use chrono::NaiveDateTime;
use globset::{Glob, GlobMatcher};
use serde::Serialize;
use sha2::{Digest, Sha256};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::clean::{PROFILE_ID, TAG_MEAN};
use crate::config::Config;
use crate::db;
use crate::migrate::LEVEL_KEY;
use crate::models::ArgoRecord;
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::table::strip_byte_literal;

/// Canonical text form of timestamps in the store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub pattern: Option<String>,
    pub batch_size: Option<usize>,
    pub full: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportSummary {
    pub files_found: u64,
    pub files_imported: u64,
    pub files_unchanged: u64,
    pub rows_read: u64,
    pub rows_upserted: u64,
    pub rows_skipped_bad_juld: u64,
    pub rows_skipped_mean: u64,
}

pub async fn run_import(
    config: &Config,
    folder: &Path,
    opts: &ImportOptions,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let summary = import_folder(&pool, config, folder, opts, progress).await?;
    pool.close().await;

    if opts.dry_run {
        println!("import {} (dry-run)", folder.display());
    } else {
        println!("import {}", folder.display());
    }
    println!("  files found: {}", summary.files_found);
    println!("  files imported: {}", summary.files_imported);
    println!("  files unchanged: {}", summary.files_unchanged);
    println!("  rows read: {}", summary.rows_read);
    if !opts.dry_run {
        println!("  rows upserted: {}", summary.rows_upserted);
    }
    println!("  rows skipped (bad juld): {}", summary.rows_skipped_bad_juld);
    println!("  rows skipped (mean rows): {}", summary.rows_skipped_mean);
    println!("ok");
    Ok(())
}

struct ImportedFile {
    path: String,
    hash: String,
    rows: u64,
}

/// Import every matching CSV under `folder`. Batches span file boundaries;
/// a file is recorded as imported once all of its rows have been flushed.
pub async fn import_folder(
    pool: &SqlitePool,
    config: &Config,
    folder: &Path,
    opts: &ImportOptions,
    progress: &dyn ProgressReporter,
) -> Result<ImportSummary> {
    let pattern = opts.pattern.as_deref().unwrap_or(&config.ingest.pattern);
    let batch_size = opts.batch_size.unwrap_or(config.ingest.batch_size).max(1);
    let page_size = config.ingest.page_size;

    progress.report(ProgressEvent::Discovering {
        folder: folder.display().to_string(),
    });
    let paths = discover_files(folder, pattern, config.ingest.recursive)?;

    let mut summary = ImportSummary {
        files_found: paths.len() as u64,
        ..Default::default()
    };
    if paths.is_empty() {
        info!(folder = %folder.display(), pattern, "no CSV files found");
        return Ok(summary);
    }
    info!(files = paths.len(), batch_size, "starting import");

    let mut batch: Vec<ArgoRecord> = Vec::with_capacity(batch_size);
    let mut unflushed: Vec<ImportedFile> = Vec::new();

    for (i, path) in paths.iter().enumerate() {
        let key = path.display().to_string();
        progress.report(ProgressEvent::Importing {
            file: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| key.clone()),
            n: i as u64 + 1,
            total: paths.len() as u64,
        });

        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", key))?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        if !opts.full && !opts.dry_run && is_unchanged(pool, &key, &hash).await? {
            debug!(file = %key, "unchanged, skipping");
            summary.files_unchanged += 1;
            continue;
        }

        let mut rows_in_file = 0u64;
        let mut reader = csv::ReaderBuilder::new()
            .flexible(true)
            .from_reader(bytes.as_slice());
        let columns = ColumnMap::new(reader.headers()?);

        for record in reader.records() {
            let record = record.with_context(|| format!("Malformed CSV row in {}", key))?;
            rows_in_file += 1;

            if config.ingest.skip_mean_rows && columns.is_mean_row(&record) {
                summary.rows_skipped_mean += 1;
                continue;
            }
            match columns.parse_record(&record) {
                Some(rec) => batch.push(rec),
                None => {
                    summary.rows_skipped_bad_juld += 1;
                    continue;
                }
            }

            if batch.len() >= batch_size {
                let flushed = std::mem::take(&mut batch);
                summary.rows_upserted += flush(pool, flushed, page_size, opts.dry_run).await?;
                record_files(pool, unflushed.drain(..), opts.dry_run).await?;
            }
        }

        summary.rows_read += rows_in_file;
        summary.files_imported += 1;
        debug!(file = %key, rows = rows_in_file, "file processed");
        unflushed.push(ImportedFile {
            path: key,
            hash,
            rows: rows_in_file,
        });
    }

    if !batch.is_empty() {
        summary.rows_upserted += flush(pool, batch, page_size, opts.dry_run).await?;
    }
    record_files(pool, unflushed.drain(..), opts.dry_run).await?;

    info!(
        files = summary.files_imported,
        upserted = summary.rows_upserted,
        skipped = summary.rows_skipped_bad_juld,
        "import complete"
    );
    Ok(summary)
}

/// Matching files directly in `folder` (or below it when `recursive`), sorted by path.
pub fn discover_files(folder: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    if !folder.is_dir() {
        bail!("Import folder does not exist: {}", folder.display());
    }
    let matcher: GlobMatcher = Glob::new(pattern)
        .with_context(|| format!("Invalid file pattern: {}", pattern))?
        .compile_matcher();

    let walker = WalkDir::new(folder).max_depth(if recursive { usize::MAX } else { 1 });
    let mut paths = Vec::new();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if matcher.is_match(name.as_ref()) {
            paths.push(entry.into_path());
        }
    }
    paths.sort();
    Ok(paths)
}

async fn is_unchanged(pool: &SqlitePool, path: &str, hash: &str) -> Result<bool> {
    let existing: Option<String> =
        sqlx::query_scalar("SELECT hash FROM imported_files WHERE path = ?")
            .bind(path)
            .fetch_optional(pool)
            .await?;
    Ok(existing.as_deref() == Some(hash))
}

async fn record_files(
    pool: &SqlitePool,
    files: impl Iterator<Item = ImportedFile>,
    dry_run: bool,
) -> Result<()> {
    if dry_run {
        return Ok(());
    }
    let now = chrono::Utc::now().timestamp();
    for file in files {
        sqlx::query(
            r#"
            INSERT INTO imported_files (path, hash, rows, imported_at) VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET hash = excluded.hash, rows = excluded.rows, imported_at = excluded.imported_at
            "#,
        )
        .bind(&file.path)
        .bind(&file.hash)
        .bind(file.rows as i64)
        .bind(now)
        .execute(pool)
        .await?;
    }
    Ok(())
}

async fn flush(
    pool: &SqlitePool,
    batch: Vec<ArgoRecord>,
    page_size: usize,
    dry_run: bool,
) -> Result<u64> {
    let rows = dedup_batch(batch);
    if dry_run {
        return Ok(rows.len() as u64);
    }
    upsert_records(pool, &rows, page_size).await?;
    debug!(rows = rows.len(), "batch upserted");
    Ok(rows.len() as u64)
}

/// Keep one row per `(platform_number, juld, pres)`: the last one seen,
/// at the position of the first.
pub fn dedup_batch(batch: Vec<ArgoRecord>) -> Vec<ArgoRecord> {
    let mut index: HashMap<(Option<String>, NaiveDateTime, Option<u64>), usize> = HashMap::new();
    let mut out: Vec<ArgoRecord> = Vec::with_capacity(batch.len());
    for rec in batch {
        let key = (
            rec.platform_number.clone(),
            rec.juld,
            rec.pres.map(f64::to_bits),
        );
        match index.get(&key) {
            Some(&i) => out[i] = rec,
            None => {
                index.insert(key, out.len());
                out.push(rec);
            }
        }
    }
    out
}

/// Upsert records into `argo_data`, `page_size` rows per statement.
pub async fn upsert_records(pool: &SqlitePool, rows: &[ArgoRecord], page_size: usize) -> Result<()> {
    let mut tx = pool.begin().await?;
    for page in rows.chunks(page_size.max(1)) {
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO argo_data (platform_number, cycle_number, direction, date_creation, \
             platform_type, juld, latitude, longitude, data_mode, pres, temp, psal) ",
        );
        qb.push_values(page, |mut b, r| {
            b.push_bind(r.platform_number.clone())
                .push_bind(r.cycle_number)
                .push_bind(r.direction.clone())
                .push_bind(r.date_creation.map(|d| format_timestamp(&d)))
                .push_bind(r.platform_type.clone())
                .push_bind(format_timestamp(&r.juld))
                .push_bind(r.latitude)
                .push_bind(r.longitude)
                .push_bind(r.data_mode.clone())
                .push_bind(r.pres)
                .push_bind(r.temp)
                .push_bind(r.psal);
        });
        qb.push(format!(" ON CONFLICT({LEVEL_KEY}) DO UPDATE SET "));
        qb.push(
            "temp = excluded.temp, \
             psal = excluded.psal, \
             date_creation = COALESCE(excluded.date_creation, argo_data.date_creation), \
             data_mode = COALESCE(excluded.data_mode, argo_data.data_mode), \
             latitude = COALESCE(excluded.latitude, argo_data.latitude), \
             longitude = COALESCE(excluded.longitude, argo_data.longitude)",
        );
        qb.build().execute(&mut *tx).await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Header positions of the columns the store knows about.
struct ColumnMap {
    index: HashMap<String, usize>,
}

impl ColumnMap {
    fn new(headers: &csv::StringRecord) -> Self {
        let index = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim_start_matches('\u{feff}').trim().to_lowercase(), i))
            .collect();
        Self { index }
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, name: &str) -> &'r str {
        self.index
            .get(name)
            .and_then(|i| record.get(*i))
            .unwrap_or("")
    }

    fn is_mean_row(&self, record: &csv::StringRecord) -> bool {
        clean_text(self.get(record, PROFILE_ID)).as_deref() == Some(TAG_MEAN)
    }

    /// `None` when `juld` is missing or unparsable.
    fn parse_record(&self, record: &csv::StringRecord) -> Option<ArgoRecord> {
        let juld = parse_datetime(self.get(record, "juld"))?;
        Some(ArgoRecord {
            platform_number: clean_text(self.get(record, "platform_number")),
            cycle_number: safe_int(self.get(record, "cycle_number")),
            direction: clean_text(self.get(record, "direction")),
            date_creation: parse_datetime(self.get(record, "date_creation")),
            platform_type: clean_text(self.get(record, "platform_type")),
            juld,
            latitude: safe_float(self.get(record, "latitude")),
            longitude: safe_float(self.get(record, "longitude")),
            data_mode: clean_text(self.get(record, "data_mode")),
            pres: safe_float(self.get(record, "pres")),
            temp: safe_float(self.get(record, "temp")),
            psal: safe_float(self.get(record, "psal")),
        })
    }
}

pub fn format_timestamp(dt: &NaiveDateTime) -> String {
    dt.format(TIMESTAMP_FORMAT).to_string()
}

/// Trim, drop a byte-literal wrapper; empty becomes `None`.
pub fn clean_text(raw: &str) -> Option<String> {
    let s = strip_byte_literal(raw.trim()).trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Parse Argo timestamps: compact `YYYYMMDDHHMMSS`, or `YYYY-MM-DD HH:MM:SS`
/// with optional fractional seconds (padded or truncated to microseconds)
/// and optional `T` separator.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let s = clean_text(raw)?;
    if let Ok(dt) = NaiveDateTime::parse_from_str(&s, "%Y%m%d%H%M%S") {
        return Some(dt);
    }

    let s = s.trim_end_matches('Z').replacen('T', " ", 1);
    match s.split_once('.') {
        Some((base, frac)) => {
            let digits: String = frac.chars().take_while(|c| c.is_ascii_digit()).collect();
            let micros = format!("{:0<6}", digits);
            NaiveDateTime::parse_from_str(&format!("{}.{}", base, &micros[..6]), "%Y-%m-%d %H:%M:%S%.f").ok()
        }
        None => NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S").ok(),
    }
}

/// Integer from text, accepting float notation such as `"273.0"`.
pub fn safe_int(raw: &str) -> Option<i64> {
    safe_float(raw).map(|v| v.trunc() as i64)
}

pub fn safe_float(raw: &str) -> Option<f64> {
    clean_text(raw)?.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, mi, s)
            .unwrap()
    }

    #[test]
    fn parses_argo_timestamps() {
        assert_eq!(parse_datetime("20240105103000"), Some(dt(2024, 1, 5, 10, 30, 0)));
        assert_eq!(parse_datetime("2024-01-05 10:30:00"), Some(dt(2024, 1, 5, 10, 30, 0)));
        assert_eq!(parse_datetime("2024-01-05T10:30:00"), Some(dt(2024, 1, 5, 10, 30, 0)));
        assert_eq!(parse_datetime("b'20240105103000'"), Some(dt(2024, 1, 5, 10, 30, 0)));

        let frac = parse_datetime("2024-01-05 10:30:00.5").unwrap();
        assert_eq!(frac.and_utc().timestamp_subsec_micros(), 500_000);
        let long = parse_datetime("2024-01-05 10:30:00.123456789").unwrap();
        assert_eq!(long.and_utc().timestamp_subsec_micros(), 123_456);

        assert_eq!(parse_datetime(""), None);
        assert_eq!(parse_datetime("yesterday"), None);
        assert_eq!(parse_datetime("2024-01-05"), None);
    }

    #[test]
    fn numeric_helpers() {
        assert_eq!(safe_int("273.0"), Some(273));
        assert_eq!(safe_int(" 12 "), Some(12));
        assert_eq!(safe_int("x"), None);
        assert_eq!(safe_float("35.12"), Some(35.12));
        assert_eq!(safe_float("nan"), None);
        assert_eq!(safe_float(""), None);
        assert_eq!(clean_text("  b'R' "), Some("R".to_string()));
        assert_eq!(clean_text("   "), None);
    }

    #[test]
    fn timestamps_render_without_zero_fraction() {
        assert_eq!(format_timestamp(&dt(2024, 1, 5, 10, 30, 0)), "2024-01-05 10:30:00");
    }

    fn record(platform: &str, pres: f64, temp: f64) -> ArgoRecord {
        ArgoRecord {
            platform_number: Some(platform.to_string()),
            cycle_number: Some(1),
            direction: None,
            date_creation: None,
            platform_type: None,
            juld: dt(2024, 1, 5, 10, 30, 0),
            latitude: Some(10.0),
            longitude: Some(70.0),
            data_mode: None,
            pres: Some(pres),
            temp: Some(temp),
            psal: None,
        }
    }

    #[test]
    fn dedup_keeps_last_value_at_first_position() {
        let out = dedup_batch(vec![
            record("A", 5.0, 10.0),
            record("B", 5.0, 11.0),
            record("A", 5.0, 12.0),
        ]);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].platform_number.as_deref(), Some("A"));
        assert_eq!(out[0].temp, Some(12.0));
        assert_eq!(out[1].temp, Some(11.0));
    }

    fn test_config(dir: &Path) -> Config {
        toml::from_str(&format!(
            "[db]\npath = '{}'\n",
            dir.join("argo.sqlite").display()
        ))
        .unwrap()
    }

    const LEAN_CSV: &str = "platform_number,cycle_number,juld,latitude,longitude,pres,temp,psal,profile_id\n\
        2902746,12.0,2024-01-05 10:30:00,10.5,70.2,5.0,28.1,34.9,Binned\n\
        2902746,12.0,2024-01-05 10:30:00,10.5,70.2,15.0,27.4,35.0,Binned\n\
        2902746,12.0,not-a-date,10.5,70.2,25.0,26.0,35.1,Binned\n\
        2902746,12.0,2024-01-05 10:30:00,10.5,70.2,10.0,27.75,34.95,Mean\n";

    #[tokio::test]
    async fn import_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        crate::migrate::run_migrations(&config).await.unwrap();

        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("2902746_012.csv"), LEAN_CSV).unwrap();
        std::fs::write(data.join("notes.txt"), "ignored").unwrap();

        let pool = db::connect(&config).await.unwrap();
        let opts = ImportOptions::default();
        let first = import_folder(&pool, &config, &data, &opts, &NoProgress).await.unwrap();
        assert_eq!(first.files_found, 1);
        assert_eq!(first.rows_read, 4);
        assert_eq!(first.rows_upserted, 2);
        assert_eq!(first.rows_skipped_bad_juld, 1);
        assert_eq!(first.rows_skipped_mean, 1);

        let second = import_folder(&pool, &config, &data, &opts, &NoProgress).await.unwrap();
        assert_eq!(second.files_unchanged, 1);
        assert_eq!(second.rows_upserted, 0);

        let full = ImportOptions {
            full: true,
            ..Default::default()
        };
        let third = import_folder(&pool, &config, &data, &full, &NoProgress).await.unwrap();
        assert_eq!(third.rows_upserted, 2);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM argo_data")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 2);

        let juld: String = sqlx::query_scalar("SELECT juld FROM argo_data LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(juld, "2024-01-05 10:30:00");
    }

    #[tokio::test]
    async fn upsert_updates_values_and_coalesces_metadata() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();

        upsert_records(&pool, &[record("A", 5.0, 10.0)], 1000).await.unwrap();
        let mut newer = record("A", 5.0, 11.0);
        newer.latitude = None;
        upsert_records(&pool, &[newer], 1000).await.unwrap();

        let (temp, lat): (f64, f64) = sqlx::query_as("SELECT temp, latitude FROM argo_data")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(temp, 11.0);
        assert_eq!(lat, 10.0);
    }

    #[tokio::test]
    async fn rows_without_pressure_stay_unique_across_full_imports() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        crate::migrate::run_migrations(&config).await.unwrap();

        let data = tmp.path().join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(
            data.join("2902746_013.csv"),
            "platform_number,cycle_number,juld,latitude,longitude,temp,psal,profile_id\n\
             2902746,13,2024-02-01 08:00:00,11.0,71.0,27.9,35.0,Original\n",
        )
        .unwrap();

        let pool = db::connect(&config).await.unwrap();
        let full = ImportOptions {
            full: true,
            ..Default::default()
        };
        for _ in 0..3 {
            let summary = import_folder(&pool, &config, &data, &full, &NoProgress).await.unwrap();
            assert_eq!(summary.rows_upserted, 1);
        }

        let (count, temp): (i64, f64) =
            sqlx::query_as("SELECT COUNT(*), MAX(temp) FROM argo_data WHERE pres IS NULL")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 1);
        assert_eq!(temp, 27.9);

        // a later value for the same level replaces the stored one
        let mut rec = record("2902746", 0.0, 28.4);
        rec.pres = None;
        rec.juld = dt(2024, 2, 1, 8, 0, 0);
        upsert_records(&pool, &[rec], 1000).await.unwrap();
        let temps: Vec<f64> = sqlx::query_scalar("SELECT temp FROM argo_data")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(temps, vec![28.4]);
    }

    #[tokio::test]
    async fn migrations_collapse_existing_null_pressure_duplicates() {
        let tmp = TempDir::new().unwrap();
        let config = test_config(tmp.path());
        let pool = db::connect(&config).await.unwrap();
        sqlx::query(
            "CREATE TABLE argo_data (id INTEGER PRIMARY KEY AUTOINCREMENT, platform_number TEXT, \
             cycle_number INTEGER, direction TEXT, date_creation TEXT, platform_type TEXT, \
             juld TEXT NOT NULL, latitude REAL, longitude REAL, data_mode TEXT, pres REAL, \
             temp REAL, psal REAL)",
        )
        .execute(&pool)
        .await
        .unwrap();
        for temp in [20.0, 21.0] {
            sqlx::query("INSERT INTO argo_data (platform_number, juld, temp) VALUES ('A', '2024-01-05 10:30:00', ?)")
                .bind(temp)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool.close().await;

        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();
        let temps: Vec<f64> = sqlx::query_scalar("SELECT temp FROM argo_data")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(temps, vec![21.0]);
    }

    #[test]
    fn discover_is_sorted_and_non_recursive() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.csv"), "").unwrap();
        std::fs::write(tmp.path().join("a.csv"), "").unwrap();
        std::fs::create_dir_all(tmp.path().join("nested")).unwrap();
        std::fs::write(tmp.path().join("nested/c.csv"), "").unwrap();

        let flat = discover_files(tmp.path(), "*.csv", false).unwrap();
        let names: Vec<_> = flat
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.csv", "b.csv"]);

        let deep = discover_files(tmp.path(), "*.csv", true).unwrap();
        assert_eq!(deep.len(), 3);
    }
}
