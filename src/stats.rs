//! Store overview.
//!
//! Row, platform and profile counts, embedding coverage, the observed time
//! range, and recently imported files. Used by `argo stats`.

use anyhow::Result;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreStats {
    pub rows: i64,
    pub platforms: i64,
    pub profiles: i64,
    pub embedded: i64,
    pub imported_files: i64,
    pub first_juld: Option<String>,
    pub last_juld: Option<String>,
}

struct ImportedFile {
    path: String,
    rows: i64,
    imported_at: i64,
}

pub async fn collect_stats(pool: &SqlitePool) -> Result<StoreStats> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS rows,
               COUNT(DISTINCT platform_number) AS platforms,
               MIN(juld) AS first_juld,
               MAX(juld) AS last_juld
        FROM argo_data
        "#,
    )
    .fetch_one(pool)
    .await?;

    let profiles: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM (
            SELECT 1 FROM argo_data
            GROUP BY platform_number, cycle_number, juld, latitude, longitude
        )
        "#,
    )
    .fetch_one(pool)
    .await?;

    let embedded: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM profile_vectors")
        .fetch_one(pool)
        .await?;

    let imported_files: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM imported_files")
        .fetch_one(pool)
        .await?;

    Ok(StoreStats {
        rows: row.get("rows"),
        platforms: row.get("platforms"),
        profiles,
        embedded,
        imported_files,
        first_juld: row.get("first_juld"),
        last_juld: row.get("last_juld"),
    })
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    let stats = collect_stats(&pool).await?;

    let recent: Vec<ImportedFile> = sqlx::query(
        "SELECT path, rows, imported_at FROM imported_files ORDER BY imported_at DESC, path LIMIT 5",
    )
    .fetch_all(&pool)
    .await?
    .iter()
    .map(|r| ImportedFile {
        path: r.get("path"),
        rows: r.get("rows"),
        imported_at: r.get("imported_at"),
    })
    .collect();

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Argo Harness: Store Stats");
    println!("=========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Rows:        {}", stats.rows);
    println!("  Platforms:   {}", stats.platforms);
    println!("  Profiles:    {}", stats.profiles);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded,
        stats.profiles,
        if stats.profiles > 0 {
            (stats.embedded * 100) / stats.profiles
        } else {
            0
        }
    );
    match (&stats.first_juld, &stats.last_juld) {
        (Some(first), Some(last)) => println!("  Time range:  {} .. {}", first, last),
        _ => println!("  Time range:  (empty)"),
    }

    if !recent.is_empty() {
        println!();
        println!("  Recent imports ({} files total):", stats.imported_files);
        println!("  {:<48} {:>8}   {}", "FILE", "ROWS", "IMPORTED");
        println!("  {}", "-".repeat(76));
        for f in &recent {
            println!(
                "  {:<48} {:>8}   {}",
                f.path,
                f.rows,
                format_ts_iso(f.imported_at)
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::{parse_datetime, upsert_records};
    use crate::models::ArgoRecord;
    use tempfile::TempDir;

    fn record(platform: &str, cycle: i64, juld: &str, pres: f64) -> ArgoRecord {
        ArgoRecord {
            platform_number: Some(platform.to_string()),
            cycle_number: Some(cycle),
            direction: None,
            date_creation: None,
            platform_type: None,
            juld: parse_datetime(juld).unwrap(),
            latitude: Some(1.0),
            longitude: Some(2.0),
            data_mode: None,
            pres: Some(pres),
            temp: None,
            psal: None,
        }
    }

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[tokio::test]
    async fn counts_rows_platforms_and_profiles() {
        let tmp = TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[db]\npath = '{}'\n",
            tmp.path().join("argo.sqlite").display()
        ))
        .unwrap();
        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();

        assert_eq!(collect_stats(&pool).await.unwrap(), StoreStats::default());

        upsert_records(
            &pool,
            &[
                record("A", 1, "2020-01-01 00:00:00", 5.0),
                record("A", 1, "2020-01-01 00:00:00", 15.0),
                record("A", 2, "2020-01-11 00:00:00", 5.0),
                record("B", 1, "2019-12-25 00:00:00", 5.0),
            ],
            1000,
        )
        .await
        .unwrap();

        let stats = collect_stats(&pool).await.unwrap();
        assert_eq!(stats.rows, 4);
        assert_eq!(stats.platforms, 2);
        assert_eq!(stats.profiles, 3);
        assert_eq!(stats.embedded, 0);
        assert_eq!(stats.first_juld.as_deref(), Some("2019-12-25 00:00:00"));
        assert_eq!(stats.last_juld.as_deref(), Some("2020-01-11 00:00:00"));
    }
}
