//! Measured depth profile lookup.
//!
//! Loads the pressure/temperature/salinity levels of one profile from
//! `argo_data`. Used by the `argo profile` CLI command and by RAG plot
//! requests.

use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::import::{format_timestamp, parse_datetime};
use crate::models::Measurement;

/// Levels of `(platform, juld)` ordered by pressure, shallowest first.
///
/// `juld` may be in any format [`parse_datetime`] accepts.
pub async fn fetch_profile_rows(
    pool: &SqlitePool,
    platform: &str,
    juld: &str,
) -> Result<Vec<Measurement>> {
    let Some(ts) = parse_datetime(juld) else {
        bail!("invalid juld timestamp: {}", juld);
    };

    let rows = sqlx::query(
        r#"
        SELECT pres, temp, psal
        FROM argo_data
        WHERE platform_number = ? AND juld = ?
        ORDER BY pres IS NULL, pres ASC
        "#,
    )
    .bind(platform)
    .bind(format_timestamp(&ts))
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Measurement {
            pres: row.get("pres"),
            temp: row.get("temp"),
            psal: row.get("psal"),
        })
        .collect())
}

/// CLI entry point: print one profile as a table.
pub async fn run_profile(config: &Config, platform: &str, juld: &str) -> Result<()> {
    let pool = db::connect(config).await?;
    let levels = fetch_profile_rows(&pool, platform, juld).await?;
    pool.close().await;

    if levels.is_empty() {
        bail!("profile not found: platform {} at {}", platform, juld);
    }

    println!("--- Profile {} @ {} ({} levels) ---", platform, juld, levels.len());
    println!("{:>10}  {:>10}  {:>10}", "pres", "temp", "psal");
    for m in &levels {
        println!(
            "{:>10}  {:>10}  {:>10}",
            fmt_opt(m.pres, 2),
            fmt_opt(m.temp, 3),
            fmt_opt(m.psal, 3)
        );
    }

    Ok(())
}

fn fmt_opt(v: Option<f64>, precision: usize) -> String {
    match v {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::upsert_records;
    use crate::models::ArgoRecord;
    use tempfile::TempDir;

    fn level(pres: Option<f64>, temp: f64) -> ArgoRecord {
        ArgoRecord {
            platform_number: Some("2902746".to_string()),
            cycle_number: Some(3),
            direction: None,
            date_creation: None,
            platform_type: None,
            juld: parse_datetime("2021-07-04 12:00:00").unwrap(),
            latitude: Some(-10.0),
            longitude: Some(80.0),
            data_mode: None,
            pres,
            temp: Some(temp),
            psal: Some(34.5),
        }
    }

    #[tokio::test]
    async fn levels_sorted_by_pressure() {
        let tmp = TempDir::new().unwrap();
        let config: Config = toml::from_str(&format!(
            "[db]\npath = '{}'\n",
            tmp.path().join("argo.sqlite").display()
        ))
        .unwrap();
        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect(&config).await.unwrap();

        upsert_records(
            &pool,
            &[level(Some(50.0), 18.0), level(Some(5.0), 28.0), level(Some(20.0), 25.0)],
            1000,
        )
        .await
        .unwrap();

        // ISO input resolves to the stored timestamp
        let levels = fetch_profile_rows(&pool, "2902746", "2021-07-04T12:00:00").await.unwrap();
        let pres: Vec<Option<f64>> = levels.iter().map(|m| m.pres).collect();
        assert_eq!(pres, vec![Some(5.0), Some(20.0), Some(50.0)]);
        assert_eq!(levels[0].temp, Some(28.0));

        assert!(fetch_profile_rows(&pool, "other", "2021-07-04 12:00:00").await.unwrap().is_empty());
        assert!(fetch_profile_rows(&pool, "2902746", "not a date").await.is_err());
    }
}
