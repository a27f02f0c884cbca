//! Per-profile summaries and their retrieval documents.
//!
//! A profile is one `(platform, cycle, juld, position)` group in
//! `argo_data`. Each one is rendered into a short text document that the
//! embedding provider turns into a vector.

use anyhow::Result;
use chrono::{Datelike, NaiveDateTime, Timelike};
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;

use crate::import::parse_datetime;
use crate::models::{ProfileDocument, ProfileSummary};

/// Aggregate every profile in the store.
pub async fn load_profile_summaries(pool: &SqlitePool) -> Result<Vec<ProfileSummary>> {
    let rows = sqlx::query(
        r#"
        SELECT COALESCE(platform_number, 'N/A') AS platform_number,
               COALESCE(cycle_number, 0) AS cycle_number,
               juld, latitude, longitude,
               MIN(pres) AS min_pres, MAX(pres) AS max_pres,
               AVG(temp) AS avg_temp, AVG(psal) AS avg_psal
        FROM argo_data
        GROUP BY platform_number, cycle_number, juld, latitude, longitude
        ORDER BY platform_number, juld, cycle_number
        "#,
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| ProfileSummary {
            platform_number: row.get("platform_number"),
            cycle_number: row.get("cycle_number"),
            juld: row.get("juld"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            min_pres: row.get("min_pres"),
            max_pres: row.get("max_pres"),
            avg_temp: row.get("avg_temp"),
            avg_psal: row.get("avg_psal"),
        })
        .collect())
}

/// Render summaries into documents. Later duplicates of an id are dropped.
pub fn build_documents(summaries: Vec<ProfileSummary>) -> Vec<ProfileDocument> {
    let mut seen = HashSet::new();
    let mut docs = Vec::with_capacity(summaries.len());
    for summary in summaries {
        let parsed = parse_datetime(&summary.juld);
        let juld_iso = parsed.as_ref().map(iso_timestamp).unwrap_or_else(|| "N/A".to_string());
        let id = format!("{}_{}_{}", summary.platform_number, summary.cycle_number, juld_iso);
        if !seen.insert(id.clone()) {
            tracing::debug!(id = %id, "duplicate profile id skipped");
            continue;
        }

        let text = render_document(&summary, &juld_iso);
        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        docs.push(ProfileDocument {
            id,
            year: parsed.map(|d| d.year() as i64).unwrap_or(0),
            month: parsed.map(|d| d.month() as i64).unwrap_or(0),
            summary,
            text,
            hash,
        });
    }
    docs
}

/// `2024-01-05T10:30:00`, with microseconds only when present.
pub fn iso_timestamp(dt: &NaiveDateTime) -> String {
    if dt.nanosecond() == 0 {
        dt.format("%Y-%m-%dT%H:%M:%S").to_string()
    } else {
        dt.format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
    }
}

fn render_document(s: &ProfileSummary, juld_iso: &str) -> String {
    let or_zero = |v: Option<f64>| v.unwrap_or(0.0);
    format!(
        "Profile: platform {}, cycle {}, juld {}, location ({:.5}, {:.5}), \
         pressure {:.2}-{:.2}, avg_temp {:.3}, avg_psal {:.3}",
        s.platform_number,
        s.cycle_number,
        juld_iso,
        or_zero(s.latitude),
        or_zero(s.longitude),
        or_zero(s.min_pres),
        or_zero(s.max_pres),
        or_zero(s.avg_temp),
        or_zero(s.avg_psal),
    )
}
