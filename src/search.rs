use anyhow::{bail, Result};
use regex::Regex;
use sqlx::{Row, SqlitePool};
use std::sync::OnceLock;

use crate::config::Config;
use crate::db;
use crate::embedding;
use crate::models::ProfileMatch;

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

/// Ranked matches plus the date filter read from the query.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub matches: Vec<ProfileMatch>,
}

impl SearchOutcome {
    /// `5/2019`, `2019`, or `None` when no filter was applied.
    pub fn filter_label(&self) -> Option<String> {
        match (self.year, self.month) {
            (Some(y), Some(m)) => Some(format!("{}/{}", m, y)),
            (Some(y), None) => Some(y.to_string()),
            _ => None,
        }
    }
}

fn year_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(19|20)\d{2}").ok()).as_ref()
}

fn month_number_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(0?[1-9]|1[0-2])\b").ok()).as_ref()
}

/// Read a year and month out of free text ("May 2019", "5 2019", "05/2019").
///
/// Month names win over numbers; the first name in calendar order is used.
pub fn parse_date_from_query(query: &str) -> (Option<i32>, Option<u32>) {
    let year = year_pattern()
        .and_then(|re| re.find(query))
        .and_then(|m| m.as_str().parse::<i32>().ok());

    let lower = query.to_lowercase();
    let month = MONTH_NAMES
        .iter()
        .position(|name| lower.contains(name))
        .map(|i| i as u32 + 1)
        .or_else(|| {
            month_number_pattern()
                .and_then(|re| re.captures(query))
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        });

    (year, month)
}

/// Embed `query` and rank stored profile vectors against it.
pub async fn search_profiles(
    pool: &SqlitePool,
    config: &Config,
    query: &str,
    n_results: usize,
) -> Result<SearchOutcome> {
    let (year, month) = parse_date_from_query(query);
    if query.trim().is_empty() {
        return Ok(SearchOutcome {
            year,
            month,
            matches: Vec::new(),
        });
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let query_vec = embedding::embed_query(provider.as_ref(), &config.embedding, query).await?;

    let n = n_results.clamp(1, config.retrieval.max_results.max(1));
    let matches = rank_profiles(pool, &query_vec, year, month, n).await?;
    tracing::debug!(query, ?year, ?month, hits = matches.len(), "semantic search");

    Ok(SearchOutcome {
        year,
        month,
        matches,
    })
}

/// Rank stored vectors by cosine distance to `query_vec`, closest first.
///
/// A month only narrows the candidates together with a year.
pub async fn rank_profiles(
    pool: &SqlitePool,
    query_vec: &[f32],
    year: Option<i32>,
    month: Option<u32>,
    n: usize,
) -> Result<Vec<ProfileMatch>> {
    let filter_month = year.and(month);

    let rows = sqlx::query(
        r#"
        SELECT profile_id, platform_number, cycle_number, juld, latitude, longitude,
               min_pres, max_pres, avg_temp, avg_psal, embedding
        FROM profile_vectors
        WHERE (?1 IS NULL OR year = ?1)
          AND (?2 IS NULL OR month = ?2)
        "#,
    )
    .bind(year.map(i64::from))
    .bind(filter_month.map(i64::from))
    .fetch_all(pool)
    .await?;

    let mut scored: Vec<(f64, String, ProfileMatch)> = Vec::with_capacity(rows.len());
    for row in &rows {
        let blob: Vec<u8> = row.get("embedding");
        let vector = embedding::blob_to_vec(&blob);
        if vector.len() != query_vec.len() {
            continue;
        }
        let distance = embedding::cosine_distance(query_vec, &vector);
        let juld: String = row.get("juld");
        let cycle: i64 = row.get("cycle_number");

        scored.push((
            distance,
            row.get("profile_id"),
            ProfileMatch {
                rank: 0,
                platform_number: row.get("platform_number"),
                cycle_number: cycle.to_string(),
                date: display_date(&juld),
                latitude: row.get("latitude"),
                longitude: row.get("longitude"),
                min_pressure: row.get("min_pres"),
                max_pressure: row.get("max_pres"),
                avg_temperature: row.get("avg_temp"),
                avg_salinity: row.get("avg_psal"),
                distance,
            },
        ));
    }

    scored.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    Ok(scored
        .into_iter()
        .take(n)
        .enumerate()
        .map(|(i, (_, _, mut m))| {
            m.rank = i + 1;
            m
        })
        .collect())
}

fn display_date(juld: &str) -> String {
    crate::import::parse_datetime(juld)
        .map(|dt| crate::profiles::iso_timestamp(&dt))
        .unwrap_or_else(|| juld.to_string())
}

pub async fn run_search(config: &Config, query: &str, n_results: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let n = n_results.unwrap_or(config.retrieval.n_results);
    let outcome = search_profiles(&pool, config, query, n).await?;
    pool.close().await;

    print_matches(query, &outcome);
    Ok(())
}

pub fn print_matches(query: &str, outcome: &SearchOutcome) {
    if outcome.matches.is_empty() {
        println!("No matches found for '{}'", query);
        return;
    }

    match outcome.filter_label() {
        Some(label) => println!("Top matches for: {} (structured filter applied: {})", query, label),
        None => println!("Top matches for: {}", query),
    }
    for m in &outcome.matches {
        println!("Rank {}", m.rank);
        println!("   Platform: {}", m.platform_number);
        println!("   Cycle: {}", m.cycle_number);
        println!("   Date: {}", m.date);
        println!("   Location: ({:.5}, {:.5})", m.latitude, m.longitude);
        println!("   Pressure Range: {} - {}", m.min_pressure, m.max_pressure);
        println!("   Avg Temp: {}", m.avg_temperature);
        println!("   Avg Salinity: {}", m.avg_salinity);
        println!("   Distance: {:.4}", m.distance);
        println!("{}", "-".repeat(60));
    }
}
