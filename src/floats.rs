//! Dashboard queries over `argo_data`: latest record per float and float
//! trajectories within a year.

use anyhow::Result;
use chrono::NaiveDateTime;
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;

use crate::import::parse_datetime;

const EARTH_RADIUS_KM: f64 = 6371.0;
/// A float whose latest position is at most this old counts as active.
pub const ACTIVE_WITHIN_DAYS: i64 = 30;
pub const MAX_TRAJECTORIES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FloatRecord {
    pub platform_number: String,
    pub cycle_number: Option<i64>,
    pub juld: String,
    pub platform_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub pres: Option<f64>,
    pub temp: Option<f64>,
    pub psal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Position {
    pub lat: f64,
    pub lon: f64,
    pub date: String,
    pub cycle: i64,
    pub depth: Option<f64>,
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Bounds {
    pub north: f64,
    pub south: f64,
    pub east: f64,
    pub west: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    pub id: String,
    pub name: String,
    pub platform_type: String,
    pub start_date: String,
    pub status: String,
    pub distance_km: f64,
    pub total_cycles: i64,
    pub earliest_position: Position,
    pub latest_position: Position,
    pub bounds: Bounds,
    pub positions: Vec<Position>,
}

/// A profile position as loaded for trajectory building.
#[derive(Debug, Clone)]
pub struct TrackPoint {
    pub platform_number: String,
    pub platform_type: Option<String>,
    pub position: Position,
}

fn year_range(year: i32) -> (String, String) {
    (
        format!("{:04}-01-01 00:00:00", year),
        format!("{:04}-01-01 00:00:00", year + 1),
    )
}

/// Most recent record of every float observed in `year`.
pub async fn latest_per_float(pool: &SqlitePool, year: i32) -> Result<Vec<FloatRecord>> {
    let (start, end) = year_range(year);
    let rows = sqlx::query(
        r#"
        SELECT platform_number, cycle_number, juld, platform_type, latitude, longitude, pres, temp, psal
        FROM (
            SELECT *, ROW_NUMBER() OVER (
                PARTITION BY platform_number ORDER BY juld DESC, pres ASC
            ) AS rn
            FROM argo_data
            WHERE platform_number IS NOT NULL AND juld >= ? AND juld < ?
        )
        WHERE rn = 1
        ORDER BY platform_number
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| FloatRecord {
            platform_number: row.get("platform_number"),
            cycle_number: row.get("cycle_number"),
            juld: row.get("juld"),
            platform_type: row.get("platform_type"),
            latitude: row.get("latitude"),
            longitude: row.get("longitude"),
            pres: row.get("pres"),
            temp: row.get("temp"),
            psal: row.get("psal"),
        })
        .collect())
}

/// Trajectories of floats observed in `year`, optionally one float only.
pub async fn trajectories(
    pool: &SqlitePool,
    year: i32,
    float: Option<&str>,
    now: NaiveDateTime,
) -> Result<Vec<Trajectory>> {
    let (start, end) = year_range(year);
    let rows = sqlx::query(
        r#"
        SELECT platform_number, MAX(platform_type) AS platform_type,
               COALESCE(cycle_number, 0) AS cycle_number, juld, latitude, longitude,
               MAX(pres) AS depth, AVG(temp) AS temp, AVG(psal) AS psal
        FROM argo_data
        WHERE platform_number IS NOT NULL
          AND latitude IS NOT NULL AND longitude IS NOT NULL
          AND juld >= ? AND juld < ?
          AND (? IS NULL OR platform_number = ?)
        GROUP BY platform_number, cycle_number, juld, latitude, longitude
        ORDER BY platform_number, juld
        "#,
    )
    .bind(&start)
    .bind(&end)
    .bind(float)
    .bind(float)
    .fetch_all(pool)
    .await?;

    let points = rows
        .iter()
        .map(|row| TrackPoint {
            platform_number: row.get("platform_number"),
            platform_type: row.get("platform_type"),
            position: Position {
                lat: row.get("latitude"),
                lon: row.get("longitude"),
                date: row.get("juld"),
                cycle: row.get("cycle_number"),
                depth: row.get("depth"),
                temperature: row.get("temp"),
                salinity: row.get("psal"),
            },
        })
        .collect();

    Ok(build_trajectories(points, now))
}

/// Group points per float and summarize each track. Most recent floats
/// first, at most [`MAX_TRAJECTORIES`].
pub fn build_trajectories(points: Vec<TrackPoint>, now: NaiveDateTime) -> Vec<Trajectory> {
    let mut grouped: BTreeMap<String, (Option<String>, Vec<Position>)> = BTreeMap::new();
    for p in points {
        let entry = grouped.entry(p.platform_number).or_insert((None, Vec::new()));
        if entry.0.is_none() {
            entry.0 = p.platform_type;
        }
        entry.1.push(p.position);
    }

    let mut out: Vec<Trajectory> = grouped
        .into_iter()
        .filter_map(|(id, (platform_type, mut positions))| {
            positions.sort_by(|a, b| a.date.cmp(&b.date));
            let earliest = positions.first()?.clone();
            let latest = positions.last()?.clone();

            let distance_km: f64 = positions
                .windows(2)
                .map(|w| haversine_km(w[0].lat, w[0].lon, w[1].lat, w[1].lon))
                .sum();

            let bounds = Bounds {
                north: positions.iter().map(|p| p.lat).fold(f64::MIN, f64::max),
                south: positions.iter().map(|p| p.lat).fold(f64::MAX, f64::min),
                east: positions.iter().map(|p| p.lon).fold(f64::MIN, f64::max),
                west: positions.iter().map(|p| p.lon).fold(f64::MAX, f64::min),
            };

            let active = parse_datetime(&latest.date)
                .map(|ts| (now - ts).num_days() <= ACTIVE_WITHIN_DAYS)
                .unwrap_or(false);

            Some(Trajectory {
                name: format!("Float {}", id),
                id,
                platform_type: platform_type.unwrap_or_else(|| "Unknown".to_string()),
                start_date: earliest.date.clone(),
                status: if active { "Active" } else { "Inactive" }.to_string(),
                distance_km: (distance_km * 10.0).round() / 10.0,
                total_cycles: positions.iter().map(|p| p.cycle).max().unwrap_or(0),
                earliest_position: earliest,
                latest_position: latest,
                bounds,
                positions,
            })
        })
        .collect();

    out.sort_by(|a, b| b.latest_position.date.cmp(&a.latest_position.date));
    out.truncate(MAX_TRAJECTORIES);
    out
}

/// Great-circle distance in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().atan2((1.0 - a).sqrt())
}
