//! Core data models used throughout Argo Harness.
//!
//! These types represent the observations, profile summaries, and search
//! results that flow through the import and retrieval pipeline.

use chrono::NaiveDateTime;
use serde::Serialize;

/// One observation row parsed from a lean CSV, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgoRecord {
    pub platform_number: Option<String>,
    pub cycle_number: Option<i64>,
    pub direction: Option<String>,
    pub date_creation: Option<NaiveDateTime>,
    pub platform_type: Option<String>,
    pub juld: NaiveDateTime,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub data_mode: Option<String>,
    pub pres: Option<f64>,
    pub temp: Option<f64>,
    pub psal: Option<f64>,
}

/// Aggregate of one profile (platform, cycle, time, position) in `argo_data`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileSummary {
    pub platform_number: String,
    pub cycle_number: i64,
    pub juld: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub min_pres: Option<f64>,
    pub max_pres: Option<f64>,
    pub avg_temp: Option<f64>,
    pub avg_psal: Option<f64>,
}

/// A profile prepared for the vector store.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileDocument {
    pub id: String,
    pub summary: ProfileSummary,
    pub year: i64,
    pub month: i64,
    pub text: String,
    pub hash: String,
}

/// A ranked retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileMatch {
    pub rank: usize,
    pub platform_number: String,
    pub cycle_number: String,
    pub date: String,
    pub latitude: f64,
    pub longitude: f64,
    pub min_pressure: f64,
    pub max_pressure: f64,
    pub avg_temperature: f64,
    pub avg_salinity: f64,
    /// Cosine distance, `1 - cos`. Lower is closer.
    pub distance: f64,
}

/// One measured level of a profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurement {
    pub pres: Option<f64>,
    pub temp: Option<f64>,
    pub psal: Option<f64>,
}
