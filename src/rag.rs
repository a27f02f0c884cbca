//! Retrieval-augmented answers.
//!
//! A query is run through semantic search, the matches are rendered into a
//! context block, and the configured LLM summarizes them. Model failures
//! never fail the request: the summary carries the error text instead.
//! Plot requests additionally return the measured depth profile of the
//! top match.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::get::fetch_profile_rows;
use crate::llm;
use crate::models::ProfileMatch;
use crate::search::{self, SearchOutcome};

/// Context sent to the model when retrieval found nothing.
pub const NO_CONTEXT: &str = "No relevant Argo profiles found in the vector store.";

/// Summary returned without a model call when retrieval found nothing.
pub const NO_MATCHES_SUMMARY: &str =
    "No matching profiles found in the database for your request. Try a different query or time frame.";

const PLOT_KEYWORDS: [&str; 7] = [
    "plot",
    "graph",
    "chart",
    "profile",
    "depth",
    "temperature profile",
    "salinity profile",
];

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub n_results: Option<usize>,
    #[serde(default)]
    pub chat_history: Vec<HistoryMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlotPoint {
    pub depth: f64,
    pub temperature: Option<f64>,
    pub salinity: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub parsed_year: Option<i32>,
    pub parsed_month: Option<u32>,
    pub matches_found: bool,
    pub raw_matches: Vec<ProfileMatch>,
    pub summary: String,
    pub llm_context: String,
    pub total_results: usize,
    pub plot_requested: bool,
    pub plot_data_points: Option<Vec<PlotPoint>>,
}

/// Search, optionally load plot data, and summarize with the LLM.
pub async fn answer(pool: &SqlitePool, config: &Config, request: &QueryRequest) -> Result<QueryResponse> {
    let n = request.n_results.unwrap_or(config.retrieval.n_results);
    let outcome = search::search_profiles(pool, config, &request.query, n).await?;

    let llm_context = format_context(&outcome.matches);
    let plot_requested = is_plot_request(&request.query);

    let plot_data_points = match (plot_requested, outcome.matches.first()) {
        (true, Some(top)) => Some(load_plot_points(pool, top).await?),
        _ => None,
    };

    let summary = summarize(config, request, &outcome, &llm_context, plot_requested).await;

    Ok(QueryResponse {
        query: request.query.clone(),
        parsed_year: outcome.year,
        parsed_month: outcome.month,
        matches_found: !outcome.matches.is_empty(),
        total_results: outcome.matches.len(),
        raw_matches: outcome.matches,
        summary,
        llm_context,
        plot_requested,
        plot_data_points,
    })
}

async fn summarize(
    config: &Config,
    request: &QueryRequest,
    outcome: &SearchOutcome,
    context: &str,
    plot_requested: bool,
) -> String {
    if outcome.matches.is_empty() {
        return NO_MATCHES_SUMMARY.to_string();
    }

    let prompt = build_prompt(
        &request.query,
        context,
        &request.chat_history,
        config.llm.history_chars,
        plot_requested,
        outcome.year,
        outcome.month,
    );
    match llm::generate(&config.llm, &prompt).await {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!(error = %e, "summary generation failed");
            format!("Error generating summary: {}", e)
        }
    }
}

async fn load_plot_points(pool: &SqlitePool, top: &ProfileMatch) -> Result<Vec<PlotPoint>> {
    let levels = fetch_profile_rows(pool, &top.platform_number, &top.date).await?;
    Ok(levels
        .into_iter()
        .filter_map(|m| {
            m.pres.map(|depth| PlotPoint {
                depth,
                temperature: m.temp,
                salinity: m.psal,
            })
        })
        .collect())
}

pub fn is_plot_request(query: &str) -> bool {
    let lower = query.to_lowercase();
    PLOT_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// One line per match; [`NO_CONTEXT`] when there are none.
pub fn format_context(matches: &[ProfileMatch]) -> String {
    if matches.is_empty() {
        return NO_CONTEXT.to_string();
    }
    matches
        .iter()
        .map(|m| {
            format!(
                "Platform {} | Cycle {} | Date {} | Lat {}, Lon {} | Temp {} | Salinity {}",
                m.platform_number,
                m.cycle_number,
                m.date,
                m.latitude,
                m.longitude,
                m.avg_temperature,
                m.avg_salinity
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_history(history: &[HistoryMessage], max_chars: usize) -> String {
    history
        .iter()
        .map(|msg| {
            let role = if msg.role == "user" { "User" } else { "AI" };
            let content: String = msg
                .content
                .chars()
                .take(max_chars)
                .map(|c| if c == '\n' { ' ' } else { c })
                .collect();
            format!("[{}]: {}", role, content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn filter_info(year: Option<i32>, month: Option<u32>) -> String {
    match (year, month) {
        (Some(y), Some(m)) => format!("Applied a filter for month {} of year {}.", m, y),
        (Some(y), None) => format!("Applied a filter for year {}.", y),
        _ => "No date filter was applied.".to_string(),
    }
}

pub fn build_prompt(
    query: &str,
    context: &str,
    history: &[HistoryMessage],
    history_chars: usize,
    plot_requested: bool,
    year: Option<i32>,
    month: Option<u32>,
) -> String {
    let history = format_history(history, history_chars);
    let history = if history.is_empty() {
        "No recent history.".to_string()
    } else {
        history
    };

    let mut prompt = format!(
        "You are a marine science assistant. Be descriptive, friendly and accurate.\n\
         --- CONVERSATION CONTEXT ---\n\
         {}\n\
         --- FILTERING STATUS ---\n\
         {}\n\
         --- RAG CONTEXT (top retrieved Argo profiles) ---\n\
         {}\n\
         --- END CONTEXT ---\n\
         \n\
         The user's latest question is: \"{}\".\n\
         \n\
         Give a concise, descriptive summary of the data above.\n\
         1. State the date and location range of the retrieved profiles.\n\
         2. Mention the range of average temperatures and salinities.\n",
        history,
        filter_info(year, month),
        context,
        query
    );
    if plot_requested {
        prompt.push_str(
            "3. The user requested a plot. Confirm the plot's creation and describe the key trend visible in the data.\n",
        );
    }
    prompt
}

pub async fn run_ask(config: &Config, query: &str, n_results: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Ask requires embeddings. Set [embedding] provider in config.");
    }

    let pool = db::connect(config).await?;
    let request = QueryRequest {
        query: query.to_string(),
        n_results,
        chat_history: Vec::new(),
    };
    let response = answer(&pool, config, &request).await?;
    pool.close().await;

    let outcome = SearchOutcome {
        year: response.parsed_year,
        month: response.parsed_month,
        matches: response.raw_matches,
    };
    search::print_matches(query, &outcome);

    println!();
    println!("--- Summary ({}) ---", llm::model_name(&config.llm));
    println!("{}", response.summary);

    if let Some(points) = &response.plot_data_points {
        println!();
        println!("plot data: {} levels", points.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(platform: &str) -> ProfileMatch {
        ProfileMatch {
            rank: 1,
            platform_number: platform.to_string(),
            cycle_number: "12".to_string(),
            date: "2019-05-01T00:00:00".to_string(),
            latitude: 10.5,
            longitude: 70.25,
            min_pressure: 5.0,
            max_pressure: 1000.0,
            avg_temperature: 14.5,
            avg_salinity: 35.1,
            distance: 0.1,
        }
    }

    #[test]
    fn plot_keywords() {
        assert!(is_plot_request("Plot the temperature in May 2019"));
        assert!(is_plot_request("show the DEPTH structure"));
        assert!(!is_plot_request("warmest floats in 2020"));
    }

    #[test]
    fn context_lines() {
        assert_eq!(format_context(&[]), NO_CONTEXT);
        let ctx = format_context(&[hit("A"), hit("B")]);
        let lines: Vec<&str> = ctx.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(
            lines[0],
            "Platform A | Cycle 12 | Date 2019-05-01T00:00:00 | Lat 10.5, Lon 70.25 | Temp 14.5 | Salinity 35.1"
        );
    }

    #[test]
    fn history_is_truncated_and_flattened() {
        let history = vec![
            HistoryMessage {
                role: "user".to_string(),
                content: "line one\nline two and more".to_string(),
            },
            HistoryMessage {
                role: "assistant".to_string(),
                content: "ok".to_string(),
            },
        ];
        assert_eq!(format_history(&history, 13), "[User]: line one line\n[AI]: ok");
    }

    #[test]
    fn prompt_sections() {
        let prompt = build_prompt("plot May 2019", "CTX", &[], 200, true, Some(2019), Some(5));
        assert!(prompt.contains("No recent history."));
        assert!(prompt.contains("month 5 of year 2019"));
        assert!(prompt.contains("CTX"));
        assert!(prompt.contains("\"plot May 2019\""));
        assert!(prompt.contains("requested a plot"));

        let plain = build_prompt("warm water", "CTX", &[], 200, false, None, None);
        assert!(plain.contains("No date filter was applied."));
        assert!(!plain.contains("requested a plot"));
    }

    #[tokio::test]
    async fn empty_retrieval_skips_model() {
        let config: Config = toml::from_str("[db]\npath = 'unused.sqlite'\n").unwrap();
        let request = QueryRequest {
            query: "anything".to_string(),
            n_results: None,
            chat_history: Vec::new(),
        };
        let outcome = SearchOutcome::default();
        let summary = summarize(&config, &request, &outcome, NO_CONTEXT, false).await;
        assert_eq!(summary, NO_MATCHES_SUMMARY);
    }

    #[tokio::test]
    async fn model_failure_is_reported_in_summary() {
        let config: Config = toml::from_str("[db]\npath = 'unused.sqlite'\n").unwrap();
        let request = QueryRequest {
            query: "anything".to_string(),
            n_results: None,
            chat_history: Vec::new(),
        };
        let outcome = SearchOutcome {
            year: None,
            month: None,
            matches: vec![hit("A")],
        };
        let summary = summarize(&config, &request, &outcome, "ctx", false).await;
        assert!(summary.starts_with("Error generating summary:"));
    }
}
