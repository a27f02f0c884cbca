//! # Argo Harness CLI (`argo`)
//!
//! The `argo` binary drives the whole pipeline: cleaning raw profiles,
//! importing lean CSVs into the store, embedding profile summaries,
//! semantic search, RAG answers, and the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! argo --config ./config/argo.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `argo init` | Create the SQLite database and run schema migrations |
//! | `argo clean <input>` | QC and bin one `.nc`/`.csv` profile into a lean CSV |
//! | `argo import <folder>` | Upsert lean CSVs into `argo_data` |
//! | `argo embed pending` | Embed new or changed profiles |
//! | `argo embed rebuild` | Clear and regenerate all profile vectors |
//! | `argo search "<query>"` | Semantic search with date filtering |
//! | `argo ask "<query>"` | Search, then summarize the matches with the LLM |
//! | `argo profile <platform> <juld>` | Print one measured depth profile |
//! | `argo stats` | Store overview |
//! | `argo serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! argo init
//! argo clean data/R2902746_001.nc --output processed/R2902746_001.csv
//! argo import processed/
//! argo embed pending
//! argo search "warm surface water May 2019"
//! argo ask "plot the temperature profile near the equator in 2021"
//! argo serve
//! ```

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use argo_harness::config::{self, Config};
use argo_harness::import::ImportOptions;
use argo_harness::progress::ProgressMode;
use argo_harness::{clean, embed_cmd, get, import, migrate, rag, search, server, stats};

/// Argo Harness CLI: Argo float QC, ingestion, semantic retrieval and RAG.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/argo.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "argo",
    about = "Argo Harness: Argo float QC, ingestion, semantic retrieval and RAG answers",
    version,
    long_about = "Argo Harness cleans and bins Argo profile files, imports them into a local \
    SQLite store, embeds per-profile summaries, and answers natural-language questions through \
    semantic search and an LLM, from the CLI or an HTTP API."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/argo.toml`.
    #[arg(long, global = true, default_value = "./config/argo.toml")]
    config: PathBuf,

    /// Progress reporting on stderr: `auto`, `off`, `human`, or `json`.
    ///
    /// `auto` shows human progress when stderr is a terminal.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables. Running it
    /// again is safe.
    Init,

    /// Clean, QC and bin one profile file.
    ///
    /// Reads a NetCDF (`.nc`, needs the `netcdf-source` feature) or CSV
    /// profile and writes the lean binned CSV.
    Clean {
        /// Input `.nc` or `.csv` file.
        input: PathBuf,

        /// Output CSV path. Defaults to `<input stem>_clean.csv` beside the input.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pressure bin width in decibar (overrides `[cleaning].bin_size`).
        #[arg(long)]
        bin_size: Option<f64>,
    },

    /// Import lean CSVs from a folder into the store.
    ///
    /// Files whose content is unchanged since the last import are skipped.
    Import {
        /// Folder containing lean CSV files.
        folder: PathBuf,

        /// Glob pattern for file names (overrides `[ingest].pattern`).
        #[arg(long)]
        pattern: Option<String>,

        /// Rows per upsert batch (overrides `[ingest].batch_size`).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Re-import files even when their content hash is unchanged.
        #[arg(long)]
        full: bool,

        /// Parse and count rows without writing to the database.
        #[arg(long)]
        dry_run: bool,
    },

    /// Manage profile embedding vectors.
    Embed {
        #[command(subcommand)]
        action: EmbedAction,
    },

    /// Semantic search over embedded profiles.
    ///
    /// A year (and month) mentioned in the query narrows the candidates.
    Search {
        /// The search query string.
        query: String,

        /// Number of matches to return.
        #[arg(long)]
        n_results: Option<usize>,
    },

    /// Search, then summarize the matches with the configured LLM.
    Ask {
        /// The question.
        query: String,

        /// Number of matches to retrieve.
        #[arg(long)]
        n_results: Option<usize>,
    },

    /// Print the measured levels of one profile.
    Profile {
        /// Platform number.
        platform: String,

        /// Profile time, e.g. `2019-05-01T06:30:00`.
        juld: String,
    },

    /// Show store statistics.
    Stats,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

/// Embedding management subcommands.
#[derive(Subcommand)]
enum EmbedAction {
    /// Embed profiles that are new, changed, or embedded with another model.
    Pending {
        /// Maximum number of profiles to embed in this run.
        #[arg(long)]
        limit: Option<usize>,

        /// Override the batch size from config (number of texts per call).
        #[arg(long)]
        batch_size: Option<usize>,

        /// Show counts without performing any embedding.
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete and regenerate all profile vectors.
    Rebuild {
        /// Override the batch size from config (number of texts per call).
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn progress_mode(raw: &str) -> anyhow::Result<ProgressMode> {
    Ok(match raw {
        "auto" => ProgressMode::default_for_tty(),
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        other => bail!("invalid --progress value '{}': use auto, off, human, or json", other),
    })
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);
    let progress = progress_mode(&cli.progress)?.reporter();

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Clean {
            input,
            output,
            bin_size,
        } => {
            clean::run_clean(&cfg, &input, output.as_deref(), bin_size)?;
        }
        Commands::Import {
            folder,
            pattern,
            batch_size,
            full,
            dry_run,
        } => {
            let opts = ImportOptions {
                pattern,
                batch_size,
                full,
                dry_run,
            };
            import::run_import(&cfg, &folder, &opts, progress.as_ref()).await?;
        }
        Commands::Embed { action } => match action {
            EmbedAction::Pending {
                limit,
                batch_size,
                dry_run,
            } => {
                embed_cmd::run_embed_pending(&cfg, limit, batch_size, dry_run, progress.as_ref())
                    .await?;
            }
            EmbedAction::Rebuild { batch_size } => {
                embed_cmd::run_embed_rebuild(&cfg, batch_size, progress.as_ref()).await?;
            }
        },
        Commands::Search { query, n_results } => {
            search::run_search(&cfg, &query, n_results).await?;
        }
        Commands::Ask { query, n_results } => {
            rag::run_ask(&cfg, &query, n_results).await?;
        }
        Commands::Profile { platform, juld } => {
            get::run_profile(&cfg, &platform, &juld).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
