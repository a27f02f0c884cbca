//! # Argo Harness
//!
//! Argo float profiles from raw files to natural-language answers.
//!
//! Argo Harness cleans and bins raw profile files (NetCDF or CSV), imports
//! the lean result into a local SQLite store, embeds one summary document
//! per profile, and answers questions through semantic search with date
//! filtering plus an LLM summary. Everything is reachable from the `argo`
//! CLI and an HTTP API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────────┐
//! │ .nc / .csv   │──▶│ clean + bin │──▶│  lean CSV     │
//! └──────────────┘   └─────────────┘   └──────┬────────┘
//!                                             ▼ import
//!                    ┌──────────────┐   ┌───────────────┐
//!                    │   profiles   │◀──│   argo_data   │
//!                    └──────┬───────┘   └───────────────┘
//!                           ▼ embed
//!                    ┌──────────────┐   ┌───────────────┐
//!                    │profile_vectors│──▶│ search ─▶ RAG │
//!                    └──────────────┘   └──────┬────────┘
//!                                  ┌───────────┴──────┐
//!                                  ▼                  ▼
//!                             ┌─────────┐       ┌──────────┐
//!                             │   CLI   │       │   HTTP   │
//!                             │ (argo)  │       │  (axum)  │
//!                             └─────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! argo init                         # create database
//! argo clean raw/R2902746_001.nc    # QC + bin one profile
//! argo import processed/            # load lean CSVs
//! argo embed pending                # embed profile summaries
//! argo search "salinity May 2019"
//! argo serve                        # start HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`table`] | Row/column table used by the cleaner |
//! | [`netcdf_source`] | NetCDF profile loader |
//! | [`clean`] | QC, adjusted/raw reconciliation, pressure binning |
//! | [`import`] | Lean CSV folder import |
//! | [`profiles`] | Per-profile summaries and documents |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`embed_cmd`] | Vector store maintenance |
//! | [`search`] | Semantic search with date filtering |
//! | [`llm`] | Generative model client |
//! | [`rag`] | Retrieval-augmented answers |
//! | [`floats`] | Dashboard float and trajectory queries |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod clean;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod floats;
pub mod get;
pub mod import;
pub mod llm;
pub mod migrate;
pub mod models;
pub mod netcdf_source;
pub mod profiles;
pub mod progress;
pub mod rag;
pub mod retry;
pub mod search;
pub mod server;
pub mod stats;
pub mod table;
