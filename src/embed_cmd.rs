use anyhow::{bail, Result};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingProvider};
use crate::models::ProfileDocument;
use crate::profiles;
use crate::progress::{ProgressEvent, ProgressReporter};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct EmbedStats {
    pub embedded: u64,
    pub failed: u64,
}

/// Embed profiles whose document is new, changed, or embedded with another model.
pub async fn run_embed_pending(
    config: &Config,
    limit: Option<usize>,
    batch_size_override: Option<usize>,
    dry_run: bool,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    let pending = find_pending_profiles(&pool, provider.model_name(), limit).await?;

    if dry_run {
        println!("embed pending (dry-run)");
        println!("  profiles needing embeddings: {}", pending.len());
        pool.close().await;
        return Ok(());
    }

    if pending.is_empty() {
        println!("embed pending");
        println!("  all profiles up to date");
        pool.close().await;
        return Ok(());
    }

    let total = pending.len();
    let stats = embed_documents(&pool, config, provider.as_ref(), &pending, batch_size, progress).await?;

    println!("embed pending");
    println!("  total pending: {}", total);
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

/// Clear the vector store and embed every profile again.
pub async fn run_embed_rebuild(
    config: &Config,
    batch_size_override: Option<usize>,
    progress: &dyn ProgressReporter,
) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in config.");
    }

    let provider = embedding::create_provider(&config.embedding)?;
    let pool = db::connect(config).await?;
    let batch_size = batch_size_override.unwrap_or(config.embedding.batch_size);

    sqlx::query("DELETE FROM profile_vectors").execute(&pool).await?;
    println!("embed rebuild: cleared existing vectors");

    let all = find_pending_profiles(&pool, provider.model_name(), None).await?;
    if all.is_empty() {
        println!("  no profiles to embed");
        pool.close().await;
        return Ok(());
    }

    let stats = embed_documents(&pool, config, provider.as_ref(), &all, batch_size, progress).await?;

    println!("embed rebuild");
    println!("  total profiles: {}", all.len());
    println!("  embedded: {}", stats.embedded);
    println!("  failed: {}", stats.failed);

    pool.close().await;
    Ok(())
}

/// Embed documents in batches. A failed batch is logged and counted, not fatal.
pub async fn embed_documents(
    pool: &SqlitePool,
    config: &Config,
    provider: &dyn EmbeddingProvider,
    docs: &[ProfileDocument],
    batch_size: usize,
    progress: &dyn ProgressReporter,
) -> Result<EmbedStats> {
    let mut stats = EmbedStats::default();
    let total = docs.len() as u64;

    for batch in docs.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();

        match embedding::embed_texts(provider, &config.embedding, &texts).await {
            Ok(vectors) => {
                for (doc, vec) in batch.iter().zip(vectors.iter()) {
                    upsert_vector(pool, doc, provider.model_name(), vec).await?;
                    stats.embedded += 1;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, batch = batch.len(), "embedding batch failed");
                stats.failed += batch.len() as u64;
            }
        }
        progress.report(ProgressEvent::Embedding {
            n: stats.embedded + stats.failed,
            total,
        });
    }

    Ok(stats)
}

/// Profiles with no vector, a stale document hash, or a vector from another model.
pub async fn find_pending_profiles(
    pool: &SqlitePool,
    model: &str,
    limit: Option<usize>,
) -> Result<Vec<ProfileDocument>> {
    let stored: HashMap<String, (String, String)> =
        sqlx::query("SELECT profile_id, hash, model FROM profile_vectors")
            .fetch_all(pool)
            .await?
            .iter()
            .map(|row| (row.get("profile_id"), (row.get("hash"), row.get("model"))))
            .collect();

    let docs = profiles::build_documents(profiles::load_profile_summaries(pool).await?);
    Ok(docs
        .into_iter()
        .filter(|doc| match stored.get(&doc.id) {
            Some((hash, stored_model)) => hash != &doc.hash || stored_model != model,
            None => true,
        })
        .take(limit.unwrap_or(usize::MAX))
        .collect())
}

/// Store one profile vector together with the metadata search filters on.
pub async fn upsert_vector(
    pool: &SqlitePool,
    doc: &ProfileDocument,
    model: &str,
    vector: &[f32],
) -> Result<()> {
    let s = &doc.summary;
    let now = chrono::Utc::now().timestamp();

    sqlx::query(
        r#"
        INSERT INTO profile_vectors (profile_id, platform_number, cycle_number, juld, latitude, longitude,
            min_pres, max_pres, avg_temp, avg_psal, year, month, document, hash, model, dims, embedding, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(profile_id) DO UPDATE SET
            platform_number = excluded.platform_number,
            cycle_number = excluded.cycle_number,
            juld = excluded.juld,
            latitude = excluded.latitude,
            longitude = excluded.longitude,
            min_pres = excluded.min_pres,
            max_pres = excluded.max_pres,
            avg_temp = excluded.avg_temp,
            avg_psal = excluded.avg_psal,
            year = excluded.year,
            month = excluded.month,
            document = excluded.document,
            hash = excluded.hash,
            model = excluded.model,
            dims = excluded.dims,
            embedding = excluded.embedding,
            created_at = excluded.created_at
        "#,
    )
    .bind(&doc.id)
    .bind(&s.platform_number)
    .bind(s.cycle_number)
    .bind(&s.juld)
    .bind(s.latitude.unwrap_or(0.0))
    .bind(s.longitude.unwrap_or(0.0))
    .bind(s.min_pres.unwrap_or(0.0))
    .bind(s.max_pres.unwrap_or(0.0))
    .bind(s.avg_temp.unwrap_or(0.0))
    .bind(s.avg_psal.unwrap_or(0.0))
    .bind(doc.year)
    .bind(doc.month)
    .bind(&doc.text)
    .bind(&doc.hash)
    .bind(model)
    .bind(vector.len() as i64)
    .bind(embedding::vec_to_blob(vector))
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::upsert_records;
    use crate::models::ArgoRecord;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn level(platform: &str, day: u32, pres: f64) -> ArgoRecord {
        ArgoRecord {
            platform_number: Some(platform.to_string()),
            cycle_number: Some(day as i64),
            direction: Some("A".to_string()),
            date_creation: None,
            platform_type: None,
            juld: NaiveDate::from_ymd_opt(2019, 2, day)
                .unwrap()
                .and_hms_opt(6, 0, 0)
                .unwrap(),
            latitude: Some(12.0),
            longitude: Some(65.0),
            data_mode: Some("R".to_string()),
            pres: Some(pres),
            temp: Some(20.0 - pres / 100.0),
            psal: Some(35.0),
        }
    }

    #[tokio::test]
    async fn pending_tracks_hash_and_model() {
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
            &[level("A", 1, 5.0), level("A", 1, 15.0), level("B", 2, 5.0)],
            1000,
        )
        .await
        .unwrap();

        let pending = find_pending_profiles(&pool, "m1", None).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(find_pending_profiles(&pool, "m1", Some(1)).await.unwrap().len(), 1);

        for doc in &pending {
            upsert_vector(&pool, doc, "m1", &[1.0, 0.0]).await.unwrap();
        }
        assert!(find_pending_profiles(&pool, "m1", None).await.unwrap().is_empty());
        // another model makes every vector stale
        assert_eq!(find_pending_profiles(&pool, "m2", None).await.unwrap().len(), 2);

        // a new level changes profile A's summary
        upsert_records(&pool, &[level("A", 1, 25.0)], 1000).await.unwrap();
        let stale = find_pending_profiles(&pool, "m1", None).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert!(stale[0].id.starts_with("A_1_"));
    }
}
