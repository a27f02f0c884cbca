use anyhow::Result;

use crate::config::Config;
use crate::db;

/// Identity of one measured level in `argo_data`. SQLite unique indexes
/// treat NULLs as distinct, so missing platform and pressure are folded
/// into sentinels. The upsert conflict target must repeat it verbatim.
pub const LEVEL_KEY: &str = "COALESCE(platform_number, ''), juld, COALESCE(pres, -1.0e308)";

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    // Observations, one row per (float, time, pressure level)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS argo_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            platform_number TEXT,
            cycle_number INTEGER,
            direction TEXT,
            date_creation TEXT,
            platform_type TEXT,
            juld TEXT NOT NULL,
            latitude REAL,
            longitude REAL,
            data_mode TEXT,
            pres REAL,
            temp REAL,
            psal REAL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Files already imported, keyed by path
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS imported_files (
            path TEXT PRIMARY KEY,
            hash TEXT NOT NULL,
            rows INTEGER NOT NULL,
            imported_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Vector store: one embedded summary per profile
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS profile_vectors (
            profile_id TEXT PRIMARY KEY,
            platform_number TEXT NOT NULL,
            cycle_number INTEGER NOT NULL,
            juld TEXT NOT NULL,
            latitude REAL NOT NULL,
            longitude REAL NOT NULL,
            min_pres REAL NOT NULL,
            max_pres REAL NOT NULL,
            avg_temp REAL NOT NULL,
            avg_psal REAL NOT NULL,
            year INTEGER NOT NULL,
            month INTEGER NOT NULL,
            document TEXT NOT NULL,
            hash TEXT NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(&pool)
    .await?;

    // Create indexes
    // Superseded by ux_argo_level; collapse duplicates it let through
    sqlx::query("DROP INDEX IF EXISTS ux_argo_platform_juld_pres")
        .execute(&pool)
        .await?;
    sqlx::query(&format!(
        "DELETE FROM argo_data WHERE id NOT IN (SELECT MAX(id) FROM argo_data GROUP BY {LEVEL_KEY})"
    ))
    .execute(&pool)
    .await?;
    sqlx::query(&format!(
        "CREATE UNIQUE INDEX IF NOT EXISTS ux_argo_level ON argo_data({LEVEL_KEY})"
    ))
    .execute(&pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_argo_platform_time ON argo_data(platform_number, juld DESC)",
    )
    .execute(&pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_argo_juld ON argo_data(juld)")
        .execute(&pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_profile_vectors_date ON profile_vectors(year, month)",
    )
    .execute(&pool)
    .await?;

    pool.close().await;
    Ok(())
}
