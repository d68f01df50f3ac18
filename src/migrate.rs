use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create every table and index if missing. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Chapters of each adaptation, replaced wholesale by a successful run
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            adaptation_id INTEGER NOT NULL,
            chapter_number INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            created_at INTEGER NOT NULL,
            UNIQUE(adaptation_id, chapter_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per normalization attempt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS adaptation_runs (
            run_id TEXT PRIMARY KEY,
            adaptation_id INTEGER NOT NULL,
            detected_count INTEGER NOT NULL,
            target_count INTEGER NOT NULL,
            started_at INTEGER NOT NULL,
            finished_at INTEGER,
            duration_ms INTEGER,
            operations_json TEXT NOT NULL DEFAULT '[]',
            final_map_json TEXT NOT NULL DEFAULT '[]',
            status TEXT NOT NULL DEFAULT 'running',
            error TEXT,
            meta_json TEXT NOT NULL DEFAULT '{}',
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Durable pointer to the in-flight run of an adaptation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS active_runs (
            adaptation_id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            stage TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one row per adaptation: the lock itself
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS adaptation_locks (
            adaptation_id INTEGER PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_runs_adaptation_started ON adaptation_runs(adaptation_id, started_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chapters_adaptation ON chapters(adaptation_id, chapter_number)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}
