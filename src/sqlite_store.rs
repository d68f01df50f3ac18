//! SQLite-backed [`Store`] implementation.
//!
//! Timestamps are stored as integer milliseconds since the Unix epoch;
//! operations, lineage and run metadata are JSON text columns.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use chapmap_core::models::{
    ActiveRunPointer, Chapter, LockRow, NewRun, Run, RunCompletion, RunStage, RunStatus,
};
use chapmap_core::store::Store;
use chapmap_core::text::content_hash;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn to_ms(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn run_from_row(row: &SqliteRow) -> Result<Run> {
    let status: String = row.try_get("status")?;
    let operations: String = row.try_get("operations_json")?;
    let final_map: String = row.try_get("final_map_json")?;
    let meta: String = row.try_get("meta_json")?;
    let run_id: String = row.try_get("run_id")?;

    Ok(Run {
        adaptation_id: row.try_get("adaptation_id")?,
        detected_count: row.try_get::<i64, _>("detected_count")? as usize,
        target_count: row.try_get::<i64, _>("target_count")? as usize,
        started_at: from_ms(row.try_get("started_at")?),
        finished_at: row.try_get::<Option<i64>, _>("finished_at")?.map(from_ms),
        duration_ms: row.try_get("duration_ms")?,
        operations: serde_json::from_str(&operations)
            .with_context(|| format!("corrupt operations_json for run {}", run_id))?,
        final_map: serde_json::from_str(&final_map)
            .with_context(|| format!("corrupt final_map_json for run {}", run_id))?,
        status: status.parse::<RunStatus>().map_err(anyhow::Error::msg)?,
        error: row.try_get("error")?,
        meta: serde_json::from_str(&meta)
            .with_context(|| format!("corrupt meta_json for run {}", run_id))?,
        run_id,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn create_run(&self, run: &NewRun) -> Result<()> {
        let started = to_ms(run.started_at);
        sqlx::query(
            r#"
            INSERT INTO adaptation_runs (run_id, adaptation_id, detected_count, target_count,
                                         started_at, status, updated_at)
            VALUES (?, ?, ?, ?, ?, 'running', ?)
            "#,
        )
        .bind(&run.run_id)
        .bind(run.adaptation_id)
        .bind(run.detected_count as i64)
        .bind(run.target_count as i64)
        .bind(started)
        .bind(started)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_run(&self, run_id: &str, completion: &RunCompletion) -> Result<bool> {
        let operations = serde_json::to_string(&completion.operations)?;
        let final_map = serde_json::to_string(&completion.final_map)?;
        let meta = serde_json::to_string(&completion.meta)?;
        let finished = to_ms(completion.finished_at);

        let result = sqlx::query(
            r#"
            UPDATE adaptation_runs SET
                finished_at = ?,
                detected_count = ?,
                target_count = ?,
                duration_ms = ?,
                operations_json = ?,
                final_map_json = ?,
                status = ?,
                error = ?,
                meta_json = ?,
                updated_at = ?
            WHERE run_id = ? AND status = 'running'
            "#,
        )
        .bind(finished)
        .bind(completion.detected_count as i64)
        .bind(completion.target_count as i64)
        .bind(completion.duration_ms)
        .bind(&operations)
        .bind(&final_map)
        .bind(completion.status.as_str())
        .bind(completion.error.as_ref().map(|e| e.code()))
        .bind(&meta)
        .bind(finished)
        .bind(run_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_run(&self, run_id: &str) -> Result<Option<Run>> {
        let row = sqlx::query("SELECT * FROM adaptation_runs WHERE run_id = ?")
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn get_last_run(&self, adaptation_id: i64) -> Result<Option<Run>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM adaptation_runs
            WHERE adaptation_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(adaptation_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(run_from_row).transpose()
    }

    async fn upsert_active_pointer(&self, pointer: &ActiveRunPointer) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO active_runs (adaptation_id, run_id, stage, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(adaptation_id) DO UPDATE SET
                run_id = excluded.run_id,
                stage = excluded.stage,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(pointer.adaptation_id)
        .bind(&pointer.run_id)
        .bind(pointer.stage.as_str())
        .bind(to_ms(pointer.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_active_pointer(&self, adaptation_id: i64, run_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM active_runs WHERE adaptation_id = ? AND run_id = ?")
            .bind(adaptation_id)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_active_pointer(&self, adaptation_id: i64) -> Result<Option<ActiveRunPointer>> {
        let row = sqlx::query(
            "SELECT adaptation_id, run_id, stage, updated_at FROM active_runs WHERE adaptation_id = ?",
        )
        .bind(adaptation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let stage: String = row.try_get("stage")?;
                Ok(Some(ActiveRunPointer {
                    adaptation_id: row.try_get("adaptation_id")?,
                    run_id: row.try_get("run_id")?,
                    stage: stage.parse::<RunStage>().map_err(anyhow::Error::msg)?,
                    updated_at: from_ms(row.try_get("updated_at")?),
                }))
            }
            None => Ok(None),
        }
    }

    async fn try_insert_lock(
        &self,
        adaptation_id: i64,
        holder: &str,
        acquired_at: DateTime<Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO adaptation_locks (adaptation_id, holder, acquired_at)
            VALUES (?, ?, ?)
            ON CONFLICT(adaptation_id) DO NOTHING
            "#,
        )
        .bind(adaptation_id)
        .bind(holder)
        .bind(to_ms(acquired_at))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_lock(&self, adaptation_id: i64, holder: &str) -> Result<()> {
        sqlx::query("DELETE FROM adaptation_locks WHERE adaptation_id = ? AND holder = ?")
            .bind(adaptation_id)
            .bind(holder)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_lock(&self, adaptation_id: i64) -> Result<Option<LockRow>> {
        let row = sqlx::query(
            "SELECT adaptation_id, holder, acquired_at FROM adaptation_locks WHERE adaptation_id = ?",
        )
        .bind(adaptation_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(LockRow {
                adaptation_id: row.try_get("adaptation_id")?,
                holder: row.try_get("holder")?,
                acquired_at: from_ms(row.try_get("acquired_at")?),
            })),
            None => Ok(None),
        }
    }

    async fn get_chapters(&self, adaptation_id: i64) -> Result<Vec<Chapter>> {
        let rows = sqlx::query(
            r#"
            SELECT chapter_number, text, hash FROM chapters
            WHERE adaptation_id = ?
            ORDER BY chapter_number ASC
            "#,
        )
        .bind(adaptation_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(Chapter {
                    chapter_number: row.try_get("chapter_number")?,
                    text: row.try_get("text")?,
                    hash: row.try_get("hash")?,
                })
            })
            .collect()
    }

    async fn replace_chapters(&self, adaptation_id: i64, texts: &[String]) -> Result<()> {
        let now = to_ms(Utc::now());
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chapters WHERE adaptation_id = ?")
            .bind(adaptation_id)
            .execute(&mut *tx)
            .await?;

        for (i, text) in texts.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO chapters (adaptation_id, chapter_number, text, hash, status, created_at)
                VALUES (?, ?, ?, ?, 'pending', ?)
                "#,
            )
            .bind(adaptation_id)
            .bind(i as i64 + 1)
            .bind(text)
            .bind(content_hash(text))
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_adaptation(&self, adaptation_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in ["chapters", "adaptation_runs", "active_runs", "adaptation_locks"] {
            let sql = format!("DELETE FROM {} WHERE adaptation_id = ?", table);
            sqlx::query(&sql)
                .bind(adaptation_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
