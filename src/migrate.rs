use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // One row per (repository, commit_sha); a diff is either inline or offloaded
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            repository TEXT NOT NULL,
            commit_sha TEXT NOT NULL,
            event_type TEXT NOT NULL,
            git_ref TEXT,
            pusher TEXT,
            payload TEXT NOT NULL,
            diff_patch BLOB,
            diff_url TEXT,
            analysis_json TEXT,
            created_at INTEGER NOT NULL,
            UNIQUE(repository, commit_sha),
            CHECK (diff_patch IS NULL OR diff_url IS NULL)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_repository ON events(repository)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
