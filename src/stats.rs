//! Database statistics and health overview.
//!
//! Summarizes what has been ingested: event counts, where diffs ended up
//! (inline, offloaded, absent), analysis coverage, and a per-repository
//! breakdown. Used by `pushlens stats`.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::store::format_ts_iso;

/// Per-repository breakdown.
struct RepositoryStats {
    repository: String,
    event_count: i64,
    offloaded_count: i64,
    analyzed_count: i64,
    last_event_ts: Option<i64>,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;

    let totals = sqlx::query(
        r#"
        SELECT
            COUNT(*) AS total,
            COALESCE(SUM(CASE WHEN diff_patch IS NOT NULL THEN 1 ELSE 0 END), 0) AS inline_count,
            COALESCE(SUM(CASE WHEN diff_url IS NOT NULL THEN 1 ELSE 0 END), 0) AS offloaded_count,
            COALESCE(SUM(CASE WHEN analysis_json IS NOT NULL THEN 1 ELSE 0 END), 0) AS analyzed_count,
            COALESCE(SUM(LENGTH(diff_patch)), 0) AS inline_bytes
        FROM events
        "#,
    )
    .fetch_one(&pool)
    .await?;

    let total: i64 = totals.get("total");
    let inline_count: i64 = totals.get("inline_count");
    let offloaded_count: i64 = totals.get("offloaded_count");
    let analyzed_count: i64 = totals.get("analyzed_count");
    let inline_bytes: i64 = totals.get("inline_bytes");

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("pushlens database stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Events:      {}", total);
    println!(
        "  Diffs:       {} inline ({}), {} offloaded, {} absent",
        inline_count,
        format_bytes(inline_bytes.max(0) as u64),
        offloaded_count,
        total - inline_count - offloaded_count
    );
    println!(
        "  Analyzed:    {} / {} ({}%)",
        analyzed_count,
        total,
        if total > 0 {
            (analyzed_count * 100) / total
        } else {
            0
        }
    );

    let rows = sqlx::query(
        r#"
        SELECT
            repository,
            COUNT(*) AS event_count,
            SUM(CASE WHEN diff_url IS NOT NULL THEN 1 ELSE 0 END) AS offloaded_count,
            SUM(CASE WHEN analysis_json IS NOT NULL THEN 1 ELSE 0 END) AS analyzed_count,
            MAX(created_at) AS last_event_ts
        FROM events
        GROUP BY repository
        ORDER BY event_count DESC, repository ASC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    let repo_stats: Vec<RepositoryStats> = rows
        .iter()
        .map(|row| RepositoryStats {
            repository: row.get("repository"),
            event_count: row.get("event_count"),
            offloaded_count: row.get("offloaded_count"),
            analyzed_count: row.get("analyzed_count"),
            last_event_ts: row.get("last_event_ts"),
        })
        .collect();

    if !repo_stats.is_empty() {
        println!();
        println!("  By repository:");
        println!(
            "  {:<32} {:>7} {:>9} {:>9}   {}",
            "REPOSITORY", "EVENTS", "OFFLOADED", "ANALYZED", "LAST EVENT"
        );
        println!("  {}", "-".repeat(80));

        for s in &repo_stats {
            let last_display = match s.last_event_ts {
                Some(ts) => format_ts_relative(ts),
                None => "never".to_string(),
            };
            println!(
                "  {:<32} {:>7} {:>9} {:>9}   {}",
                s.repository, s.event_count, s.offloaded_count, s.analyzed_count, last_display
            );
        }
    }

    println!();

    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
