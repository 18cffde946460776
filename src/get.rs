//! Event retrieval by `(repository, commit_sha)`.
//!
//! Used by both the `pushlens get` CLI command and the
//! `GET /events/{owner}/{repo}/{sha}` HTTP endpoint.

use anyhow::{bail, Result};
use serde::Serialize;

use crate::config::Config;
use crate::db;
use crate::error::PipelineError;
use crate::models::StorageRecord;
use crate::storage::decompress;
use crate::store::{format_ts_iso, EventFilter, EventStore, SqliteEventStore};

/// Stored event as returned to readers. Diff bytes are summarized, not
/// embedded.
#[derive(Debug, Clone, Serialize)]
pub struct EventDetail {
    pub repository: String,
    pub commit_sha: String,
    pub event_type: String,
    pub git_ref: Option<String>,
    pub pusher: Option<String>,
    pub created_at: String, // ISO8601
    /// `inline`, `offloaded` or `absent`.
    pub diff: String,
    pub diff_url: Option<String>,
    pub diff_compressed_bytes: Option<usize>,
    /// Time-limited download link for an offloaded diff.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_download_url: Option<String>,
    pub analysis: Option<serde_json::Value>,
    pub payload: serde_json::Value,
}

impl EventDetail {
    pub fn from_record(record: &StorageRecord) -> Self {
        let diff = match (&record.diff_patch, &record.diff_url) {
            (Some(_), _) => "inline",
            (None, Some(_)) => "offloaded",
            (None, None) => "absent",
        };
        Self {
            repository: record.repository.clone(),
            commit_sha: record.commit_sha.clone(),
            event_type: record.event_type.clone(),
            git_ref: record.git_ref.clone(),
            pusher: record.pusher.clone(),
            created_at: format_ts_iso(record.created_at.timestamp()),
            diff: diff.to_string(),
            diff_url: record.diff_url.clone(),
            diff_compressed_bytes: record.diff_patch.as_ref().map(Vec::len),
            diff_download_url: None,
            analysis: record
                .analysis_json
                .as_deref()
                .and_then(|json| serde_json::from_str(json).ok()),
            payload: serde_json::from_str(&record.payload)
                .unwrap_or_else(|_| serde_json::Value::String(record.payload.clone())),
        }
    }
}

/// Core lookup returning structured data (used by CLI and server).
pub async fn get_event(
    store: &dyn EventStore,
    repository: &str,
    commit_sha: &str,
) -> Result<Option<EventDetail>, PipelineError> {
    Ok(store
        .get_event(repository, commit_sha)
        .await?
        .as_ref()
        .map(EventDetail::from_record))
}

/// CLI entry point. Prints the event, or its decompressed diff with `patch`.
pub async fn run_get(config: &Config, repository: &str, commit_sha: &str, patch: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteEventStore::new(pool.clone());

    let record = store.get_event(repository, commit_sha).await?;
    pool.close().await;

    let record = match record {
        Some(r) => r,
        None => bail!("event not found: {}@{}", repository, commit_sha),
    };

    if patch {
        match (&record.diff_patch, &record.diff_url) {
            (Some(bytes), _) => {
                let diff = decompress(bytes)?;
                print!("{}", String::from_utf8_lossy(&diff));
            }
            (None, Some(url)) => println!("diff offloaded to {}", url),
            (None, None) => println!("(no diff content)"),
        }
        return Ok(());
    }

    let detail = EventDetail::from_record(&record);

    println!("--- Event ---");
    println!("repository:   {}", detail.repository);
    println!("commit_sha:   {}", detail.commit_sha);
    println!("event_type:   {}", detail.event_type);
    if let Some(ref git_ref) = detail.git_ref {
        println!("ref:          {}", git_ref);
    }
    if let Some(ref pusher) = detail.pusher {
        println!("pusher:       {}", pusher);
    }
    println!("created_at:   {}", detail.created_at);
    match detail.diff_compressed_bytes {
        Some(n) => println!("diff:         {} ({} bytes gzip)", detail.diff, n),
        None => println!("diff:         {}", detail.diff),
    }
    if let Some(ref url) = detail.diff_url {
        println!("diff_url:     {}", url);
    }
    println!();

    match detail.analysis {
        Some(ref analysis) => {
            println!("--- Analysis ---");
            println!("{}", serde_json::to_string_pretty(analysis)?);
        }
        None => println!("(no analysis recorded)"),
    }

    Ok(())
}

/// CLI entry point for `pushlens events`: newest first.
pub async fn run_list(config: &Config, repository: Option<String>, limit: Option<usize>) -> Result<()> {
    let pool = db::connect(config).await?;
    let store = SqliteEventStore::new(pool.clone());

    let events = store
        .list_events(&EventFilter { repository, limit })
        .await?;
    pool.close().await;

    if events.is_empty() {
        println!("No events.");
        return Ok(());
    }

    println!(
        "{:<20}  {:<32} {:<12} {:<9} {}",
        "CREATED", "REPOSITORY", "COMMIT", "DIFF", "ANALYSIS"
    );
    for e in &events {
        let short_sha: String = e.commit_sha.chars().take(12).collect();
        println!(
            "{:<20}  {:<32} {:<12} {:<9} {}",
            e.created_at,
            e.repository,
            short_sha,
            e.diff,
            if e.has_analysis { "yes" } else { "no" }
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryEventStore;
    use chrono::Utc;

    #[tokio::test]
    async fn test_detail_from_record() {
        let store = InMemoryEventStore::new();
        store
            .insert_event(&StorageRecord {
                repository: "acme/w".to_string(),
                commit_sha: "abc".to_string(),
                event_type: "push".to_string(),
                git_ref: None,
                pusher: Some("dev".to_string()),
                payload: "{\"ref\":\"x\"}".to_string(),
                diff_patch: None,
                diff_url: Some("s3://diffs/acme/w/abc.patch.gz".to_string()),
                analysis_json: Some("{\"total_additions\":3}".to_string()),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let detail = get_event(&store, "acme/w", "abc").await.unwrap().unwrap();
        assert_eq!(detail.diff, "offloaded");
        assert_eq!(detail.analysis.unwrap()["total_additions"], 3);
        assert_eq!(detail.payload["ref"], "x");
        assert!(detail.diff_compressed_bytes.is_none());

        assert!(get_event(&store, "acme/w", "missing").await.unwrap().is_none());
    }
}
