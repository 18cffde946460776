//! `pushlens analyze`: run a captured push payload through the pipeline
//! offline.
//!
//! Without `--store` nothing is written: the payload is parsed, optionally
//! augmented from the GitHub API, and each commit's analysis summary is
//! printed as JSON. With `--store` the payload goes through the full
//! [`Pipeline`] against the configured database, exactly as a webhook
//! delivery would.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::analyzer::{analyze_blocking, AnalysisSummary, CommitMetadata, DiffAnalyzer};
use crate::config::Config;
use crate::db;
use crate::github::GitHubClient;
use crate::migrate::apply_schema;
use crate::models::{ChangeSource, DiffStats};
use crate::payload::{parse_push, Platform, Strategy};
use crate::pipeline::{Pipeline, PushEvent};
use crate::store::{EventStore, SqliteEventStore};

#[derive(Debug, Serialize)]
struct OfflineReport {
    repository: String,
    git_ref: String,
    pusher: String,
    diff_stats: DiffStats,
    commits: Vec<OfflineCommit>,
}

#[derive(Debug, Serialize)]
struct OfflineCommit {
    commit_sha: String,
    source: ChangeSource,
    files_changed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<AnalysisSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub async fn run_analyze(config: &Config, path: &Path, fetch: bool, store: bool) -> Result<()> {
    let body = std::fs::read(path)
        .with_context(|| format!("Failed to read payload file: {}", path.display()))?;

    if store {
        return analyze_and_store(config, &body, fetch).await;
    }

    let payload: serde_json::Value = serde_json::from_slice(&body)
        .with_context(|| format!("Payload is not valid JSON: {}", path.display()))?;

    let client = if fetch {
        Some(
            GitHubClient::new(&config.github, config.github_token())
                .context("Failed to build GitHub client")?,
        )
    } else {
        None
    };
    let strategy = match &client {
        Some(c) => Strategy::ApiAugmented(c),
        None => Strategy::PayloadOnly,
    };

    let push = parse_push(Platform::GitHub, &payload, strategy).await?;
    let analyzer = Arc::new(DiffAnalyzer::from_config(&config.analysis));

    let mut commits = Vec::with_capacity(push.commits.len());
    for commit in push.commits {
        let metadata = CommitMetadata::from_commit(&push.repository, &commit.commit);
        let files_changed = commit.changes.len();
        let outcome = analyze_blocking(analyzer.clone(), metadata, commit.changes).await;
        let (summary, error) = match outcome {
            Ok(result) => (Some(result.summary()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        commits.push(OfflineCommit {
            commit_sha: commit.commit.sha,
            source: commit.source,
            files_changed,
            summary,
            error,
        });
    }

    let report = OfflineReport {
        repository: push.repository,
        git_ref: push.git_ref,
        pusher: push.pusher,
        diff_stats: push.diff_stats,
        commits,
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn analyze_and_store(config: &Config, body: &[u8], fetch: bool) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(pool.clone()));

    let mut config = config.clone();
    config.github.fetch_commits = fetch;
    let pipeline = Pipeline::from_config(&config, store)?;

    let event = PushEvent::from_body(Platform::GitHub, "push", body)?;
    let report = pipeline.process(&event).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    eprintln!(
        "{}: {} stored, {} duplicate",
        report.repository,
        report.stored(),
        report.duplicates()
    );

    pool.close().await;
    Ok(())
}
