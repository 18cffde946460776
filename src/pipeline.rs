//! Per-event orchestration.
//!
//! ```text
//! PushEvent ─▶ parse ─▶ for each commit:
//!                         exists? ──yes──▶ Duplicate
//!                           │no
//!                           ▼
//!                         fetch (optional, falls back) ─▶ analyze ─▶ encode ─▶ insert
//! ```
//!
//! Signature and platform checks happen before an event gets here; the
//! pipeline only sees payloads that were already authenticated.
//!
//! Analysis runs on the blocking pool. Analysis failures (`NoChanges`,
//! `MissingCommitIdentity`, `AnalysisAborted`) do not drop the
//! event: the record is still stored, with `analysis_json` left empty, and the
//! failure is logged. Storage failures abort the event so the queue can retry
//! it; commits already stored come back as duplicates on the retry.

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::analyzer::{analyze_blocking, AnalysisSummary, CommitMetadata, DiffAnalyzer};
use crate::config::Config;
use crate::error::PipelineError;
use crate::github::{CommitFetcher, GitHubClient};
use crate::models::{ChangeSource, PushCommit, StorageRecord};
use crate::object_store::{ObjectStore, S3ObjectStore};
use crate::payload::{apply_fetch_result, parse_payload, Platform};
use crate::storage::{DiffDisposition, StorageEncoder};
use crate::store::{EventStore, InsertOutcome};

/// An authenticated push delivery, ready for background processing.
#[derive(Debug, Clone)]
pub struct PushEvent {
    pub platform: Platform,
    pub event_type: String,
    /// Raw body, kept verbatim for replay.
    pub body: String,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl PushEvent {
    /// Decode a raw body. Non-JSON bodies are [`PipelineError::InvalidPayload`].
    pub fn from_body(
        platform: Platform,
        event_type: &str,
        body: &[u8],
    ) -> Result<Self, PipelineError> {
        let payload: Value =
            serde_json::from_slice(body).map_err(|_| PipelineError::invalid_payload("body"))?;
        if !payload.is_object() {
            return Err(PipelineError::invalid_payload("body"));
        }
        Ok(Self {
            platform,
            event_type: event_type.to_string(),
            body: String::from_utf8_lossy(body).into_owned(),
            payload,
            received_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOutcome {
    Stored,
    Duplicate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageTimings {
    pub fetch_ms: f64,
    pub analyze_ms: f64,
    pub store_ms: f64,
}

/// What happened to one commit of a push.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    pub commit_sha: String,
    pub outcome: CommitOutcome,
    pub source: ChangeSource,
    pub files_changed: usize,
    pub diff: DiffDisposition,
    pub analysis_success: bool,
    pub timings: StageTimings,
    pub summary: Option<AnalysisSummary>,
}

impl CommitReport {
    fn duplicate(commit_sha: &str) -> Self {
        Self {
            commit_sha: commit_sha.to_string(),
            outcome: CommitOutcome::Duplicate,
            source: ChangeSource::Payload,
            files_changed: 0,
            diff: DiffDisposition::Absent,
            analysis_success: false,
            timings: StageTimings::default(),
            summary: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventReport {
    pub repository: String,
    pub git_ref: String,
    pub parse_ms: f64,
    pub total_ms: f64,
    pub commits: Vec<CommitReport>,
}

impl EventReport {
    pub fn stored(&self) -> usize {
        self.commits
            .iter()
            .filter(|c| c.outcome == CommitOutcome::Stored)
            .count()
    }

    pub fn duplicates(&self) -> usize {
        self.commits.len() - self.stored()
    }
}

pub struct Pipeline {
    analyzer: Arc<DiffAnalyzer>,
    encoder: StorageEncoder,
    store: Arc<dyn EventStore>,
    fetcher: Option<Arc<dyn CommitFetcher>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("encoder", &self.encoder)
            .field("fetcher", &self.fetcher.is_some())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    pub fn new(analyzer: DiffAnalyzer, encoder: StorageEncoder, store: Arc<dyn EventStore>) -> Self {
        Self {
            analyzer: Arc::new(analyzer),
            encoder,
            store,
            fetcher: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn CommitFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Wire the pipeline from configuration.
    ///
    /// The GitHub client is attached only when `github.fetch_commits` is set;
    /// the object store only when an `[object_store]` section exists.
    pub fn from_config(config: &Config, store: Arc<dyn EventStore>) -> anyhow::Result<Self> {
        let object_store: Option<Arc<dyn ObjectStore>> = match &config.object_store {
            Some(os) => Some(Arc::new(
                S3ObjectStore::from_config(os).context("Failed to configure object store")?,
            )),
            None => None,
        };

        let pipeline = Self::new(
            DiffAnalyzer::from_config(&config.analysis),
            StorageEncoder::new(config.storage.offload_threshold_bytes, object_store),
            store,
        );

        if config.github.fetch_commits {
            let client = GitHubClient::new(&config.github, config.github_token())
                .context("Failed to build GitHub client")?;
            Ok(pipeline.with_fetcher(Arc::new(client)))
        } else {
            Ok(pipeline)
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn analyzer(&self) -> &DiffAnalyzer {
        &self.analyzer
    }

    /// Run one push event to completion.
    pub async fn process(&self, event: &PushEvent) -> Result<EventReport, PipelineError> {
        let started = Instant::now();
        let push = parse_payload(event.platform, &event.payload)?;
        let parse_ms = elapsed_ms(started);

        tracing::info!(
            repository = %push.repository,
            git_ref = %push.git_ref,
            commits = push.commits.len(),
            stage = "parse",
            elapsed_ms = parse_ms,
            "push parsed"
        );

        let mut commits = Vec::with_capacity(push.commits.len());
        for commit in push.commits {
            let report = self
                .process_commit(event, &push.repository, &push.git_ref, &push.pusher, commit)
                .await?;
            commits.push(report);
        }

        let report = EventReport {
            repository: push.repository,
            git_ref: push.git_ref,
            parse_ms,
            total_ms: elapsed_ms(started),
            commits,
        };

        tracing::info!(
            repository = %report.repository,
            stored = report.stored(),
            duplicates = report.duplicates(),
            elapsed_ms = report.total_ms,
            "push processed"
        );

        Ok(report)
    }

    async fn process_commit(
        &self,
        event: &PushEvent,
        repository: &str,
        git_ref: &str,
        pusher: &str,
        mut commit: PushCommit,
    ) -> Result<CommitReport, PipelineError> {
        let sha = commit.commit.sha.clone();

        if self.store.exists(repository, &sha).await? {
            tracing::info!(repository, commit_sha = %sha, "commit already stored, skipping");
            return Ok(CommitReport::duplicate(&sha));
        }

        let mut timings = StageTimings::default();

        if let Some(fetcher) = &self.fetcher {
            let started = Instant::now();
            let fetched = fetcher.get_commit(repository, &sha).await;
            apply_fetch_result(repository, &mut commit, fetched);
            timings.fetch_ms = elapsed_ms(started);
            tracing::debug!(
                repository,
                commit_sha = %sha,
                stage = "fetch",
                source = commit.source.as_str(),
                elapsed_ms = timings.fetch_ms,
                "changes resolved"
            );
        }

        let started = Instant::now();
        let meta = CommitMetadata::from_commit(repository, &commit.commit);
        let files_changed = commit.changes.len();
        let changes = std::mem::take(&mut commit.changes);
        let analysis = match analyze_blocking(self.analyzer.clone(), meta, changes).await {
            Ok(result) => Some(result),
            Err(err) => {
                tracing::warn!(
                    repository,
                    commit_sha = %sha,
                    error = %err,
                    "analysis skipped, storing record without analysis"
                );
                None
            }
        };
        timings.analyze_ms = elapsed_ms(started);

        let started = Instant::now();
        let encoded = self
            .encoder
            .encode(
                repository,
                &sha,
                commit.diff_content.as_deref().map(str::as_bytes),
            )
            .await?;

        let analysis_json = analysis.as_ref().map(serde_json::to_string).transpose()?;

        let record = StorageRecord {
            repository: repository.to_string(),
            commit_sha: sha.clone(),
            event_type: event.event_type.clone(),
            git_ref: Some(git_ref.to_string()).filter(|r| !r.is_empty()),
            pusher: Some(pusher.to_string()),
            payload: event.body.clone(),
            diff_patch: encoded.diff_patch.clone(),
            diff_url: encoded.diff_url.clone(),
            analysis_json,
            created_at: Utc::now(),
        };

        let outcome = match self.store.insert_event(&record).await? {
            InsertOutcome::Inserted => CommitOutcome::Stored,
            InsertOutcome::Duplicate => CommitOutcome::Duplicate,
        };
        timings.store_ms = elapsed_ms(started);

        tracing::info!(
            repository,
            commit_sha = %sha,
            stage = "store",
            outcome = ?outcome,
            diff = encoded.disposition.as_str(),
            elapsed_ms = timings.store_ms,
            "commit recorded"
        );

        Ok(CommitReport {
            commit_sha: sha,
            outcome,
            source: commit.source,
            files_changed,
            diff: encoded.disposition,
            analysis_success: analysis.is_some(),
            timings,
            summary: analysis.as_ref().map(|a| a.summary()),
        })
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::github::RemoteCommit;
    use crate::language::LanguageTable;
    use crate::object_store::InMemoryObjectStore;
    use crate::storage::{decompress, DEFAULT_OFFLOAD_THRESHOLD};
    use crate::store::InMemoryEventStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct StaticFetcher(Option<RemoteCommit>);

    #[async_trait]
    impl CommitFetcher for StaticFetcher {
        async fn get_commit(&self, _repo: &str, _sha: &str) -> Result<RemoteCommit, FetchError> {
            self.0.clone().ok_or(FetchError::Timeout(20))
        }
    }

    fn body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "ref": "refs/heads/main",
            "repository": {"full_name": "acme/widgets"},
            "pusher": {"name": "dev"},
            "commits": [{
                "id": "abc123",
                "message": "Add feature",
                "author": {"name": "Dev", "email": "dev@example.com"},
                "added": ["a.py"],
                "modified": ["b.py", "README.md"],
                "removed": ["c.py"]
            }]
        }))
        .unwrap()
    }

    fn pipeline(store: Arc<InMemoryEventStore>) -> Pipeline {
        Pipeline::new(
            DiffAnalyzer::new(LanguageTable::default(), true),
            StorageEncoder::new(DEFAULT_OFFLOAD_THRESHOLD, None),
            store,
        )
    }

    #[test]
    fn test_non_json_body_rejected() {
        let err = PushEvent::from_body(Platform::GitHub, "push", b"not json").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload { path } if path == "body"));
        let err = PushEvent::from_body(Platform::GitHub, "push", b"[1,2]").unwrap_err();
        assert!(matches!(err, PipelineError::InvalidPayload { .. }));
    }

    #[tokio::test]
    async fn test_payload_only_event_is_stored_once() {
        let store = Arc::new(InMemoryEventStore::new());
        let pipeline = pipeline(store.clone());
        let event = PushEvent::from_body(Platform::GitHub, "push", &body()).unwrap();

        let report = pipeline.process(&event).await.unwrap();
        assert_eq!(report.stored(), 1);
        let commit = &report.commits[0];
        assert_eq!(commit.source, ChangeSource::Payload);
        assert_eq!(commit.files_changed, 4);
        assert_eq!(commit.diff, DiffDisposition::Absent);
        let summary = commit.summary.as_ref().unwrap();
        assert_eq!(summary.change_summary.files_changed, 4);

        let record = store.get_event("acme/widgets", "abc123").await.unwrap().unwrap();
        assert!(record.diff_patch.is_none());
        assert!(record.diff_url.is_none());
        assert_eq!(record.payload.as_bytes(), body().as_slice());
        let analysis: Value = serde_json::from_str(record.analysis_json.as_deref().unwrap()).unwrap();
        assert_eq!(analysis["language_breakdown"]["python"]["file_count"], 2);
        assert_eq!(analysis["language_breakdown"]["markdown"]["file_count"], 1);

        let again = pipeline.process(&event).await.unwrap();
        assert_eq!(again.stored(), 0);
        assert_eq!(again.duplicates(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_api_changes_and_inline_diff() {
        let remote: RemoteCommit = serde_json::from_value(json!({
            "sha": "abc123",
            "stats": {"additions": 3, "deletions": 0, "total": 3},
            "files": [{"filename": "a.py", "status": "added", "additions": 3, "deletions": 0,
                       "patch": "@@ -0,0 +1,3 @@\n+def a(x):\n+    if x:\n+        return 1"}]
        }))
        .unwrap();
        let store = Arc::new(InMemoryEventStore::new());
        let pipeline = pipeline(store.clone()).with_fetcher(Arc::new(StaticFetcher(Some(remote))));
        let event = PushEvent::from_body(Platform::GitHub, "push", &body()).unwrap();

        let report = pipeline.process(&event).await.unwrap();
        let commit = &report.commits[0];
        assert_eq!(commit.source, ChangeSource::Api);
        assert_eq!(commit.diff, DiffDisposition::Inline);
        let summary = commit.summary.as_ref().unwrap();
        assert_eq!(summary.change_summary.lines_added, 3);
        assert_eq!(summary.structural_summary.functions_added, 1);

        let record = store.get_event("acme/widgets", "abc123").await.unwrap().unwrap();
        let diff = decompress(record.diff_patch.as_ref().unwrap()).unwrap();
        assert!(String::from_utf8(diff).unwrap().starts_with("diff --git a/a.py b/a.py"));
    }

    #[tokio::test]
    async fn test_fetch_failure_still_stores() {
        let store = Arc::new(InMemoryEventStore::new());
        let pipeline = pipeline(store.clone()).with_fetcher(Arc::new(StaticFetcher(None)));
        let event = PushEvent::from_body(Platform::GitHub, "push", &body()).unwrap();

        let report = pipeline.process(&event).await.unwrap();
        assert_eq!(report.commits[0].source, ChangeSource::Payload);
        assert_eq!(report.stored(), 1);
    }

    #[tokio::test]
    async fn test_empty_commit_stored_without_analysis() {
        let body = serde_json::to_vec(&json!({
            "repository": {"full_name": "acme/widgets"},
            "pusher": {"name": "dev"},
            "commits": [{"id": "empty1"}]
        }))
        .unwrap();
        let store = Arc::new(InMemoryEventStore::new());
        let pipeline = pipeline(store.clone());
        let event = PushEvent::from_body(Platform::GitHub, "push", &body).unwrap();

        let report = pipeline.process(&event).await.unwrap();
        assert!(!report.commits[0].analysis_success);
        let record = store.get_event("acme/widgets", "empty1").await.unwrap().unwrap();
        assert!(record.analysis_json.is_none());
        assert!(record.git_ref.is_none());
    }

    #[tokio::test]
    async fn test_large_diff_offloaded() {
        let patch: String = (0..20_000)
            .map(|i| format!("+line_{}_{:x}\n", i, i * 7919))
            .collect();
        let remote: RemoteCommit = serde_json::from_value(json!({
            "sha": "abc123",
            "files": [{"filename": "gen.py", "status": "added", "additions": 20000,
                       "deletions": 0, "patch": patch}]
        }))
        .unwrap();
        let objects = Arc::new(InMemoryObjectStore::new());
        let store = Arc::new(InMemoryEventStore::new());
        let pipeline = Pipeline::new(
            DiffAnalyzer::default(),
            StorageEncoder::new(1024, Some(objects.clone())),
            store.clone(),
        )
        .with_fetcher(Arc::new(StaticFetcher(Some(remote))));
        let event = PushEvent::from_body(Platform::GitHub, "push", &body()).unwrap();

        let report = pipeline.process(&event).await.unwrap();
        assert_eq!(report.commits[0].diff, DiffDisposition::Offloaded);
        let record = store.get_event("acme/widgets", "abc123").await.unwrap().unwrap();
        assert!(record.diff_patch.is_none());
        assert_eq!(
            record.diff_url.as_deref(),
            Some("memory://acme/widgets/abc123.patch.gz")
        );
        assert_eq!(objects.len(), 1);
    }
}
