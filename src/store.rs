//! Durable event storage.
//!
//! The [`EventStore`] trait is the only write path for [`StorageRecord`]s.
//! Uniqueness of `(repository, commit_sha)` is enforced by the backend itself
//! (a `UNIQUE` constraint in SQLite, a check under the write lock in memory),
//! so concurrent inserts of the same key have exactly one winner and every
//! other caller sees [`InsertOutcome::Duplicate`].
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`insert_event`](EventStore::insert_event) | Write-once insert |
//! | [`exists`](EventStore::exists) | Cheap pre-check before fetching or analysis |
//! | [`get_event`](EventStore::get_event) | Full record by key |
//! | [`list_events`](EventStore::list_events) | Newest-first summaries |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{Row, SqlitePool};
use std::sync::{PoisonError, RwLock};

use crate::error::PipelineError;
use crate::models::StorageRecord;

pub const DEFAULT_LIST_LIMIT: usize = 50;
pub const MAX_LIST_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertOutcome {
    Inserted,
    /// A row for the key already existed; nothing was written.
    Duplicate,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub repository: Option<String>,
    pub limit: Option<usize>,
}

impl EventFilter {
    fn effective_limit(&self) -> usize {
        self.limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

/// Row metadata without the payload or diff bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventSummary {
    pub repository: String,
    pub commit_sha: String,
    pub event_type: String,
    pub git_ref: Option<String>,
    pub pusher: Option<String>,
    /// `inline`, `offloaded` or `absent`.
    pub diff: String,
    pub diff_url: Option<String>,
    pub has_analysis: bool,
    pub created_at: String,
}

impl EventSummary {
    fn from_record(record: &StorageRecord) -> Self {
        Self {
            repository: record.repository.clone(),
            commit_sha: record.commit_sha.clone(),
            event_type: record.event_type.clone(),
            git_ref: record.git_ref.clone(),
            pusher: record.pusher.clone(),
            diff: diff_location(record.diff_patch.is_some(), record.diff_url.is_some()).to_string(),
            diff_url: record.diff_url.clone(),
            has_analysis: record.analysis_json.is_some(),
            created_at: format_ts_iso(record.created_at.timestamp()),
        }
    }
}

fn diff_location(inline: bool, offloaded: bool) -> &'static str {
    match (inline, offloaded) {
        (true, _) => "inline",
        (false, true) => "offloaded",
        (false, false) => "absent",
    }
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Insert `record` unless its key already exists.
    async fn insert_event(&self, record: &StorageRecord) -> Result<InsertOutcome, PipelineError>;

    async fn exists(&self, repository: &str, commit_sha: &str) -> Result<bool, PipelineError>;

    async fn get_event(
        &self,
        repository: &str,
        commit_sha: &str,
    ) -> Result<Option<StorageRecord>, PipelineError>;

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventSummary>, PipelineError>;
}

// ============ SQLite ============

pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn insert_event(&self, record: &StorageRecord) -> Result<InsertOutcome, PipelineError> {
        let result = sqlx::query(
            r#"
            INSERT INTO events (repository, commit_sha, event_type, git_ref, pusher,
                                payload, diff_patch, diff_url, analysis_json, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(repository, commit_sha) DO NOTHING
            "#,
        )
        .bind(&record.repository)
        .bind(&record.commit_sha)
        .bind(&record.event_type)
        .bind(&record.git_ref)
        .bind(&record.pusher)
        .bind(&record.payload)
        .bind(&record.diff_patch)
        .bind(&record.diff_url)
        .bind(&record.analysis_json)
        .bind(record.created_at.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            Ok(InsertOutcome::Duplicate)
        } else {
            Ok(InsertOutcome::Inserted)
        }
    }

    async fn exists(&self, repository: &str, commit_sha: &str) -> Result<bool, PipelineError> {
        let found: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM events WHERE repository = ? AND commit_sha = ?",
        )
        .bind(repository)
        .bind(commit_sha)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn get_event(
        &self,
        repository: &str,
        commit_sha: &str,
    ) -> Result<Option<StorageRecord>, PipelineError> {
        let row = sqlx::query(
            r#"
            SELECT repository, commit_sha, event_type, git_ref, pusher, payload,
                   diff_patch, diff_url, analysis_json, created_at
            FROM events WHERE repository = ? AND commit_sha = ?
            "#,
        )
        .bind(repository)
        .bind(commit_sha)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| {
            let created_at: i64 = row.get("created_at");
            StorageRecord {
                repository: row.get("repository"),
                commit_sha: row.get("commit_sha"),
                event_type: row.get("event_type"),
                git_ref: row.get("git_ref"),
                pusher: row.get("pusher"),
                payload: row.get("payload"),
                diff_patch: row.get("diff_patch"),
                diff_url: row.get("diff_url"),
                analysis_json: row.get("analysis_json"),
                created_at: from_ts(created_at),
            }
        }))
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventSummary>, PipelineError> {
        let rows = sqlx::query(
            r#"
            SELECT repository, commit_sha, event_type, git_ref, pusher, diff_url,
                   diff_patch IS NOT NULL AS has_patch,
                   analysis_json IS NOT NULL AS has_analysis,
                   created_at
            FROM events
            WHERE (? IS NULL OR repository = ?)
            ORDER BY created_at DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(&filter.repository)
        .bind(&filter.repository)
        .bind(filter.effective_limit() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let diff_url: Option<String> = row.get("diff_url");
                let has_patch: bool = row.get("has_patch");
                let created_at: i64 = row.get("created_at");
                EventSummary {
                    repository: row.get("repository"),
                    commit_sha: row.get("commit_sha"),
                    event_type: row.get("event_type"),
                    git_ref: row.get("git_ref"),
                    pusher: row.get("pusher"),
                    diff: diff_location(has_patch, diff_url.is_some()).to_string(),
                    diff_url,
                    has_analysis: row.get("has_analysis"),
                    created_at: format_ts_iso(created_at),
                }
            })
            .collect())
    }
}

// ============ In-memory ============

/// Process-local store with the same uniqueness contract as SQLite.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    records: RwLock<Vec<StorageRecord>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records. Reads through a poisoned lock; the vector
    /// is only ever appended to under the write guard.
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> PipelineError {
    PipelineError::StorageFailure("event store lock poisoned".to_string())
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn insert_event(&self, record: &StorageRecord) -> Result<InsertOutcome, PipelineError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let taken = records
            .iter()
            .any(|r| r.repository == record.repository && r.commit_sha == record.commit_sha);
        if taken {
            return Ok(InsertOutcome::Duplicate);
        }
        records.push(record.clone());
        Ok(InsertOutcome::Inserted)
    }

    async fn exists(&self, repository: &str, commit_sha: &str) -> Result<bool, PipelineError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .iter()
            .any(|r| r.repository == repository && r.commit_sha == commit_sha))
    }

    async fn get_event(
        &self,
        repository: &str,
        commit_sha: &str,
    ) -> Result<Option<StorageRecord>, PipelineError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .iter()
            .find(|r| r.repository == repository && r.commit_sha == commit_sha)
            .cloned())
    }

    async fn list_events(&self, filter: &EventFilter) -> Result<Vec<EventSummary>, PipelineError> {
        let records = self.records.read().map_err(poisoned)?;
        Ok(records
            .iter()
            .rev()
            .filter(|r| {
                filter
                    .repository
                    .as_deref()
                    .map_or(true, |repo| r.repository == repo)
            })
            .take(filter.effective_limit())
            .map(EventSummary::from_record)
            .collect())
    }
}

fn from_ts(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(ts, 0).unwrap_or_default()
}

pub fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts.to_string())
}
