//! Core data models used throughout pushlens.
//!
//! These types represent the commits, file changes, and stored records that
//! flow from the webhook through analysis into SQLite.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Commit author as reported by the push payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

/// A single commit from a push event. Never mutated after parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    pub author: Author,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Added,
    Modified,
    Removed,
}

impl FileStatus {
    /// Merge precedence when the same file appears more than once in a push.
    pub fn priority(self) -> u8 {
        match self {
            FileStatus::Removed => 2,
            FileStatus::Added => 1,
            FileStatus::Modified => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
        }
    }

    /// Map a GitHub API file status onto the three tracked states.
    ///
    /// `renamed`, `copied`, `changed` and anything unrecognized count as
    /// modifications.
    pub fn from_api(status: &str) -> Self {
        match status {
            "added" => FileStatus::Added,
            "removed" | "deleted" => FileStatus::Removed,
            _ => FileStatus::Modified,
        }
    }
}

/// One file touched by a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub filename: String,
    pub status: FileStatus,
    pub additions: u32,
    pub deletions: u32,
    pub patch: Option<String>,
}

impl FileChange {
    /// A change known only by name (payload-only parsing): counts are zero.
    pub fn from_name(filename: &str, status: FileStatus) -> Self {
        Self {
            filename: filename.to_string(),
            status,
            additions: 0,
            deletions: 0,
            patch: None,
        }
    }
}

/// Collapse repeated entries for the same filename.
///
/// Keeps one entry per filename, in first-seen order. `removed` beats
/// everything, `added` beats `modified`, and between equal statuses the later
/// entry wins.
pub fn dedup_file_changes(changes: impl IntoIterator<Item = FileChange>) -> Vec<FileChange> {
    let mut merged: Vec<FileChange> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for change in changes {
        match index.get(&change.filename) {
            Some(&pos) => {
                if change.status.priority() >= merged[pos].status.priority() {
                    merged[pos] = change;
                }
            }
            None => {
                index.insert(change.filename.clone(), merged.len());
                merged.push(change);
            }
        }
    }

    merged
}

/// Aggregate counts over a set of file changes. Always derived, never stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub total_additions: u64,
    pub total_deletions: u64,
    pub files_changed: usize,
    pub files_added: usize,
    pub files_modified: usize,
    pub files_removed: usize,
}

impl DiffStats {
    pub fn from_changes(changes: &[FileChange]) -> Self {
        let mut stats = DiffStats {
            files_changed: changes.len(),
            ..DiffStats::default()
        };
        for change in changes {
            stats.total_additions += u64::from(change.additions);
            stats.total_deletions += u64::from(change.deletions);
            match change.status {
                FileStatus::Added => stats.files_added += 1,
                FileStatus::Modified => stats.files_modified += 1,
                FileStatus::Removed => stats.files_removed += 1,
            }
        }
        stats
    }
}

/// Where a commit's file changes came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeSource {
    /// Name lists from the push payload; line counts are zero.
    #[default]
    Payload,
    /// Full commit detail from the remote API.
    Api,
}

impl ChangeSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeSource::Payload => "payload",
            ChangeSource::Api => "api",
        }
    }
}

/// A commit together with the file changes attributed to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushCommit {
    pub commit: Commit,
    pub changes: Vec<FileChange>,
    #[serde(default)]
    pub source: ChangeSource,
    /// Unified diff assembled from per-file patches. Only API-sourced
    /// commits have one.
    #[serde(skip)]
    pub diff_content: Option<String>,
}

/// Structured form of one push event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedPush {
    pub repository: String,
    pub git_ref: String,
    pub pusher: String,
    pub commits: Vec<PushCommit>,
    /// Every file touched by the push, deduplicated across commits.
    pub file_changes: Vec<FileChange>,
    pub diff_stats: DiffStats,
}

impl ParsedPush {
    /// Rebuild the push-level change set and stats from the per-commit lists.
    pub fn recompute(&mut self) {
        self.file_changes = dedup_file_changes(
            self.commits
                .iter()
                .flat_map(|c| c.changes.iter().cloned()),
        );
        self.diff_stats = DiffStats::from_changes(&self.file_changes);
    }
}

/// Row written to the `events` table: one per `(repository, commit_sha)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageRecord {
    pub repository: String,
    pub commit_sha: String,
    pub event_type: String,
    pub git_ref: Option<String>,
    pub pusher: Option<String>,
    /// Raw request body, kept for replay.
    pub payload: String,
    /// Gzip-compressed diff, present only when stored inline.
    #[serde(skip_serializing)]
    pub diff_patch: Option<Vec<u8>>,
    /// Offloaded diff location, present only when too large to inline.
    pub diff_url: Option<String>,
    pub analysis_json: Option<String>,
    pub created_at: DateTime<Utc>,
}
