//! Push-event parsing.
//!
//! Parsing happens in two steps:
//!
//! 1. [`parse_payload`] turns the decoded JSON into a [`ParsedPush`] using only
//!    the payload's `added` / `removed` / `modified` name lists. It never makes
//!    a network call and always works on a well-formed payload.
//! 2. With [`Strategy::ApiAugmented`], [`parse_push`] then replaces each
//!    commit's changes with the full detail from a [`CommitFetcher`]. A fetch
//!    failure is logged and the payload-only changes are kept.
//!
//! The platform is chosen from the inbound headers. Only GitHub-shaped
//! payloads have a parser.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{FetchError, PipelineError};
use crate::github::{CommitFetcher, RemoteCommit};
use crate::models::{
    dedup_file_changes, Author, ChangeSource, Commit, DiffStats, FileChange, FileStatus,
    ParsedPush, PushCommit,
};

pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
const GITLAB_EVENT_HEADER: &str = "x-gitlab-event";
const BITBUCKET_EVENT_HEADER: &str = "x-event-key";

/// Source-control platforms with a payload parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    GitHub,
}

impl Platform {
    /// Pick the platform from the event headers.
    ///
    /// GitLab and Bitbucket deliveries are recognized but rejected as
    /// [`PipelineError::UnsupportedPlatform`], as is anything unrecognizable.
    pub fn detect(headers: &HeaderMap) -> Result<Self, PipelineError> {
        if headers.contains_key(GITHUB_EVENT_HEADER) {
            return Ok(Platform::GitHub);
        }
        if headers.contains_key(GITLAB_EVENT_HEADER) {
            return Err(PipelineError::UnsupportedPlatform("gitlab".into()));
        }
        let bitbucket = headers
            .get(BITBUCKET_EVENT_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("repo:"));
        if bitbucket {
            return Err(PipelineError::UnsupportedPlatform("bitbucket".into()));
        }
        Err(PipelineError::UnsupportedPlatform("unknown".into()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Platform::GitHub => "github",
        }
    }

    /// The event type named by the platform's event header.
    pub fn event_type(self, headers: &HeaderMap) -> Option<String> {
        let header = match self {
            Platform::GitHub => GITHUB_EVENT_HEADER,
        };
        headers
            .get(header)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase())
    }
}

/// How file changes are obtained for each commit.
#[derive(Clone, Copy)]
pub enum Strategy<'a> {
    PayloadOnly,
    ApiAugmented(&'a dyn CommitFetcher),
}

impl std::fmt::Debug for Strategy<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::PayloadOnly => f.write_str("PayloadOnly"),
            Strategy::ApiAugmented(_) => f.write_str("ApiAugmented"),
        }
    }
}

/// Parse a push event, fetching full commit detail when the strategy allows.
pub async fn parse_push(
    platform: Platform,
    payload: &Value,
    strategy: Strategy<'_>,
) -> Result<ParsedPush, PipelineError> {
    let mut push = parse_payload(platform, payload)?;

    if let Strategy::ApiAugmented(fetcher) = strategy {
        for commit in push.commits.iter_mut() {
            let fetched = fetcher.get_commit(&push.repository, &commit.commit.sha).await;
            apply_fetch_result(&push.repository, commit, fetched);
        }
        push.recompute();
    }

    Ok(push)
}

/// Payload-only parse. Fails with [`PipelineError::InvalidPayload`] naming
/// the first missing or malformed path.
pub fn parse_payload(platform: Platform, payload: &Value) -> Result<ParsedPush, PipelineError> {
    match platform {
        Platform::GitHub => parse_github_push(payload),
    }
}

fn parse_github_push(payload: &Value) -> Result<ParsedPush, PipelineError> {
    let repository = required_str(payload, &["repository", "full_name"])?;
    let pusher = required_str(payload, &["pusher", "name"])?;
    let git_ref = payload
        .get("ref")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let entries = payload
        .get("commits")
        .and_then(Value::as_array)
        .ok_or_else(|| PipelineError::invalid_payload("commits"))?;

    let commits = entries
        .iter()
        .enumerate()
        .map(|(i, entry)| parse_github_commit(i, entry))
        .collect::<Result<Vec<_>, _>>()?;

    let mut push = ParsedPush {
        repository,
        git_ref,
        pusher,
        commits,
        file_changes: Vec::new(),
        diff_stats: DiffStats::default(),
    };
    push.recompute();
    Ok(push)
}

fn parse_github_commit(index: usize, entry: &Value) -> Result<PushCommit, PipelineError> {
    let sha = entry
        .get("id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PipelineError::invalid_payload(format!("commits[{}].id", index)))?;

    let text = |key: &str| {
        entry
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let author = entry.get("author");
    let author_field = |key: &str| {
        author
            .and_then(|a| a.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let commit = Commit {
        sha: sha.to_string(),
        message: text("message"),
        author: Author {
            name: author_field("name"),
            email: author_field("email"),
        },
        timestamp: entry
            .get("timestamp")
            .and_then(Value::as_str)
            .and_then(parse_timestamp),
        url: text("url"),
    };

    let mut changes = Vec::new();
    for (key, status) in [
        ("added", FileStatus::Added),
        ("modified", FileStatus::Modified),
        ("removed", FileStatus::Removed),
    ] {
        for name in name_list(entry, index, key)? {
            changes.push(FileChange::from_name(name, status));
        }
    }

    Ok(PushCommit {
        commit,
        changes: dedup_file_changes(changes),
        source: ChangeSource::Payload,
        diff_content: None,
    })
}

/// Replace a commit's changes with fetched detail, or keep the payload-only
/// changes when the fetch failed. Never fails.
pub fn apply_fetch_result(
    repository: &str,
    commit: &mut PushCommit,
    fetched: Result<RemoteCommit, FetchError>,
) {
    match fetched {
        Ok(remote) if !remote.files.is_empty() => {
            let changes = dedup_file_changes(remote.into_changes());
            commit.diff_content = synthesize_diff(&changes);
            commit.changes = changes;
            commit.source = ChangeSource::Api;
        }
        Ok(_) => {
            tracing::warn!(
                repository,
                commit_sha = %commit.commit.sha,
                "commit detail has no files, using payload file lists"
            );
        }
        Err(err) => {
            let err = PipelineError::from(err);
            tracing::warn!(
                repository,
                commit_sha = %commit.commit.sha,
                error = %err,
                "falling back to payload file lists"
            );
        }
    }
}

/// Concatenate per-file patches under `diff --git` headers.
pub fn synthesize_diff(changes: &[FileChange]) -> Option<String> {
    let mut out = String::new();
    for change in changes {
        let Some(patch) = change.patch.as_deref() else {
            continue;
        };
        let name = &change.filename;
        out.push_str(&format!("diff --git a/{} b/{}\n", name, name));
        match change.status {
            FileStatus::Added => out.push_str(&format!("--- /dev/null\n+++ b/{}\n", name)),
            FileStatus::Removed => out.push_str(&format!("--- a/{}\n+++ /dev/null\n", name)),
            FileStatus::Modified => out.push_str(&format!("--- a/{}\n+++ b/{}\n", name, name)),
        }
        out.push_str(patch);
        if !patch.ends_with('\n') {
            out.push('\n');
        }
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

fn required_str(payload: &Value, path: &[&str]) -> Result<String, PipelineError> {
    let mut node = payload;
    for key in path {
        node = node
            .get(*key)
            .ok_or_else(|| PipelineError::invalid_payload(path.join(".")))?;
    }
    node.as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PipelineError::invalid_payload(path.join(".")))
}

fn name_list<'a>(entry: &'a Value, index: usize, key: &str) -> Result<Vec<&'a str>, PipelineError> {
    let invalid = || PipelineError::invalid_payload(format!("commits[{}].{}", index, key));
    match entry.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| item.as_str().ok_or_else(invalid))
            .collect(),
        Some(_) => Err(invalid()),
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
