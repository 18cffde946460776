//! GitHub REST client for full commit detail.
//!
//! Only one endpoint is used: `GET /repos/{owner}/{repo}/commits/{sha}`, which
//! returns true per-file addition/deletion counts and patch text. Every
//! failure is reported as a [`FetchError`]; the caller decides whether to
//! fall back to payload-only parsing.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use crate::config::GitHubConfig;
use crate::error::FetchError;
use crate::models::{FileChange, FileStatus};

const USER_AGENT: &str = concat!("pushlens/", env!("CARGO_PKG_VERSION"));
const ACCEPT: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct RemoteStats {
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteFile {
    pub filename: String,
    pub status: String,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
    #[serde(default)]
    pub patch: Option<String>,
}

impl RemoteFile {
    pub fn into_change(self) -> FileChange {
        FileChange {
            status: FileStatus::from_api(&self.status),
            filename: self.filename,
            additions: self.additions,
            deletions: self.deletions,
            patch: self.patch,
        }
    }
}

/// Subset of the GitHub commit resource that the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteCommit {
    pub sha: String,
    #[serde(default)]
    pub stats: RemoteStats,
    #[serde(default)]
    pub files: Vec<RemoteFile>,
}

impl RemoteCommit {
    pub fn into_changes(self) -> Vec<FileChange> {
        self.files.into_iter().map(RemoteFile::into_change).collect()
    }
}

/// Source of full commit detail.
#[async_trait]
pub trait CommitFetcher: Send + Sync {
    async fn get_commit(&self, repository: &str, sha: &str) -> Result<RemoteCommit, FetchError>;
}

#[derive(Debug, Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
    timeout_secs: u64,
}

impl GitHubClient {
    pub fn new(config: &GitHubConfig, token: Option<String>) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            token,
            timeout_secs: config.timeout_secs,
        })
    }

    fn commit_url(&self, repository: &str, sha: &str) -> String {
        format!("{}/repos/{}/commits/{}", self.api_base, repository, sha)
    }
}

#[async_trait]
impl CommitFetcher for GitHubClient {
    async fn get_commit(&self, repository: &str, sha: &str) -> Result<RemoteCommit, FetchError> {
        let mut req = self
            .client
            .get(self.commit_url(repository, sha))
            .header("Accept", ACCEPT)
            .header("X-GitHub-Api-Version", API_VERSION);

        if let Some(ref token) = self.token {
            req = req.header("Authorization", format!("Bearer {}", token));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout(self.timeout_secs)
            } else {
                FetchError::Network(e.to_string())
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        resp.json::<RemoteCommit>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_url() {
        let config = GitHubConfig {
            api_base: "http://127.0.0.1:8080/".to_string(),
            ..GitHubConfig::default()
        };
        let client = GitHubClient::new(&config, None).unwrap();
        assert_eq!(
            client.commit_url("acme/widgets", "abc"),
            "http://127.0.0.1:8080/repos/acme/widgets/commits/abc"
        );
    }

    #[test]
    fn test_decode_commit_resource() {
        let json = serde_json::json!({
            "sha": "abc",
            "stats": {"additions": 3, "deletions": 1, "total": 4},
            "files": [
                {"filename": "a.py", "status": "added", "additions": 3, "deletions": 0,
                 "patch": "@@ -0,0 +1,3 @@\n+a\n+b\n+c"},
                {"filename": "old.png", "status": "removed", "additions": 0, "deletions": 1},
                {"filename": "b.py", "status": "renamed", "additions": 0, "deletions": 0}
            ],
            "commit": {"message": "ignored"}
        });
        let commit: RemoteCommit = serde_json::from_value(json).unwrap();
        assert_eq!(commit.stats.total, 4);
        let changes = commit.into_changes();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].status, FileStatus::Added);
        assert!(changes[0].patch.is_some());
        assert_eq!(changes[1].status, FileStatus::Removed);
        assert!(changes[1].patch.is_none());
        assert_eq!(changes[2].status, FileStatus::Modified);
    }
}
