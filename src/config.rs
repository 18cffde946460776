use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::storage::DEFAULT_OFFLOAD_THRESHOLD;

/// Environment variable that overrides `[webhook].secret`.
pub const WEBHOOK_SECRET_ENV: &str = "PUSHLENS_WEBHOOK_SECRET";
/// Environment variable that overrides `[github].token`.
pub const GITHUB_TOKEN_ENV: &str = "GITHUB_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub object_store: Option<ObjectStoreConfig>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: None,
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_queue_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct GitHubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_fetch_commits")]
    pub fetch_commits: bool,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            token: None,
            timeout_secs: default_github_timeout(),
            fetch_commits: default_fetch_commits(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_github_timeout() -> u64 {
    20
}
fn default_fetch_commits() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_offload_threshold")]
    pub offload_threshold_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            offload_threshold_bytes: default_offload_threshold(),
        }
    }
}

fn default_offload_threshold() -> usize {
    DEFAULT_OFFLOAD_THRESHOLD
}

/// S3-compatible bucket used to offload large diffs.
#[derive(Debug, Deserialize, Clone)]
pub struct ObjectStoreConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default = "default_presign_ttl")]
    pub presign_ttl_secs: u64,
    #[serde(default = "default_object_store_timeout")]
    pub timeout_secs: u64,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_presign_ttl() -> u64 {
    3600
}
fn default_object_store_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct AnalysisConfig {
    #[serde(default = "default_include_unknown")]
    pub include_unknown_language: bool,
    /// Extra `extension = "language"` entries layered over the built-in table.
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            include_unknown_language: default_include_unknown(),
            extensions: BTreeMap::new(),
        }
    }
}

fn default_include_unknown() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

impl Config {
    /// Configuration used when no file is available (offline `analyze`, `sign`).
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/pushlens.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:9000".to_string(),
            },
            webhook: WebhookConfig::default(),
            github: GitHubConfig {
                fetch_commits: false,
                ..GitHubConfig::default()
            },
            storage: StorageConfig::default(),
            object_store: None,
            analysis: AnalysisConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Shared webhook secret, preferring the environment over the file.
    pub fn webhook_secret(&self) -> Option<String> {
        std::env::var(WEBHOOK_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.webhook.secret.clone())
    }

    /// GitHub API token, preferring the environment over the file.
    pub fn github_token(&self) -> Option<String> {
        std::env::var(GITHUB_TOKEN_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.github.token.clone())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.webhook.queue_capacity == 0 {
        anyhow::bail!("webhook.queue_capacity must be > 0");
    }

    if let Some(secret) = &config.webhook.secret {
        if secret.is_empty() {
            anyhow::bail!("webhook.secret must not be empty when set");
        }
    }

    if config.github.timeout_secs == 0 {
        anyhow::bail!("github.timeout_secs must be > 0");
    }

    if !config.github.api_base.starts_with("http://")
        && !config.github.api_base.starts_with("https://")
    {
        anyhow::bail!(
            "github.api_base must be an http(s) URL, got '{}'",
            config.github.api_base
        );
    }

    if config.storage.offload_threshold_bytes == 0 {
        anyhow::bail!("storage.offload_threshold_bytes must be > 0");
    }

    if let Some(store) = &config.object_store {
        if store.bucket.is_empty() {
            anyhow::bail!("object_store.bucket must not be empty");
        }
        if store.timeout_secs == 0 {
            anyhow::bail!("object_store.timeout_secs must be > 0");
        }
    }

    for (ext, language) in &config.analysis.extensions {
        if ext.is_empty() || language.is_empty() {
            anyhow::bail!("analysis.extensions entries must have non-empty keys and values");
        }
    }

    match config.logging.format.as_str() {
        "pretty" | "compact" => {}
        other => anyhow::bail!(
            "Unknown logging format: '{}'. Must be pretty or compact.",
            other
        ),
    }

    Ok(())
}
