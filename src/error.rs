//! Error taxonomy for the ingestion pipeline.
//!
//! Each variant of [`PipelineError`] maps to one propagation policy:
//!
//! | Variant | Policy |
//! |---------|--------|
//! | `Unauthenticated`, `InvalidSignature` | reject before parsing, no retry |
//! | `InvalidPayload`, `UnsupportedPlatform` | reject synchronously, no retry |
//! | `UpstreamFetchFailed` | non-fatal, triggers payload-only fallback |
//! | `NoChanges`, `MissingCommitIdentity` | caller error, reject |
//! | `AnalysisAborted` | analysis task panicked, record stored without analysis |
//! | `StorageFailure` | transient, safe to retry at the queue level |
//!
//! A duplicate `(repository, commit_sha)` is not an error: stores report it
//! as [`crate::store::InsertOutcome::Duplicate`] and callers treat it as
//! success without a write.
//!
//! The two external collaborators have their own error types
//! ([`FetchError`], [`ObjectStoreError`]) so callers can match on them
//! without string inspection.

use thiserror::Error;

/// Failure modes of the ingestion pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The signature header is absent, or not `sha256=` followed by a 32-byte hex digest.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// The signature header is well-formed but does not match the body.
    #[error("invalid signature")]
    InvalidSignature,

    /// A required field is missing or has the wrong shape.
    #[error("invalid payload: missing or malformed field `{path}`")]
    InvalidPayload { path: String },

    /// The inbound headers name a platform with no parser.
    #[error("platform '{0}' is not supported")]
    UnsupportedPlatform(String),

    /// The remote source-control API could not provide commit detail.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetchFailed(#[from] FetchError),

    /// The aggregator was handed an empty change set.
    #[error("no file changes to analyze")]
    NoChanges,

    /// The aggregator was handed a commit without a sha.
    #[error("missing commit sha")]
    MissingCommitIdentity,

    /// The blocking analysis task did not run to completion.
    #[error("analysis aborted: {0}")]
    AnalysisAborted(String),

    /// The durable store rejected or failed the operation.
    #[error("storage failure: {0}")]
    StorageFailure(String),
}

impl PipelineError {
    pub fn invalid_payload(path: impl Into<String>) -> Self {
        Self::InvalidPayload { path: path.into() }
    }

    /// True for outcomes the task queue may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::StorageFailure(_))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        Self::StorageFailure(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::StorageFailure(format!("serialization: {}", err))
    }
}

/// Errors from the remote source-control API client.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode response: {0}")]
    Decode(String),
}

/// Errors from the object-store client.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object store credentials missing: {0}")]
    Credentials(String),

    #[error("upload of '{key}' failed: {message}")]
    Upload { key: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_payload_names_path() {
        let err = PipelineError::invalid_payload("repository.full_name");
        assert!(err.to_string().contains("repository.full_name"));
    }

    #[test]
    fn test_only_storage_failure_is_transient() {
        assert!(PipelineError::StorageFailure("locked".into()).is_transient());
        assert!(!PipelineError::NoChanges.is_transient());
        assert!(!PipelineError::AnalysisAborted("panicked".into()).is_transient());
    }

    #[test]
    fn test_fetch_error_converts() {
        let err: PipelineError = FetchError::Timeout(20).into();
        assert!(matches!(err, PipelineError::UpstreamFetchFailed(_)));
        assert!(err.to_string().contains("20s"));
    }
}
