//! Storage encoding for diff content.
//!
//! Diffs are gzip-compressed (fixed header mtime, so the same input always
//! yields the same bytes) and then placed according to their compressed size:
//!
//! | Compressed size | Object store | Disposition |
//! |-----------------|--------------|-------------|
//! | ≤ threshold | any | inline in `diff_patch` |
//! | > threshold | configured, upload ok | offloaded, URL in `diff_url` |
//! | > threshold | absent or upload failed | inline, flagged oversized |
//!
//! Exactly one of `diff_patch` / `diff_url` is set when there is diff content;
//! neither is set when there is none.

use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use serde::Serialize;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::error::PipelineError;
use crate::object_store::ObjectStore;

/// 256 KiB.
pub const DEFAULT_OFFLOAD_THRESHOLD: usize = 256 * 1024;

/// Gzip `data` with a zeroed header timestamp.
pub fn compress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

pub fn decompress(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Object key for an offloaded diff.
pub fn offload_key(repository: &str, commit_sha: &str) -> String {
    format!("{}/{}.patch.gz", repository, commit_sha)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffDisposition {
    /// No diff content.
    Absent,
    Inline,
    Offloaded,
    /// Over the threshold but kept in the row.
    InlineOversized,
}

impl DiffDisposition {
    pub fn as_str(self) -> &'static str {
        match self {
            DiffDisposition::Absent => "absent",
            DiffDisposition::Inline => "inline",
            DiffDisposition::Offloaded => "offloaded",
            DiffDisposition::InlineOversized => "inline_oversized",
        }
    }
}

/// Where the diff for one commit ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedDiff {
    pub diff_patch: Option<Vec<u8>>,
    pub diff_url: Option<String>,
    pub disposition: DiffDisposition,
    pub original_size: usize,
    pub compressed_size: usize,
}

impl EncodedDiff {
    fn absent() -> Self {
        Self {
            diff_patch: None,
            diff_url: None,
            disposition: DiffDisposition::Absent,
            original_size: 0,
            compressed_size: 0,
        }
    }

    /// True when the stored row carries more than the threshold.
    pub fn oversized(&self) -> bool {
        self.disposition == DiffDisposition::InlineOversized
    }
}

pub struct StorageEncoder {
    threshold: usize,
    object_store: Option<Arc<dyn ObjectStore>>,
}

impl std::fmt::Debug for StorageEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEncoder")
            .field("threshold", &self.threshold)
            .field("object_store", &self.object_store.is_some())
            .finish()
    }
}

impl StorageEncoder {
    pub fn new(threshold: usize, object_store: Option<Arc<dyn ObjectStore>>) -> Self {
        Self {
            threshold,
            object_store,
        }
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Compress `content` and decide where it goes.
    ///
    /// Never loses data: a missing backend or a failed upload keeps the
    /// compressed bytes inline and logs a warning.
    pub async fn encode(
        &self,
        repository: &str,
        commit_sha: &str,
        content: Option<&[u8]>,
    ) -> Result<EncodedDiff, PipelineError> {
        let content = match content {
            Some(c) if !c.is_empty() => c,
            _ => return Ok(EncodedDiff::absent()),
        };

        let compressed = compress(content)
            .map_err(|e| PipelineError::StorageFailure(format!("compression: {}", e)))?;
        let original_size = content.len();
        let compressed_size = compressed.len();

        if compressed_size <= self.threshold {
            return Ok(EncodedDiff {
                diff_patch: Some(compressed),
                diff_url: None,
                disposition: DiffDisposition::Inline,
                original_size,
                compressed_size,
            });
        }

        if let Some(store) = &self.object_store {
            let key = offload_key(repository, commit_sha);
            match store.upload(&key, compressed.clone()).await {
                Ok(url) => {
                    tracing::info!(
                        repository,
                        commit_sha,
                        key = %key,
                        compressed_size,
                        "diff offloaded"
                    );
                    return Ok(EncodedDiff {
                        diff_patch: None,
                        diff_url: Some(url),
                        disposition: DiffDisposition::Offloaded,
                        original_size,
                        compressed_size,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        repository,
                        commit_sha,
                        error = %e,
                        "diff offload failed, storing inline"
                    );
                }
            }
        } else {
            tracing::warn!(
                repository,
                commit_sha,
                compressed_size,
                threshold = self.threshold,
                "diff exceeds threshold and no object store is configured, storing inline"
            );
        }

        Ok(EncodedDiff {
            diff_patch: Some(compressed),
            diff_url: None,
            disposition: DiffDisposition::InlineOversized,
            original_size,
            compressed_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;

    /// Incompressible-ish bytes from a small LCG.
    fn noise(len: usize) -> Vec<u8> {
        let mut state: u32 = 0x1234_5678;
        (0..len)
            .map(|_| {
                state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                (state >> 24) as u8
            })
            .collect()
    }

    #[test]
    fn test_compress_round_trip() {
        let data = b"diff --git a/x.py b/x.py\n+print('hi')\n".repeat(50);
        let packed = compress(&data).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_compression_is_deterministic() {
        let data = noise(4096);
        assert_eq!(compress(&data).unwrap(), compress(&data).unwrap());
    }

    #[test]
    fn test_offload_key() {
        assert_eq!(offload_key("acme/widgets", "abc"), "acme/widgets/abc.patch.gz");
    }

    #[tokio::test]
    async fn test_absent_content() {
        let encoder = StorageEncoder::new(DEFAULT_OFFLOAD_THRESHOLD, None);
        for content in [None, Some(&b""[..])] {
            let encoded = encoder.encode("a/b", "abc", content).await.unwrap();
            assert_eq!(encoded.disposition, DiffDisposition::Absent);
            assert!(encoded.diff_patch.is_none());
            assert!(encoded.diff_url.is_none());
        }
    }

    #[tokio::test]
    async fn test_small_diff_inline() {
        let encoder = StorageEncoder::new(DEFAULT_OFFLOAD_THRESHOLD, None);
        let encoded = encoder.encode("a/b", "abc", Some(b"+x\n")).await.unwrap();
        assert_eq!(encoded.disposition, DiffDisposition::Inline);
        assert_eq!(decompress(encoded.diff_patch.as_ref().unwrap()).unwrap(), b"+x\n");
        assert!(encoded.diff_url.is_none());
    }

    #[tokio::test]
    async fn test_large_diff_without_store_stays_inline() {
        let encoder = StorageEncoder::new(DEFAULT_OFFLOAD_THRESHOLD, None);
        let content = noise(1024 * 1024);
        let encoded = encoder.encode("a/b", "abc", Some(&content)).await.unwrap();
        assert!(encoded.oversized());
        assert!(encoded.compressed_size > DEFAULT_OFFLOAD_THRESHOLD);
        assert_eq!(decompress(encoded.diff_patch.as_ref().unwrap()).unwrap(), content);
        assert!(encoded.diff_url.is_none());
    }

    #[tokio::test]
    async fn test_large_diff_offloaded() {
        let store = Arc::new(InMemoryObjectStore::new());
        let encoder = StorageEncoder::new(1024, Some(store.clone()));
        let content = noise(8192);
        let encoded = encoder.encode("acme/w", "abc", Some(&content)).await.unwrap();
        assert_eq!(encoded.disposition, DiffDisposition::Offloaded);
        assert!(encoded.diff_patch.is_none());
        assert_eq!(encoded.diff_url.as_deref(), Some("memory://acme/w/abc.patch.gz"));
        let stored = store.get("acme/w/abc.patch.gz").unwrap();
        assert_eq!(decompress(&stored).unwrap(), content);
    }

    #[tokio::test]
    async fn test_failed_upload_falls_back_inline() {
        let encoder = StorageEncoder::new(1024, Some(Arc::new(InMemoryObjectStore::failing())));
        let content = noise(8192);
        let encoded = encoder.encode("acme/w", "abc", Some(&content)).await.unwrap();
        assert!(encoded.oversized());
        assert!(encoded.diff_patch.is_some());
        assert!(encoded.diff_url.is_none());
    }
}
