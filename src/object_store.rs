//! Object-store collaborator used to offload large diffs.
//!
//! [`S3ObjectStore`] talks to S3 (or MinIO / LocalStack through
//! `endpoint_url`) over the REST API with AWS Signature Version 4, signed with
//! `hmac` + `sha2` directly. Uploads are single `PUT Object` requests;
//! downloads go through presigned `GET` URLs.
//!
//! # Environment Variables
//!
//! - `AWS_ACCESS_KEY_ID`: required
//! - `AWS_SECRET_ACCESS_KEY`: required
//! - `AWS_SESSION_TOKEN`: optional
//!
//! ```toml
//! [object_store]
//! bucket = "diffs"
//! region = "us-east-1"
//! prefix = "pushlens/"
//! # endpoint_url = "http://localhost:9000"   # MinIO
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::ObjectStoreConfig;
use crate::error::ObjectStoreError;

type HmacSha256 = Hmac<Sha256>;

/// Presigned URLs are capped at seven days by S3.
const MAX_PRESIGN_TTL_SECS: u64 = 7 * 24 * 3600;

/// Blob storage for diff content that is too large for the events table.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` under `key` and return a URL that identifies the object.
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, ObjectStoreError>;

    /// Time-limited download URL for `key`, when the backend can issue one.
    fn presigned_url(&self, key: &str, ttl: Duration) -> Option<String>;
}

// ============ AWS Credentials ============

#[derive(Clone)]
struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

impl AwsCredentials {
    fn from_env() -> Result<Self, ObjectStoreError> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            ObjectStoreError::Credentials("AWS_ACCESS_KEY_ID environment variable not set".into())
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            ObjectStoreError::Credentials(
                "AWS_SECRET_ACCESS_KEY environment variable not set".into(),
            )
        })?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

// ============ S3 client ============

#[derive(Debug)]
pub struct S3ObjectStore {
    config: ObjectStoreConfig,
    creds: AwsCredentials,
    client: reqwest::Client,
}

impl S3ObjectStore {
    /// Build a client from config, reading credentials from the environment.
    pub fn from_config(config: &ObjectStoreConfig) -> Result<Self, ObjectStoreError> {
        let creds = AwsCredentials::from_env()?;
        Self::with_credentials(config, creds)
    }

    fn with_credentials(
        config: &ObjectStoreConfig,
        creds: AwsCredentials,
    ) -> Result<Self, ObjectStoreError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ObjectStoreError::Credentials(format!("http client: {}", e)))?;
        Ok(Self {
            config: config.clone(),
            creds,
            client,
        })
    }

    /// Object key with the configured prefix applied.
    fn full_key(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", prefix, key.trim_start_matches('/'))
        }
    }

    fn scheme(&self) -> &'static str {
        match &self.config.endpoint_url {
            Some(endpoint) if endpoint.starts_with("http://") => "http",
            _ => "https",
        }
    }

    /// Canonical URI for a key: path-style under a custom endpoint,
    /// virtual-hosted style on AWS.
    fn canonical_uri(&self, key: &str) -> String {
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        if self.config.endpoint_url.is_some() {
            format!("/{}/{}", uri_encode(&self.config.bucket), encoded_key)
        } else {
            format!("/{}", encoded_key)
        }
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}://{}{}",
            self.scheme(),
            s3_host(&self.config),
            self.canonical_uri(key)
        )
    }

    fn presign_at(&self, key: &str, ttl: Duration, now: DateTime<Utc>) -> String {
        let key = self.full_key(key);
        let host = s3_host(&self.config);
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let expires = ttl.as_secs().clamp(1, MAX_PRESIGN_TTL_SECS);

        let mut query_params = vec![
            ("X-Amz-Algorithm".to_string(), "AWS4-HMAC-SHA256".to_string()),
            (
                "X-Amz-Credential".to_string(),
                format!("{}/{}", self.creds.access_key_id, credential_scope),
            ),
            ("X-Amz-Date".to_string(), amz_date.clone()),
            ("X-Amz-Expires".to_string(), expires.to_string()),
            ("X-Amz-SignedHeaders".to_string(), "host".to_string()),
        ];
        if let Some(ref token) = self.creds.session_token {
            query_params.push(("X-Amz-Security-Token".to_string(), token.clone()));
        }
        query_params.sort_by(|a, b| a.0.cmp(&b.0));
        let canonical_querystring: String = query_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let canonical_uri = self.canonical_uri(&key);
        let canonical_request = format!(
            "GET\n{}\n{}\nhost:{}\n\nhost\nUNSIGNED-PAYLOAD",
            canonical_uri, canonical_querystring, host
        );
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        format!(
            "{}?{}&X-Amz-Signature={}",
            self.object_url(&key),
            canonical_querystring,
            signature
        )
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, ObjectStoreError> {
        let key = self.full_key(key);
        let host = s3_host(&self.config);
        let url = self.object_url(&key);

        let now = Utc::now();
        let date_stamp = now.format("%Y%m%d").to_string();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();

        let payload_hash = hex_sha256(&bytes);

        let mut headers = vec![
            ("content-type".to_string(), "application/gzip".to_string()),
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        headers.sort_by(|a, b| a.0.cmp(&b.0));

        let signed_headers: String = headers
            .iter()
            .map(|(k, _)| k.as_str())
            .collect::<Vec<_>>()
            .join(";");
        let canonical_headers: String = headers
            .iter()
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        let canonical_request = format!(
            "PUT\n{}\n\n{}\n{}\n{}",
            self.canonical_uri(&key),
            canonical_headers,
            signed_headers,
            payload_hash
        );

        let credential_scope = format!("{}/{}/s3/aws4_request", date_stamp, self.config.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{}",
            amz_date,
            credential_scope,
            hex_sha256(canonical_request.as_bytes())
        );
        let signing_key = derive_signing_key(
            &self.creds.secret_access_key,
            &date_stamp,
            &self.config.region,
            "s3",
        );
        let signature = hex_hmac_sha256(&signing_key, string_to_sign.as_bytes());

        let authorization = format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.creds.access_key_id, credential_scope, signed_headers, signature
        );

        let mut req_builder = self
            .client
            .put(&url)
            .header("Authorization", &authorization)
            .header("Content-Type", "application/gzip")
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date)
            .body(bytes);

        if let Some(ref token) = self.creds.session_token {
            req_builder = req_builder.header("x-amz-security-token", token);
        }

        let resp = req_builder.send().await.map_err(|e| ObjectStoreError::Upload {
            key: key.clone(),
            message: e.to_string(),
        })?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Upload {
                key,
                message: format!(
                    "HTTP {}: {}",
                    status,
                    body.chars().take(500).collect::<String>()
                ),
            });
        }

        tracing::debug!(bucket = %self.config.bucket, key = %key, "diff uploaded");
        Ok(format!("s3://{}/{}", self.config.bucket, key))
    }

    fn presigned_url(&self, key: &str, ttl: Duration) -> Option<String> {
        Some(self.presign_at(key, ttl, Utc::now()))
    }
}

// ============ In-memory store ============

/// Process-local object store, for tests and offline runs.
#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_uploads: bool,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose uploads always fail.
    pub fn failing() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_uploads: true,
        }
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .ok()
            .and_then(|objects| objects.get(key).cloned())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn upload(&self, key: &str, bytes: Vec<u8>) -> Result<String, ObjectStoreError> {
        if self.fail_uploads {
            return Err(ObjectStoreError::Upload {
                key: key.to_string(),
                message: "uploads disabled".to_string(),
            });
        }
        let mut objects = self.objects.lock().map_err(|_| ObjectStoreError::Upload {
            key: key.to_string(),
            message: "store lock poisoned".to_string(),
        })?;
        objects.insert(key.to_string(), bytes);
        Ok(format!("memory://{}", key))
    }

    fn presigned_url(&self, key: &str, ttl: Duration) -> Option<String> {
        self.get(key)
            .map(|_| format!("memory://{}?expires={}", key, ttl.as_secs()))
    }
}

// ============ AWS SigV4 Helpers ============

/// S3 hostname for the bucket, or the custom endpoint's host.
fn s3_host(config: &ObjectStoreConfig) -> String {
    if let Some(ref endpoint) = config.endpoint_url {
        endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string()
    } else {
        format!("{}.s3.{}.amazonaws.com", config.bucket, config.region)
    }
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn hex_hmac_sha256(key: &[u8], data: &[u8]) -> String {
    hex::encode(hmac_sha256(key, data))
}

/// Derive the SigV4 signing key.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
fn derive_signing_key(secret_key: &str, date_stamp: &str, region: &str, service: &str) -> Vec<u8> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    );
    let k_region = hmac_sha256(&k_date, region.as_bytes());
    let k_service = hmac_sha256(&k_region, service.as_bytes());
    hmac_sha256(&k_service, b"aws4_request")
}

/// RFC 3986 encoding of everything except `A-Z a-z 0-9 - _ . ~`.
fn uri_encode(s: &str) -> String {
    let mut result = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(endpoint: Option<&str>) -> ObjectStoreConfig {
        ObjectStoreConfig {
            bucket: "diffs".to_string(),
            region: "us-east-1".to_string(),
            prefix: "pushlens/".to_string(),
            endpoint_url: endpoint.map(str::to_string),
            presign_ttl_secs: 3600,
            timeout_secs: 5,
        }
    }

    fn store(endpoint: Option<&str>) -> S3ObjectStore {
        S3ObjectStore::with_credentials(
            &config(endpoint),
            AwsCredentials {
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".to_string(),
                session_token: None,
            },
        )
        .unwrap()
    }

    #[test]
    fn test_signing_key_vector() {
        // AWS documentation example for SigV4 key derivation.
        let key = derive_signing_key(
            "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY",
            "20120215",
            "us-east-1",
            "iam",
        );
        assert_eq!(
            hex::encode(key),
            "f4780e2d9f65fa895f9c67b32ce1baf0b0d8a43505a000a1a9e090d414db404d"
        );
    }

    #[test]
    fn test_uri_encode() {
        assert_eq!(uri_encode("acme/widgets"), "acme%2Fwidgets");
        assert_eq!(uri_encode("a b~c"), "a%20b~c");
        assert_eq!(uri_encode("abc.patch.gz"), "abc.patch.gz");
    }

    #[test]
    fn test_hosts_and_urls() {
        let aws = store(None);
        assert_eq!(s3_host(&aws.config), "diffs.s3.us-east-1.amazonaws.com");
        assert_eq!(
            aws.object_url("pushlens/acme/widgets/abc.patch.gz"),
            "https://diffs.s3.us-east-1.amazonaws.com/pushlens/acme/widgets/abc.patch.gz"
        );

        let minio = store(Some("http://localhost:9000/"));
        assert_eq!(
            minio.object_url("k.gz"),
            "http://localhost:9000/diffs/k.gz"
        );
    }

    #[test]
    fn test_prefix_applied_once() {
        let s = store(None);
        assert_eq!(s.full_key("acme/w/abc.patch.gz"), "pushlens/acme/w/abc.patch.gz");
    }

    #[test]
    fn test_presigned_url_is_deterministic() {
        let s = store(None);
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let a = s.presign_at("acme/w/abc.patch.gz", Duration::from_secs(600), now);
        let b = s.presign_at("acme/w/abc.patch.gz", Duration::from_secs(600), now);
        assert_eq!(a, b);
        assert!(a.starts_with(
            "https://diffs.s3.us-east-1.amazonaws.com/pushlens/acme/w/abc.patch.gz?"
        ));
        assert!(a.contains("X-Amz-Expires=600"));
        assert!(a.contains("X-Amz-Date=20240102T030405Z"));
        assert!(a.contains("X-Amz-Signature="));
    }

    #[test]
    fn test_presign_ttl_is_capped() {
        let s = store(None);
        let url = s.presign_at("k", Duration::from_secs(30 * 24 * 3600), Utc::now());
        assert!(url.contains("X-Amz-Expires=604800"));
    }

    #[tokio::test]
    async fn test_in_memory_store() {
        let store = InMemoryObjectStore::new();
        let url = store.upload("a/b.gz", vec![1, 2, 3]).await.unwrap();
        assert_eq!(url, "memory://a/b.gz");
        assert_eq!(store.get("a/b.gz"), Some(vec![1, 2, 3]));
        assert!(store.presigned_url("a/b.gz", Duration::from_secs(60)).is_some());
        assert!(store.presigned_url("missing", Duration::from_secs(60)).is_none());

        let failing = InMemoryObjectStore::failing();
        assert!(failing.upload("x", vec![]).await.is_err());
        assert!(failing.is_empty());
    }
}
