//! Webhook signature verification.
//!
//! GitHub signs every delivery with HMAC-SHA256 over the raw request body and
//! sends the result as `X-Hub-Signature-256: sha256=<hex>`. Verification must
//! run on the exact bytes received: decoding and re-encoding the JSON would
//! change the byte content and break the check.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::PipelineError;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the signature.
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

const SHA256_TAG: &str = "sha256";

const DIGEST_LEN: usize = 32;

/// Check `header` against HMAC-SHA256(`secret`, `body`).
///
/// Returns [`PipelineError::Unauthenticated`] when the header is absent or
/// not `sha256=<hex>` with a 32-byte digest, and [`PipelineError::InvalidSignature`] when it is
/// well-formed but does not match. The comparison is constant-time.
pub fn verify_signature(
    secret: &[u8],
    body: &[u8],
    header: Option<&str>,
) -> Result<(), PipelineError> {
    let header = header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .ok_or_else(|| PipelineError::Unauthenticated("missing signature header".into()))?;

    let (algorithm, digest_hex) = header
        .split_once('=')
        .ok_or_else(|| PipelineError::Unauthenticated("malformed signature header".into()))?;

    if algorithm != SHA256_TAG {
        return Err(PipelineError::Unauthenticated(format!(
            "unsupported signature algorithm '{}'",
            algorithm
        )));
    }

    let expected = hex::decode(digest_hex)
        .map_err(|_| PipelineError::Unauthenticated("signature digest is not hex".into()))?;
    if expected.len() != DIGEST_LEN {
        return Err(PipelineError::Unauthenticated(format!(
            "signature digest must be {} bytes, got {}",
            DIGEST_LEN,
            expected.len()
        )));
    }

    let mut mac = keyed_mac(secret);
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| PipelineError::InvalidSignature)
}

/// Produce the `sha256=<hex>` header value for `body`.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = keyed_mac(secret);
    mac.update(body);
    format!("{}={}", SHA256_TAG, hex::encode(mac.finalize().into_bytes()))
}

fn keyed_mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size")
}
