//! SHA-256 hashing over **canonical JSON** bytes, the artifact digest
//! helper, and the receipt-digest sentinel algebra.
//!
//! Deterministic: same canonical structure ⇒ same lowercase 64-hex across
//! OS/arch. `receiptDigest` is computed by first setting the field to the
//! zero-digest sentinel, canonicalizing, hashing, then replacing the
//! sentinel with the hash.

#![forbid(unsafe_code)]

use digest::Digest;
use serde::Serialize;
use serde_json::Value;
use sha2::Sha256;
use weftend_core::ids::ZERO_DIGEST_SENTINEL;

use crate::canonical_json::{canonical_bytes_for, to_canonical_json_bytes};
use crate::{IoError, IoResult};

/// Compute lowercase 64-hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Streaming SHA-256 for any reader; returns lowercase 64-hex.
pub fn sha256_stream<R: std::io::Read>(reader: &mut R) -> IoResult<String> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).map_err(IoError::from)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash a file from disk; returns lowercase 64-hex.
pub fn sha256_file<P: AsRef<std::path::Path>>(path: P) -> IoResult<String> {
    let mut f = std::fs::File::open(path)?;
    sha256_stream(&mut f)
}

/// `"sha256:" + hex` over the exact input bytes — the v0 artifact digest.
pub fn compute_artifact_digest_v0(bytes: &[u8]) -> String {
    format!("sha256:{}", sha256_hex(bytes))
}

/// SHA-256 of the canonical JSON form of any `Serialize`; `sha256:<hex>`.
pub fn canonical_digest_for<T: Serialize>(value: &T) -> IoResult<String> {
    let bytes = canonical_bytes_for(value)?;
    Ok(compute_artifact_digest_v0(&bytes))
}

const RECEIPT_DIGEST_KEY: &str = "receiptDigest";

/// Compute a receipt's own digest: the `receiptDigest` field is replaced by
/// the zero-digest sentinel before canonicalizing and hashing.
pub fn receipt_digest_over(value: &Value) -> IoResult<String> {
    let obj = value
        .as_object()
        .ok_or_else(|| IoError::Invalid("receipt must be a JSON object".into()))?;
    let mut clone = obj.clone();
    clone.insert(
        RECEIPT_DIGEST_KEY.to_string(),
        Value::String(ZERO_DIGEST_SENTINEL.to_string()),
    );
    let bytes = to_canonical_json_bytes(&Value::Object(clone))?;
    Ok(compute_artifact_digest_v0(&bytes))
}

/// Embed the computed digest into the receipt, returning the sealed value.
pub fn seal_receipt(mut value: Value) -> IoResult<Value> {
    let digest = receipt_digest_over(&value)?;
    let obj = value
        .as_object_mut()
        .ok_or_else(|| IoError::Invalid("receipt must be a JSON object".into()))?;
    obj.insert(RECEIPT_DIGEST_KEY.to_string(), Value::String(digest));
    Ok(value)
}

/// Recompute the digest of a sealed receipt and compare to the embedded one.
pub fn verify_receipt_digest(value: &Value) -> IoResult<bool> {
    let embedded = value
        .get(RECEIPT_DIGEST_KEY)
        .and_then(Value::as_str)
        .ok_or_else(|| IoError::Invalid("receipt has no receiptDigest".into()))?;
    Ok(receipt_digest_over(value)? == embedded)
}
