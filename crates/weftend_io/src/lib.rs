//! weftend_io — I/O layer of the evidence engine.
//!
//! Single source of truth for everything that touches bytes on disk:
//! canonical JSON, digests, build identity, receipt validators, the staged
//! atomic evidence writer, the evidence-root loader, and the privacy lint.
//!
//! Shared error type (`IoError`) with `From` conversions used across
//! modules. Strictly offline: nothing here opens a socket.

#![forbid(unsafe_code)]

use thiserror::Error;

/// Unified error for weftend_io.
#[derive(Debug, Error)]
pub enum IoError {
    /// Filesystem / path errors (create_dir_all, rename, fsync, etc.)
    #[error("io/path error: {0}")]
    Path(String),

    /// JSON serialization/deserialization errors with a JSON-pointer hint.
    #[error("json error at {pointer}: {msg}")]
    Json { pointer: String, msg: String },

    /// A value carried a number canonical JSON forbids (float or out of
    /// the signed 53-bit evidence domain).
    #[error("non-canonical number at {0}")]
    NonCanonicalNumber(String),

    /// Hashing-related errors.
    #[error("hash error: {0}")]
    Hash(String),

    /// A fail-closed precondition or validation failure. The code is the
    /// first line of stderr; the process exits 40.
    #[error("[{code}] {msg}")]
    FailClosed { code: &'static str, msg: String },

    /// Generic validation / invariants.
    #[error("invalid: {0}")]
    Invalid(String),
}

impl IoError {
    pub fn fail_closed(code: &'static str, msg: impl Into<String>) -> Self {
        IoError::FailClosed {
            code,
            msg: msg.into(),
        }
    }

    /// The reason code for fail-closed errors, `INTERNAL_ERROR` otherwise.
    pub fn reason_code(&self) -> &'static str {
        match self {
            IoError::FailClosed { code, .. } => code,
            _ => weftend_core::codes::INTERNAL_ERROR,
        }
    }
}

pub type IoResult<T> = Result<T, IoError>;

impl From<std::io::Error> for IoError {
    fn from(e: std::io::Error) -> Self {
        IoError::Path(e.to_string())
    }
}

impl From<serde_json::Error> for IoError {
    fn from(e: serde_json::Error) -> Self {
        // serde_json does not keep a pointer; callers enrich at higher layers.
        IoError::Json {
            pointer: "/".to_string(),
            msg: e.to_string(),
        }
    }
}

pub mod build;
pub mod canonical_json;
pub mod digest;
pub mod loader;
pub mod privacy;
pub mod validate;
pub mod writer;

pub mod prelude {
    pub use crate::build::compute_build_identity;
    pub use crate::canonical_json::{canonical_bytes_for, to_canonical_json_bytes};
    pub use crate::digest::{
        compute_artifact_digest_v0, receipt_digest_over, seal_receipt, sha256_hex,
        verify_receipt_digest,
    };
    pub use crate::loader::{load_evidence_root, LoadedEvidence, ReceiptKind};
    pub use crate::validate::{validate_value, ValidationIssue};
    pub use crate::writer::{EvidenceWriter, FinalizeSummary};
    pub use crate::{IoError, IoResult};
}
