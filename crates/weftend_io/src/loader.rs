//! Loader: read an evidence root back into typed receipts.
//!
//! Deterministic: files are visited in byte-wise path order and the
//! discriminator is the `schema` field alone. Per-receipt validation
//! issues are carried, not thrown — the compare layer turns them into
//! side-specific reason codes.

#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};

use camino::Utf8PathBuf;
use serde_json::Value;
use weftend_core::codes;
use weftend_core::entities::{
    self, CompareReceipt, HostRunReceipt, MintPackage, OperatorReceipt, PrivacyLintDoc,
    RunReceipt, SafeRunReceipt, WeftendBuild,
};

use crate::build::fallback_build_identity;
use crate::privacy::walk_sorted;
use crate::validate::{validate_value, ValidationIssue};
use crate::{IoError, IoResult};

/// Typed receipt, discriminated on `schema`.
#[derive(Debug, Clone)]
pub enum ReceiptKind {
    Operator(Box<OperatorReceipt>),
    SafeRun(Box<SafeRunReceipt>),
    Run(Box<RunReceipt>),
    HostRun(Box<HostRunReceipt>),
    Compare(Box<CompareReceipt>),
    PrivacyLint(Box<PrivacyLintDoc>),
    Mint(Box<MintPackage>),
    Unknown(Value),
}

impl ReceiptKind {
    pub fn schema(&self) -> Option<&str> {
        match self {
            ReceiptKind::Operator(r) => Some(&r.schema),
            ReceiptKind::SafeRun(r) => Some(&r.schema),
            ReceiptKind::Run(r) => Some(&r.schema),
            ReceiptKind::HostRun(r) => Some(&r.schema),
            ReceiptKind::Compare(r) => Some(&r.schema),
            ReceiptKind::PrivacyLint(r) => Some(&r.schema),
            ReceiptKind::Mint(r) => Some(&r.schema),
            ReceiptKind::Unknown(v) => v.get("schema").and_then(Value::as_str),
        }
    }
}

/// One loaded JSON document plus its validation findings.
#[derive(Debug, Clone)]
pub struct LoadedReceipt {
    pub rel_path: Utf8PathBuf,
    pub kind: ReceiptKind,
    pub issues: Vec<ValidationIssue>,
}

impl LoadedReceipt {
    /// True when the document predates the receipt contract
    /// (missing `schemaVersion` or `weftendBuild`).
    pub fn old_contract(&self) -> bool {
        self.issues
            .iter()
            .any(|i| i.code == codes::RECEIPT_OLD_CONTRACT)
    }
}

/// An evidence root read back in full.
#[derive(Debug, Clone)]
pub struct LoadedEvidence {
    pub root: PathBuf,
    pub build: WeftendBuild,
    pub receipts: Vec<LoadedReceipt>,
}

impl LoadedEvidence {
    pub fn safe_run(&self) -> Option<&SafeRunReceipt> {
        self.receipts.iter().find_map(|r| match &r.kind {
            ReceiptKind::SafeRun(s) => Some(s.as_ref()),
            _ => None,
        })
    }

    pub fn run(&self) -> Option<&RunReceipt> {
        self.receipts.iter().find_map(|r| match &r.kind {
            ReceiptKind::Run(s) => Some(s.as_ref()),
            _ => None,
        })
    }

    pub fn host_run(&self) -> Option<&HostRunReceipt> {
        self.receipts.iter().find_map(|r| match &r.kind {
            ReceiptKind::HostRun(s) => Some(s.as_ref()),
            _ => None,
        })
    }

    pub fn operator(&self) -> Option<&OperatorReceipt> {
        self.receipts.iter().find_map(|r| match &r.kind {
            ReceiptKind::Operator(s) => Some(s.as_ref()),
            _ => None,
        })
    }

    pub fn mint(&self) -> Option<&MintPackage> {
        self.receipts.iter().find_map(|r| match &r.kind {
            ReceiptKind::Mint(s) => Some(s.as_ref()),
            _ => None,
        })
    }

    /// Relative paths of every loaded evidence file, in visit order.
    pub fn file_paths(&self) -> impl Iterator<Item = &Utf8PathBuf> {
        self.receipts.iter().map(|r| &r.rel_path)
    }
}

/// Load every JSON document under `root`. Errors only when the root
/// itself is missing or unreadable; per-document problems become issues.
pub fn load_evidence_root(root: &Path) -> IoResult<LoadedEvidence> {
    if !root.is_dir() {
        return Err(IoError::Path(format!(
            "evidence root is missing or not a directory: {}",
            root.display()
        )));
    }

    let mut receipts: Vec<LoadedReceipt> = Vec::new();
    for rel in walk_sorted(root)? {
        if rel.extension() != Some("json") {
            continue;
        }
        let text = fs::read_to_string(root.join(rel.as_std_path()))?;
        let loaded = match serde_json::from_str::<Value>(&text) {
            Ok(value) => {
                let issues = validate_value(&value);
                LoadedReceipt {
                    rel_path: rel,
                    kind: discriminate(&value),
                    issues,
                }
            }
            Err(_) => LoadedReceipt {
                rel_path: rel,
                kind: ReceiptKind::Unknown(Value::Null),
                issues: vec![ValidationIssue {
                    code: codes::INPUT_INVALID,
                    pointer: "".to_string(),
                }],
            },
        };
        receipts.push(loaded);
    }

    let build = choose_build(&receipts);
    Ok(LoadedEvidence {
        root: root.to_path_buf(),
        build,
        receipts,
    })
}

fn discriminate(value: &Value) -> ReceiptKind {
    let schema = value.get("schema").and_then(Value::as_str).unwrap_or("");
    macro_rules! typed {
        ($variant:ident, $ty:ty) => {
            match serde_json::from_value::<$ty>(value.clone()) {
                Ok(t) => ReceiptKind::$variant(Box::new(t)),
                Err(_) => ReceiptKind::Unknown(value.clone()),
            }
        };
    }
    match schema {
        entities::SCHEMA_OPERATOR_RECEIPT => typed!(Operator, OperatorReceipt),
        entities::SCHEMA_SAFE_RUN_RECEIPT => typed!(SafeRun, SafeRunReceipt),
        entities::SCHEMA_RUN_RECEIPT => typed!(Run, RunReceipt),
        entities::SCHEMA_HOST_RUN_RECEIPT => typed!(HostRun, HostRunReceipt),
        entities::SCHEMA_COMPARE_RECEIPT => typed!(Compare, CompareReceipt),
        entities::SCHEMA_PRIVACY_LINT => typed!(PrivacyLint, PrivacyLintDoc),
        entities::SCHEMA_MINT => typed!(Mint, MintPackage),
        _ => ReceiptKind::Unknown(value.clone()),
    }
}

/// Build identity precedence: safe-run → run → host-run → operator.
/// With none present, a fallback build carrying
/// `WEFTEND_BUILD_DIGEST_UNAVAILABLE` is returned.
fn choose_build(receipts: &[LoadedReceipt]) -> WeftendBuild {
    for r in receipts {
        if let ReceiptKind::SafeRun(s) = &r.kind {
            return s.weftend_build.clone();
        }
    }
    for r in receipts {
        if let ReceiptKind::Run(s) = &r.kind {
            return s.weftend_build.clone();
        }
    }
    for r in receipts {
        if let ReceiptKind::HostRun(s) = &r.kind {
            return s.weftend_build.clone();
        }
    }
    for r in receipts {
        if let ReceiptKind::Operator(s) = &r.kind {
            return s.weftend_build.clone();
        }
    }
    fallback_build_identity()
}
