//! Evidence writer: staged atomic finalize.
//!
//! State machine for a run with target root `R`:
//!
//!   INIT → STAGING → VALIDATED → DIGESTED → COMMITTED | ABORTED
//!
//! All writes land under `R.stage`; each file write is itself staged
//! (unique temp → fsync → rename) so no partially written file is ever
//! visible. The final `R.stage → R` rename is the only irreversible step.
//! Any failure before it leaves the user-visible root unchanged.

use std::fs;
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::Value;
use weftend_core::codes::{self, OutOp};
use weftend_core::entities::{
    OperatorReceipt, PrivacyLintDoc, ReceiptEntry, WeftendBuild, SCHEMA_OPERATOR_RECEIPT,
    SCHEMA_VERSION,
};
use weftend_core::ids::DigestStr;
use weftend_core::order::{cmp_str_v0, stable_sort_unique_v0};

use crate::canonical_json::{canonical_file_bytes, write_bytes_atomically};
use crate::digest::{seal_receipt, sha256_file};
use crate::privacy::{self, PRIVACY_LINT_REL_PATH};
use crate::validate::validate_value;
use crate::{IoError, IoResult};

/// Filename of the aggregate receipt, written last.
pub const OPERATOR_RECEIPT_FILE: &str = "operator_receipt.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Staging,
    Validated,
    Committed,
    Aborted,
}

/// Outcome of a committed run.
#[derive(Debug, Clone)]
pub struct FinalizeSummary {
    pub operator: OperatorReceipt,
    pub privacy: PrivacyLintDoc,
}

/// Linear, single-owner writer for one evidence root.
#[derive(Debug)]
pub struct EvidenceWriter {
    root: PathBuf,
    stage: PathBuf,
    op: OutOp,
    orphan: bool,
    state: State,
    kinds: Vec<(Utf8PathBuf, String)>,
}

impl EvidenceWriter {
    /// INIT → STAGING. Enforces the out-path safety rules, records the
    /// orphan flag, removes a leftover stage, and creates a fresh one.
    pub fn begin(root: &Path, op: OutOp) -> IoResult<Self> {
        check_out_dir(root, op)?;

        let orphan = match fs::read_dir(root) {
            Ok(mut it) => it.next().is_some(),
            Err(_) => false, // root does not exist yet
        };

        let stage = stage_root_for(root);
        if stage.exists() {
            fs::remove_dir_all(&stage)?;
        }
        fs::create_dir_all(&stage)?;

        Ok(EvidenceWriter {
            root: root.to_path_buf(),
            stage,
            op,
            orphan,
            state: State::Staging,
            kinds: Vec::new(),
        })
    }

    pub fn op(&self) -> OutOp {
        self.op
    }

    /// True when the target root pre-existed non-empty; the operator
    /// receipt will carry the orphan warning.
    pub fn orphan_flagged(&self) -> bool {
        self.orphan
    }

    /// Stage a canonical JSON document at `rel` under the root.
    pub fn stage_receipt(&mut self, rel: &str, value: &Value, kind: &str) -> IoResult<()> {
        let bytes = canonical_file_bytes(value)?;
        self.stage_bytes(rel, &bytes, kind)
    }

    /// Stage a text file. The renderer owns the trailing newline.
    pub fn stage_text(&mut self, rel: &str, text: &str, kind: &str) -> IoResult<()> {
        self.stage_bytes(rel, text.as_bytes(), kind)
    }

    /// Stage raw bytes verbatim (ticket packs carry source files as-is).
    pub fn stage_raw(&mut self, rel: &str, bytes: &[u8], kind: &str) -> IoResult<()> {
        self.stage_bytes(rel, bytes, kind)
    }

    fn stage_bytes(&mut self, rel: &str, bytes: &[u8], kind: &str) -> IoResult<()> {
        self.expect_state(State::Staging)?;
        let rel = checked_rel_path(rel)?;
        let target = self.stage.join(rel.as_std_path());
        write_bytes_atomically(&target, bytes)?;
        self.kinds.retain(|(p, _)| p != &rel);
        self.kinds.push((rel, kind.to_string()));
        Ok(())
    }

    /// STAGING → VALIDATED: validate every staged receipt against its
    /// schema. Any issue aborts; the first issue code is surfaced.
    pub fn validate_all(&mut self) -> IoResult<()> {
        self.expect_state(State::Staging)?;
        for rel in privacy::walk_sorted(&self.stage)? {
            if rel.extension() != Some("json") {
                continue;
            }
            let text = fs::read_to_string(self.stage.join(rel.as_std_path()))?;
            let value: Value = serde_json::from_str(&text).map_err(|e| IoError::Json {
                pointer: format!("/{rel}"),
                msg: e.to_string(),
            })?;
            let issues = validate_value(&value);
            if let Some(first) = issues.first() {
                let code = first.code;
                self.abort();
                return Err(IoError::fail_closed(
                    code,
                    format!("staged receipt {rel} failed validation"),
                ));
            }
        }
        self.state = State::Validated;
        Ok(())
    }

    /// VALIDATED → DIGESTED → COMMITTED.
    ///
    /// Runs the privacy lint over the staged tree (the result is staged and
    /// digested like any other file), digests every regular file in sorted
    /// order, writes the operator receipt last, then commits atomically.
    pub fn finalize(mut self, build: &WeftendBuild) -> IoResult<FinalizeSummary> {
        self.expect_state(State::Validated)?;

        let privacy_doc = privacy::lint_tree(&self.stage)?;
        let lint_value = serde_json::to_value(&privacy_doc)?;
        let lint_bytes = canonical_file_bytes(&lint_value)?;
        let lint_rel = checked_rel_path(PRIVACY_LINT_REL_PATH)?;
        write_bytes_atomically(&self.stage.join(lint_rel.as_std_path()), &lint_bytes)?;
        self.kinds.push((lint_rel, "privacy_lint".to_string()));

        // DIGESTED: walk sorted, hash every regular file.
        let mut entries: Vec<ReceiptEntry> = Vec::new();
        for rel in privacy::walk_sorted(&self.stage)? {
            let hex = sha256_file(self.stage.join(rel.as_std_path()))?;
            let digest = DigestStr::from_sha256_hex(&hex)
                .map_err(|e| IoError::Hash(format!("file digest: {e}")))?;
            let kind = self
                .kinds
                .iter()
                .find(|(p, _)| p == &rel)
                .map(|(_, k)| k.clone())
                .unwrap_or_else(|| "file".to_string());
            entries.push(ReceiptEntry {
                rel_path: rel.to_string(),
                kind,
                digest,
            });
        }
        entries.sort_by(|a, b| cmp_str_v0(&a.rel_path, &b.rel_path));

        let mut warnings: Vec<String> = Vec::new();
        if self.orphan {
            warnings.push(codes::SAFE_RUN_EVIDENCE_ORPHAN_OUTPUT.to_string());
        }
        let warnings = stable_sort_unique_v0(warnings.iter().map(String::as_str));

        let operator = OperatorReceipt {
            schema: SCHEMA_OPERATOR_RECEIPT.to_string(),
            schema_version: SCHEMA_VERSION,
            weftend_build: build.clone(),
            receipt_digest: DigestStr::zero_sentinel(),
            receipts: entries,
            warnings,
        };
        let sealed = seal_receipt(serde_json::to_value(&operator)?)?;
        let operator: OperatorReceipt = serde_json::from_value(sealed.clone())?;
        let bytes = canonical_file_bytes(&sealed)?;
        write_bytes_atomically(&self.stage.join(OPERATOR_RECEIPT_FILE), &bytes)?;

        self.commit()?;
        Ok(FinalizeSummary {
            operator,
            privacy: privacy_doc,
        })
    }

    /// The only irreversible step: swap the stage into place.
    fn commit(&mut self) -> IoResult<()> {
        let prev = prev_root_for(&self.root);
        let had_prev_root = self.root.exists();
        if had_prev_root {
            if prev.exists() {
                fs::remove_dir_all(&prev)?;
            }
            fs::rename(&self.root, &prev)?;
        }
        match fs::rename(&self.stage, &self.root) {
            Ok(()) => {
                if had_prev_root {
                    let _ = fs::remove_dir_all(&prev); // best-effort
                }
                self.state = State::Committed;
                Ok(())
            }
            Err(e) => {
                // Restore the pre-run root, then abort.
                if had_prev_root {
                    let _ = fs::rename(&prev, &self.root);
                }
                self.abort();
                Err(IoError::Path(format!("commit rename failed: {e}")))
            }
        }
    }

    /// ABORTED: remove the stage best-effort; `R` is untouched.
    pub fn abort(&mut self) {
        if matches!(self.state, State::Staging | State::Validated) {
            let _ = fs::remove_dir_all(&self.stage);
            self.state = State::Aborted;
        }
    }

    fn expect_state(&self, want: State) -> IoResult<()> {
        if self.state == want {
            Ok(())
        } else {
            Err(IoError::Invalid(format!(
                "writer in state {:?}, expected {:?}",
                self.state, want
            )))
        }
    }
}

impl Drop for EvidenceWriter {
    fn drop(&mut self) {
        // A dropped, uncommitted writer leaves no residue.
        self.abort();
    }
}

/// `<root>.stage` — the whole-root staging directory.
pub fn stage_root_for(root: &Path) -> PathBuf {
    let mut s = root.as_os_str().to_owned();
    s.push(".stage");
    PathBuf::from(s)
}

fn prev_root_for(root: &Path) -> PathBuf {
    let mut s = root.as_os_str().to_owned();
    s.push(".prev");
    PathBuf::from(s)
}

/// Out-path safety, enforced before STAGING begins.
fn check_out_dir(root: &Path, op: OutOp) -> IoResult<()> {
    let raw = root.as_os_str();
    if raw.is_empty() || raw == "." || raw == ".." {
        return Err(IoError::fail_closed(
            op.out_path_not_directory(),
            "output root must be a named directory",
        ));
    }
    if root.exists() && !root.is_dir() {
        return Err(IoError::fail_closed(
            op.out_path_not_directory(),
            "output root exists and is not a directory",
        ));
    }
    if let Some(parent) = root.parent() {
        if !parent.as_os_str().is_empty() && !parent.is_dir() {
            return Err(IoError::fail_closed(
                op.out_path_parent_not_directory(),
                "output root parent is not a directory",
            ));
        }
    }
    Ok(())
}

/// A staged path must be relative, UTF-8, and free of traversal segments.
fn checked_rel_path(rel: &str) -> IoResult<Utf8PathBuf> {
    let p = Utf8Path::new(rel);
    if p.as_str().is_empty() || p.is_absolute() {
        return Err(IoError::Invalid(format!("bad staged path: {rel:?}")));
    }
    for comp in p.components() {
        match comp {
            camino::Utf8Component::Normal(_) => {}
            _ => return Err(IoError::Invalid(format!("bad staged path: {rel:?}"))),
        }
    }
    Ok(p.to_path_buf())
}

/// True when `a` equals, contains, or is contained by `b` after
/// best-effort absolutization. Used by compare's out-conflict guard.
pub fn paths_overlap(a: &Path, b: &Path) -> bool {
    let a = absolutize(a);
    let b = absolutize(b);
    a == b || a.starts_with(&b) || b.starts_with(&a)
}

fn absolutize(p: &Path) -> PathBuf {
    if let Ok(c) = fs::canonicalize(p) {
        return c;
    }
    // Not yet on disk: canonicalize the nearest existing parent so both
    // sides of an overlap check resolve through the same symlinks.
    if let (Some(parent), Some(name)) = (p.parent(), p.file_name()) {
        if let Ok(cp) = fs::canonicalize(parent) {
            return cp.join(name);
        }
    }
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use weftend_core::entities::{BuildDigestAlgo, BuildSource};

    fn test_build() -> WeftendBuild {
        WeftendBuild {
            algo: BuildDigestAlgo::Sha256,
            digest: DigestStr::zero_sentinel(),
            source: BuildSource::Binary,
            reason_codes: vec![],
        }
    }

    #[test]
    fn rejects_dot_and_file_roots() {
        let err = EvidenceWriter::begin(Path::new("."), OutOp::SafeRun).unwrap_err();
        assert_eq!(err.reason_code(), "SAFE_RUN_OUT_PATH_NOT_DIRECTORY");

        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        fs::write(&file, b"x").unwrap();
        let err = EvidenceWriter::begin(&file, OutOp::Compare).unwrap_err();
        assert_eq!(err.reason_code(), "COMPARE_OUT_PATH_NOT_DIRECTORY");
    }

    #[test]
    fn rejects_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("no/such/parent/out");
        let err = EvidenceWriter::begin(&root, OutOp::Run).unwrap_err();
        assert_eq!(err.reason_code(), "RUN_OUT_PATH_PARENT_NOT_DIRECTORY");
    }

    #[test]
    fn abort_leaves_root_untouched_and_no_stage() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("keep.txt"), b"pre-existing").unwrap();

        let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
        w.stage_text("x.txt", "staged", "text").unwrap();
        w.abort();

        assert!(!stage_root_for(&root).exists());
        assert_eq!(fs::read(root.join("keep.txt")).unwrap(), b"pre-existing");
    }

    #[test]
    fn drop_removes_stage() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        {
            let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
            w.stage_text("x.txt", "staged", "text").unwrap();
        }
        assert!(!stage_root_for(&root).exists());
        assert!(!root.exists());
    }

    #[test]
    fn finalize_commits_and_lists_every_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");

        let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
        w.stage_text("disclosure.txt", "allow\n", "disclosure").unwrap();
        w.stage_receipt("nested/echo.json", &json!({"k": 1}), "json")
            .unwrap();
        w.validate_all().unwrap();
        let summary = w.finalize(&test_build()).unwrap();

        assert!(root.is_dir());
        assert!(!stage_root_for(&root).exists());

        // Bijection: every regular file except the operator receipt is
        // listed with a matching sha256.
        let listed: Vec<&str> = summary
            .operator
            .receipts
            .iter()
            .map(|e| e.rel_path.as_str())
            .collect();
        assert_eq!(
            listed,
            vec!["disclosure.txt", "nested/echo.json", PRIVACY_LINT_REL_PATH]
        );
        for entry in &summary.operator.receipts {
            let hex = sha256_file(root.join(&entry.rel_path)).unwrap();
            assert_eq!(entry.digest.as_str(), format!("sha256:{hex}"));
        }
        assert!(root.join(OPERATOR_RECEIPT_FILE).is_file());
        assert!(summary.operator.warnings.is_empty());

        // Wire shape of the committed operator receipt.
        let text = fs::read_to_string(root.join(OPERATOR_RECEIPT_FILE)).unwrap();
        let on_disk: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_json_diff::assert_json_include!(
            actual: on_disk,
            expected: json!({
                "schema": "weftend.operatorReceipt/0",
                "schemaVersion": 0,
                "warnings": []
            })
        );
    }

    #[test]
    fn orphan_warning_when_root_preexisted_nonempty() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("stray.txt"), b"old").unwrap();

        let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
        w.stage_text("a.txt", "fresh\n", "text").unwrap();
        w.validate_all().unwrap();
        let summary = w.finalize(&test_build()).unwrap();

        assert_eq!(
            summary.operator.warnings,
            vec![codes::SAFE_RUN_EVIDENCE_ORPHAN_OUTPUT.to_string()]
        );
        // The pre-existing content was replaced wholesale.
        assert!(!root.join("stray.txt").exists());
        assert!(root.join("a.txt").is_file());
    }

    #[test]
    fn validation_failure_aborts_fail_closed() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");

        let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
        // An operator-schema doc missing its build: RECEIPT_OLD_CONTRACT.
        w.stage_receipt(
            "bad.json",
            &json!({
                "schema": "weftend.operatorReceipt/0",
                "schemaVersion": 0,
                "receiptDigest": weftend_core::ids::ZERO_DIGEST_SENTINEL,
                "receipts": [],
                "warnings": []
            }),
            "json",
        )
        .unwrap();
        let err = w.validate_all().unwrap_err();
        assert_eq!(err.reason_code(), codes::OPERATOR_RECEIPT_INVALID);
        assert!(!root.exists());
        assert!(!stage_root_for(&root).exists());
    }

    #[test]
    fn stale_stage_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let stale = stage_root_for(&root);
        fs::create_dir_all(&stale).unwrap();
        fs::write(stale.join("leftover.txt"), b"stale").unwrap();

        let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
        w.stage_text("a.txt", "x\n", "text").unwrap();
        w.validate_all().unwrap();
        let summary = w.finalize(&test_build()).unwrap();
        assert!(summary
            .operator
            .receipts
            .iter()
            .all(|e| e.rel_path != "leftover.txt"));
    }

    #[test]
    fn traversal_paths_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("out");
        let mut w = EvidenceWriter::begin(&root, OutOp::SafeRun).unwrap();
        assert!(w.stage_text("../escape.txt", "x", "text").is_err());
        assert!(w.stage_text("/abs.txt", "x", "text").is_err());
    }

    #[test]
    fn overlap_detection() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let inner = a.join("inner");
        let b = dir.path().join("b");
        fs::create_dir_all(&inner).unwrap();
        fs::create_dir_all(&b).unwrap();
        assert!(paths_overlap(&a, &a));
        assert!(paths_overlap(&a, &inner));
        assert!(paths_overlap(&inner, &a));
        assert!(!paths_overlap(&a, &b));
    }
}
