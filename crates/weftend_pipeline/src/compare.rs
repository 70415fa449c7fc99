//! Cross-run comparator: load two evidence roots, derive normalized
//! summaries, and emit a deterministic delta with bucket classification.

use std::collections::BTreeMap;
use std::path::Path;

use weftend_core::codes::{self, OutOp};
use weftend_core::entities::{
    CompareReceipt, CompareSummary, CompareVerdict, MintPackage, WeftendBuild,
    SCHEMA_COMPARE_RECEIPT, SCHEMA_VERSION,
};
use weftend_core::ids::DigestStr;
use weftend_core::order::stable_sort_unique_v0;
use weftend_io::digest::seal_receipt;
use weftend_io::loader::{load_evidence_root, LoadedEvidence};
use weftend_io::writer::{paths_overlap, EvidenceWriter, FinalizeSummary};

use crate::examine::url_domain;
use crate::{PipelineError, PipelineResult};

pub const COMPARE_RECEIPT_FILE: &str = "compare_receipt.json";
pub const COMPARE_REPORT_FILE: &str = "compare_report.txt";

/// Most domains a summary retains; equality is what compare needs, not an
/// exhaustive listing.
const TOP_DOMAIN_LIMIT: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn missing_code(self) -> &'static str {
        match self {
            Side::Left => codes::COMPARE_LEFT_RECEIPT_MISSING,
            Side::Right => codes::COMPARE_RIGHT_RECEIPT_MISSING,
        }
    }

    fn invalid_code(self) -> &'static str {
        match self {
            Side::Left => codes::COMPARE_LEFT_RECEIPT_INVALID,
            Side::Right => codes::COMPARE_RIGHT_RECEIPT_INVALID,
        }
    }
}

/// One side of a comparison, loaded and annotated.
#[derive(Debug, Clone)]
pub struct CompareLoadedSource {
    pub side: Side,
    pub loaded: LoadedEvidence,
    pub build: WeftendBuild,
    /// Schema discriminators present under the root, sorted.
    pub receipt_kinds: Vec<String>,
    /// Side-scoped load findings (old contract, invalid receipts).
    pub side_reason_codes: Vec<String>,
}

/// Load an evidence root for one side. A missing root fails closed; bad
/// receipts inside the root become side reason codes instead.
pub fn load_side(root: &Path, side: Side) -> PipelineResult<CompareLoadedSource> {
    let loaded = load_evidence_root(root).map_err(|_| {
        PipelineError::fail_closed(
            side.missing_code(),
            "evidence root is missing or not a directory",
        )
    })?;

    let mut side_codes: Vec<String> = Vec::new();
    let mut kinds: Vec<String> = Vec::new();
    for receipt in &loaded.receipts {
        if let Some(schema) = receipt.kind.schema() {
            kinds.push(schema.to_string());
        }
        if receipt.old_contract() {
            side_codes.push(codes::RECEIPT_OLD_CONTRACT.to_string());
        }
        if let Some(first) = receipt
            .issues
            .iter()
            .find(|i| i.code != codes::RECEIPT_OLD_CONTRACT)
        {
            side_codes.push(side.invalid_code().to_string());
            side_codes.push(first.code.to_string());
        }
    }

    let build = loaded.build.clone();
    Ok(CompareLoadedSource {
        side,
        loaded,
        build,
        receipt_kinds: stable_sort_unique_v0(kinds.iter().map(String::as_str)),
        side_reason_codes: stable_sort_unique_v0(side_codes.iter().map(String::as_str)),
    })
}

/// Derive the normalized summary for one loaded side.
pub fn summarize_side(source: &CompareLoadedSource) -> CompareSummary {
    let loaded = &source.loaded;
    let safe_run = loaded.safe_run();
    let run = loaded.run();
    let host_run = loaded.host_run();

    // Content metrics come from the richest mint available.
    let mint: Option<&MintPackage> = run.map(|r| &r.mint).or_else(|| loaded.mint());

    let mut reason_codes: Vec<String> = Vec::new();
    if let Some(r) = safe_run {
        reason_codes.extend(r.top_reason_codes.iter().cloned());
        if let Some(exec) = &r.execute {
            reason_codes.extend(exec.reason_codes.iter().cloned());
        }
    }
    if let Some(r) = run {
        reason_codes.extend(r.decision.reason_codes.iter().cloned());
    }
    if let Some(h) = host_run {
        reason_codes.extend(h.reason_codes.iter().cloned());
        reason_codes.extend(h.host_self_reason_codes.iter().cloned());
    }
    reason_codes.extend(source.side_reason_codes.iter().cloned());

    let external_refs: &[String] = mint.map(|m| m.external_refs.as_slice()).unwrap_or(&[]);
    let domains = stable_sort_unique_v0(
        external_refs
            .iter()
            .filter_map(|r| url_domain(r))
            .collect::<Vec<_>>(),
    );
    let top_domains: Vec<String> = domains.iter().take(TOP_DOMAIN_LIMIT).cloned().collect();

    let analysis = safe_run
        .map(|r| r.analysis_verdict.as_str())
        .unwrap_or("NONE");
    let execution = safe_run
        .and_then(|r| r.execute.as_ref())
        .map(|e| e.verdict.as_str())
        .or_else(|| host_run.map(|h| h.exec_verdict.as_str()))
        .unwrap_or("NONE");

    let ledger = safe_run.map(|r| &r.capability_ledger);

    CompareSummary {
        result: format!("{analysis}:{execution}"),
        reason_codes: stable_sort_unique_v0(reason_codes.iter().map(String::as_str)),
        artifact_digest: safe_run
            .map(|r| r.artifact_digest.clone())
            .or_else(|| mint.map(|m| m.input_digest.clone())),
        policy_digest: safe_run
            .and_then(|r| r.policy_id.clone())
            .or_else(|| run.map(|r| r.policy_id.clone())),
        external_ref_count: external_refs.len() as i64,
        unique_domain_count: domains.len() as i64,
        top_domains,
        target_kind: mint
            .map(|m| m.target_kind.as_str())
            .or_else(|| safe_run.map(|r| r.target_kind.as_str()))
            .unwrap_or("generic")
            .to_string(),
        artifact_kind: mint
            .map(|m| m.artifact_kind.as_str())
            .or_else(|| safe_run.map(|r| r.artifact_kind.as_str()))
            .unwrap_or("OTHER")
            .to_string(),
        total_files: mint.map(|m| m.total_files).unwrap_or(0),
        total_bytes_bounded: mint.map(|m| m.total_bytes_bounded).unwrap_or(0),
        file_counts_by_kind: mint
            .map(|m| m.file_counts_by_kind.clone())
            .unwrap_or_else(BTreeMap::new),
        has_scripts: mint.map(|m| m.has_scripts).unwrap_or(false),
        has_native_binaries: mint.map(|m| m.has_native_binaries).unwrap_or(false),
        has_html: mint.map(|m| m.has_html).unwrap_or(false),
        entry_hints: mint.map(|m| m.entry_hints.clone()).unwrap_or_default(),
        boundedness_markers: mint
            .map(|m| m.boundedness_markers.clone())
            .unwrap_or_default(),
        archive_depth_max: mint.map(|m| m.archive_depth_max).unwrap_or(0),
        nested_archive_count: mint.map(|m| m.nested_archive_count).unwrap_or(0),
        url_like_count: mint.map(|m| m.url_like_count).unwrap_or(0),
        signature_present: mint.map(|m| m.signature_present).unwrap_or(false),
        timestamp_present: mint.map(|m| m.timestamp_present).unwrap_or(false),
        caps_requested_count: ledger.map(|l| l.requested.len() as i64).unwrap_or(0),
        caps_granted_count: ledger.map(|l| l.granted.len() as i64).unwrap_or(0),
        caps_denied_count: ledger.map(|l| l.denied.len() as i64).unwrap_or(0),
        host_release_status: if host_run.is_some() {
            "EXECUTED".to_string()
        } else if safe_run.and_then(|r| r.execute.as_ref()).is_some() {
            "WITHHELD".to_string()
        } else {
            "NONE".to_string()
        },
        strict_verify: run
            .map(|r| r.mode == weftend_core::entities::RunMode::Strict)
            .unwrap_or(false),
        strict_execute: safe_run
            .and_then(|r| r.execute.as_ref())
            .map(|_| true)
            .unwrap_or(false),
    }
}

/// Bucket assignment per the diff rules. SAME iff no buckets.
pub fn diff(left: &CompareSummary, right: &CompareSummary) -> (CompareVerdict, Vec<String>) {
    let mut buckets: Vec<&'static str> = Vec::new();

    if left.target_kind != right.target_kind || left.artifact_kind != right.artifact_kind {
        buckets.push(codes::BUCKET_KIND_PROFILE_CHANGED);
    }
    let content_changed = left.total_files != right.total_files
        || left.total_bytes_bounded != right.total_bytes_bounded
        || left.file_counts_by_kind != right.file_counts_by_kind
        || left.has_scripts != right.has_scripts
        || left.has_native_binaries != right.has_native_binaries
        || left.has_html != right.has_html
        || left.entry_hints != right.entry_hints
        || left.boundedness_markers != right.boundedness_markers
        || left.archive_depth_max != right.archive_depth_max
        || left.nested_archive_count != right.nested_archive_count
        || left.url_like_count != right.url_like_count
        || left.signature_present != right.signature_present
        || left.timestamp_present != right.timestamp_present;
    if content_changed {
        buckets.push(codes::BUCKET_CONTENT_CHANGED);
    }
    if left.external_ref_count != right.external_ref_count
        || left.unique_domain_count != right.unique_domain_count
        || left.top_domains != right.top_domains
    {
        buckets.push(codes::BUCKET_EXTERNALREFS_CHANGED);
    }
    if left.artifact_digest != right.artifact_digest {
        buckets.push(codes::BUCKET_DIGEST_CHANGED);
    }
    if left.reason_codes != right.reason_codes {
        buckets.push(codes::BUCKET_REASONS_CHANGED);
    }

    let buckets = stable_sort_unique_v0(buckets.iter().copied());
    let verdict = if buckets.is_empty() {
        CompareVerdict::Same
    } else {
        CompareVerdict::Changed
    };
    (verdict, buckets)
}

/// Outcome of a committed compare run.
#[derive(Debug)]
pub struct CompareOutcome {
    pub receipt: CompareReceipt,
    pub summary: FinalizeSummary,
}

/// Full compare: guard the out root, load both sides, diff, commit.
pub fn compare_roots(
    left_root: &Path,
    right_root: &Path,
    out_root: &Path,
    build: &WeftendBuild,
) -> PipelineResult<CompareOutcome> {
    // The out root must not equal, contain, or be contained by either
    // input root.
    if paths_overlap(out_root, left_root) || paths_overlap(out_root, right_root) {
        return Err(PipelineError::fail_closed(
            codes::COMPARE_OUT_CONFLICTS_INPUT,
            "compare output overlaps an input root",
        ));
    }

    let mut writer = EvidenceWriter::begin(out_root, OutOp::Compare)?;

    let left = load_side(left_root, Side::Left)?;
    let right = load_side(right_root, Side::Right)?;

    let left_summary = summarize_side(&left);
    let right_summary = summarize_side(&right);
    let (verdict, buckets) = diff(&left_summary, &right_summary);

    let mut reason_codes: Vec<String> = Vec::new();
    reason_codes.extend(left.side_reason_codes.iter().cloned());
    reason_codes.extend(right.side_reason_codes.iter().cloned());

    let receipt = CompareReceipt {
        schema: SCHEMA_COMPARE_RECEIPT.to_string(),
        schema_version: SCHEMA_VERSION,
        weftend_build: build.clone(),
        receipt_digest: DigestStr::zero_sentinel(),
        verdict,
        buckets,
        reason_codes: stable_sort_unique_v0(reason_codes.iter().map(String::as_str)),
        left: left_summary,
        right: right_summary,
    };

    let sealed = seal_receipt(serde_json::to_value(&receipt).map_err(weftend_io::IoError::from)?)?;
    writer.stage_receipt(COMPARE_RECEIPT_FILE, &sealed, "compare_receipt")?;

    let report = weftend_report::compare_report_text(&receipt);
    writer.stage_text(COMPARE_REPORT_FILE, &report, "compare_report")?;

    writer.validate_all()?;
    let summary = writer.finalize(build)?;

    Ok(CompareOutcome { receipt, summary })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::examine::{ExamineInput, FsExaminer};
    use crate::intake::{run_pipeline, NoHost, PipelineCtx, RunOp, RunRequest};
    use std::fs;
    use weftend_core::entities::{
        Action, BuildDigestAlgo, BuildSource, CapEffect, CapabilityRule, Policy, Profile,
        Thresholds,
    };

    fn build() -> WeftendBuild {
        WeftendBuild {
            algo: BuildDigestAlgo::Sha256,
            digest: DigestStr::zero_sentinel(),
            source: BuildSource::Binary,
            reason_codes: vec![],
        }
    }

    fn web_policy() -> Policy {
        Policy {
            schema: weftend_core::entities::SCHEMA_POLICY.to_string(),
            schema_version: 0,
            profile: Profile::Web,
            capability_rules: vec![CapabilityRule {
                cap_id: weftend_trust::CAP_NET_FETCH.parse().unwrap(),
                effect: CapEffect::Deny,
                reason_code: codes::CAP_DENY_NET.to_string(),
            }],
            thresholds: Thresholds::default(),
        }
    }

    fn safe_run_into(input: &Path, out: &Path) {
        let b = build();
        let examiner = FsExaminer::local_default();
        let ctx = PipelineCtx {
            build: &b,
            examiner: &examiner,
            host: &NoHost,
        };
        let policy = web_policy();
        let mut req = RunRequest::new(RunOp::SafeRun, ExamineInput::Path(input.to_path_buf()));
        req.policy = Some(&policy);
        let outcome = run_pipeline(&req, out, &ctx).unwrap();
        assert_eq!(outcome.decision.action, Action::Approve);
    }

    #[test]
    fn identical_runs_compare_same() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fixture");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("readme.txt"), b"stable bytes").unwrap();

        let left = dir.path().join("left");
        let right = dir.path().join("right");
        safe_run_into(&input, &left);
        safe_run_into(&input, &right);

        let out = dir.path().join("cmp");
        let outcome = compare_roots(&left, &right, &out, &build()).unwrap();
        assert_eq!(outcome.receipt.verdict, CompareVerdict::Same);
        assert!(outcome.receipt.buckets.is_empty());
        assert!(out.join(COMPARE_RECEIPT_FILE).is_file());
        assert!(out.join(COMPARE_REPORT_FILE).is_file());
    }

    #[test]
    fn changed_content_buckets() {
        let dir = tempfile::tempdir().unwrap();
        let in_a = dir.path().join("a");
        let in_b = dir.path().join("b");
        fs::create_dir_all(&in_a).unwrap();
        fs::create_dir_all(&in_b).unwrap();
        fs::write(in_a.join("readme.txt"), b"one file").unwrap();
        fs::write(in_b.join("readme.txt"), b"one file, different bytes").unwrap();
        fs::write(in_b.join("extra.txt"), b"and another").unwrap();

        let left = dir.path().join("left");
        let right = dir.path().join("right");
        safe_run_into(&in_a, &left);
        safe_run_into(&in_b, &right);

        let out = dir.path().join("cmp");
        let outcome = compare_roots(&left, &right, &out, &build()).unwrap();
        assert_eq!(outcome.receipt.verdict, CompareVerdict::Changed);
        assert!(outcome
            .receipt
            .buckets
            .contains(&codes::BUCKET_CONTENT_CHANGED.to_string()));
        assert!(outcome
            .receipt
            .buckets
            .contains(&codes::BUCKET_DIGEST_CHANGED.to_string()));
    }

    #[test]
    fn out_overlapping_input_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let left = dir.path().join("left");
        let right = dir.path().join("right");
        fs::create_dir_all(&left).unwrap();
        fs::create_dir_all(&right).unwrap();

        // out inside the left root
        let out = left.join("cmp");
        let err = compare_roots(&left, &right, &out, &build()).unwrap_err();
        assert_eq!(err.reason_code(), codes::COMPARE_OUT_CONFLICTS_INPUT);

        // out equal to the left root
        let err = compare_roots(&left, &right, &left, &build()).unwrap_err();
        assert_eq!(err.reason_code(), codes::COMPARE_OUT_CONFLICTS_INPUT);
    }

    #[test]
    fn missing_side_fails_closed() {
        let dir = tempfile::tempdir().unwrap();
        let right = dir.path().join("right");
        fs::create_dir_all(&right).unwrap();
        let out = dir.path().join("cmp");
        let err = compare_roots(&dir.path().join("gone"), &right, &out, &build()).unwrap_err();
        assert_eq!(err.reason_code(), codes::COMPARE_LEFT_RECEIPT_MISSING);
    }

    #[test]
    fn summary_result_shape() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("fixture");
        fs::create_dir_all(&input).unwrap();
        fs::write(input.join("a.txt"), b"x").unwrap();
        let left = dir.path().join("left");
        safe_run_into(&input, &left);

        let side = load_side(&left, Side::Left).unwrap();
        let summary = summarize_side(&side);
        assert_eq!(summary.result, "ALLOW:NONE");
        assert_eq!(summary.artifact_kind, "TEXT");
        assert_eq!(summary.total_files, 1);
    }
}
