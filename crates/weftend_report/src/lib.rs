//! weftend_report — Pure offline renderers.
//!
//! Determinism rules:
//! - No I/O here. Callers supply receipts already in memory.
//! - ASCII output only; stable section order and field names.
//! - No floats, no wall-clock, no environment.
//!
//! The renderers accept core entity types so this crate stays independent
//! of the pipeline and io layers.

#![forbid(unsafe_code)]

use std::fmt::Write as _;

use serde_json::{json, Value};
use weftend_core::entities::{
    CompareReceipt, Decision, MintPackage, OperatorReceipt, RunReceipt, SafeRunReceipt,
    SCHEMA_NORMALIZED_SUMMARY, SCHEMA_VERSION,
};

/// Evidence-tag legend used by every text report:
/// `[POL]` policy-derived, `[INF]` inferred, `[OBS]` observed.
pub const EVIDENCE_TAG_LEGEND: &str =
    "legend: [POL] policy-derived  [INF] inferred  [OBS] observed";

// ---------------------------------------------------------------------------
// Disclosure
// ---------------------------------------------------------------------------

/// Render the operator-facing disclosure for one decision.
pub fn disclosure_text(
    decision: &Decision,
    mint: Option<&MintPackage>,
    policy_id: Option<&str>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "WEFTEND DISCLOSURE");
    let _ = writeln!(out, "==================");
    let _ = writeln!(out, "action: {}", decision.action.as_str());
    let _ = writeln!(out, "verdict: {}", decision.verdict.as_str());
    let _ = writeln!(out, "policy: {}", policy_id.unwrap_or("(none)"));
    if let Some(m) = mint {
        let _ = writeln!(out, "artifact: {}", m.input_digest);
        let _ = writeln!(out, "artifact kind: {}", m.artifact_kind.as_str());
        let _ = writeln!(out, "target kind: {}", m.target_kind.as_str());
    }
    let _ = writeln!(out, "reason codes:");
    if decision.reason_codes.is_empty() {
        let _ = writeln!(out, "  (none)");
    } else {
        for code in &decision.reason_codes {
            let _ = writeln!(out, "  {code}");
        }
    }
    let ledger = &decision.capability_ledger;
    let _ = writeln!(out, "capabilities:");
    let _ = writeln!(out, "  requested: {}", join_or_none(&ledger.requested));
    let _ = writeln!(out, "  granted:   {}", join_or_none(&ledger.granted));
    if ledger.denied.is_empty() {
        let _ = writeln!(out, "  denied:    (none)");
    } else {
        for d in &ledger.denied {
            let _ = writeln!(
                out,
                "  denied:    {} [{}]",
                d.cap_id,
                d.reason_codes.join(", ")
            );
        }
    }
    out
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join(", ")
    }
}

// ---------------------------------------------------------------------------
// Compare report
// ---------------------------------------------------------------------------

/// Deterministic text table for a compare receipt, tagged with the
/// evidence-tag markers.
pub fn compare_report_text(receipt: &CompareReceipt) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "WEFTEND COMPARE REPORT");
    let _ = writeln!(out, "======================");
    let _ = writeln!(out, "{EVIDENCE_TAG_LEGEND}");
    let _ = writeln!(out);
    let _ = writeln!(out, "evidence.verdict=[POL] {}", receipt.verdict.as_str());
    let _ = writeln!(
        out,
        "evidence.buckets=[INF] {}",
        join_or_none(&receipt.buckets)
    );
    let _ = writeln!(
        out,
        "evidence.artifactDigest=[OBS] left={} right={}",
        receipt
            .left
            .artifact_digest
            .as_ref()
            .map(|d| d.as_str())
            .unwrap_or("(absent)"),
        receipt
            .right
            .artifact_digest
            .as_ref()
            .map(|d| d.as_str())
            .unwrap_or("(absent)"),
    );
    let _ = writeln!(out);

    let _ = writeln!(out, "field                      left                 right");
    let _ = writeln!(out, "-----                      ----                 -----");
    let rows: [(&str, String, String); 8] = [
        (
            "result",
            receipt.left.result.clone(),
            receipt.right.result.clone(),
        ),
        (
            "artifactKind",
            receipt.left.artifact_kind.clone(),
            receipt.right.artifact_kind.clone(),
        ),
        (
            "targetKind",
            receipt.left.target_kind.clone(),
            receipt.right.target_kind.clone(),
        ),
        (
            "totalFiles",
            receipt.left.total_files.to_string(),
            receipt.right.total_files.to_string(),
        ),
        (
            "totalBytesBounded",
            receipt.left.total_bytes_bounded.to_string(),
            receipt.right.total_bytes_bounded.to_string(),
        ),
        (
            "externalRefCount",
            receipt.left.external_ref_count.to_string(),
            receipt.right.external_ref_count.to_string(),
        ),
        (
            "uniqueDomainCount",
            receipt.left.unique_domain_count.to_string(),
            receipt.right.unique_domain_count.to_string(),
        ),
        (
            "reasonCodes",
            join_or_none(&receipt.left.reason_codes),
            join_or_none(&receipt.right.reason_codes),
        ),
    ];
    for (name, left, right) in rows {
        let _ = writeln!(out, "{name:<26} {left:<20} {right}");
    }
    out
}

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Inputs for the summary renderers: whichever receipts the evidence root
/// actually held.
#[derive(Debug, Clone, Default)]
pub struct SummaryInputs<'a> {
    pub operator: Option<&'a OperatorReceipt>,
    pub safe_run: Option<&'a SafeRunReceipt>,
    pub run: Option<&'a RunReceipt>,
}

/// Human text for `summarize`.
pub fn summarize_text(inputs: &SummaryInputs<'_>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "WEFTEND SUMMARY");
    let _ = writeln!(out, "===============");
    match inputs.safe_run {
        Some(r) => {
            let _ = writeln!(out, "analysis verdict: {}", r.analysis_verdict.as_str());
            let _ = writeln!(out, "analysis action:  {}", r.analysis_action.as_str());
            let _ = writeln!(out, "artifact:         {}", r.artifact_digest);
            let _ = writeln!(out, "reason codes:     {}", join_or_none(&r.top_reason_codes));
        }
        None => {
            let _ = writeln!(out, "analysis verdict: (no safe-run receipt)");
        }
    }
    if let Some(r) = inputs.run {
        let _ = writeln!(out, "run mode:         {}", r.mode.as_str());
        let _ = writeln!(out, "policy:           {}", r.policy_id);
    }
    match inputs.operator {
        Some(op) => {
            let _ = writeln!(out, "evidence files:   {}", op.receipts.len());
            let _ = writeln!(out, "warnings:         {}", join_or_none(&op.warnings));
        }
        None => {
            let _ = writeln!(out, "evidence files:   (no operator receipt)");
        }
    }
    out
}

/// The `weftend.normalizedSummary/0` document for `export-json`.
pub fn normalized_summary(inputs: &SummaryInputs<'_>) -> Value {
    let mut doc = json!({
        "schema": SCHEMA_NORMALIZED_SUMMARY,
        "schemaVersion": SCHEMA_VERSION,
    });
    if let Some(r) = inputs.safe_run {
        doc["analysisVerdict"] = json!(r.analysis_verdict.as_str());
        doc["analysisAction"] = json!(r.analysis_action.as_str());
        doc["artifactDigest"] = json!(r.artifact_digest.as_str());
        doc["artifactKind"] = json!(r.artifact_kind.as_str());
        doc["targetKind"] = json!(r.target_kind.as_str());
        doc["topReasonCodes"] = json!(r.top_reason_codes);
        doc["capabilityLedger"] = serde_json::to_value(&r.capability_ledger).unwrap_or(Value::Null);
    }
    if let Some(r) = inputs.run {
        doc["runMode"] = json!(r.mode.as_str());
        doc["policyId"] = json!(r.policy_id.as_str());
        doc["decisionReasonCodes"] = json!(r.decision.reason_codes);
    }
    if let Some(op) = inputs.operator {
        doc["evidenceFileCount"] = json!(op.receipts.len() as i64);
        doc["warnings"] = json!(op.warnings);
        doc["weftendBuild"] = serde_json::to_value(&op.weftend_build).unwrap_or(Value::Null);
    }
    doc
}
