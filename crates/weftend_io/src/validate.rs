//! Typed validators for every receipt family plus mint and policy.
//!
//! Validators never throw: they return a deterministic, sorted list of
//! `ValidationIssue`s. The writer aborts on any issue; the compare loader
//! carries the issues into its own reason codes instead.

use serde_json::Value;
use weftend_core::codes;
use weftend_core::entities::{
    self, CompareReceipt, HostRunReceipt, MintPackage, OperatorReceipt, Policy, PrivacyLintDoc,
    RunReceipt, SafeRunReceipt,
};
use weftend_core::ids::{is_valid_digest, is_valid_reason_code};
use weftend_core::order::is_stable_sorted_unique_v0;
use weftend_core::BOUNDED_COUNT_CEILING;

/// Detail codes carried alongside the family code.
pub const RECEIPT_SHAPE_BAD: &str = "RECEIPT_SHAPE_BAD";
pub const RECEIPT_FIELD_MISSING: &str = "RECEIPT_FIELD_MISSING";
pub const RECEIPT_DIGEST_SHAPE_BAD: &str = "RECEIPT_DIGEST_SHAPE_BAD";
pub const RECEIPT_LIST_NOT_NORMALIZED: &str = "RECEIPT_LIST_NOT_NORMALIZED";
pub const RECEIPT_COUNT_OUT_OF_RANGE: &str = "RECEIPT_COUNT_OUT_OF_RANGE";
pub const RECEIPT_REASON_CODE_SHAPE_BAD: &str = "RECEIPT_REASON_CODE_SHAPE_BAD";
pub const RECEIPT_LEDGER_INCOHERENT: &str = "RECEIPT_LEDGER_INCOHERENT";

/// One validation finding, anchored by a JSON pointer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationIssue {
    pub code: &'static str,
    pub pointer: String,
}

impl ValidationIssue {
    fn at(code: &'static str, pointer: impl Into<String>) -> Self {
        ValidationIssue {
            code,
            pointer: pointer.into(),
        }
    }
}

/// Deterministic sort: by code, then pointer.
fn sort_issues(issues: &mut Vec<ValidationIssue>) {
    issues.sort_by(|a, b| a.code.cmp(b.code).then_with(|| a.pointer.cmp(&b.pointer)));
    issues.dedup();
}

/// Validate any staged JSON document by its `schema` discriminator.
/// Documents without a recognized schema yield no issues (they are not
/// receipts; the appeal bundle and report exports fall through here).
pub fn validate_value(value: &Value) -> Vec<ValidationIssue> {
    match value.get("schema").and_then(Value::as_str) {
        Some(entities::SCHEMA_MINT) => validate_mint(value),
        Some(entities::SCHEMA_POLICY) => validate_policy(value),
        Some(entities::SCHEMA_SAFE_RUN_RECEIPT) => validate_safe_run_receipt(value),
        Some(entities::SCHEMA_RUN_RECEIPT) => validate_run_receipt(value),
        Some(entities::SCHEMA_HOST_RUN_RECEIPT) => validate_host_run_receipt(value),
        Some(entities::SCHEMA_COMPARE_RECEIPT) => validate_compare_receipt(value),
        Some(entities::SCHEMA_OPERATOR_RECEIPT) => validate_operator_receipt(value),
        Some(entities::SCHEMA_PRIVACY_LINT) => validate_privacy_lint(value),
        _ => Vec::new(),
    }
}

// ---------------------------------------------------------------------------
// Shared checks
// ---------------------------------------------------------------------------

/// Top-level receipt contract: `schemaVersion` and `weftendBuild` must be
/// present (else the receipt predates the contract), and the version must
/// be exactly 0.
fn check_receipt_contract(value: &Value, issues: &mut Vec<ValidationIssue>) {
    match value.get("schemaVersion") {
        None => issues.push(ValidationIssue::at(
            codes::RECEIPT_OLD_CONTRACT,
            "/schemaVersion",
        )),
        Some(v) => {
            if v.as_i64() != Some(entities::SCHEMA_VERSION) {
                issues.push(ValidationIssue::at(
                    codes::RECEIPT_SCHEMA_VERSION_BAD,
                    "/schemaVersion",
                ));
            }
        }
    }
    match value.get("weftendBuild") {
        None => issues.push(ValidationIssue::at(
            codes::RECEIPT_OLD_CONTRACT,
            "/weftendBuild",
        )),
        Some(b) => {
            if serde_json::from_value::<entities::WeftendBuild>(b.clone()).is_err() {
                issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "/weftendBuild"));
            }
        }
    }
    if let Some(d) = value.get("receiptDigest") {
        if !d.as_str().is_some_and(is_valid_digest) {
            issues.push(ValidationIssue::at(
                RECEIPT_DIGEST_SHAPE_BAD,
                "/receiptDigest",
            ));
        }
    } else {
        issues.push(ValidationIssue::at(RECEIPT_FIELD_MISSING, "/receiptDigest"));
    }
}

fn check_sorted_unique(value: &Value, pointer: &str, issues: &mut Vec<ValidationIssue>) {
    if let Some(arr) = value.as_array() {
        let strings: Option<Vec<String>> = arr
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect();
        match strings {
            Some(list) => {
                if !is_stable_sorted_unique_v0(&list) {
                    issues.push(ValidationIssue::at(RECEIPT_LIST_NOT_NORMALIZED, pointer));
                }
            }
            None => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, pointer)),
        }
    }
}

fn check_reason_codes(list: &[String], pointer: &str, issues: &mut Vec<ValidationIssue>) {
    if !is_stable_sorted_unique_v0(&list.to_vec()) {
        issues.push(ValidationIssue::at(RECEIPT_LIST_NOT_NORMALIZED, pointer));
    }
    for code in list {
        if !is_valid_reason_code(code) {
            issues.push(ValidationIssue::at(RECEIPT_REASON_CODE_SHAPE_BAD, pointer));
        }
    }
}

fn check_bounded_count(n: i64, pointer: &str, issues: &mut Vec<ValidationIssue>) {
    if !(0..=BOUNDED_COUNT_CEILING).contains(&n) {
        issues.push(ValidationIssue::at(RECEIPT_COUNT_OUT_OF_RANGE, pointer));
    }
}

fn check_ledger(
    ledger: &entities::CapabilityLedger,
    base: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    // requested/granted hold cap ids, not reason codes; only normalization
    // applies to them.
    if !is_stable_sorted_unique_v0(&ledger.requested) {
        issues.push(ValidationIssue::at(
            RECEIPT_LIST_NOT_NORMALIZED,
            format!("{base}/requested"),
        ));
    }
    if !is_stable_sorted_unique_v0(&ledger.granted) {
        issues.push(ValidationIssue::at(
            RECEIPT_LIST_NOT_NORMALIZED,
            format!("{base}/granted"),
        ));
    }
    // granted ⊆ requested, denied ⊆ requested, granted ∩ denied = ∅
    for g in &ledger.granted {
        if !ledger.requested.contains(g) {
            issues.push(ValidationIssue::at(
                RECEIPT_LEDGER_INCOHERENT,
                format!("{base}/granted"),
            ));
        }
    }
    for d in &ledger.denied {
        let id = d.cap_id.as_str().to_string();
        if !ledger.requested.contains(&id) {
            issues.push(ValidationIssue::at(
                RECEIPT_LEDGER_INCOHERENT,
                format!("{base}/denied"),
            ));
        }
        if ledger.granted.contains(&id) {
            issues.push(ValidationIssue::at(
                RECEIPT_LEDGER_INCOHERENT,
                format!("{base}/denied"),
            ));
        }
        check_reason_codes(&d.reason_codes, &format!("{base}/denied/reasonCodes"), issues);
    }
}

// ---------------------------------------------------------------------------
// Per-family validators
// ---------------------------------------------------------------------------

/// Validate a mint package. Any issue is reported under the leading
/// `MINT_INVALID` code with detail codes after it.
pub fn validate_mint(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let mint: MintPackage = match serde_json::from_value(value.clone()) {
        Ok(m) => m,
        Err(_) => {
            return vec![
                ValidationIssue::at(codes::MINT_INVALID, ""),
                ValidationIssue::at(RECEIPT_SHAPE_BAD, ""),
            ]
        }
    };
    if mint.schema_version != entities::SCHEMA_VERSION {
        issues.push(ValidationIssue::at(
            codes::RECEIPT_SCHEMA_VERSION_BAD,
            "/schemaVersion",
        ));
    }
    check_bounded_count(mint.total_files, "/totalFiles", &mut issues);
    check_bounded_count(mint.total_bytes_bounded, "/totalBytesBounded", &mut issues);
    check_bounded_count(mint.archive_depth_max, "/archiveDepthMax", &mut issues);
    check_bounded_count(mint.nested_archive_count, "/nestedArchiveCount", &mut issues);
    check_bounded_count(mint.url_like_count, "/urlLikeCount", &mut issues);
    for (kind, n) in &mint.file_counts_by_kind {
        check_bounded_count(*n, &format!("/fileCountsByKind/{kind}"), &mut issues);
    }
    if !is_stable_sorted_unique_v0(&mint.external_refs) {
        issues.push(ValidationIssue::at(
            RECEIPT_LIST_NOT_NORMALIZED,
            "/externalRefs",
        ));
    }
    if !is_stable_sorted_unique_v0(&mint.entry_hints) {
        issues.push(ValidationIssue::at(
            RECEIPT_LIST_NOT_NORMALIZED,
            "/entryHints",
        ));
    }
    if !is_stable_sorted_unique_v0(&mint.boundedness_markers) {
        issues.push(ValidationIssue::at(
            RECEIPT_LIST_NOT_NORMALIZED,
            "/boundednessMarkers",
        ));
    }
    finish_with_family(issues, codes::MINT_INVALID)
}

/// Validate a policy document; leading code `POLICY_INVALID`.
pub fn validate_policy(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    let policy: Policy = match serde_json::from_value(value.clone()) {
        Ok(p) => p,
        Err(_) => {
            return vec![
                ValidationIssue::at(codes::POLICY_INVALID, ""),
                ValidationIssue::at(RECEIPT_SHAPE_BAD, ""),
            ]
        }
    };
    if policy.schema_version != entities::SCHEMA_VERSION {
        issues.push(ValidationIssue::at(
            codes::RECEIPT_SCHEMA_VERSION_BAD,
            "/schemaVersion",
        ));
    }
    for (i, rule) in policy.capability_rules.iter().enumerate() {
        if !is_valid_reason_code(&rule.reason_code) {
            issues.push(ValidationIssue::at(
                RECEIPT_REASON_CODE_SHAPE_BAD,
                format!("/capabilityRules/{i}/reasonCode"),
            ));
        }
    }
    let t = &policy.thresholds;
    for (n, ptr) in [
        (t.max_archive_depth, "/thresholds/maxArchiveDepth"),
        (t.max_nested_archives, "/thresholds/maxNestedArchives"),
        (t.max_external_refs, "/thresholds/maxExternalRefs"),
        (t.max_total_bytes, "/thresholds/maxTotalBytes"),
    ] {
        check_bounded_count(n, ptr, &mut issues);
    }
    finish_with_family(issues, codes::POLICY_INVALID)
}

pub fn validate_safe_run_receipt(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_receipt_contract(value, &mut issues);
    match serde_json::from_value::<SafeRunReceipt>(value.clone()) {
        Ok(r) => {
            check_reason_codes(&r.top_reason_codes, "/topReasonCodes", &mut issues);
            check_ledger(&r.capability_ledger, "/capabilityLedger", &mut issues);
            if let Some(exec) = &r.execute {
                check_reason_codes(&exec.reason_codes, "/execute/reasonCodes", &mut issues);
            }
        }
        Err(_) => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "")),
    }
    finish_with_family(issues, codes::SAFE_RUN_RECEIPT_INVALID)
}

pub fn validate_run_receipt(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_receipt_contract(value, &mut issues);
    match serde_json::from_value::<RunReceipt>(value.clone()) {
        Ok(r) => {
            let mint_value = value.get("mint").cloned().unwrap_or(Value::Null);
            for issue in validate_mint(&mint_value) {
                issues.push(ValidationIssue {
                    code: issue.code,
                    pointer: format!("/mint{}", issue.pointer),
                });
            }
            check_reason_codes(&r.decision.reason_codes, "/decision/reasonCodes", &mut issues);
            check_ledger(
                &r.decision.capability_ledger,
                "/decision/capabilityLedger",
                &mut issues,
            );
        }
        Err(_) => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "")),
    }
    finish_with_family(issues, codes::RUN_RECEIPT_INVALID)
}

pub fn validate_host_run_receipt(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_receipt_contract(value, &mut issues);
    match serde_json::from_value::<HostRunReceipt>(value.clone()) {
        Ok(r) => {
            check_reason_codes(&r.reason_codes, "/reasonCodes", &mut issues);
            check_reason_codes(
                &r.host_self_reason_codes,
                "/hostSelfReasonCodes",
                &mut issues,
            );
        }
        Err(_) => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "")),
    }
    finish_with_family(issues, codes::HOST_RUN_RECEIPT_INVALID)
}

pub fn validate_compare_receipt(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_receipt_contract(value, &mut issues);
    match serde_json::from_value::<CompareReceipt>(value.clone()) {
        Ok(r) => {
            check_sorted_unique(
                value.get("buckets").unwrap_or(&Value::Null),
                "/buckets",
                &mut issues,
            );
            check_reason_codes(&r.reason_codes, "/reasonCodes", &mut issues);
            for (side, summary) in [("left", &r.left), ("right", &r.right)] {
                check_reason_codes(
                    &summary.reason_codes,
                    &format!("/{side}/reasonCodes"),
                    &mut issues,
                );
                check_bounded_count(
                    summary.total_files,
                    &format!("/{side}/totalFiles"),
                    &mut issues,
                );
                check_bounded_count(
                    summary.total_bytes_bounded,
                    &format!("/{side}/totalBytesBounded"),
                    &mut issues,
                );
            }
        }
        Err(_) => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "")),
    }
    finish_with_family(issues, codes::COMPARE_RECEIPT_INVALID)
}

pub fn validate_operator_receipt(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    check_receipt_contract(value, &mut issues);
    match serde_json::from_value::<OperatorReceipt>(value.clone()) {
        Ok(r) => {
            check_reason_codes(&r.warnings, "/warnings", &mut issues);
            // receipts[] sorted by relPath under cmp_str_v0, digests sha256.
            let paths: Vec<String> = r.receipts.iter().map(|e| e.rel_path.clone()).collect();
            if !is_stable_sorted_unique_v0(&paths) {
                issues.push(ValidationIssue::at(RECEIPT_LIST_NOT_NORMALIZED, "/receipts"));
            }
            for (i, entry) in r.receipts.iter().enumerate() {
                if !entry.digest.is_sha256() {
                    issues.push(ValidationIssue::at(
                        RECEIPT_DIGEST_SHAPE_BAD,
                        format!("/receipts/{i}/digest"),
                    ));
                }
            }
        }
        Err(_) => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "")),
    }
    finish_with_family(issues, codes::OPERATOR_RECEIPT_INVALID)
}

pub fn validate_privacy_lint(value: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();
    match serde_json::from_value::<PrivacyLintDoc>(value.clone()) {
        Ok(doc) => {
            if doc.schema_version != entities::SCHEMA_VERSION {
                issues.push(ValidationIssue::at(
                    codes::RECEIPT_SCHEMA_VERSION_BAD,
                    "/schemaVersion",
                ));
            }
            check_reason_codes(&doc.reason_codes, "/reasonCodes", &mut issues);
        }
        Err(_) => issues.push(ValidationIssue::at(RECEIPT_SHAPE_BAD, "")),
    }
    sort_issues(&mut issues);
    issues
}

/// Sort detail issues, then put the family code first when any exist.
fn finish_with_family(
    mut issues: Vec<ValidationIssue>,
    family: &'static str,
) -> Vec<ValidationIssue> {
    sort_issues(&mut issues);
    if issues.is_empty() {
        return issues;
    }
    let mut out = Vec::with_capacity(issues.len() + 1);
    out.push(ValidationIssue::at(family, ""));
    out.extend(issues);
    out
}
