//! crates/weftend_core/src/entities.rs
//! Wire-facing entity types: build identity, mint package, policy,
//! trust decision, and the receipt families.
//!
//! Every type here serializes to the canonical camelCase receipt surface.
//! Numbers are 64-bit signed integers; floats never appear. Lists that must
//! be order-free are stored already normalized by `stable_sort_unique_v0`;
//! validators reject receipts whose lists are not.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ids::{CapId, DigestStr};

// ---------------------------------------------------------------------------
// Schema identifiers
// ---------------------------------------------------------------------------

pub const SCHEMA_MINT: &str = "weftend.mint/1";
pub const SCHEMA_POLICY: &str = "weftend.policy/1";
pub const SCHEMA_SAFE_RUN_RECEIPT: &str = "weftend.safeRunReceipt/0";
pub const SCHEMA_RUN_RECEIPT: &str = "weftend.runReceipt/0";
pub const SCHEMA_HOST_RUN_RECEIPT: &str = "weftend.hostRunReceipt/0";
pub const SCHEMA_COMPARE_RECEIPT: &str = "weftend.compareReceipt/0";
pub const SCHEMA_OPERATOR_RECEIPT: &str = "weftend.operatorReceipt/0";
pub const SCHEMA_PRIVACY_LINT: &str = "weftend.privacyLint/0";
pub const SCHEMA_ADAPTER_MAINTENANCE: &str = "weftend.adapterMaintenance/0";
pub const SCHEMA_NORMALIZED_SUMMARY: &str = "weftend.normalizedSummary/0";

/// The only schema version any receipt family currently carries.
pub const SCHEMA_VERSION: i64 = 0;

// ---------------------------------------------------------------------------
// Build identity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildDigestAlgo {
    Sha256,
    Fnv1a32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildSource {
    /// Digest of the running binary.
    Binary,
    /// Binary unavailable; digest derived from the package identity.
    Fallback,
}

/// Binds every top-level receipt to a specific build of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeftendBuild {
    pub algo: BuildDigestAlgo,
    pub digest: DigestStr,
    pub source: BuildSource,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_codes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Mint package (v1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ArtifactKind {
    #[serde(rename = "TEXT")]
    Text,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "SCRIPT")]
    Script,
    #[serde(rename = "NATIVE")]
    Native,
    #[serde(rename = "ARCHIVE")]
    Archive,
    #[serde(rename = "CONTAINER")]
    Container,
    #[serde(rename = "EMAIL")]
    Email,
    #[serde(rename = "OTHER")]
    Other,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::Text => "TEXT",
            ArtifactKind::Html => "HTML",
            ArtifactKind::Script => "SCRIPT",
            ArtifactKind::Native => "NATIVE",
            ArtifactKind::Archive => "ARCHIVE",
            ArtifactKind::Container => "CONTAINER",
            ArtifactKind::Email => "EMAIL",
            ArtifactKind::Other => "OTHER",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Web,
    Mod,
    Generic,
    Container,
    Email,
}

impl TargetKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetKind::Web => "web",
            TargetKind::Mod => "mod",
            TargetKind::Generic => "generic",
            TargetKind::Container => "container",
            TargetKind::Email => "email",
        }
    }
}

/// The normalized observation of an input, minted by the examiner.
///
/// Invariants: every list is stable-sorted and de-duplicated; counts are
/// bounded non-negative integers; `input_digest` is a content digest of the
/// input bytes (or of the immutable reference string for containers).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MintPackage {
    pub schema: String,
    pub schema_version: i64,
    pub artifact_kind: ArtifactKind,
    pub target_kind: TargetKind,
    pub input_digest: DigestStr,
    pub total_files: i64,
    pub total_bytes_bounded: i64,
    pub file_counts_by_kind: BTreeMap<String, i64>,
    pub has_scripts: bool,
    pub has_native_binaries: bool,
    pub has_html: bool,
    pub external_refs: Vec<String>,
    pub archive_depth_max: i64,
    pub nested_archive_count: i64,
    pub url_like_count: i64,
    pub signature_present: bool,
    pub timestamp_present: bool,
    pub entry_hints: Vec<String>,
    pub boundedness_markers: Vec<String>,
}

impl MintPackage {
    /// An empty mint for `kind`/`target` with all counts zeroed.
    pub fn empty(kind: ArtifactKind, target: TargetKind, input_digest: DigestStr) -> Self {
        MintPackage {
            schema: SCHEMA_MINT.to_string(),
            schema_version: SCHEMA_VERSION,
            artifact_kind: kind,
            target_kind: target,
            input_digest,
            total_files: 0,
            total_bytes_bounded: 0,
            file_counts_by_kind: BTreeMap::new(),
            has_scripts: false,
            has_native_binaries: false,
            has_html: false,
            external_refs: Vec::new(),
            archive_depth_max: 0,
            nested_archive_count: 0,
            url_like_count: 0,
            signature_present: false,
            timestamp_present: false,
            entry_hints: Vec::new(),
            boundedness_markers: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Policy (v1)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    Web,
    Mod,
    Generic,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Profile::Web => "web",
            Profile::Mod => "mod",
            Profile::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CapEffect {
    Grant,
    Deny,
    Withhold,
}

/// One ordered policy rule. Rules are keyed by capability and carry the
/// reason-code family that explains the effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRule {
    pub cap_id: CapId,
    pub effect: CapEffect,
    pub reason_code: String,
}

/// Numeric thresholds; a breach contributes a WITHHOLD with a `LIMIT_*`
/// reason code. All values are finite signed integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub max_archive_depth: i64,
    pub max_nested_archives: i64,
    pub max_external_refs: i64,
    pub max_total_bytes: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            max_archive_depth: 4,
            max_nested_archives: 16,
            max_external_refs: 64,
            max_total_bytes: crate::BOUNDED_COUNT_CEILING,
        }
    }
}

/// Declarative policy document. `policyId` = digest of the canonical policy
/// bytes; the id is computed by the io layer, never stored inside the
/// document itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    pub schema: String,
    pub schema_version: i64,
    pub profile: Profile,
    pub capability_rules: Vec<CapabilityRule>,
    pub thresholds: Thresholds,
}

// ---------------------------------------------------------------------------
// Trust decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    #[serde(rename = "ALLOW")]
    Allow,
    #[serde(rename = "DENY")]
    Deny,
    #[serde(rename = "WITHHELD")]
    Withheld,
}

impl Verdict {
    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Deny => "DENY",
            Verdict::Withheld => "WITHHELD",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    #[serde(rename = "APPROVE")]
    Approve,
    #[serde(rename = "QUEUE")]
    Queue,
    #[serde(rename = "REJECT")]
    Reject,
    #[serde(rename = "HOLD")]
    Hold,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Approve => "APPROVE",
            Action::Queue => "QUEUE",
            Action::Reject => "REJECT",
            Action::Hold => "HOLD",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeniedCap {
    pub cap_id: CapId,
    pub reason_codes: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityLedger {
    pub requested: Vec<String>,
    pub granted: Vec<String>,
    pub denied: Vec<DeniedCap>,
}

/// The trust algebra's verdict over one mint under one policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub action: Action,
    pub verdict: Verdict,
    pub reason_codes: Vec<String>,
    pub capability_ledger: CapabilityLedger,
}

// ---------------------------------------------------------------------------
// Receipt families
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOutcome {
    pub verdict: Verdict,
    pub reason_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_run_digest: Option<DigestStr>,
}

/// Intake + optional execute verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SafeRunReceipt {
    pub schema: String,
    pub schema_version: i64,
    pub weftend_build: WeftendBuild,
    pub receipt_digest: DigestStr,
    pub artifact_digest: DigestStr,
    pub artifact_kind: ArtifactKind,
    pub target_kind: TargetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_id: Option<DigestStr>,
    pub analysis_verdict: Verdict,
    pub analysis_action: Action,
    pub top_reason_codes: Vec<String>,
    pub capability_ledger: CapabilityLedger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execute: Option<ExecuteOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Strict,
    Compatible,
    Legacy,
}

impl RunMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Strict => "strict",
            RunMode::Compatible => "compatible",
            RunMode::Legacy => "legacy",
        }
    }
}

/// Full run record: mode, mint echo, policy binding, decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReceipt {
    pub schema: String,
    pub schema_version: i64,
    pub weftend_build: WeftendBuild,
    pub receipt_digest: DigestStr,
    pub mode: RunMode,
    pub mint: MintPackage,
    pub policy_id: DigestStr,
    pub decision: Decision,
}

/// Sandbox execution outcome, produced by the host collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRunReceipt {
    pub schema: String,
    pub schema_version: i64,
    pub weftend_build: WeftendBuild,
    pub receipt_digest: DigestStr,
    pub exec_verdict: Verdict,
    pub reason_codes: Vec<String>,
    pub exit_status: i64,
    pub host_self_reason_codes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareVerdict {
    #[serde(rename = "SAME")]
    Same,
    #[serde(rename = "CHANGED")]
    Changed,
}

impl CompareVerdict {
    pub fn as_str(self) -> &'static str {
        match self {
            CompareVerdict::Same => "SAME",
            CompareVerdict::Changed => "CHANGED",
        }
    }
}

/// Normalized per-side view used by the diff. Every field is derived from
/// committed receipts; absent information is an explicit default, never an
/// omission, so both sides always diff field-by-field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareSummary {
    pub result: String,
    pub reason_codes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_digest: Option<DigestStr>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<DigestStr>,
    pub external_ref_count: i64,
    pub unique_domain_count: i64,
    pub top_domains: Vec<String>,
    pub target_kind: String,
    pub artifact_kind: String,
    pub total_files: i64,
    pub total_bytes_bounded: i64,
    pub file_counts_by_kind: BTreeMap<String, i64>,
    pub has_scripts: bool,
    pub has_native_binaries: bool,
    pub has_html: bool,
    pub entry_hints: Vec<String>,
    pub boundedness_markers: Vec<String>,
    pub archive_depth_max: i64,
    pub nested_archive_count: i64,
    pub url_like_count: i64,
    pub signature_present: bool,
    pub timestamp_present: bool,
    pub caps_requested_count: i64,
    pub caps_granted_count: i64,
    pub caps_denied_count: i64,
    pub host_release_status: String,
    pub strict_verify: bool,
    pub strict_execute: bool,
}

/// SAME/CHANGED summary with change buckets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareReceipt {
    pub schema: String,
    pub schema_version: i64,
    pub weftend_build: WeftendBuild,
    pub receipt_digest: DigestStr,
    pub verdict: CompareVerdict,
    pub buckets: Vec<String>,
    pub reason_codes: Vec<String>,
    pub left: CompareSummary,
    pub right: CompareSummary,
}

/// One evidence file under the root, as listed by the operator receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptEntry {
    pub rel_path: String,
    pub kind: String,
    pub digest: DigestStr,
}

/// Table of every evidence file in the output root, written last.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorReceipt {
    pub schema: String,
    pub schema_version: i64,
    pub weftend_build: WeftendBuild,
    pub receipt_digest: DigestStr,
    pub receipts: Vec<ReceiptEntry>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LintVerdict {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "FAIL")]
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyLintHit {
    pub rel_path: String,
    pub reason_codes: Vec<String>,
}

/// Post-check result: forbidden path/env patterns in emitted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyLintDoc {
    pub schema: String,
    pub schema_version: i64,
    pub verdict: LintVerdict,
    pub reason_codes: Vec<String>,
    pub hits: Vec<PrivacyLintHit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enums_serialize_to_contract_tokens() {
        assert_eq!(serde_json::to_string(&Verdict::Withheld).unwrap(), "\"WITHHELD\"");
        assert_eq!(serde_json::to_string(&Action::Queue).unwrap(), "\"QUEUE\"");
        assert_eq!(serde_json::to_string(&ArtifactKind::Archive).unwrap(), "\"ARCHIVE\"");
        assert_eq!(serde_json::to_string(&TargetKind::Web).unwrap(), "\"web\"");
        assert_eq!(serde_json::to_string(&RunMode::Strict).unwrap(), "\"strict\"");
        assert_eq!(serde_json::to_string(&CompareVerdict::Same).unwrap(), "\"SAME\"");
    }

    #[test]
    fn build_reason_codes_omitted_when_empty() {
        let b = WeftendBuild {
            algo: BuildDigestAlgo::Sha256,
            digest: DigestStr::zero_sentinel(),
            source: BuildSource::Binary,
            reason_codes: vec![],
        };
        let v = serde_json::to_value(&b).unwrap();
        assert!(v.get("reasonCodes").is_none());
        assert_eq!(v["algo"], "sha256");
        assert_eq!(v["source"], "binary");
    }

    #[test]
    fn mint_wire_fields_are_camel_case() {
        let m = MintPackage::empty(
            ArtifactKind::Text,
            TargetKind::Generic,
            DigestStr::zero_sentinel(),
        );
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["schema"], SCHEMA_MINT);
        assert_eq!(v["schemaVersion"], 0);
        assert!(v.get("fileCountsByKind").is_some());
        assert!(v.get("totalBytesBounded").is_some());
        assert!(v.get("file_counts_by_kind").is_none());
    }
}
