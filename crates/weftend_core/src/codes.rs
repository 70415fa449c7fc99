//! crates/weftend_core/src/codes.rs
//! Reason-code constants and the action → process exit-code mapping.
//!
//! Reason codes are the only externally stable description of any decision
//! or failure. Free-form messages may change; these strings may not.

use crate::entities::Action;

// ---- Build identity ----
pub const WEFTEND_BUILD_DIGEST_UNAVAILABLE: &str = "WEFTEND_BUILD_DIGEST_UNAVAILABLE";

// ---- Input ----
pub const INPUT_MISSING: &str = "INPUT_MISSING";
pub const INPUT_UNREADABLE: &str = "INPUT_UNREADABLE";
pub const INPUT_INVALID: &str = "INPUT_INVALID";

// ---- Schema ----
pub const RECEIPT_OLD_CONTRACT: &str = "RECEIPT_OLD_CONTRACT";
pub const RECEIPT_SCHEMA_VERSION_BAD: &str = "RECEIPT_SCHEMA_VERSION_BAD";
pub const MINT_INVALID: &str = "MINT_INVALID";
pub const POLICY_INVALID: &str = "POLICY_INVALID";
pub const SAFE_RUN_RECEIPT_INVALID: &str = "SAFE_RUN_RECEIPT_INVALID";
pub const RUN_RECEIPT_INVALID: &str = "RUN_RECEIPT_INVALID";
pub const HOST_RUN_RECEIPT_INVALID: &str = "HOST_RUN_RECEIPT_INVALID";
pub const COMPARE_RECEIPT_INVALID: &str = "COMPARE_RECEIPT_INVALID";
pub const OPERATOR_RECEIPT_INVALID: &str = "OPERATOR_RECEIPT_INVALID";

// ---- Examiner / archive ----
pub const ZIP_EOCD_MISSING: &str = "ZIP_EOCD_MISSING";

// ---- Container ----
pub const DOCKER_IMAGE_REF_NOT_IMMUTABLE: &str = "DOCKER_IMAGE_REF_NOT_IMMUTABLE";
pub const DOCKER_REMOTE_CONTEXT_UNSUPPORTED: &str = "DOCKER_REMOTE_CONTEXT_UNSUPPORTED";
pub const DOCKER_IMAGE_NOT_LOCAL: &str = "DOCKER_IMAGE_NOT_LOCAL";
pub const DOCKER_DAEMON_UNAVAILABLE: &str = "DOCKER_DAEMON_UNAVAILABLE";

// ---- Adapter registry ----
pub const ADAPTER_POLICY_FILE_INVALID: &str = "ADAPTER_POLICY_FILE_INVALID";
pub const ADAPTER_POLICY_INVALID: &str = "ADAPTER_POLICY_INVALID";
pub const ADAPTER_TEMPORARILY_UNAVAILABLE: &str = "ADAPTER_TEMPORARILY_UNAVAILABLE";
pub const ADAPTER_UNKNOWN: &str = "ADAPTER_UNKNOWN";
pub const ADAPTER_DOCTOR_STRICT_POLICY_INVALID: &str = "ADAPTER_DOCTOR_STRICT_POLICY_INVALID";
pub const ADAPTER_DOCTOR_STRICT_POLICY_UNKNOWN_TOKEN: &str =
    "ADAPTER_DOCTOR_STRICT_POLICY_UNKNOWN_TOKEN";
pub const ADAPTER_DOCTOR_STRICT_MISSING_PLUGIN: &str = "ADAPTER_DOCTOR_STRICT_MISSING_PLUGIN";

// ---- Trust algebra / capability ledger ----
pub const CAP_DENY_NET: &str = "CAP_DENY_NET";
pub const CAP_DENY_SCRIPT: &str = "CAP_DENY_SCRIPT";
pub const CAP_DENY_NATIVE: &str = "CAP_DENY_NATIVE";
pub const CAP_DENY_CONTAINER: &str = "CAP_DENY_CONTAINER";
pub const CAP_WITHHOLD_REVIEW: &str = "CAP_WITHHOLD_REVIEW";
pub const LIMIT_ARCHIVE_DEPTH_EXCEEDED: &str = "LIMIT_ARCHIVE_DEPTH_EXCEEDED";
pub const LIMIT_NESTED_ARCHIVES_EXCEEDED: &str = "LIMIT_NESTED_ARCHIVES_EXCEEDED";
pub const LIMIT_EXTERNAL_REFS_EXCEEDED: &str = "LIMIT_EXTERNAL_REFS_EXCEEDED";
pub const LIMIT_TOTAL_BYTES_EXCEEDED: &str = "LIMIT_TOTAL_BYTES_EXCEEDED";

// ---- Execution ----
pub const EXEC_WITHHELD_BY_OPERATOR: &str = "EXEC_WITHHELD_BY_OPERATOR";
pub const EXEC_HOST_UNAVAILABLE: &str = "EXEC_HOST_UNAVAILABLE";
pub const EXEC_DEADLINE_EXCEEDED: &str = "EXEC_DEADLINE_EXCEEDED";

// ---- Compare ----
pub const COMPARE_LEFT_RECEIPT_MISSING: &str = "COMPARE_LEFT_RECEIPT_MISSING";
pub const COMPARE_RIGHT_RECEIPT_MISSING: &str = "COMPARE_RIGHT_RECEIPT_MISSING";
pub const COMPARE_LEFT_RECEIPT_INVALID: &str = "COMPARE_LEFT_RECEIPT_INVALID";
pub const COMPARE_RIGHT_RECEIPT_INVALID: &str = "COMPARE_RIGHT_RECEIPT_INVALID";
pub const COMPARE_OUT_CONFLICTS_INPUT: &str = "COMPARE_OUT_CONFLICTS_INPUT";

// ---- Change buckets (not reason codes, but externally stable tokens) ----
pub const BUCKET_KIND_PROFILE_CHANGED: &str = "KIND_PROFILE_CHANGED";
pub const BUCKET_CONTENT_CHANGED: &str = "CONTENT_CHANGED";
pub const BUCKET_EXTERNALREFS_CHANGED: &str = "EXTERNALREFS_CHANGED";
pub const BUCKET_DIGEST_CHANGED: &str = "DIGEST_CHANGED";
pub const BUCKET_REASONS_CHANGED: &str = "REASONS_CHANGED";

// ---- Inspect / release verification ----
pub const RELEASE_MANIFEST_MISSING: &str = "RELEASE_MANIFEST_MISSING";
pub const RELEASE_PUBLIC_KEY_MISSING: &str = "RELEASE_PUBLIC_KEY_MISSING";
pub const RELEASE_RUNTIME_BUNDLE_MISSING: &str = "RELEASE_RUNTIME_BUNDLE_MISSING";
pub const RELEASE_EVIDENCE_MISSING: &str = "RELEASE_EVIDENCE_MISSING";
pub const RELEASE_MANIFEST_INVALID: &str = "RELEASE_MANIFEST_INVALID";
pub const RELEASE_SIGNATURE_BAD: &str = "RELEASE_SIGNATURE_BAD";
pub const RELEASE_SIGNATURE_ALGO_UNSUPPORTED: &str = "RELEASE_SIGNATURE_ALGO_UNSUPPORTED";
pub const RELEASE_PLANDIGEST_MISMATCH: &str = "RELEASE_PLANDIGEST_MISMATCH";
pub const POLICY_DIGEST_MISMATCH: &str = "POLICY_DIGEST_MISMATCH";
pub const EVIDENCE_HEAD_MISMATCH: &str = "EVIDENCE_HEAD_MISMATCH";
pub const RELEASE_BUILD_DIGEST_WEAK: &str = "RELEASE_BUILD_DIGEST_WEAK";

// ---- Privacy lint ----
pub const PRIVACY_LINT_PATH_LEAK: &str = "PRIVACY_LINT_PATH_LEAK";
pub const PRIVACY_LINT_ENV_LEAK: &str = "PRIVACY_LINT_ENV_LEAK";

// ---- Evidence writer / orphan detection ----
pub const SAFE_RUN_EVIDENCE_ORPHAN_OUTPUT: &str = "SAFE_RUN_EVIDENCE_ORPHAN_OUTPUT";

// ---- Preconditions ----
pub const PROFILE_UNSUPPORTED: &str = "PROFILE_UNSUPPORTED";
pub const MODE_UNSUPPORTED: &str = "MODE_UNSUPPORTED";
pub const FORMAT_UNSUPPORTED: &str = "FORMAT_UNSUPPORTED";
pub const EXPORT_JSON_OUT_CONFLICTS_SOURCE: &str = "EXPORT_JSON_OUT_CONFLICTS_SOURCE";
pub const LICENSE_OUT_CONFLICTS_KEY: &str = "LICENSE_OUT_CONFLICTS_KEY";

// ---- Internal ----
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Operations that own an output root; their precondition codes are
/// prefixed with the operation name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutOp {
    Examine,
    Intake,
    Run,
    SafeRun,
    Compare,
    TicketPack,
    ExportJson,
}

impl OutOp {
    pub fn out_path_not_directory(self) -> &'static str {
        match self {
            OutOp::Examine => "EXAMINE_OUT_PATH_NOT_DIRECTORY",
            OutOp::Intake => "INTAKE_OUT_PATH_NOT_DIRECTORY",
            OutOp::Run => "RUN_OUT_PATH_NOT_DIRECTORY",
            OutOp::SafeRun => "SAFE_RUN_OUT_PATH_NOT_DIRECTORY",
            OutOp::Compare => "COMPARE_OUT_PATH_NOT_DIRECTORY",
            OutOp::TicketPack => "TICKET_PACK_OUT_PATH_NOT_DIRECTORY",
            OutOp::ExportJson => "EXPORT_JSON_OUT_PATH_NOT_DIRECTORY",
        }
    }

    pub fn out_path_is_directory(self) -> &'static str {
        match self {
            OutOp::Examine => "EXAMINE_OUT_PATH_IS_DIRECTORY",
            OutOp::Intake => "INTAKE_OUT_PATH_IS_DIRECTORY",
            OutOp::Run => "RUN_OUT_PATH_IS_DIRECTORY",
            OutOp::SafeRun => "SAFE_RUN_OUT_PATH_IS_DIRECTORY",
            OutOp::Compare => "COMPARE_OUT_PATH_IS_DIRECTORY",
            OutOp::TicketPack => "TICKET_PACK_OUT_PATH_IS_DIRECTORY",
            OutOp::ExportJson => "EXPORT_JSON_OUT_PATH_IS_DIRECTORY",
        }
    }

    pub fn out_path_parent_not_directory(self) -> &'static str {
        match self {
            OutOp::Examine => "EXAMINE_OUT_PATH_PARENT_NOT_DIRECTORY",
            OutOp::Intake => "INTAKE_OUT_PATH_PARENT_NOT_DIRECTORY",
            OutOp::Run => "RUN_OUT_PATH_PARENT_NOT_DIRECTORY",
            OutOp::SafeRun => "SAFE_RUN_OUT_PATH_PARENT_NOT_DIRECTORY",
            OutOp::Compare => "COMPARE_OUT_PATH_PARENT_NOT_DIRECTORY",
            OutOp::TicketPack => "TICKET_PACK_OUT_PATH_PARENT_NOT_DIRECTORY",
            OutOp::ExportJson => "EXPORT_JSON_OUT_PATH_PARENT_NOT_DIRECTORY",
        }
    }
}

/// Non-action exit dispositions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitDisposition {
    /// Decision-path exit taken from the trust action.
    Action(Action),
    /// Precondition or validation failure; no partial evidence written.
    FailClosed,
    /// Unexpected error (should never occur on a healthy host).
    Unexpected,
}

/// The fixed exit-code mapping: APPROVE=0, QUEUE=10, REJECT=20, HOLD=30,
/// fail-closed=40, unexpected=1.
pub fn exit_code_for(disposition: ExitDisposition) -> u8 {
    match disposition {
        ExitDisposition::Action(Action::Approve) => 0,
        ExitDisposition::Action(Action::Queue) => 10,
        ExitDisposition::Action(Action::Reject) => 20,
        ExitDisposition::Action(Action::Hold) => 30,
        ExitDisposition::FailClosed => 40,
        ExitDisposition::Unexpected => 1,
    }
}
