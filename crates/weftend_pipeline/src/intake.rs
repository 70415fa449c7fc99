//! Intake / run orchestration: examine → decide → stage → finalize.
//!
//! Execution-path DENY/WITHHELD is not an error: it produces a fully
//! committed evidence root whose receipt records the denial reasons, and
//! the process exit code comes from the action. Fail-closed preconditions
//! commit nothing. A mutable container reference is the one hybrid: the
//! denial is committed as evidence *and* the invocation fails closed.

use std::path::Path;

use serde_json::{json, Value};
use weftend_core::codes::{self, ExitDisposition, OutOp};
use weftend_core::entities::{
    Action, Decision, ExecuteOutcome, HostRunReceipt, MintPackage, Policy, Profile, RunMode,
    RunReceipt, SafeRunReceipt, Thresholds, Verdict, WeftendBuild, SCHEMA_RUN_RECEIPT,
    SCHEMA_SAFE_RUN_RECEIPT, SCHEMA_VERSION,
};
use weftend_core::ids::DigestStr;
use weftend_core::order::stable_sort_unique_v0;
use weftend_io::digest::{canonical_digest_for, seal_receipt};
use weftend_io::writer::{EvidenceWriter, FinalizeSummary};
use weftend_trust::{deny_decision, evaluate, hold_decision};

use crate::examine::{Deadline, ExamineInput, Examiner};
use crate::{PipelineError, PipelineResult};

pub const MINT_FILE: &str = "weftend_mint_v1.json";
pub const MINT_TEXT_FILE: &str = "weftend_mint_v1.txt";
pub const SAFE_RUN_RECEIPT_FILE: &str = "safe_run_receipt.json";
pub const RUN_RECEIPT_FILE: &str = "run_receipt.json";
pub const HOST_RUN_RECEIPT_FILE: &str = "host_run_receipt.json";
pub const INTAKE_DECISION_FILE: &str = "intake_decision.json";
pub const DISCLOSURE_FILE: &str = "disclosure.txt";
pub const APPEAL_BUNDLE_FILE: &str = "appeal_bundle.json";

/// Sandbox host collaborator. Invoked synchronously with an explicit
/// deadline; on timeout it returns a reason code, never a partial receipt.
pub trait SandboxHost {
    fn run(
        &self,
        input: &ExamineInput,
        deadline: Deadline,
        build: &WeftendBuild,
    ) -> Result<HostRunReceipt, &'static str>;
}

/// Host stub for environments with no sandbox attached.
pub struct NoHost;

impl SandboxHost for NoHost {
    fn run(
        &self,
        _input: &ExamineInput,
        _deadline: Deadline,
        _build: &WeftendBuild,
    ) -> Result<HostRunReceipt, &'static str> {
        Err(codes::EXEC_HOST_UNAVAILABLE)
    }
}

/// Which operation drives this run; controls the staged artifact set and
/// the precondition code prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOp {
    Examine,
    Intake,
    Run,
    SafeRun,
}

impl RunOp {
    fn out_op(self) -> OutOp {
        match self {
            RunOp::Examine => OutOp::Examine,
            RunOp::Intake => OutOp::Intake,
            RunOp::Run => OutOp::Run,
            RunOp::SafeRun => OutOp::SafeRun,
        }
    }

    fn wants_mint_files(self) -> bool {
        matches!(self, RunOp::Examine | RunOp::Run | RunOp::SafeRun)
    }

    fn wants_intake_files(self) -> bool {
        matches!(self, RunOp::Intake | RunOp::Run)
    }

    fn wants_safe_run_receipt(self) -> bool {
        matches!(self, RunOp::SafeRun | RunOp::Intake | RunOp::Run)
    }

    fn wants_run_receipt(self) -> bool {
        matches!(self, RunOp::Run)
    }
}

/// One triage request.
pub struct RunRequest<'a> {
    pub op: RunOp,
    pub input: ExamineInput,
    pub policy: Option<&'a Policy>,
    pub profile: Profile,
    pub mode: RunMode,
    pub execute: bool,
    pub withhold_exec: bool,
    /// Operator-declared entry script (`--script`); recorded as an entry
    /// hint and flips the script observation on.
    pub declared_script: Option<String>,
    /// Stage the raw examiner capture alongside the mint (`--emit-capture`).
    pub emit_capture: bool,
    pub deadline: Deadline,
}

impl<'a> RunRequest<'a> {
    pub fn new(op: RunOp, input: ExamineInput) -> Self {
        RunRequest {
            op,
            input,
            policy: None,
            profile: Profile::Generic,
            mode: RunMode::Strict,
            execute: false,
            withhold_exec: false,
            declared_script: None,
            emit_capture: false,
            deadline: Deadline::DEFAULT,
        }
    }
}

/// Collaborators resolved once per process startup and passed explicitly.
pub struct PipelineCtx<'a> {
    pub build: &'a WeftendBuild,
    pub examiner: &'a dyn Examiner,
    pub host: &'a dyn SandboxHost,
}

/// Outcome of a committed (or fail-closed) run.
#[derive(Debug)]
pub struct RunOutcome {
    pub decision: Decision,
    pub mint: Option<MintPackage>,
    pub receipt: Option<SafeRunReceipt>,
    pub summary: Option<FinalizeSummary>,
    pub disposition: ExitDisposition,
}

/// Baseline policy used when the caller supplies none: no grants, default
/// thresholds. Every requested capability withholds, so unknown artifacts
/// hold for operator review rather than passing silently.
pub fn baseline_policy(profile: Profile) -> Policy {
    Policy {
        schema: weftend_core::entities::SCHEMA_POLICY.to_string(),
        schema_version: SCHEMA_VERSION,
        profile,
        capability_rules: Vec::new(),
        thresholds: Thresholds::default(),
    }
}

/// How an examiner failure lands.
enum FailureLanding {
    /// Nothing committed; exit 40.
    FailClosed,
    /// DENY committed as evidence; the invocation still fails closed.
    DenyCommitted,
    /// WITHHELD committed as evidence; exit comes from HOLD.
    HoldCommitted,
}

fn landing_for(code: &'static str) -> FailureLanding {
    match code {
        codes::INPUT_MISSING
        | codes::INPUT_UNREADABLE
        | codes::INPUT_INVALID
        | codes::DOCKER_REMOTE_CONTEXT_UNSUPPORTED => FailureLanding::FailClosed,
        codes::DOCKER_IMAGE_REF_NOT_IMMUTABLE => FailureLanding::DenyCommitted,
        _ => FailureLanding::HoldCommitted,
    }
}

/// Drive one request end-to-end against `out_root`.
pub fn run_pipeline(
    req: &RunRequest<'_>,
    out_root: &Path,
    ctx: &PipelineCtx<'_>,
) -> PipelineResult<RunOutcome> {
    let mut writer = EvidenceWriter::begin(out_root, req.op.out_op())?;

    let baseline;
    let policy = match req.policy {
        Some(p) => p,
        None => {
            baseline = baseline_policy(req.profile);
            &baseline
        }
    };
    let policy_id: DigestStr = canonical_digest_for(policy)?
        .parse()
        .map_err(|_| PipelineError::fail_closed(codes::POLICY_INVALID, "policy digest shape"))?;

    let examined = ctx.examiner.examine(&req.input, req.profile, req.deadline);

    let (mint, adapter_class, decision, artifact_digest, fail_after_commit) = match examined {
        Ok(mut ex) => {
            if let Some(script) = &req.declared_script {
                ex.mint.has_scripts = true;
                let mut hints = ex.mint.entry_hints.clone();
                hints.push(script.clone());
                ex.mint.entry_hints = stable_sort_unique_v0(hints.iter().map(String::as_str));
            }
            let decision = evaluate(&ex.mint, policy);
            let digest = ex.mint.input_digest.clone();
            (
                Some(ex.mint),
                Some(ex.adapter_class),
                decision,
                digest,
                None,
            )
        }
        Err(failure) => match landing_for(failure.code) {
            FailureLanding::FailClosed => {
                writer.abort();
                return Err(PipelineError::fail_closed(failure.code, failure.message));
            }
            FailureLanding::DenyCommitted => {
                let digest = failure
                    .input_digest
                    .clone()
                    .unwrap_or_else(DigestStr::zero_sentinel);
                (
                    None,
                    None,
                    deny_decision(&[failure.code]),
                    digest,
                    Some(failure),
                )
            }
            FailureLanding::HoldCommitted => {
                let digest = failure
                    .input_digest
                    .clone()
                    .unwrap_or_else(DigestStr::zero_sentinel);
                (None, None, hold_decision(&[failure.code]), digest, None)
            }
        },
    };

    // Optional host execution, only for an approved artifact.
    let execute = execute_outcome(req, &decision, ctx, &mut writer)?;

    stage_artifacts(
        req,
        &mut writer,
        ctx.build,
        &policy_id,
        mint.as_ref(),
        &decision,
        &artifact_digest,
        execute.clone(),
    )?;

    if req.emit_capture {
        if let (Some(m), Some(class)) = (mint.as_ref(), adapter_class.as_deref()) {
            let capture = json!({
                "schema": "weftend.examineCapture/0",
                "schemaVersion": SCHEMA_VERSION,
                "adapterClass": class,
                "mint": serde_json::to_value(m).map_err(weftend_io::IoError::from)?,
            });
            writer.stage_receipt("examine_capture.json", &capture, "examine_capture")?;
        }
    }

    writer.validate_all()?;
    let summary = writer.finalize(ctx.build)?;

    let receipt = build_safe_run_receipt(
        ctx.build,
        mint.as_ref(),
        &decision,
        &artifact_digest,
        Some(&policy_id),
        execute,
        req,
    );

    let disposition = if fail_after_commit.is_some() {
        ExitDisposition::FailClosed
    } else {
        ExitDisposition::Action(decision.action)
    };

    Ok(RunOutcome {
        decision,
        mint,
        receipt: Some(receipt),
        summary: Some(summary),
        disposition,
    })
}

fn execute_outcome(
    req: &RunRequest<'_>,
    decision: &Decision,
    ctx: &PipelineCtx<'_>,
    writer: &mut EvidenceWriter,
) -> PipelineResult<Option<ExecuteOutcome>> {
    if !req.execute {
        return Ok(None);
    }
    if req.withhold_exec {
        return Ok(Some(ExecuteOutcome {
            verdict: Verdict::Withheld,
            reason_codes: vec![codes::EXEC_WITHHELD_BY_OPERATOR.to_string()],
            host_run_digest: None,
        }));
    }
    if decision.action != Action::Approve {
        return Ok(Some(ExecuteOutcome {
            verdict: Verdict::Withheld,
            reason_codes: stable_sort_unique_v0(decision.reason_codes.iter().map(String::as_str)),
            host_run_digest: None,
        }));
    }
    match ctx.host.run(&req.input, req.deadline, ctx.build) {
        Ok(host_receipt) => {
            let value = serde_json::to_value(&host_receipt).map_err(weftend_io::IoError::from)?;
            let sealed = seal_receipt(value)?;
            let digest = sealed
                .get("receiptDigest")
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<DigestStr>().ok());
            writer.stage_receipt(HOST_RUN_RECEIPT_FILE, &sealed, "host_run_receipt")?;
            Ok(Some(ExecuteOutcome {
                verdict: host_receipt.exec_verdict,
                reason_codes: host_receipt.reason_codes.clone(),
                host_run_digest: digest,
            }))
        }
        Err(code) => Ok(Some(ExecuteOutcome {
            verdict: Verdict::Withheld,
            reason_codes: vec![code.to_string()],
            host_run_digest: None,
        })),
    }
}

fn build_safe_run_receipt(
    build: &WeftendBuild,
    mint: Option<&MintPackage>,
    decision: &Decision,
    artifact_digest: &DigestStr,
    policy_id: Option<&DigestStr>,
    execute: Option<ExecuteOutcome>,
    req: &RunRequest<'_>,
) -> SafeRunReceipt {
    let (artifact_kind, target_kind) = match mint {
        Some(m) => (m.artifact_kind, m.target_kind),
        None => (
            weftend_core::entities::ArtifactKind::Other,
            match (&req.input, req.profile) {
                (ExamineInput::ContainerRef(_), _) => weftend_core::entities::TargetKind::Container,
                (_, Profile::Web) => weftend_core::entities::TargetKind::Web,
                (_, Profile::Mod) => weftend_core::entities::TargetKind::Mod,
                (_, Profile::Generic) => weftend_core::entities::TargetKind::Generic,
            },
        ),
    };
    SafeRunReceipt {
        schema: SCHEMA_SAFE_RUN_RECEIPT.to_string(),
        schema_version: SCHEMA_VERSION,
        weftend_build: build.clone(),
        receipt_digest: DigestStr::zero_sentinel(),
        artifact_digest: artifact_digest.clone(),
        artifact_kind,
        target_kind,
        policy_id: policy_id.cloned(),
        analysis_verdict: decision.verdict,
        analysis_action: decision.action,
        top_reason_codes: decision.reason_codes.clone(),
        capability_ledger: decision.capability_ledger.clone(),
        execute,
    }
}

#[allow(clippy::too_many_arguments)]
fn stage_artifacts(
    req: &RunRequest<'_>,
    writer: &mut EvidenceWriter,
    build: &WeftendBuild,
    policy_id: &DigestStr,
    mint: Option<&MintPackage>,
    decision: &Decision,
    artifact_digest: &DigestStr,
    execute: Option<ExecuteOutcome>,
) -> PipelineResult<()> {
    if req.op.wants_mint_files() {
        if let Some(m) = mint {
            let value = serde_json::to_value(m).map_err(weftend_io::IoError::from)?;
            writer.stage_receipt(MINT_FILE, &value, "mint")?;
            writer.stage_text(MINT_TEXT_FILE, &mint_text(m), "mint_text")?;
        }
    }

    if req.op.wants_safe_run_receipt() {
        let receipt = build_safe_run_receipt(
            build,
            mint,
            decision,
            artifact_digest,
            Some(policy_id),
            execute,
            req,
        );
        let sealed = seal_receipt(serde_json::to_value(&receipt).map_err(weftend_io::IoError::from)?)?;
        writer.stage_receipt(SAFE_RUN_RECEIPT_FILE, &sealed, "safe_run_receipt")?;
    }

    if req.op.wants_run_receipt() {
        if let Some(m) = mint {
            let run_receipt = RunReceipt {
                schema: SCHEMA_RUN_RECEIPT.to_string(),
                schema_version: SCHEMA_VERSION,
                weftend_build: build.clone(),
                receipt_digest: DigestStr::zero_sentinel(),
                mode: req.mode,
                mint: m.clone(),
                policy_id: policy_id.clone(),
                decision: decision.clone(),
            };
            let sealed =
                seal_receipt(serde_json::to_value(&run_receipt).map_err(weftend_io::IoError::from)?)?;
            writer.stage_receipt(RUN_RECEIPT_FILE, &sealed, "run_receipt")?;
        }
    }

    if req.op.wants_intake_files() {
        let intake = json!({
            "schema": "weftend.intakeDecision/0",
            "schemaVersion": SCHEMA_VERSION,
            "policyId": policy_id.as_str(),
            "action": decision.action.as_str(),
            "verdict": decision.verdict.as_str(),
            "reasonCodes": decision.reason_codes,
            "capabilityLedger": serde_json::to_value(&decision.capability_ledger)
                .map_err(weftend_io::IoError::from)?,
        });
        writer.stage_receipt(INTAKE_DECISION_FILE, &intake, "intake_decision")?;

        let disclosure =
            weftend_report::disclosure_text(decision, mint, Some(policy_id.as_str()));
        writer.stage_text(DISCLOSURE_FILE, &disclosure, "disclosure")?;

        let appeal = json!({
            "schema": "weftend.appealBundle/0",
            "schemaVersion": SCHEMA_VERSION,
            "policyId": policy_id.as_str(),
            "artifactDigest": artifact_digest.as_str(),
            "decision": serde_json::to_value(decision).map_err(weftend_io::IoError::from)?,
            "mint": match mint {
                Some(m) => serde_json::to_value(m).map_err(weftend_io::IoError::from)?,
                None => Value::Null,
            },
        });
        writer.stage_receipt(APPEAL_BUNDLE_FILE, &appeal, "appeal_bundle")?;
    }

    Ok(())
}

/// Plain-text rendering of a mint for operators; ASCII, stable order.
fn mint_text(mint: &MintPackage) -> String {
    let mut out = String::new();
    use std::fmt::Write as _;
    let _ = writeln!(out, "WEFTEND MINT v1");
    let _ = writeln!(out, "===============");
    let _ = writeln!(out, "artifact kind: {}", mint.artifact_kind.as_str());
    let _ = writeln!(out, "target kind:   {}", mint.target_kind.as_str());
    let _ = writeln!(out, "input digest:  {}", mint.input_digest);
    let _ = writeln!(out, "total files:   {}", mint.total_files);
    let _ = writeln!(out, "total bytes:   {}", mint.total_bytes_bounded);
    let _ = writeln!(out, "scripts: {}  native: {}  html: {}",
        mint.has_scripts, mint.has_native_binaries, mint.has_html);
    let _ = writeln!(out, "external refs: {}", mint.external_refs.len());
    for r in &mint.external_refs {
        let _ = writeln!(out, "  {r}");
    }
    let _ = writeln!(out, "entry hints:   {}", mint.entry_hints.join(", "));
    out
}
