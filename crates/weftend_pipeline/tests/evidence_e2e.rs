//! End-to-end scenarios for the evidence engine, driven through the
//! pipeline API with on-disk fixtures built by each test.
//!
//! Every committed root is re-read from disk and checked against the
//! engine's own invariants: operator-receipt bijection, receipt-digest
//! integrity, privacy-lint cleanliness, and byte-identical re-runs.

use std::fs;
use std::path::{Path, PathBuf};

use weftend_core::codes::{self, exit_code_for, ExitDisposition};
use weftend_core::entities::{
    Action, CapEffect, CapabilityRule, CompareVerdict, LintVerdict, Policy, Profile, Thresholds,
    Verdict,
};
use weftend_core::ids::DigestStr;
use weftend_io::build::fallback_build_identity;
use weftend_io::digest::{sha256_file, verify_receipt_digest};
use weftend_io::loader::{load_evidence_root, ReceiptKind};
use weftend_io::privacy::walk_sorted;
use weftend_pipeline::compare::compare_roots;
use weftend_pipeline::examine::{ExamineInput, FsExaminer};
use weftend_pipeline::intake::{run_pipeline, NoHost, PipelineCtx, RunOp, RunRequest};

fn web_component_default() -> Policy {
    Policy {
        schema: weftend_core::entities::SCHEMA_POLICY.to_string(),
        schema_version: 0,
        profile: Profile::Web,
        capability_rules: vec![
            CapabilityRule {
                cap_id: "cap.net.fetch".parse().unwrap(),
                effect: CapEffect::Deny,
                reason_code: codes::CAP_DENY_NET.to_string(),
            },
            CapabilityRule {
                cap_id: "cap.script.eval".parse().unwrap(),
                effect: CapEffect::Grant,
                reason_code: "CAP_GRANT_SCRIPT".to_string(),
            },
            CapabilityRule {
                cap_id: "cap.html.render".parse().unwrap(),
                effect: CapEffect::Grant,
                reason_code: "CAP_GRANT_HTML".to_string(),
            },
        ],
        thresholds: Thresholds::default(),
    }
}

fn release_strict_default() -> Policy {
    Policy {
        schema: weftend_core::entities::SCHEMA_POLICY.to_string(),
        schema_version: 0,
        profile: Profile::Generic,
        capability_rules: vec![],
        thresholds: Thresholds::default(),
    }
}

fn run_safe(input: ExamineInput, out: &Path, policy: &Policy, profile: Profile) -> (Action, u8) {
    let build = fallback_build_identity();
    let examiner = FsExaminer::local_default();
    let ctx = PipelineCtx {
        build: &build,
        examiner: &examiner,
        host: &NoHost,
    };
    let mut req = RunRequest::new(RunOp::SafeRun, input);
    req.policy = Some(policy);
    req.profile = profile;
    let outcome = run_pipeline(&req, out, &ctx).expect("pipeline run");
    (outcome.decision.action, exit_code_for(outcome.disposition))
}

/// Re-read a committed root and assert the writer's whole-root invariants.
fn assert_root_invariants(root: &Path) {
    let loaded = load_evidence_root(root).expect("load committed root");
    let operator = loaded.operator().expect("operator receipt present");

    // Bijection: every regular file except the operator receipt itself is
    // listed exactly once with a matching sha256.
    let mut on_disk: Vec<String> = walk_sorted(root)
        .unwrap()
        .into_iter()
        .map(|p| p.to_string())
        .filter(|p| p != "operator_receipt.json")
        .collect();
    on_disk.sort();
    let mut listed: Vec<String> = operator
        .receipts
        .iter()
        .map(|e| e.rel_path.clone())
        .collect();
    listed.sort();
    assert_eq!(on_disk, listed, "operator receipt must list every file");
    for entry in &operator.receipts {
        let hex = sha256_file(root.join(&entry.rel_path)).unwrap();
        assert_eq!(
            entry.digest.as_str(),
            format!("sha256:{hex}"),
            "digest mismatch for {}",
            entry.rel_path
        );
    }

    // No stage residue.
    let mut stage = root.as_os_str().to_owned();
    stage.push(".stage");
    assert!(!PathBuf::from(stage).exists(), "no .stage residue");

    // Sealed receipts verify against their own digests.
    for receipt in &loaded.receipts {
        let text = fs::read_to_string(root.join(receipt.rel_path.as_std_path())).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        if value.get("receiptDigest").is_some() {
            assert!(
                verify_receipt_digest(&value).unwrap(),
                "receipt digest mismatch in {}",
                receipt.rel_path
            );
        }
    }

    // The committed privacy lint must be a PASS.
    let lint = loaded
        .receipts
        .iter()
        .find_map(|r| match &r.kind {
            ReceiptKind::PrivacyLint(doc) => Some(doc.as_ref().clone()),
            _ => None,
        })
        .expect("privacy lint doc present");
    assert_eq!(lint.verdict, LintVerdict::Pass, "emitted text leaked a path");
}

#[test]
fn safe_no_caps_approves() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("safe_no_caps");
    fs::create_dir_all(&fixture).unwrap();
    fs::write(fixture.join("readme.txt"), b"a perfectly quiet artifact").unwrap();

    let out = dir.path().join("out");
    let (action, exit) = run_safe(
        ExamineInput::Path(fixture),
        &out,
        &web_component_default(),
        Profile::Web,
    );
    assert_eq!(action, Action::Approve);
    assert_eq!(exit, 0);

    let loaded = load_evidence_root(&out).unwrap();
    let receipt = loaded.safe_run().unwrap();
    assert_eq!(receipt.analysis_verdict, Verdict::Allow);
    assert!(!loaded
        .operator()
        .unwrap()
        .warnings
        .contains(&codes::SAFE_RUN_EVIDENCE_ORPHAN_OUTPUT.to_string()));
    assert_root_invariants(&out);
}

#[test]
fn net_attempt_queues() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("net_attempt");
    fs::create_dir_all(&fixture).unwrap();
    fs::write(
        fixture.join("phone_home.txt"),
        b"on load, POST to https://collector.example/v1/beacon",
    )
    .unwrap();

    let out = dir.path().join("out");
    let (action, exit) = run_safe(
        ExamineInput::Path(fixture),
        &out,
        &web_component_default(),
        Profile::Web,
    );
    assert_eq!(action, Action::Queue);
    assert_eq!(exit, 10);

    let loaded = load_evidence_root(&out).unwrap();
    let receipt = loaded.safe_run().unwrap();
    assert!(receipt
        .top_reason_codes
        .contains(&codes::CAP_DENY_NET.to_string()));
    assert_root_invariants(&out);
}

#[test]
fn tampered_zip_holds() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("tampered_manifest");
    fs::create_dir_all(&fixture).unwrap();
    let zip = fixture.join("tampered.zip");
    fs::write(&zip, b"PK\x03\x04body-without-central-directory").unwrap();

    let out = dir.path().join("out");
    let (action, exit) = run_safe(
        ExamineInput::Path(zip),
        &out,
        &release_strict_default(),
        Profile::Generic,
    );
    assert_eq!(action, Action::Hold);
    assert_eq!(exit, 30);

    let loaded = load_evidence_root(&out).unwrap();
    let receipt = loaded.safe_run().unwrap();
    assert!(receipt
        .top_reason_codes
        .contains(&codes::ZIP_EOCD_MISSING.to_string()));
    // The artifact digest is still recorded: the bytes were readable even
    // though the structure was not.
    assert!(receipt.artifact_digest.is_sha256());
    assert_ne!(receipt.artifact_digest, DigestStr::zero_sentinel());
    assert_root_invariants(&out);
}

#[test]
fn compare_same_after_identical_runs() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("safe_no_caps");
    fs::create_dir_all(&fixture).unwrap();
    fs::write(fixture.join("readme.txt"), b"stable").unwrap();

    let left = dir.path().join("left");
    let right = dir.path().join("right");
    let policy = web_component_default();
    run_safe(
        ExamineInput::Path(fixture.clone()),
        &left,
        &policy,
        Profile::Web,
    );
    run_safe(ExamineInput::Path(fixture), &right, &policy, Profile::Web);

    let out = dir.path().join("cmp");
    let outcome = compare_roots(&left, &right, &out, &fallback_build_identity()).unwrap();
    assert_eq!(outcome.receipt.verdict, CompareVerdict::Same);
    assert!(outcome.receipt.buckets.is_empty());
    assert_root_invariants(&out);

    let report = fs::read_to_string(out.join("compare_report.txt")).unwrap();
    assert!(report.contains("evidence.verdict=[POL] SAME"));
}

#[test]
fn compare_out_overlapping_input_fails_closed() {
    let dir = tempfile::tempdir().unwrap();
    let left = dir.path().join("left");
    let right = dir.path().join("right");
    fs::create_dir_all(&left).unwrap();
    fs::create_dir_all(&right).unwrap();

    let err = compare_roots(&left, &right, &left.join("nested"), &fallback_build_identity())
        .unwrap_err();
    assert_eq!(err.reason_code(), codes::COMPARE_OUT_CONFLICTS_INPUT);
    assert!(err.is_fail_closed());
    assert!(!left.join("nested").exists());
}

#[test]
fn container_mutable_ref_denies_with_exit_40() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");

    let build = fallback_build_identity();
    let examiner = FsExaminer::local_default();
    let ctx = PipelineCtx {
        build: &build,
        examiner: &examiner,
        host: &NoHost,
    };
    let req = RunRequest::new(
        RunOp::SafeRun,
        ExamineInput::ContainerRef("ubuntu:latest".to_string()),
    );
    let outcome = run_pipeline(&req, &out, &ctx).unwrap();

    assert_eq!(outcome.disposition, ExitDisposition::FailClosed);
    assert_eq!(exit_code_for(outcome.disposition), 40);

    let loaded = load_evidence_root(&out).unwrap();
    let receipt = loaded.safe_run().unwrap();
    assert_eq!(receipt.analysis_verdict, Verdict::Deny);
    assert!(receipt
        .top_reason_codes
        .contains(&codes::DOCKER_IMAGE_REF_NOT_IMMUTABLE.to_string()));
    assert_root_invariants(&out);
}

#[test]
fn identical_inputs_yield_byte_identical_receipts() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("fixture");
    fs::create_dir_all(&fixture).unwrap();
    fs::write(fixture.join("a.txt"), b"bytes").unwrap();
    fs::write(fixture.join("b.md"), b"see https://docs.example/x").unwrap();

    let out_a = dir.path().join("out_a");
    let out_b = dir.path().join("out_b");
    let policy = web_component_default();
    run_safe(
        ExamineInput::Path(fixture.clone()),
        &out_a,
        &policy,
        Profile::Web,
    );
    run_safe(ExamineInput::Path(fixture), &out_b, &policy, Profile::Web);

    for name in [
        "safe_run_receipt.json",
        "weftend_mint_v1.json",
        "weftend/privacy_lint_v0.json",
        "operator_receipt.json",
    ] {
        let a = fs::read(out_a.join(name)).unwrap();
        let b = fs::read(out_b.join(name)).unwrap();
        assert_eq!(a, b, "receipt {name} must be byte-identical across runs");
    }
}

#[test]
fn orphan_output_is_warned_once() {
    let dir = tempfile::tempdir().unwrap();
    let fixture = dir.path().join("fixture");
    fs::create_dir_all(&fixture).unwrap();
    fs::write(fixture.join("a.txt"), b"x").unwrap();

    let out = dir.path().join("out");
    fs::create_dir_all(&out).unwrap();
    fs::write(out.join("stray.bin"), b"left behind by someone else").unwrap();

    let policy = web_component_default();
    run_safe(ExamineInput::Path(fixture), &out, &policy, Profile::Web);

    let loaded = load_evidence_root(&out).unwrap();
    assert_eq!(
        loaded.operator().unwrap().warnings,
        vec![codes::SAFE_RUN_EVIDENCE_ORPHAN_OUTPUT.to_string()]
    );
    // The stray file was replaced wholesale by the committed root.
    assert!(!out.join("stray.bin").exists());
    assert_root_invariants(&out);
}
