//! Inspect: verify a release directory.
//!
//! Checks existence and schema of the four release files, verifies the
//! manifest signature against the declared key, asserts the plan/policy
//! bindings, and recomputes the evidence-bundle digest against the
//! manifest's journal head. Every check lands as a reason code; the
//! report is a deterministic JSON document on stdout.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, VerifyingKey};
use serde::Deserialize;
use serde_json::{json, Value};
use weftend_core::codes;
use weftend_core::order::stable_sort_unique_v0;
use weftend_io::canonical_json::to_canonical_json_bytes;
use weftend_io::digest::{compute_artifact_digest_v0, sha256_hex};

use crate::{PipelineError, PipelineResult};

pub const RELEASE_MANIFEST_FILE: &str = "release_manifest.json";
pub const RELEASE_PUBLIC_KEY_FILE: &str = "release_public_key.json";
pub const RUNTIME_BUNDLE_FILE: &str = "runtime_bundle.json";
pub const EVIDENCE_FILE: &str = "evidence.json";

pub const SCHEMA_RELEASE_MANIFEST: &str = "weftend.releaseManifest/0";
pub const SCHEMA_RELEASE_PUBLIC_KEY: &str = "weftend.releasePublicKey/0";
pub const SCHEMA_RUNTIME_BUNDLE: &str = "weftend.runtimeBundle/0";

pub const SIG_ALGO_ED25519: &str = "sig.ed25519.v0";
pub const SIG_ALGO_P256: &str = "sig.p256.v0";

const OPTIONAL_ARTIFACTS: &[&str] = &["policy.json", "tartarus", "receipts", "artifacts"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseManifest {
    schema: String,
    #[allow(dead_code)]
    schema_version: i64,
    plan_digest: String,
    policy_digest: String,
    evidence_journal_head: String,
    signature: ReleaseSignature,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseSignature {
    algo: String,
    #[allow(dead_code)]
    sig: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleasePublicKey {
    schema: String,
    #[allow(dead_code)]
    schema_version: i64,
    #[allow(dead_code)]
    algo: String,
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RuntimeBundle {
    schema: String,
    #[allow(dead_code)]
    schema_version: i64,
    plan: PlanBinding,
    trust: TrustBinding,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlanBinding {
    plan_hash: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrustBinding {
    policy_id: String,
}

/// Result of an inspection: the report document plus the overall flag
/// the CLI maps to an exit code.
pub struct InspectOutcome {
    pub ok: bool,
    pub report: Value,
}

/// Inspect a release directory. Fails only when the directory itself is
/// unreadable; every verification finding lands in the report.
pub fn inspect_release(dir: &Path, portal: bool) -> PipelineResult<InspectOutcome> {
    if !dir.is_dir() {
        return Err(PipelineError::fail_closed(
            codes::RELEASE_MANIFEST_MISSING,
            "release directory is missing or not a directory",
        ));
    }

    let mut findings: Vec<String> = Vec::new();
    let mut files: Vec<Value> = Vec::new();

    let manifest_value = read_json(dir, RELEASE_MANIFEST_FILE);
    let key_value = read_json(dir, RELEASE_PUBLIC_KEY_FILE);
    let bundle_value = read_json(dir, RUNTIME_BUNDLE_FILE);
    let evidence_value = read_json(dir, EVIDENCE_FILE);

    for (name, value, missing_code) in [
        (
            RELEASE_MANIFEST_FILE,
            &manifest_value,
            codes::RELEASE_MANIFEST_MISSING,
        ),
        (
            RELEASE_PUBLIC_KEY_FILE,
            &key_value,
            codes::RELEASE_PUBLIC_KEY_MISSING,
        ),
        (
            RUNTIME_BUNDLE_FILE,
            &bundle_value,
            codes::RELEASE_RUNTIME_BUNDLE_MISSING,
        ),
        (EVIDENCE_FILE, &evidence_value, codes::RELEASE_EVIDENCE_MISSING),
    ] {
        let present = value.is_some();
        if !present {
            findings.push(missing_code.to_string());
        }
        files.push(json!({"name": name, "present": present, "optional": false}));
    }
    for name in OPTIONAL_ARTIFACTS {
        let present = dir.join(name).exists();
        files.push(json!({"name": name, "present": present, "optional": true}));
    }

    let mut manifest: Option<ReleaseManifest> = None;
    if let Some(v) = &manifest_value {
        match serde_json::from_value::<ReleaseManifest>(v.clone()) {
            Ok(m) if m.schema == SCHEMA_RELEASE_MANIFEST => manifest = Some(m),
            _ => findings.push(codes::RELEASE_MANIFEST_INVALID.to_string()),
        }
    }
    let public_key: Option<ReleasePublicKey> = key_value
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .filter(|k: &ReleasePublicKey| k.schema == SCHEMA_RELEASE_PUBLIC_KEY);
    let bundle: Option<RuntimeBundle> = bundle_value
        .as_ref()
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .filter(|b: &RuntimeBundle| b.schema == SCHEMA_RUNTIME_BUNDLE);

    // Signature over the canonical manifest with the signature value
    // blanked.
    if let (Some(manifest), Some(key), Some(manifest_raw)) =
        (&manifest, &public_key, &manifest_value)
    {
        match signature_payload(manifest_raw) {
            Ok(payload) => {
                match verify_signature(&manifest.signature.algo, &key.key, &sig_of(manifest_raw), &payload)
                {
                    SigCheck::Good => {}
                    SigCheck::Bad => findings.push(codes::RELEASE_SIGNATURE_BAD.to_string()),
                    SigCheck::Unsupported => {
                        findings.push(codes::RELEASE_SIGNATURE_ALGO_UNSUPPORTED.to_string())
                    }
                }
            }
            Err(_) => findings.push(codes::RELEASE_MANIFEST_INVALID.to_string()),
        }
    }

    // Plan / policy bindings.
    if let (Some(manifest), Some(bundle)) = (&manifest, &bundle) {
        if manifest.plan_digest != bundle.plan.plan_hash {
            findings.push(codes::RELEASE_PLANDIGEST_MISMATCH.to_string());
        }
        if manifest.policy_digest != bundle.trust.policy_id {
            findings.push(codes::POLICY_DIGEST_MISMATCH.to_string());
        }
    }

    // Evidence journal head.
    if let (Some(manifest), Some(evidence)) = (&manifest, &evidence_value) {
        match to_canonical_json_bytes(evidence) {
            Ok(bytes) => {
                if compute_artifact_digest_v0(&bytes) != manifest.evidence_journal_head {
                    findings.push(codes::EVIDENCE_HEAD_MISMATCH.to_string());
                }
            }
            Err(_) => findings.push(codes::EVIDENCE_HEAD_MISMATCH.to_string()),
        }
    }

    let reason_codes = stable_sort_unique_v0(findings.iter().map(String::as_str));
    let ok = reason_codes.is_empty();

    let mut report = json!({
        "schema": "weftend.inspectReport/0",
        "schemaVersion": 0,
        "ok": ok,
        "reasonCodes": reason_codes,
        "files": files,
    });

    if portal {
        let weak_build = evidence_value
            .as_ref()
            .and_then(|e| e.get("weftendBuild"))
            .and_then(|b| b.get("algo"))
            .and_then(Value::as_str)
            == Some("fnv1a32");
        let mut portal_codes: Vec<String> = Vec::new();
        if weak_build {
            portal_codes.push(codes::RELEASE_BUILD_DIGEST_WEAK.to_string());
        }
        // Admission is withheld for weak builds: a portal must be able to
        // bind a release to a strong engine digest.
        report["portal"] = json!({
            "admitted": ok && !weak_build,
            "reasonCodes": portal_codes,
        });
    }

    Ok(InspectOutcome { ok, report })
}

fn read_json(dir: &Path, name: &str) -> Option<Value> {
    let text = fs::read_to_string(dir.join(name)).ok()?;
    serde_json::from_str(&text).ok()
}

fn sig_of(manifest_raw: &Value) -> String {
    manifest_raw
        .get("signature")
        .and_then(|s| s.get("sig"))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// The signed payload: canonical manifest bytes with `signature.sig`
/// blanked to the empty string.
fn signature_payload(manifest_raw: &Value) -> Result<Vec<u8>, weftend_io::IoError> {
    let mut blanked = manifest_raw.clone();
    if let Some(sig) = blanked.get_mut("signature").and_then(|s| s.as_object_mut()) {
        sig.insert("sig".to_string(), Value::String(String::new()));
    }
    to_canonical_json_bytes(&blanked)
}

enum SigCheck {
    Good,
    Bad,
    Unsupported,
}

fn verify_signature(algo: &str, key: &str, sig: &str, payload: &[u8]) -> SigCheck {
    // Demo key format for tests: sig = sha256(key bytes ++ payload).
    if let Some(_demo) = key.strip_prefix("pub:") {
        let mut material = Vec::with_capacity(key.len() + payload.len());
        material.extend_from_slice(key.as_bytes());
        material.extend_from_slice(payload);
        return if sha256_hex(&material) == sig {
            SigCheck::Good
        } else {
            SigCheck::Bad
        };
    }
    match algo {
        SIG_ALGO_ED25519 => {
            let Ok(key_bytes) = BASE64.decode(key) else {
                return SigCheck::Bad;
            };
            let Ok(key_arr) = <[u8; 32]>::try_from(key_bytes.as_slice()) else {
                return SigCheck::Bad;
            };
            let Ok(vk) = VerifyingKey::from_bytes(&key_arr) else {
                return SigCheck::Bad;
            };
            let Ok(sig_bytes) = BASE64.decode(sig) else {
                return SigCheck::Bad;
            };
            let Ok(sig_arr) = <[u8; 64]>::try_from(sig_bytes.as_slice()) else {
                return SigCheck::Bad;
            };
            let signature = Signature::from_bytes(&sig_arr);
            if vk.verify_strict(payload, &signature).is_ok() {
                SigCheck::Good
            } else {
                SigCheck::Bad
            }
        }
        SIG_ALGO_P256 => SigCheck::Unsupported,
        _ => SigCheck::Unsupported,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weftend_io::canonical_json::canonical_file_bytes;

    fn write_json(dir: &Path, name: &str, v: &Value) {
        fs::write(dir.join(name), canonical_file_bytes(v).unwrap()).unwrap();
    }

    /// Build a consistent demo-signed release directory.
    fn demo_release(dir: &Path) {
        let evidence = json!({
            "schema": "weftend.evidenceBundle/0",
            "entries": [],
            "weftendBuild": {"algo": "sha256", "digest": weftend_core::ids::ZERO_DIGEST_SENTINEL, "source": "binary"}
        });
        let evidence_head =
            compute_artifact_digest_v0(&to_canonical_json_bytes(&evidence).unwrap());

        let plan_hash = "sha256:1111111111111111111111111111111111111111111111111111111111111111";
        let policy_id = "sha256:2222222222222222222222222222222222222222222222222222222222222222";

        let key = "pub:demo-release-key";
        let mut manifest = json!({
            "schema": SCHEMA_RELEASE_MANIFEST,
            "schemaVersion": 0,
            "planDigest": plan_hash,
            "policyDigest": policy_id,
            "evidenceJournalHead": evidence_head,
            "signature": {"algo": SIG_ALGO_ED25519, "sig": ""}
        });
        let payload = signature_payload(&manifest).unwrap();
        let mut material = key.as_bytes().to_vec();
        material.extend_from_slice(&payload);
        manifest["signature"]["sig"] = json!(sha256_hex(&material));

        write_json(dir, RELEASE_MANIFEST_FILE, &manifest);
        write_json(
            dir,
            RELEASE_PUBLIC_KEY_FILE,
            &json!({
                "schema": SCHEMA_RELEASE_PUBLIC_KEY,
                "schemaVersion": 0,
                "algo": SIG_ALGO_ED25519,
                "key": key
            }),
        );
        write_json(
            dir,
            RUNTIME_BUNDLE_FILE,
            &json!({
                "schema": SCHEMA_RUNTIME_BUNDLE,
                "schemaVersion": 0,
                "plan": {"planHash": plan_hash},
                "trust": {"policyId": policy_id}
            }),
        );
        write_json(dir, EVIDENCE_FILE, &evidence);
    }

    #[test]
    fn good_release_verifies() {
        let dir = tempfile::tempdir().unwrap();
        demo_release(dir.path());
        let outcome = inspect_release(dir.path(), false).unwrap();
        assert!(outcome.ok, "report: {}", outcome.report);
        assert_eq!(outcome.report["reasonCodes"], json!([]));
    }

    #[test]
    fn missing_files_reported() {
        let dir = tempfile::tempdir().unwrap();
        let outcome = inspect_release(dir.path(), false).unwrap();
        assert!(!outcome.ok);
        let codes_val = outcome.report["reasonCodes"].as_array().unwrap();
        assert!(codes_val.contains(&json!(codes::RELEASE_MANIFEST_MISSING)));
        assert!(codes_val.contains(&json!(codes::RELEASE_EVIDENCE_MISSING)));
    }

    #[test]
    fn tampered_manifest_breaks_signature() {
        let dir = tempfile::tempdir().unwrap();
        demo_release(dir.path());
        // Flip the plan digest after signing.
        let manifest_path = dir.path().join(RELEASE_MANIFEST_FILE);
        let mut manifest: Value =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest["planDigest"] =
            json!("sha256:9999999999999999999999999999999999999999999999999999999999999999");
        write_json(dir.path(), RELEASE_MANIFEST_FILE, &manifest);

        let outcome = inspect_release(dir.path(), false).unwrap();
        assert!(!outcome.ok);
        let codes_val = outcome.report["reasonCodes"].as_array().unwrap();
        assert!(codes_val.contains(&json!(codes::RELEASE_SIGNATURE_BAD)));
        assert!(codes_val.contains(&json!(codes::RELEASE_PLANDIGEST_MISMATCH)));
    }

    #[test]
    fn evidence_tamper_breaks_head() {
        let dir = tempfile::tempdir().unwrap();
        demo_release(dir.path());
        write_json(
            dir.path(),
            EVIDENCE_FILE,
            &json!({"schema": "weftend.evidenceBundle/0", "entries": [1]}),
        );
        let outcome = inspect_release(dir.path(), false).unwrap();
        assert!(!outcome.ok);
        assert!(outcome.report["reasonCodes"]
            .as_array()
            .unwrap()
            .contains(&json!(codes::EVIDENCE_HEAD_MISMATCH)));
    }

    #[test]
    fn p256_reported_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        demo_release(dir.path());
        // Re-key to a non-demo key with the p256 algorithm.
        let manifest_path = dir.path().join(RELEASE_MANIFEST_FILE);
        let mut manifest: Value =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest["signature"]["algo"] = json!(SIG_ALGO_P256);
        write_json(dir.path(), RELEASE_MANIFEST_FILE, &manifest);
        write_json(
            dir.path(),
            RELEASE_PUBLIC_KEY_FILE,
            &json!({
                "schema": SCHEMA_RELEASE_PUBLIC_KEY,
                "schemaVersion": 0,
                "algo": SIG_ALGO_P256,
                "key": "AAAA"
            }),
        );
        let outcome = inspect_release(dir.path(), false).unwrap();
        assert!(!outcome.ok);
        assert!(outcome.report["reasonCodes"]
            .as_array()
            .unwrap()
            .contains(&json!(codes::RELEASE_SIGNATURE_ALGO_UNSUPPORTED)));
    }

    #[test]
    fn portal_withholds_weak_builds() {
        let dir = tempfile::tempdir().unwrap();
        demo_release(dir.path());
        // Swap the evidence build to the fnv fallback and re-head + re-sign.
        let evidence = json!({
            "schema": "weftend.evidenceBundle/0",
            "entries": [],
            "weftendBuild": {"algo": "fnv1a32", "digest": "fnv1a32:00c0ffee", "source": "fallback"}
        });
        let head = compute_artifact_digest_v0(&to_canonical_json_bytes(&evidence).unwrap());
        write_json(dir.path(), EVIDENCE_FILE, &evidence);

        let manifest_path = dir.path().join(RELEASE_MANIFEST_FILE);
        let mut manifest: Value =
            serde_json::from_str(&fs::read_to_string(&manifest_path).unwrap()).unwrap();
        manifest["evidenceJournalHead"] = json!(head);
        manifest["signature"]["sig"] = json!("");
        let payload = signature_payload(&manifest).unwrap();
        let key = "pub:demo-release-key";
        let mut material = key.as_bytes().to_vec();
        material.extend_from_slice(&payload);
        manifest["signature"]["sig"] = json!(sha256_hex(&material));
        write_json(dir.path(), RELEASE_MANIFEST_FILE, &manifest);

        let outcome = inspect_release(dir.path(), true).unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.report["portal"]["admitted"], json!(false));
        assert!(outcome.report["portal"]["reasonCodes"]
            .as_array()
            .unwrap()
            .contains(&json!(codes::RELEASE_BUILD_DIGEST_WEAK)));
    }
}
