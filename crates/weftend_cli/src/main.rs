// crates/weftend_cli/src/main.rs
//
// WEFTEND v0 — CLI entrypoint
// Drives the fixed pipeline end-to-end, writes canonical evidence roots,
// and maps every outcome onto the stable exit-code contract:
//   0 APPROVE, 10 QUEUE, 20 REJECT, 30 HOLD, 40 fail-closed, 1 unexpected.
// Strictly offline & deterministic: no network, no clock in any receipt.

mod args;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Value};

use args::{AdapterCmd, Cli, Command, ContainerCmd};
use weftend_core::codes::{self, exit_code_for, ExitDisposition, OutOp};
use weftend_core::entities::{Policy, Profile, RunMode, WeftendBuild};
use weftend_io::build::compute_build_identity;
use weftend_io::canonical_json::{to_canonical_json_bytes, write_bytes_atomically};
use weftend_io::loader::load_evidence_root;
use weftend_io::privacy::walk_sorted;
use weftend_io::validate::validate_policy;
use weftend_io::writer::{paths_overlap, EvidenceWriter};
use weftend_pipeline::examine::{ExamineInput, FsExaminer, NoDaemonStore};
use weftend_pipeline::inspect::inspect_release;
use weftend_pipeline::intake::{run_pipeline, NoHost, PipelineCtx, RunOp, RunRequest};
use weftend_pipeline::{compare, PipelineError};
use weftend_report::SummaryInputs;
use weftend_trust::adapter::{
    AdapterRegistry, MaintenancePolicy, PluginProbe, BUILTIN_ADAPTERS,
};

/// Environment is read exactly once at startup; none of it is embedded in
/// any receipt.
struct EnvSnapshot {
    adapter_disable: Option<String>,
    adapter_disable_file: Option<PathBuf>,
    docker_host: Option<String>,
}

impl EnvSnapshot {
    fn capture() -> Self {
        EnvSnapshot {
            adapter_disable: std::env::var("WEFTEND_ADAPTER_DISABLE").ok(),
            adapter_disable_file: std::env::var_os("WEFTEND_ADAPTER_DISABLE_FILE")
                .map(PathBuf::from),
            docker_host: std::env::var("DOCKER_HOST").ok(),
        }
    }

    fn maintenance_policy(&self) -> MaintenancePolicy {
        if let Some(path) = &self.adapter_disable_file {
            let bytes = fs::read(path).unwrap_or_default();
            return MaintenancePolicy::from_policy_file_bytes(&bytes);
        }
        if let Some(tokens) = &self.adapter_disable {
            return MaintenancePolicy::from_env_token_list(tokens);
        }
        MaintenancePolicy::enabled_default()
    }
}

/// Host plugin probe: built-in plugins are always present; the container
/// daemon needs a local socket or an explicit context.
struct EnvProbe {
    docker_host: Option<String>,
}

impl PluginProbe for EnvProbe {
    fn is_available(&self, plugin: &str) -> bool {
        match plugin {
            "docker-daemon" => {
                self.docker_host.is_some() || Path::new("/var/run/docker.sock").exists()
            }
            _ => true,
        }
    }
}

/// A surfaced failure: `[CODE] message` on the first stderr line, then the
/// mapped exit code.
#[derive(Debug)]
struct Failure {
    code: &'static str,
    message: String,
    exit: u8,
}

fn fail_closed(code: &'static str, message: impl Into<String>) -> Failure {
    Failure {
        code,
        message: message.into(),
        exit: exit_code_for(ExitDisposition::FailClosed),
    }
}

impl From<PipelineError> for Failure {
    fn from(e: PipelineError) -> Self {
        if e.is_fail_closed() {
            Failure {
                code: e.reason_code(),
                message: e.to_string(),
                exit: exit_code_for(ExitDisposition::FailClosed),
            }
        } else {
            Failure {
                code: codes::INTERNAL_ERROR,
                message: e.to_string(),
                exit: exit_code_for(ExitDisposition::Unexpected),
            }
        }
    }
}

impl From<weftend_io::IoError> for Failure {
    fn from(e: weftend_io::IoError) -> Self {
        Failure::from(PipelineError::from(e))
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let env = EnvSnapshot::capture();
    let build = compute_build_identity();

    match dispatch(cli.command, &env, &build) {
        Ok(code) => ExitCode::from(code),
        Err(f) => {
            eprintln!("[{}] {}", f.code, f.message);
            ExitCode::from(f.exit)
        }
    }
}

fn dispatch(command: Command, env: &EnvSnapshot, build: &WeftendBuild) -> Result<u8, Failure> {
    match command {
        Command::Examine {
            input,
            out,
            profile,
            script,
            emit_capture,
        } => {
            let mut req = RunRequest::new(RunOp::Examine, ExamineInput::Path(input));
            req.profile = parse_profile(&profile)?;
            req.declared_script = script;
            req.emit_capture = emit_capture;
            drive(req, &out, env, build)
        }

        Command::Intake {
            input,
            policy,
            out,
            profile,
            script,
        } => {
            let policy = load_policy(&policy)?;
            let mut req = RunRequest::new(RunOp::Intake, ExamineInput::Path(input));
            req.policy = Some(&policy);
            req.profile = parse_profile(&profile)?;
            req.declared_script = script;
            drive(req, &out, env, build)
        }

        Command::Run {
            input,
            policy,
            out,
            profile,
            mode,
            script,
        } => {
            let policy = load_policy(&policy)?;
            let mut req = RunRequest::new(RunOp::Run, ExamineInput::Path(input));
            req.policy = Some(&policy);
            req.profile = parse_profile(&profile)?;
            req.mode = parse_mode(&mode)?;
            req.declared_script = script;
            drive(req, &out, env, build)
        }

        Command::SafeRun {
            input,
            out,
            policy,
            profile,
            execute,
            withhold_exec,
        } => {
            let policy = policy.map(|p| load_policy(&p)).transpose()?;
            let mut req = RunRequest::new(RunOp::SafeRun, ExamineInput::Path(input));
            req.policy = policy.as_ref();
            req.profile = parse_profile(&profile)?;
            req.execute = execute;
            req.withhold_exec = withhold_exec;
            drive(req, &out, env, build)
        }

        Command::Compare { left, right, out } => {
            let outcome = compare::compare_roots(&left, &right, &out, build)?;
            println!(
                "weftend: compare — verdict={} buckets={}",
                outcome.receipt.verdict.as_str(),
                if outcome.receipt.buckets.is_empty() {
                    "(none)".to_string()
                } else {
                    outcome.receipt.buckets.join(",")
                }
            );
            println!("weftend: evidence written to {}", out.display());
            Ok(0)
        }

        Command::Inspect { dir, portal } => {
            let outcome = inspect_release(&dir, portal)?;
            print_canonical(&outcome.report)?;
            Ok(if outcome.ok {
                0
            } else {
                exit_code_for(ExitDisposition::FailClosed)
            })
        }

        Command::Adapter { cmd } => adapter_cmd(cmd, env),

        Command::Container { cmd } => match cmd {
            ContainerCmd::Scan {
                reference,
                out,
                policy,
                profile,
            } => {
                // Selection is fail-closed before any evidence is staged.
                let registry =
                    AdapterRegistry::new(env.maintenance_policy(), &env_probe(env));
                registry
                    .select("container")
                    .map_err(|e| fail_closed(e.code, format!("adapter {}", e.adapter)))?;

                let policy = policy.map(|p| load_policy(&p)).transpose()?;
                let mut req =
                    RunRequest::new(RunOp::SafeRun, ExamineInput::ContainerRef(reference));
                req.policy = policy.as_ref();
                req.profile = parse_profile(&profile)?;
                drive(req, &out, env, build)
            }
        },

        Command::TicketPack { root, out, zip } => ticket_pack(&root, &out, zip, build),

        Command::Summarize { root } => {
            let loaded = load_evidence_root(&root)
                .map_err(|_| fail_closed(codes::INPUT_MISSING, "evidence root not found"))?;
            let inputs = SummaryInputs {
                operator: loaded.operator(),
                safe_run: loaded.safe_run(),
                run: loaded.run(),
            };
            print!("{}", weftend_report::summarize_text(&inputs));
            Ok(0)
        }

        Command::ExportJson { root, format, out } => export_json(&root, &format, out.as_deref()),
    }
}

/// Shared runner for examine/intake/run/safe-run/container-scan.
fn drive(
    req: RunRequest<'_>,
    out: &Path,
    env: &EnvSnapshot,
    build: &WeftendBuild,
) -> Result<u8, Failure> {
    let examiner = FsExaminer::new(Box::new(NoDaemonStore), env.docker_host.clone());
    let ctx = PipelineCtx {
        build,
        examiner: &examiner,
        host: &NoHost,
    };
    let outcome = run_pipeline(&req, out, &ctx)?;
    println!(
        "weftend: completed — action={} verdict={}",
        outcome.decision.action.as_str(),
        outcome.decision.verdict.as_str()
    );
    println!("weftend: evidence written to {}", out.display());

    if outcome.disposition == ExitDisposition::FailClosed {
        // Evidence is committed, but the invocation itself fails closed
        // (e.g. a mutable container reference).
        let code = outcome
            .decision
            .reason_codes
            .first()
            .map(String::as_str)
            .unwrap_or(codes::INPUT_INVALID);
        eprintln!("[{code}] input refused; denial recorded as evidence");
    }
    Ok(exit_code_for(outcome.disposition))
}

fn env_probe(env: &EnvSnapshot) -> EnvProbe {
    EnvProbe {
        docker_host: env.docker_host.clone(),
    }
}

fn adapter_cmd(cmd: AdapterCmd, env: &EnvSnapshot) -> Result<u8, Failure> {
    let registry = AdapterRegistry::new(env.maintenance_policy(), &env_probe(env));
    match cmd {
        AdapterCmd::List {
            text,
            include_missing_plugins,
        } => {
            let report = registry.doctor(false);
            let rows: Vec<_> = report
                .adapters
                .iter()
                .filter(|r| include_missing_plugins || r.missing_plugins.is_empty())
                .collect();
            if text {
                for row in &rows {
                    println!("{:<10} {:<10} {}", row.name, row.class, row.status);
                }
            } else {
                let spec_plugins: Vec<Value> = rows
                    .iter()
                    .map(|r| {
                        let required: Vec<&str> = BUILTIN_ADAPTERS
                            .iter()
                            .find(|a| a.name == r.name)
                            .map(|a| a.plugins_required.to_vec())
                            .unwrap_or_default();
                        json!({
                            "name": r.name,
                            "class": r.class,
                            "pluginsRequired": required,
                            "disabled": r.disabled,
                            "missingPlugins": r.missing_plugins,
                            "status": r.status,
                        })
                    })
                    .collect();
                print_canonical(&json!({
                    "schema": "weftend.adapterList/0",
                    "schemaVersion": 0,
                    "adapters": spec_plugins,
                    "policyInvalid": report.policy_invalid,
                    "unknownTokens": report.unknown_tokens,
                }))?;
            }
            Ok(0)
        }

        AdapterCmd::Doctor {
            text,
            strict,
            write_policy,
        } => {
            let report = registry.doctor(strict);
            if let Some(path) = write_policy {
                let file = registry.policy().to_file();
                let value = serde_json::to_value(&file)
                    .map_err(|e| fail_closed(codes::INTERNAL_ERROR, e.to_string()))?;
                let mut bytes = to_canonical_json_bytes(&value)?;
                bytes.push(b'\n');
                write_bytes_atomically(&path, &bytes)
                    .map_err(|e| fail_closed(codes::ADAPTER_POLICY_FILE_INVALID, e.to_string()))?;
            }
            if text {
                for row in &report.adapters {
                    println!(
                        "{:<10} {:<10} {:<15} missing={}",
                        row.name,
                        row.class,
                        row.status,
                        if row.missing_plugins.is_empty() {
                            "(none)".to_string()
                        } else {
                            row.missing_plugins.join(",")
                        }
                    );
                }
                for code in &report.strict_failures {
                    println!("strict-failure: {code}");
                }
            } else {
                print_canonical(&serde_json::to_value(&report).map_err(|e| {
                    fail_closed(codes::INTERNAL_ERROR, e.to_string())
                })?)?;
            }
            if report.strict_failed() {
                eprintln!("[{}] adapter doctor strict failure", report.strict_failures[0]);
                Ok(exit_code_for(ExitDisposition::FailClosed))
            } else {
                Ok(0)
            }
        }
    }
}

fn ticket_pack(root: &Path, out: &Path, zip: bool, build: &WeftendBuild) -> Result<u8, Failure> {
    if zip {
        return Err(fail_closed(
            codes::FORMAT_UNSUPPORTED,
            "zip packing is not supported; use the directory form",
        ));
    }
    if !root.is_dir() {
        return Err(fail_closed(codes::INPUT_MISSING, "evidence root not found"));
    }
    if paths_overlap(out, root) {
        return Err(fail_closed(
            OutOp::TicketPack.out_path_not_directory(),
            "ticket pack output overlaps the source root",
        ));
    }

    let mut writer = EvidenceWriter::begin(out, OutOp::TicketPack)?;
    for rel in walk_sorted(root)? {
        let bytes = fs::read(root.join(rel.as_std_path()))
            .map_err(|_| fail_closed(codes::INPUT_UNREADABLE, format!("cannot read {rel}")))?;
        writer.stage_raw(&format!("ticket_pack/{rel}"), &bytes, "packed")?;
    }
    writer.validate_all()?;
    writer.finalize(build)?;
    println!("weftend: ticket pack written to {}", out.display());
    Ok(0)
}

fn export_json(root: &Path, format: &str, out: Option<&Path>) -> Result<u8, Failure> {
    if format != "normalized-v0" {
        return Err(fail_closed(
            codes::FORMAT_UNSUPPORTED,
            format!("unknown export format: {format}"),
        ));
    }
    let loaded = load_evidence_root(root)
        .map_err(|_| fail_closed(codes::INPUT_MISSING, "evidence root not found"))?;
    let inputs = SummaryInputs {
        operator: loaded.operator(),
        safe_run: loaded.safe_run(),
        run: loaded.run(),
    };
    let doc = weftend_report::normalized_summary(&inputs);

    match out {
        None => {
            print_canonical(&doc)?;
            Ok(0)
        }
        Some(out) => {
            if out.is_dir() {
                return Err(fail_closed(
                    OutOp::ExportJson.out_path_is_directory(),
                    "export target is a directory",
                ));
            }
            if let Some(parent) = out.parent() {
                if !parent.as_os_str().is_empty() && !parent.is_dir() {
                    return Err(fail_closed(
                        OutOp::ExportJson.out_path_parent_not_directory(),
                        "export target parent is not a directory",
                    ));
                }
            }
            // The export must never clobber a source evidence file.
            for rel in loaded.file_paths() {
                if paths_overlap(out, &root.join(rel.as_std_path())) {
                    return Err(fail_closed(
                        codes::EXPORT_JSON_OUT_CONFLICTS_SOURCE,
                        "export target is a source evidence file",
                    ));
                }
            }
            let mut bytes = to_canonical_json_bytes(&doc)?;
            bytes.push(b'\n');
            write_bytes_atomically(out, &bytes)
                .map_err(|e| fail_closed(codes::INPUT_UNREADABLE, e.to_string()))?;
            println!("weftend: summary written to {}", out.display());
            Ok(0)
        }
    }
}

fn load_policy(path: &Path) -> Result<Policy, Failure> {
    let text = fs::read_to_string(path)
        .map_err(|_| fail_closed(codes::POLICY_INVALID, "cannot read policy file"))?;
    let value: Value = serde_json::from_str(&text)
        .map_err(|_| fail_closed(codes::POLICY_INVALID, "policy is not valid JSON"))?;
    let issues = validate_policy(&value);
    if let Some(first) = issues.first() {
        return Err(fail_closed(first.code, "policy failed validation"));
    }
    serde_json::from_value(value)
        .map_err(|_| fail_closed(codes::POLICY_INVALID, "policy shape mismatch"))
}

fn parse_profile(s: &str) -> Result<Profile, Failure> {
    match s {
        "web" => Ok(Profile::Web),
        "mod" => Ok(Profile::Mod),
        "generic" => Ok(Profile::Generic),
        other => Err(fail_closed(
            codes::PROFILE_UNSUPPORTED,
            format!("unknown profile: {other}"),
        )),
    }
}

fn parse_mode(s: &str) -> Result<RunMode, Failure> {
    match s {
        "strict" => Ok(RunMode::Strict),
        "compatible" => Ok(RunMode::Compatible),
        "legacy" => Ok(RunMode::Legacy),
        other => Err(fail_closed(
            codes::MODE_UNSUPPORTED,
            format!("unknown mode: {other}"),
        )),
    }
}

/// Canonical JSON + newline to stdout; every machine-readable output goes
/// through the same serializer as the receipts.
fn print_canonical(value: &Value) -> Result<(), Failure> {
    let bytes = to_canonical_json_bytes(value)?;
    let text = String::from_utf8(bytes)
        .map_err(|e| fail_closed(codes::INTERNAL_ERROR, e.to_string()))?;
    println!("{text}");
    Ok(())
}
