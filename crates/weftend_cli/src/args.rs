// crates/weftend_cli/src/args.rs
//
// Deterministic, offline CLI argument surface. Parsing stays mechanical;
// every semantic check (profile/mode/format domains, out-path safety)
// happens in main so failures carry stable reason codes.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "weftend", version, about = "Offline, fail-closed artifact triage")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Classify an input and mint the observation package.
    Examine {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "generic")]
        profile: String,
        /// Operator-declared entry script, recorded as an entry hint.
        #[arg(long)]
        script: Option<String>,
        /// Also stage the raw examiner capture.
        #[arg(long)]
        emit_capture: bool,
    },

    /// Examine + decide under a policy; stage the intake artifact set.
    Intake {
        input: PathBuf,
        #[arg(long)]
        policy: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "generic")]
        profile: String,
        #[arg(long)]
        script: Option<String>,
    },

    /// Full run record: mint, decision, mode, and the intake set.
    Run {
        input: PathBuf,
        #[arg(long)]
        policy: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long, default_value = "generic")]
        profile: String,
        #[arg(long, default_value = "strict")]
        mode: String,
        #[arg(long)]
        script: Option<String>,
    },

    /// Intake + optional sandboxed execution.
    SafeRun {
        input: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        policy: Option<PathBuf>,
        #[arg(long, default_value = "generic")]
        profile: String,
        #[arg(long)]
        execute: bool,
        #[arg(long)]
        withhold_exec: bool,
    },

    /// Diff two evidence roots into a compare receipt + report.
    Compare {
        left: PathBuf,
        right: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },

    /// Verify a release directory; JSON report on stdout.
    Inspect {
        dir: PathBuf,
        #[arg(long)]
        portal: bool,
    },

    /// Adapter registry operations.
    Adapter {
        #[command(subcommand)]
        cmd: AdapterCmd,
    },

    /// Container operations.
    Container {
        #[command(subcommand)]
        cmd: ContainerCmd,
    },

    /// Copy an evidence root into a shareable ticket pack.
    TicketPack {
        root: PathBuf,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        zip: bool,
    },

    /// Human summary of an evidence root on stdout.
    Summarize { root: PathBuf },

    /// Export the normalized summary of an evidence root.
    ExportJson {
        root: PathBuf,
        #[arg(long, default_value = "normalized-v0")]
        format: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum AdapterCmd {
    /// List adapters and their availability.
    List {
        #[arg(long)]
        text: bool,
        #[arg(long)]
        include_missing_plugins: bool,
    },
    /// Merge maintenance-policy state with plugin availability.
    Doctor {
        #[arg(long)]
        text: bool,
        #[arg(long)]
        strict: bool,
        /// Write the effective maintenance policy to this path.
        #[arg(long)]
        write_policy: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ContainerCmd {
    /// Triage an immutable container image reference.
    Scan {
        reference: String,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        policy: Option<PathBuf>,
        #[arg(long, default_value = "generic")]
        profile: String,
    },
}
