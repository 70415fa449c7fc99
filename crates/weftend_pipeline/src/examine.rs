//! Examiner: classify an input artifact and mint the normalized
//! observation package.
//!
//! The core only requires determinism from an examiner: the same input
//! bytes under the same build yield the same mint. The built-in
//! `FsExaminer` stays header-only — it never extracts archives or renders
//! content; it classifies, counts, bounds, and scans for URL-like strings.

use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use weftend_core::clamp_bounded;
use weftend_core::codes;
use weftend_core::entities::{ArtifactKind, MintPackage, Profile, TargetKind};
use weftend_core::ids::DigestStr;
use weftend_core::order::stable_sort_unique_v0;
use weftend_io::digest::{compute_artifact_digest_v0, sha256_file};
use weftend_io::privacy::walk_sorted;

/// Caps keeping the walk and the URL scan bounded. A hit sets the
/// matching boundedness marker in the mint.
const MAX_SCANNED_FILES: usize = 4096;
const MAX_URL_SCAN_BYTES: u64 = 1024 * 1024;

pub const MARKER_FILE_SCAN_TRUNCATED: &str = "FILE_SCAN_TRUNCATED";
pub const MARKER_URL_SCAN_BOUNDED: &str = "URL_SCAN_BOUNDED";
pub const MARKER_BYTES_CLAMPED: &str = "BYTES_CLAMPED";

/// An input to triage: a resolved filesystem path or an immutable
/// container image reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExamineInput {
    Path(PathBuf),
    ContainerRef(String),
}

/// Explicit deadline handed to collaborators; on timeout they return a
/// reason code, never a partial receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    pub millis: i64,
}

impl Deadline {
    pub const DEFAULT: Deadline = Deadline { millis: 30_000 };
}

/// Successful examination.
#[derive(Debug, Clone)]
pub struct Examined {
    pub mint: MintPackage,
    pub adapter_class: String,
}

/// Structured examiner failure.
#[derive(Debug, Clone)]
pub struct ExamineFailure {
    pub code: &'static str,
    pub message: String,
    /// Digest of the input when it could still be read (e.g. a ZIP whose
    /// directory is missing); the receipt records it even on failure.
    pub input_digest: Option<DigestStr>,
}

impl ExamineFailure {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        ExamineFailure {
            code,
            message: message.into(),
            input_digest: None,
        }
    }
}

pub trait Examiner {
    fn examine(
        &self,
        input: &ExamineInput,
        profile: Profile,
        deadline: Deadline,
    ) -> Result<Examined, ExamineFailure>;
}

/// Local-image presence probe for container references.
pub trait ContainerStore {
    /// Ok(true) when the image is present locally; Err carries the
    /// reason code (`DOCKER_DAEMON_UNAVAILABLE`).
    fn is_local(&self, reference: &str) -> Result<bool, &'static str>;
}

/// Default store on hosts without a container daemon.
pub struct NoDaemonStore;

impl ContainerStore for NoDaemonStore {
    fn is_local(&self, _reference: &str) -> Result<bool, &'static str> {
        Err(codes::DOCKER_DAEMON_UNAVAILABLE)
    }
}

/// Fixed-answer store for tests.
pub struct StaticContainerStore(pub bool);

impl ContainerStore for StaticContainerStore {
    fn is_local(&self, _reference: &str) -> Result<bool, &'static str> {
        Ok(self.0)
    }
}

// ---------------------------------------------------------------------------
// File classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileClass {
    Text,
    Html,
    Script,
    Native,
    Archive,
    Email,
    Other,
}

impl FileClass {
    fn kind(self) -> ArtifactKind {
        match self {
            FileClass::Text => ArtifactKind::Text,
            FileClass::Html => ArtifactKind::Html,
            FileClass::Script => ArtifactKind::Script,
            FileClass::Native => ArtifactKind::Native,
            FileClass::Archive => ArtifactKind::Archive,
            FileClass::Email => ArtifactKind::Email,
            FileClass::Other => ArtifactKind::Other,
        }
    }
}

fn classify_name(name: &str) -> FileClass {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html") | Some("htm") | Some("xhtml") => FileClass::Html,
        Some("js") | Some("mjs") | Some("ts") | Some("py") | Some("sh") | Some("ps1")
        | Some("bat") | Some("cmd") => FileClass::Script,
        Some("exe") | Some("dll") | Some("so") | Some("dylib") => FileClass::Native,
        Some("zip") | Some("jar") | Some("tar") | Some("gz") | Some("tgz") | Some("7z")
        | Some("xz") | Some("zst") => FileClass::Archive,
        Some("eml") | Some("msg") => FileClass::Email,
        Some("txt") | Some("md") | Some("json") | Some("xml") | Some("css") | Some("csv")
        | Some("yaml") | Some("yml") | Some("toml") => FileClass::Text,
        _ => FileClass::Other,
    }
}

/// Magic sniff on the first bytes; extension wins only when the magic is
/// inconclusive.
fn sniff(head: &[u8], by_name: FileClass) -> FileClass {
    if head.starts_with(b"\x7fELF") || head.starts_with(b"MZ") {
        return FileClass::Native;
    }
    // Mach-O, both endiannesses, thin and fat.
    if head.len() >= 4 {
        let magic = u32::from_be_bytes([head[0], head[1], head[2], head[3]]);
        if matches!(
            magic,
            0xfeedface | 0xfeedfacf | 0xcefaedfe | 0xcffaedfe | 0xcafebabe
        ) {
            return FileClass::Native;
        }
    }
    if head.starts_with(b"PK\x03\x04") {
        return FileClass::Archive;
    }
    by_name
}

fn is_texty(class: FileClass) -> bool {
    matches!(class, FileClass::Text | FileClass::Html | FileClass::Script)
}

// ---------------------------------------------------------------------------
// URL extraction
// ---------------------------------------------------------------------------

/// Extract URL-like tokens (`scheme://rest`) from text. Returns every
/// occurrence in document order; callers normalize.
pub fn extract_url_like(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while let Some(pos) = text[i..].find("://") {
        let sep = i + pos;
        // Walk back over the scheme: [a-zA-Z][a-zA-Z0-9+.-]*
        let mut start = sep;
        while start > 0 {
            let b = bytes[start - 1];
            if b.is_ascii_alphanumeric() || b == b'+' || b == b'.' || b == b'-' {
                start -= 1;
            } else {
                break;
            }
        }
        let scheme_ok = start < sep && bytes[start].is_ascii_alphabetic();
        // Walk forward to a delimiter.
        let mut end = sep + 3;
        while end < bytes.len() {
            let b = bytes[end];
            if b.is_ascii_whitespace()
                || matches!(b, b'"' | b'\'' | b'<' | b'>' | b'(' | b')' | b'[' | b']' | b'`')
            {
                break;
            }
            end += 1;
        }
        if scheme_ok && end > sep + 3 {
            out.push(text[start..end].trim_end_matches(&[',', ';', '.'][..]).to_string());
        }
        i = sep + 3;
    }
    out
}

/// Lowercased host portion of a URL-like string, with userinfo and port
/// stripped. `None` when no host is present.
pub fn url_domain(url: &str) -> Option<String> {
    let rest = url.split_once("://")?.1;
    let authority = rest
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
    let host = host.split(':').next().unwrap_or_default();
    if host.is_empty() {
        None
    } else {
        Some(host.to_ascii_lowercase())
    }
}

// ---------------------------------------------------------------------------
// Container references
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerRef {
    /// `<registry>/<repo>@sha256:<64hex>` — pinned by digest.
    Immutable { name: String, digest_hex: String },
    /// `name[:tag]` — mutable, refused on the evidence path.
    Tagged,
    Malformed,
}

pub fn parse_container_ref(s: &str) -> ContainerRef {
    if let Some((name, digest)) = s.split_once('@') {
        let Some(hex) = digest.strip_prefix("sha256:") else {
            return ContainerRef::Malformed;
        };
        let hex_ok = hex.len() == 64
            && hex.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'));
        let name_ok = !name.is_empty()
            && name
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-' | b'/' | b':'));
        if hex_ok && name_ok {
            ContainerRef::Immutable {
                name: name.to_string(),
                digest_hex: hex.to_string(),
            }
        } else {
            ContainerRef::Malformed
        }
    } else if !s.is_empty()
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-' | b'/' | b':'))
    {
        ContainerRef::Tagged
    } else {
        ContainerRef::Malformed
    }
}

// ---------------------------------------------------------------------------
// FsExaminer
// ---------------------------------------------------------------------------

/// Built-in examiner over the local filesystem and local container store.
pub struct FsExaminer {
    store: Box<dyn ContainerStore>,
    /// Snapshot of `DOCKER_HOST` taken once at startup; a remote context
    /// refuses container work outright.
    docker_host: Option<String>,
}

impl FsExaminer {
    pub fn new(store: Box<dyn ContainerStore>, docker_host: Option<String>) -> Self {
        FsExaminer { store, docker_host }
    }

    pub fn local_default() -> Self {
        FsExaminer::new(Box::new(NoDaemonStore), None)
    }
}

impl Examiner for FsExaminer {
    fn examine(
        &self,
        input: &ExamineInput,
        profile: Profile,
        _deadline: Deadline,
    ) -> Result<Examined, ExamineFailure> {
        match input {
            ExamineInput::ContainerRef(reference) => self.examine_container(reference),
            ExamineInput::Path(path) => examine_path(path, profile),
        }
    }
}

impl FsExaminer {
    fn examine_container(&self, reference: &str) -> Result<Examined, ExamineFailure> {
        let ref_digest = DigestStr::from_sha256_hex(&weftend_io::digest::sha256_hex(
            reference.as_bytes(),
        ))
        .ok();

        if let Some(host) = &self.docker_host {
            if host.starts_with("tcp://") || host.starts_with("ssh://") {
                return Err(ExamineFailure::new(
                    codes::DOCKER_REMOTE_CONTEXT_UNSUPPORTED,
                    "container scanning requires a local daemon context",
                ));
            }
        }

        match parse_container_ref(reference) {
            ContainerRef::Tagged => Err(ExamineFailure {
                code: codes::DOCKER_IMAGE_REF_NOT_IMMUTABLE,
                message: "image reference must be pinned by digest".to_string(),
                input_digest: ref_digest,
            }),
            ContainerRef::Malformed => Err(ExamineFailure {
                code: codes::INPUT_INVALID,
                message: "unparseable container reference".to_string(),
                input_digest: ref_digest,
            }),
            ContainerRef::Immutable { .. } => match self.store.is_local(reference) {
                Err(code) => Err(ExamineFailure {
                    code,
                    message: "container store unavailable".to_string(),
                    input_digest: ref_digest,
                }),
                Ok(false) => Err(ExamineFailure {
                    code: codes::DOCKER_IMAGE_NOT_LOCAL,
                    message: "image is not present locally".to_string(),
                    input_digest: ref_digest,
                }),
                Ok(true) => {
                    let digest = compute_artifact_digest_v0(reference.as_bytes());
                    let mint = MintPackage::empty(
                        ArtifactKind::Container,
                        TargetKind::Container,
                        digest.parse().map_err(|_| {
                            ExamineFailure::new(codes::INPUT_INVALID, "digest shape")
                        })?,
                    );
                    Ok(Examined {
                        mint,
                        adapter_class: "container".to_string(),
                    })
                }
            },
        }
    }
}

fn examine_path(path: &Path, profile: Profile) -> Result<Examined, ExamineFailure> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(_) => {
            return Err(ExamineFailure::new(
                codes::INPUT_MISSING,
                "input path does not exist",
            ))
        }
    };

    if meta.is_dir() {
        examine_dir(path, profile)
    } else {
        examine_file(path, profile)
    }
}

/// Running totals while walking an input.
#[derive(Default)]
struct Scan {
    total_files: u64,
    total_bytes: u64,
    counts: BTreeMap<String, i64>,
    refs: Vec<String>,
    url_like: u64,
    entry_hints: Vec<String>,
    markers: Vec<String>,
    nested_archives: u64,
    signature_present: bool,
    timestamp_present: bool,
    has_scripts: bool,
    has_native: bool,
    has_html: bool,
}

const ENTRY_HINT_NAMES: &[&str] = &[
    "index.html",
    "main.js",
    "main.py",
    "manifest.json",
    "package.json",
    "Dockerfile",
    "setup.py",
];

fn scan_one(path: &Path, name: &str, scan: &mut Scan) -> Result<FileClass, ExamineFailure> {
    let meta =
        fs::metadata(path).map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "stat"))?;
    let mut head = [0u8; 8];
    let head_len = {
        let mut f = fs::File::open(path)
            .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "open"))?;
        f.read(&mut head)
            .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "read"))?
    };
    let class = sniff(&head[..head_len], classify_name(name));

    scan.total_files += 1;
    scan.total_bytes = scan.total_bytes.saturating_add(meta.len());
    *scan
        .counts
        .entry(class.kind().as_str().to_string())
        .or_insert(0) += 1;

    match class {
        FileClass::Script => scan.has_scripts = true,
        FileClass::Native => scan.has_native = true,
        FileClass::Html => scan.has_html = true,
        FileClass::Archive => scan.nested_archives += 1,
        _ => {}
    }
    if ENTRY_HINT_NAMES.contains(&name) {
        scan.entry_hints.push(name.to_string());
    }
    match name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase()).as_deref() {
        Some("sig") | Some("asc") | Some("p7s") => scan.signature_present = true,
        Some("tsr") | Some("tst") => scan.timestamp_present = true,
        _ => {}
    }

    if is_texty(class) {
        let mut f = fs::File::open(path)
            .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "open"))?;
        let mut buf = Vec::new();
        let read = f
            .by_ref()
            .take(MAX_URL_SCAN_BYTES)
            .read_to_end(&mut buf)
            .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "read"))?;
        if read as u64 == MAX_URL_SCAN_BYTES && meta.len() > MAX_URL_SCAN_BYTES {
            scan.markers.push(MARKER_URL_SCAN_BOUNDED.to_string());
        }
        let text = String::from_utf8_lossy(&buf);
        let found = extract_url_like(&text);
        scan.url_like += found.len() as u64;
        scan.refs.extend(found);
    }
    Ok(class)
}

fn finish_mint(
    scan: Scan,
    kind: ArtifactKind,
    profile: Profile,
    input_digest: DigestStr,
    archive_depth_max: i64,
) -> MintPackage {
    let target = match kind {
        ArtifactKind::Container => TargetKind::Container,
        ArtifactKind::Email => TargetKind::Email,
        _ => match profile {
            Profile::Web => TargetKind::Web,
            Profile::Mod => TargetKind::Mod,
            Profile::Generic => TargetKind::Generic,
        },
    };
    let mut markers = scan.markers;
    if scan.total_bytes > weftend_core::BOUNDED_COUNT_CEILING as u64 {
        markers.push(MARKER_BYTES_CLAMPED.to_string());
    }
    MintPackage {
        schema: weftend_core::entities::SCHEMA_MINT.to_string(),
        schema_version: weftend_core::entities::SCHEMA_VERSION,
        artifact_kind: kind,
        target_kind: target,
        input_digest,
        total_files: clamp_bounded(scan.total_files),
        total_bytes_bounded: clamp_bounded(scan.total_bytes),
        file_counts_by_kind: scan.counts,
        has_scripts: scan.has_scripts,
        has_native_binaries: scan.has_native,
        has_html: scan.has_html,
        external_refs: stable_sort_unique_v0(scan.refs.iter().map(String::as_str)),
        archive_depth_max,
        nested_archive_count: clamp_bounded(scan.nested_archives),
        url_like_count: clamp_bounded(scan.url_like),
        signature_present: scan.signature_present,
        timestamp_present: scan.timestamp_present,
        entry_hints: stable_sort_unique_v0(scan.entry_hints.iter().map(String::as_str)),
        boundedness_markers: stable_sort_unique_v0(markers.iter().map(String::as_str)),
    }
}

fn examine_file(path: &Path, profile: Profile) -> Result<Examined, ExamineFailure> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();

    let digest_hex = sha256_file(path)
        .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "cannot read input"))?;
    let input_digest = DigestStr::from_sha256_hex(&digest_hex)
        .map_err(|_| ExamineFailure::new(codes::INPUT_INVALID, "digest shape"))?;

    let mut scan = Scan::default();
    let class = scan_one(path, &name, &mut scan)?;

    // A claimed ZIP must carry its end-of-central-directory record.
    if class == FileClass::Archive && name.to_ascii_lowercase().ends_with(".zip") {
        let ok = zip_has_eocd(path)
            .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "cannot scan archive"))?;
        if !ok {
            return Err(ExamineFailure {
                code: codes::ZIP_EOCD_MISSING,
                message: "zip end-of-central-directory record not found".to_string(),
                input_digest: Some(input_digest),
            });
        }
    }

    let kind = class.kind();
    // A single archive file counts itself at depth 1 and is not nested.
    scan.nested_archives = 0;
    let depth = if kind == ArtifactKind::Archive { 1 } else { 0 };
    let mint = finish_mint(scan, kind, profile, input_digest, depth);
    let adapter_class = adapter_class_for(kind);
    Ok(Examined {
        mint,
        adapter_class,
    })
}

fn examine_dir(path: &Path, profile: Profile) -> Result<Examined, ExamineFailure> {
    let rels = walk_sorted(path)
        .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "cannot walk input"))?;

    let mut scan = Scan::default();
    let mut digest_lines: Vec<String> = Vec::new();
    let mut truncated = false;

    for rel in &rels {
        if scan.total_files as usize >= MAX_SCANNED_FILES {
            truncated = true;
            break;
        }
        let full = path.join(rel.as_std_path());
        let name = rel.file_name().unwrap_or_default();
        scan_one(&full, name, &mut scan)?;
        let file_hex = sha256_file(&full)
            .map_err(|_| ExamineFailure::new(codes::INPUT_UNREADABLE, "cannot hash input"))?;
        digest_lines.push(format!("{rel}:{file_hex}"));
    }
    if truncated {
        scan.markers.push(MARKER_FILE_SCAN_TRUNCATED.to_string());
    }

    // Directory digest: hash of the sorted relpath:digest listing, so the
    // input digest is stable under inode/mtime churn.
    let listing = digest_lines.join("\n");
    let input_digest: DigestStr = compute_artifact_digest_v0(listing.as_bytes())
        .parse()
        .map_err(|_| ExamineFailure::new(codes::INPUT_INVALID, "digest shape"))?;

    let kind = dominant_kind(&scan);
    let depth = if scan.nested_archives > 0 { 1 } else { 0 };
    let mint = finish_mint(scan, kind, profile, input_digest, depth);
    let adapter_class = adapter_class_for(kind);
    Ok(Examined {
        mint,
        adapter_class,
    })
}

/// Risk-descending presence order decides a directory's overall kind.
fn dominant_kind(scan: &Scan) -> ArtifactKind {
    if scan.has_native {
        ArtifactKind::Native
    } else if scan.nested_archives > 0 {
        ArtifactKind::Archive
    } else if scan.has_scripts {
        ArtifactKind::Script
    } else if scan.has_html {
        ArtifactKind::Html
    } else if scan.counts.contains_key(ArtifactKind::Email.as_str()) {
        ArtifactKind::Email
    } else if scan.counts.contains_key(ArtifactKind::Text.as_str()) {
        ArtifactKind::Text
    } else {
        ArtifactKind::Other
    }
}

fn adapter_class_for(kind: ArtifactKind) -> String {
    match kind {
        ArtifactKind::Archive => "archive",
        ArtifactKind::Container => "container",
        ArtifactKind::Email => "email",
        ArtifactKind::Html => "web",
        _ => "generic",
    }
    .to_string()
}

/// Scan the trailing window of a file for the ZIP end-of-central-directory
/// signature (`PK\x05\x06`). The EOCD comment can push the record up to
/// 64 KiB from the end.
fn zip_has_eocd(path: &Path) -> std::io::Result<bool> {
    const WINDOW: u64 = 66_000;
    let mut f = fs::File::open(path)?;
    let len = f.metadata()?.len();
    let start = len.saturating_sub(WINDOW);
    use std::io::Seek;
    f.seek(std::io::SeekFrom::Start(start))?;
    let mut tail = Vec::with_capacity((len - start) as usize);
    f.read_to_end(&mut tail)?;
    Ok(tail.windows(4).any(|w| w == b"PK\x05\x06"))
}
