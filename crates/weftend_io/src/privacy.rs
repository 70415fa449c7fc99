//! Privacy lint: a sweep over emitted text for path/env leakage.
//!
//! Receipts must never reveal absolute filesystem paths, user-home paths,
//! or environment markers. The sweep runs over the staged tree right
//! before digesting, so its own result file is digested and listed like
//! any other evidence file.

use std::fs;
use std::path::Path;

use camino::Utf8PathBuf;
use weftend_core::codes;
use weftend_core::entities::{LintVerdict, PrivacyLintDoc, PrivacyLintHit, SCHEMA_PRIVACY_LINT};
use weftend_core::order::stable_sort_unique_v0;

use crate::IoResult;

/// Relative path of the lint result inside an evidence root.
pub const PRIVACY_LINT_REL_PATH: &str = "weftend/privacy_lint_v0.json";

/// Scan one text for forbidden patterns; returns the reason codes hit.
pub fn lint_text(text: &str) -> Vec<&'static str> {
    let mut hits = Vec::new();
    if has_drive_letter_path(text) || text.contains("/Users/") || text.contains("/home/") {
        hits.push(codes::PRIVACY_LINT_PATH_LEAK);
    }
    if text.contains("HOME=") {
        hits.push(codes::PRIVACY_LINT_ENV_LEAK);
    }
    hits
}

/// `[A-Z]:\` — a Windows drive-letter path.
fn has_drive_letter_path(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.windows(3).any(|w| {
        w[0].is_ascii_uppercase() && w[1] == b':' && w[2] == b'\\'
    })
}

/// Sweep every `.json`/`.txt` file under `dir` (sorted walk) and assemble
/// the lint document. `dir` is typically the staged evidence tree.
pub fn lint_tree(dir: &Path) -> IoResult<PrivacyLintDoc> {
    let mut hits: Vec<PrivacyLintHit> = Vec::new();
    let mut all_codes: Vec<String> = Vec::new();

    for rel in walk_sorted(dir)? {
        let ext_ok = rel.extension().map(|e| e == "json" || e == "txt");
        if ext_ok != Some(true) {
            continue;
        }
        let text = match fs::read_to_string(dir.join(rel.as_std_path())) {
            Ok(t) => t,
            Err(_) => continue, // non-UTF-8 payloads are not emitted text
        };
        let found = lint_text(&text);
        if !found.is_empty() {
            let reason_codes = stable_sort_unique_v0(found.iter().copied());
            all_codes.extend(reason_codes.iter().cloned());
            hits.push(PrivacyLintHit {
                rel_path: rel.to_string(),
                reason_codes,
            });
        }
    }

    let reason_codes = stable_sort_unique_v0(all_codes.iter().map(String::as_str));
    Ok(PrivacyLintDoc {
        schema: SCHEMA_PRIVACY_LINT.to_string(),
        schema_version: weftend_core::entities::SCHEMA_VERSION,
        verdict: if hits.is_empty() {
            LintVerdict::Pass
        } else {
            LintVerdict::Fail
        },
        reason_codes,
        hits,
    })
}

/// All regular files under `dir`, relative, byte-wise sorted.
pub fn walk_sorted(dir: &Path) -> IoResult<Vec<Utf8PathBuf>> {
    let mut out: Vec<Utf8PathBuf> = Vec::new();
    walk_into(dir, Path::new(""), &mut out)?;
    out.sort_by(|a, b| weftend_core::order::cmp_str_v0(a.as_str(), b.as_str()));
    Ok(out)
}

fn walk_into(base: &Path, rel: &Path, out: &mut Vec<Utf8PathBuf>) -> IoResult<()> {
    let dir = base.join(rel);
    for entry in fs::read_dir(&dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let child_rel = rel.join(&name);
        let ty = entry.file_type()?;
        if ty.is_dir() {
            walk_into(base, &child_rel, out)?;
        } else if ty.is_file() {
            let utf8 = Utf8PathBuf::from_path_buf(child_rel).map_err(|p| {
                crate::IoError::Invalid(format!("non-UTF-8 path under evidence root: {p:?}"))
            })?;
            out.push(utf8);
        }
        // Symlinks are not evidence; the writer never creates them.
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_text_passes() {
        assert!(lint_text("relPath: weftend/receipt.json").is_empty());
    }

    #[test]
    fn forbidden_patterns_hit() {
        assert_eq!(lint_text(r"C:\Temp\x"), vec![codes::PRIVACY_LINT_PATH_LEAK]);
        assert_eq!(lint_text("/Users/someone"), vec![codes::PRIVACY_LINT_PATH_LEAK]);
        assert_eq!(lint_text("/home/someone"), vec![codes::PRIVACY_LINT_PATH_LEAK]);
        assert_eq!(lint_text("HOME=/x"), vec![codes::PRIVACY_LINT_ENV_LEAK]);
    }

    #[test]
    fn lowercase_drive_is_not_a_hit() {
        assert!(lint_text(r"c:\tmp").is_empty());
    }

    #[test]
    fn tree_sweep_collects_hits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("ok.json"), b"{\"a\":1}\n").unwrap();
        std::fs::write(dir.path().join("sub/leak.txt"), b"/home/alice").unwrap();
        std::fs::write(dir.path().join("skip.bin"), b"/home/ignored").unwrap();

        let doc = lint_tree(dir.path()).unwrap();
        assert_eq!(doc.verdict, LintVerdict::Fail);
        assert_eq!(doc.reason_codes, vec![codes::PRIVACY_LINT_PATH_LEAK]);
        assert_eq!(doc.hits.len(), 1);
        assert_eq!(doc.hits[0].rel_path, "sub/leak.txt");
    }

    #[test]
    fn empty_tree_passes() {
        let dir = tempfile::tempdir().unwrap();
        let doc = lint_tree(dir.path()).unwrap();
        assert_eq!(doc.verdict, LintVerdict::Pass);
        assert!(doc.reason_codes.is_empty());
    }
}
