//! Canonical JSON: the single source of byte-identity for all evidence.
//! - Objects: keys sorted ascending under `cmp_str_v0`
//! - Arrays: order preserved (callers normalize order-free lists first)
//! - Strings: minimal JSON escapes; non-ASCII passes through unescaped
//! - Numbers: integers only; floats are rejected outright
//! - Output: compact, no trailing newline (file writers append exactly one)
//! - Atomic write: unique temp in same dir (`create_new`) + fsync(temp) +
//!   rename; fsync(dir) on Unix. Fallback on rename failure: direct write
//!   + fsync(target).

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use weftend_core::order::cmp_str_v0;

use crate::{IoError, IoResult};

/// Convert a serde_json `Value` to canonical JSON bytes.
/// Errors on any float or integer outside the signed 53-bit domain.
pub fn to_canonical_json_bytes(v: &Value) -> IoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(1024);
    write_canonical_value(v, "", &mut out)?;
    Ok(out)
}

/// Canonical bytes for any `Serialize` value.
pub fn canonical_bytes_for<T: Serialize>(value: &T) -> IoResult<Vec<u8>> {
    let v = serde_json::to_value(value)?;
    to_canonical_json_bytes(&v)
}

/// Canonical bytes terminated with exactly one `\n`, the on-disk form.
pub fn canonical_file_bytes(v: &Value) -> IoResult<Vec<u8>> {
    let mut bytes = to_canonical_json_bytes(v)?;
    bytes.push(b'\n');
    Ok(bytes)
}

fn write_canonical_value(v: &Value, pointer: &str, out: &mut Vec<u8>) -> IoResult<()> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => {
            let i = n
                .as_i64()
                .filter(|i| i.unsigned_abs() <= weftend_core::BOUNDED_COUNT_CEILING as u64)
                .ok_or_else(|| IoError::NonCanonicalNumber(display_pointer(pointer)))?;
            // Shortest decimal that round-trips: i64 display form.
            out.extend_from_slice(i.to_string().as_bytes());
        }
        Value::String(s) => write_json_string(s, out),
        Value::Array(arr) => {
            out.push(b'[');
            for (i, elem) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let child = format!("{pointer}/{i}");
                write_canonical_value(elem, &child, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&str> = map.keys().map(|k| k.as_str()).collect();
            keys.sort_by(|a, b| cmp_str_v0(a, b));
            for (i, k) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(k, out);
                out.push(b':');
                let child = format!("{pointer}/{k}");
                write_canonical_value(&map[*k], &child, out)?;
            }
            out.push(b'}');
        }
    }
    Ok(())
}

fn display_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

/// Minimal-escape JSON string emission: only `"`, `\`, and control
/// characters are escaped; everything else (including non-ASCII) passes
/// through as UTF-8.
fn write_json_string(s: &str, out: &mut Vec<u8>) {
    out.push(b'"');
    for c in s.chars() {
        match c {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0C}' => out.extend_from_slice(b"\\f"),
            c if (c as u32) < 0x20 => {
                let mut buf = [0u8; 6];
                let esc = format!("\\u{:04x}", c as u32);
                buf[..esc.len()].copy_from_slice(esc.as_bytes());
                out.extend_from_slice(&buf[..esc.len()]);
            }
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
    }
    out.push(b'"');
}

/// Write canonical JSON (with the single trailing newline) to `path`
/// atomically, with a safe cross-device fallback.
pub fn write_canonical_file(path: &Path, v: &Value) -> IoResult<()> {
    let bytes = canonical_file_bytes(v)?;
    write_bytes_atomically(path, &bytes)?;
    Ok(())
}

/// Atomic byte write: unique temp in the same dir, fsync, rename;
/// direct-write fallback when rename fails (e.g. cross-device).
///
/// The temp name carries the pid plus a process-local sequence number and
/// is opened with `create_new`, so two writers racing on the same target
/// can never clobber each other's in-flight staging file.
pub fn write_bytes_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"))?;
    fs::create_dir_all(parent)?;

    let tmp = unique_stage_path(path);
    let mut tf = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
    tf.write_all(bytes)?;
    let _ = tf.sync_all(); // best-effort
    drop(tf);

    match fs::rename(&tmp, path) {
        Ok(()) => {
            let _ = sync_parent_dir(parent);
            Ok(())
        }
        Err(_) => {
            let res: io::Result<()> = (|| {
                let mut f = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?;
                f.write_all(bytes)?;
                f.sync_all()?;
                Ok(())
            })();
            let _ = fs::remove_file(&tmp);
            res?;
            let _ = sync_parent_dir(parent);
            Ok(())
        }
    }
}

/// `<filename>.<pid>.<seq>.stage` next to `target`. The sequence number
/// keeps writes within one process apart; the pid separates processes.
fn unique_stage_path(target: &Path) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};

    static SEQ: AtomicU64 = AtomicU64::new(0);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);

    let name = target
        .file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("stage");
    let staged = format!("{name}.{}.{seq}.stage", std::process::id());
    match target.parent() {
        Some(dir) => dir.join(staged),
        None => PathBuf::from(staged),
    }
}

/// A rename is only durable once its directory entry is synced; that
/// matters on Unix only.
#[cfg(unix)]
fn sync_parent_dir(dir: &Path) -> io::Result<()> {
    fs::File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
#[inline]
fn sync_parent_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_sort_array_order_is_kept() {
        // Receipt-shaped fixture: nested object keys re-sort, but the
        // bucket list keeps the order the caller produced.
        let v = json!({
            "schemaVersion": 0,
            "capabilityLedger": { "requested": ["cap.net.fetch"], "granted": [] },
            "buckets": ["REASONS_CHANGED", "DIGEST_CHANGED"],
            "action": "QUEUE"
        });
        let s = String::from_utf8(to_canonical_json_bytes(&v).unwrap()).unwrap();
        assert_eq!(
            s,
            r#"{"action":"QUEUE","buckets":["REASONS_CHANGED","DIGEST_CHANGED"],"capabilityLedger":{"granted":[],"requested":["cap.net.fetch"]},"schemaVersion":0}"#
        );
    }

    #[test]
    fn key_order_is_byte_wise_not_locale() {
        let v = json!({"Z": 1, "a": 2, "0": 3});
        let s = String::from_utf8(to_canonical_json_bytes(&v).unwrap()).unwrap();
        assert_eq!(s, r#"{"0":3,"Z":1,"a":2}"#);
    }

    #[test]
    fn floats_are_rejected() {
        let v = json!({"x": 1.5});
        match to_canonical_json_bytes(&v) {
            Err(IoError::NonCanonicalNumber(p)) => assert_eq!(p, "/x"),
            other => panic!("expected NonCanonicalNumber, got {other:?}"),
        }
    }

    #[test]
    fn huge_integers_are_rejected() {
        let v = json!({"n": i64::MAX});
        assert!(to_canonical_json_bytes(&v).is_err());
        let ok = json!({"n": (1i64 << 53) - 1});
        assert!(to_canonical_json_bytes(&ok).is_ok());
    }

    #[test]
    fn non_ascii_passes_through() {
        let v = json!({"k": "héllo"});
        let bytes = to_canonical_json_bytes(&v).unwrap();
        assert_eq!(bytes, "{\"k\":\"héllo\"}".as_bytes());
    }

    #[test]
    fn control_chars_escape() {
        let v = json!({"k": "a\u{01}b"});
        let s = String::from_utf8(to_canonical_json_bytes(&v).unwrap()).unwrap();
        assert_eq!(s, "{\"k\":\"a\\u0001b\"}");
    }

    #[test]
    fn file_bytes_have_single_trailing_newline() {
        let v = json!({"a": 1});
        let bytes = canonical_file_bytes(&v).unwrap();
        assert!(bytes.ends_with(b"}\n"));
        assert!(!bytes.ends_with(b"\n\n"));
    }

    #[test]
    fn equal_values_equal_bytes() {
        // Insertion order of object keys must not affect the bytes.
        let a = json!({"x": 1, "y": [1, 2]});
        let mut m = serde_json::Map::new();
        m.insert("y".into(), json!([1, 2]));
        m.insert("x".into(), json!(1));
        let b = Value::Object(m);
        assert_eq!(
            to_canonical_json_bytes(&a).unwrap(),
            to_canonical_json_bytes(&b).unwrap()
        );
    }
}
