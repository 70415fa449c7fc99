//! Build identity: the digest binding every receipt to the engine build
//! that produced it.
//!
//! Computed once per process startup and passed explicitly to every
//! component; there is no module-level cache.

use weftend_core::codes;
use weftend_core::entities::{BuildDigestAlgo, BuildSource, WeftendBuild};
use weftend_core::fnv::fnv1a32_digest;
use weftend_core::ids::DigestStr;

use crate::digest::sha256_file;

/// Identity used for the fallback digest when the binary cannot be hashed.
fn fallback_identity() -> String {
    format!("weftend/{}", env!("CARGO_PKG_VERSION"))
}

/// Hash the running binary (`sha256`); on any failure fall back to
/// `fnv1a32` over the package identity with
/// `WEFTEND_BUILD_DIGEST_UNAVAILABLE` recorded.
pub fn compute_build_identity() -> WeftendBuild {
    match try_binary_digest() {
        Some(digest) => WeftendBuild {
            algo: BuildDigestAlgo::Sha256,
            digest,
            source: BuildSource::Binary,
            reason_codes: vec![],
        },
        None => fallback_build_identity(),
    }
}

/// The fallback identity, also used by loaders when no receipt in an
/// evidence root carries a build.
pub fn fallback_build_identity() -> WeftendBuild {
    let digest: DigestStr = fnv1a32_digest(fallback_identity().as_bytes())
        .parse()
        .unwrap_or_else(|_| DigestStr::zero_sentinel());
    WeftendBuild {
        algo: BuildDigestAlgo::Fnv1a32,
        digest,
        source: BuildSource::Fallback,
        reason_codes: vec![codes::WEFTEND_BUILD_DIGEST_UNAVAILABLE.to_string()],
    }
}

fn try_binary_digest() -> Option<DigestStr> {
    let exe = std::env::current_exe().ok()?;
    let hex = sha256_file(&exe).ok()?;
    DigestStr::from_sha256_hex(&hex).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_is_stable_within_process() {
        let a = compute_build_identity();
        let b = compute_build_identity();
        assert_eq!(a, b);
    }

    #[test]
    fn fallback_carries_reason_code() {
        let b = fallback_build_identity();
        assert_eq!(b.algo, BuildDigestAlgo::Fnv1a32);
        assert_eq!(b.source, BuildSource::Fallback);
        assert_eq!(
            b.reason_codes,
            vec![codes::WEFTEND_BUILD_DIGEST_UNAVAILABLE.to_string()]
        );
        assert!(b.digest.as_str().starts_with("fnv1a32:"));
    }
}
