//! crates/weftend_core/src/ids.rs
//! Canonical digest/capability/reason-code identifiers.
//! Deterministic, ASCII-only, strict shapes; no I/O.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

const HEX64_LEN: usize = 64;
const HEX8_LEN: usize = 8;
const CAP_ID_MAX_LEN: usize = 64;
const REASON_CODE_MAX_LEN: usize = 96;

/// The digest placeholder embedded while a receipt's own digest is computed.
pub const ZERO_DIGEST_SENTINEL: &str =
    "sha256:0000000000000000000000000000000000000000000000000000000000000000";

#[inline]
fn is_lower_hex(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// `sha256:<64 lowercase hex>` — the canonical content digest shape.
#[inline]
pub fn is_valid_sha256_digest(s: &str) -> bool {
    match s.strip_prefix("sha256:") {
        Some(hex) => hex.len() == HEX64_LEN && is_lower_hex(hex),
        None => false,
    }
}

/// `fnv1a32:<8 lowercase hex>` — the build-identity fallback shape.
#[inline]
pub fn is_valid_fnv1a32_digest(s: &str) -> bool {
    match s.strip_prefix("fnv1a32:") {
        Some(hex) => hex.len() == HEX8_LEN && is_lower_hex(hex),
        None => false,
    }
}

/// Any digest accepted on the evidence path.
#[inline]
pub fn is_valid_digest(s: &str) -> bool {
    is_valid_sha256_digest(s) || is_valid_fnv1a32_digest(s)
}

/// `^[a-z][a-z0-9]*(\.[a-z][a-z0-9]*)+$`, at most 64 bytes.
pub fn is_valid_cap_id(s: &str) -> bool {
    if s.is_empty() || s.len() > CAP_ID_MAX_LEN {
        return false;
    }
    let mut segments = 0usize;
    for seg in s.split('.') {
        let bs = seg.as_bytes();
        if bs.is_empty() || !bs[0].is_ascii_lowercase() {
            return false;
        }
        if !bs.iter().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()) {
            return false;
        }
        segments += 1;
    }
    segments >= 2
}

/// `^[A-Z][A-Z0-9_]*$`, at most 96 bytes.
pub fn is_valid_reason_code(s: &str) -> bool {
    let bs = s.as_bytes();
    if bs.is_empty() || bs.len() > REASON_CODE_MAX_LEN || !bs[0].is_ascii_uppercase() {
        return false;
    }
    bs.iter()
        .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'_')
}

macro_rules! shaped_string_newtype {
    ($(#[$m:meta])* $name:ident, $check:path, $err:expr) => {
        $(#[$m])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[inline]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = CoreError;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if $check(s) {
                    Ok(Self(s.to_string()))
                } else {
                    Err($err)
                }
            }
        }

        impl TryFrom<&str> for $name {
            type Error = CoreError;
            #[inline]
            fn try_from(value: &str) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

shaped_string_newtype!(
    /// A content digest: `sha256:<hex64>` or `fnv1a32:<hex8>`.
    DigestStr,
    is_valid_digest,
    CoreError::InvalidDigest
);

shaped_string_newtype!(
    /// Capability identifier, e.g. `cap.net.fetch`.
    CapId,
    is_valid_cap_id,
    CoreError::InvalidCapId
);

shaped_string_newtype!(
    /// Upper-snake-case reason code, the sole externally stable description
    /// of any decision or failure.
    ReasonCode,
    is_valid_reason_code,
    CoreError::InvalidReasonCode
);

impl DigestStr {
    /// The sentinel digest embedded before a receipt digest is computed.
    pub fn zero_sentinel() -> Self {
        DigestStr(ZERO_DIGEST_SENTINEL.to_string())
    }

    /// Build from a raw lowercase sha256 hex string.
    pub fn from_sha256_hex(hex: &str) -> Result<Self, CoreError> {
        format!("sha256:{hex}").parse()
    }

    pub fn is_sha256(&self) -> bool {
        self.0.starts_with("sha256:")
    }

    pub fn is_zero_sentinel(&self) -> bool {
        self.0 == ZERO_DIGEST_SENTINEL
    }
}

impl CapId {
    /// True when the capability belongs to the network family
    /// (`cap.net.*`); DENY verdicts restricted to this family queue for
    /// operator review instead of rejecting outright.
    pub fn is_net_family(&self) -> bool {
        self.0.starts_with("cap.net.")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_shapes() {
        assert!(is_valid_sha256_digest(ZERO_DIGEST_SENTINEL));
        assert!(is_valid_fnv1a32_digest("fnv1a32:00c0ffee"));
        assert!(!is_valid_digest("sha256:XYZ"));
        assert!(!is_valid_digest("sha256:abc"));
        assert!(!is_valid_digest("md5:d41d8cd98f00b204e9800998ecf8427e"));
    }

    #[test]
    fn cap_id_shapes() {
        assert!(is_valid_cap_id("cap.net.fetch"));
        assert!(is_valid_cap_id("cap.archive"));
        assert!(!is_valid_cap_id("cap"));
        assert!(!is_valid_cap_id("Cap.Net"));
        assert!(!is_valid_cap_id("cap..net"));
        assert!(!is_valid_cap_id(""));
    }

    #[test]
    fn reason_code_shapes() {
        assert!(is_valid_reason_code("CAP_DENY_NET"));
        assert!(is_valid_reason_code("ZIP_EOCD_MISSING"));
        assert!(!is_valid_reason_code("cap_deny_net"));
        assert!(!is_valid_reason_code("_LEADING"));
        assert!(!is_valid_reason_code(""));
    }

    #[test]
    fn newtype_round_trip() {
        let d: DigestStr = ZERO_DIGEST_SENTINEL.parse().unwrap();
        assert!(d.is_zero_sentinel());
        let c: CapId = "cap.net.fetch".parse().unwrap();
        assert!(c.is_net_family());
        let c2: CapId = "cap.script.eval".parse().unwrap();
        assert!(!c2.is_net_family());
    }
}
