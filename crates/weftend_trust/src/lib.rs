//! weftend_trust — the trust algebra.
//!
//! A pure function from `(mint, policy)` to a `Decision`. No I/O, no RNG,
//! no clock. The result depends only on the canonical form of the inputs:
//! contribution folding is commutative, associative, and idempotent, so
//! the order of policy evaluation can never affect the outcome.
//!
//! Precedence: `DENY > WITHHOLD > GRANT`, per capability and again when
//! per-capability verdicts fold into the top-level verdict.

#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use weftend_core::codes;
use weftend_core::entities::{
    Action, ArtifactKind, CapabilityLedger, Decision, DeniedCap, CapEffect, MintPackage, Policy,
    Verdict,
};
use weftend_core::ids::CapId;
use weftend_core::order::{is_stable_sorted_unique_v0, stable_sort_unique_v0};
use weftend_core::BOUNDED_COUNT_CEILING;

pub mod adapter;

// ---------------------------------------------------------------------------
// Contributions
// ---------------------------------------------------------------------------

/// Per-capability verdict. `Ord` encodes the fold precedence:
/// `Deny > Withhold > Grant`, so `max` *is* the fold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CapVerdict {
    Grant,
    Withhold,
    Deny,
}

impl From<CapEffect> for CapVerdict {
    fn from(e: CapEffect) -> Self {
        match e {
            CapEffect::Grant => CapVerdict::Grant,
            CapEffect::Deny => CapVerdict::Deny,
            CapEffect::Withhold => CapVerdict::Withhold,
        }
    }
}

/// One rule's contribution to one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contribution {
    pub cap_id: CapId,
    pub verdict: CapVerdict,
    pub reason_codes: Vec<String>,
}

/// Folded state of one capability: precedence-max verdict, code set union.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FoldedCap {
    pub verdict: Option<CapVerdict>,
    pub reason_codes: BTreeSet<String>,
}

impl FoldedCap {
    fn absorb(&mut self, c: &Contribution) {
        self.verdict = Some(match self.verdict {
            Some(v) => v.max(c.verdict),
            None => c.verdict,
        });
        self.reason_codes.extend(c.reason_codes.iter().cloned());
    }
}

/// Fold contributions per capability. BTree keys + set union make the fold
/// order-free and idempotent by construction.
pub fn fold_contributions(contributions: &[Contribution]) -> BTreeMap<CapId, FoldedCap> {
    let mut folded: BTreeMap<CapId, FoldedCap> = BTreeMap::new();
    for c in contributions {
        folded.entry(c.cap_id.clone()).or_default().absorb(c);
    }
    folded
}

// ---------------------------------------------------------------------------
// Observation → requested capabilities
// ---------------------------------------------------------------------------

pub const CAP_NET_FETCH: &str = "cap.net.fetch";
pub const CAP_SCRIPT_EVAL: &str = "cap.script.eval";
pub const CAP_NATIVE_EXEC: &str = "cap.native.exec";
pub const CAP_ARCHIVE_EXTRACT: &str = "cap.archive.extract";
pub const CAP_HTML_RENDER: &str = "cap.html.render";
pub const CAP_CONTAINER_MOUNT: &str = "cap.container.mount";
pub const CAP_EMAIL_PARSE: &str = "cap.email.parse";

fn cap(s: &str) -> CapId {
    // All inputs are the compile-time constants above.
    s.parse().unwrap_or_else(|_| unreachable!("bad builtin cap id"))
}

/// Derive the capabilities an artifact would need, from its observations.
pub fn requested_caps(mint: &MintPackage) -> Vec<CapId> {
    let mut caps: Vec<CapId> = Vec::new();
    if !mint.external_refs.is_empty() || mint.url_like_count > 0 {
        caps.push(cap(CAP_NET_FETCH));
    }
    if mint.has_scripts {
        caps.push(cap(CAP_SCRIPT_EVAL));
    }
    if mint.has_native_binaries {
        caps.push(cap(CAP_NATIVE_EXEC));
    }
    if mint.artifact_kind == ArtifactKind::Archive
        || mint.archive_depth_max > 0
        || mint.nested_archive_count > 0
    {
        caps.push(cap(CAP_ARCHIVE_EXTRACT));
    }
    if mint.has_html || mint.artifact_kind == ArtifactKind::Html {
        caps.push(cap(CAP_HTML_RENDER));
    }
    if mint.artifact_kind == ArtifactKind::Container {
        caps.push(cap(CAP_CONTAINER_MOUNT));
    }
    if mint.artifact_kind == ArtifactKind::Email {
        caps.push(cap(CAP_EMAIL_PARSE));
    }
    caps.sort();
    caps.dedup();
    caps
}

/// All contributions for `(mint, policy)`: policy rules over the requested
/// set, threshold breaches, and the fail-closed default for requested
/// capabilities no rule covers.
pub fn contributions_for(mint: &MintPackage, policy: &Policy) -> Vec<Contribution> {
    let requested = requested_caps(mint);
    let mut contributions: Vec<Contribution> = Vec::new();
    let mut ruled: BTreeSet<CapId> = BTreeSet::new();

    for rule in &policy.capability_rules {
        if !requested.contains(&rule.cap_id) {
            continue;
        }
        ruled.insert(rule.cap_id.clone());
        contributions.push(Contribution {
            cap_id: rule.cap_id.clone(),
            verdict: rule.effect.into(),
            reason_codes: vec![rule.reason_code.clone()],
        });
    }

    // Requested but unruled: fail closed with operator review.
    for cap_id in &requested {
        if !ruled.contains(cap_id) {
            contributions.push(Contribution {
                cap_id: cap_id.clone(),
                verdict: CapVerdict::Withhold,
                reason_codes: vec![codes::CAP_WITHHOLD_REVIEW.to_string()],
            });
        }
    }

    // Threshold breaches attach to the capability they bound.
    let t = &policy.thresholds;
    if mint.archive_depth_max > t.max_archive_depth {
        contributions.push(Contribution {
            cap_id: cap(CAP_ARCHIVE_EXTRACT),
            verdict: CapVerdict::Withhold,
            reason_codes: vec![codes::LIMIT_ARCHIVE_DEPTH_EXCEEDED.to_string()],
        });
    }
    if mint.nested_archive_count > t.max_nested_archives {
        contributions.push(Contribution {
            cap_id: cap(CAP_ARCHIVE_EXTRACT),
            verdict: CapVerdict::Withhold,
            reason_codes: vec![codes::LIMIT_NESTED_ARCHIVES_EXCEEDED.to_string()],
        });
    }
    if mint.external_refs.len() as i64 > t.max_external_refs {
        contributions.push(Contribution {
            cap_id: cap(CAP_NET_FETCH),
            verdict: CapVerdict::Withhold,
            reason_codes: vec![codes::LIMIT_EXTERNAL_REFS_EXCEEDED.to_string()],
        });
    }
    if mint.total_bytes_bounded > t.max_total_bytes {
        // Byte ceiling bounds the artifact as a whole; the breach withholds
        // every requested capability so nothing proceeds unreviewed.
        for cap_id in &requested {
            contributions.push(Contribution {
                cap_id: cap_id.clone(),
                verdict: CapVerdict::Withhold,
                reason_codes: vec![codes::LIMIT_TOTAL_BYTES_EXCEEDED.to_string()],
            });
        }
    }

    contributions
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Semantic re-check of a typed mint; shape validation happened at parse
/// time in the io layer. Any failure here holds the artifact.
fn mint_semantics_ok(mint: &MintPackage) -> bool {
    let counts_ok = [
        mint.total_files,
        mint.total_bytes_bounded,
        mint.archive_depth_max,
        mint.nested_archive_count,
        mint.url_like_count,
    ]
    .iter()
    .all(|n| (0..=BOUNDED_COUNT_CEILING).contains(n))
        && mint
            .file_counts_by_kind
            .values()
            .all(|n| (0..=BOUNDED_COUNT_CEILING).contains(n));
    counts_ok
        && mint.schema_version == weftend_core::entities::SCHEMA_VERSION
        && is_stable_sorted_unique_v0(&mint.external_refs)
        && is_stable_sorted_unique_v0(&mint.entry_hints)
        && is_stable_sorted_unique_v0(&mint.boundedness_markers)
}

/// The decision taken when the mint itself cannot be trusted.
pub fn hold_decision(reason_codes: &[&str]) -> Decision {
    Decision {
        action: Action::Hold,
        verdict: Verdict::Withheld,
        reason_codes: stable_sort_unique_v0(reason_codes.iter().copied()),
        capability_ledger: CapabilityLedger::default(),
    }
}

/// The decision recorded for inputs that are denied before any capability
/// question arises (e.g. a mutable container reference).
pub fn deny_decision(reason_codes: &[&str]) -> Decision {
    Decision {
        action: Action::Reject,
        verdict: Verdict::Deny,
        reason_codes: stable_sort_unique_v0(reason_codes.iter().copied()),
        capability_ledger: CapabilityLedger::default(),
    }
}

/// Evaluate `(mint, policy)` into a `Decision`. Pure and total.
pub fn evaluate(mint: &MintPackage, policy: &Policy) -> Decision {
    if !mint_semantics_ok(mint) {
        return hold_decision(&[codes::MINT_INVALID]);
    }

    let requested = requested_caps(mint);
    let contributions = contributions_for(mint, policy);
    let folded = fold_contributions(&contributions);

    let mut granted: Vec<String> = Vec::new();
    let mut denied: Vec<DeniedCap> = Vec::new();
    let mut all_codes: BTreeSet<String> = BTreeSet::new();
    let mut top = CapVerdict::Grant;
    let mut deny_is_net_only = true;

    for (cap_id, state) in &folded {
        let verdict = state.verdict.unwrap_or(CapVerdict::Withhold);
        all_codes.extend(state.reason_codes.iter().cloned());
        top = top.max(verdict);
        match verdict {
            CapVerdict::Grant => granted.push(cap_id.as_str().to_string()),
            CapVerdict::Withhold | CapVerdict::Deny => {
                if verdict == CapVerdict::Deny && !cap_id.is_net_family() {
                    deny_is_net_only = false;
                }
                denied.push(DeniedCap {
                    cap_id: cap_id.clone(),
                    reason_codes: stable_sort_unique_v0(
                        state.reason_codes.iter().map(String::as_str),
                    ),
                });
            }
        }
    }

    let (verdict, action) = match top {
        CapVerdict::Grant => (Verdict::Allow, Action::Approve),
        CapVerdict::Withhold => (Verdict::Withheld, Action::Hold),
        CapVerdict::Deny => (
            Verdict::Deny,
            if deny_is_net_only {
                Action::Queue
            } else {
                Action::Reject
            },
        ),
    };

    denied.sort_by(|a, b| a.cap_id.cmp(&b.cap_id));
    Decision {
        action,
        verdict,
        reason_codes: stable_sort_unique_v0(all_codes.iter().map(String::as_str)),
        capability_ledger: CapabilityLedger {
            requested: stable_sort_unique_v0(requested.iter().map(CapId::as_str)),
            granted: stable_sort_unique_v0(granted.iter().map(String::as_str)),
            denied,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use weftend_core::entities::{CapabilityRule, Profile, TargetKind, Thresholds};
    use weftend_core::ids::DigestStr;

    fn mint() -> MintPackage {
        MintPackage::empty(
            ArtifactKind::Text,
            TargetKind::Web,
            DigestStr::zero_sentinel(),
        )
    }

    fn web_policy() -> Policy {
        Policy {
            schema: weftend_core::entities::SCHEMA_POLICY.to_string(),
            schema_version: 0,
            profile: Profile::Web,
            capability_rules: vec![
                CapabilityRule {
                    cap_id: CAP_NET_FETCH.parse().unwrap(),
                    effect: CapEffect::Deny,
                    reason_code: codes::CAP_DENY_NET.to_string(),
                },
                CapabilityRule {
                    cap_id: CAP_SCRIPT_EVAL.parse().unwrap(),
                    effect: CapEffect::Grant,
                    reason_code: "CAP_GRANT_SCRIPT".to_string(),
                },
                CapabilityRule {
                    cap_id: CAP_HTML_RENDER.parse().unwrap(),
                    effect: CapEffect::Grant,
                    reason_code: "CAP_GRANT_HTML".to_string(),
                },
            ],
            thresholds: Thresholds::default(),
        }
    }

    #[test]
    fn no_caps_approves() {
        let d = evaluate(&mint(), &web_policy());
        assert_eq!(d.action, Action::Approve);
        assert_eq!(d.verdict, Verdict::Allow);
        assert!(d.reason_codes.is_empty());
        assert!(d.capability_ledger.requested.is_empty());
    }

    #[test]
    fn net_attempt_queues_with_cap_deny_net() {
        let mut m = mint();
        m.external_refs = vec!["https://tracker.example/beacon".to_string()];
        m.url_like_count = 1;
        let d = evaluate(&m, &web_policy());
        assert_eq!(d.action, Action::Queue);
        assert_eq!(d.verdict, Verdict::Deny);
        assert!(d.reason_codes.contains(&codes::CAP_DENY_NET.to_string()));
        assert_eq!(d.capability_ledger.denied.len(), 1);
        assert_eq!(d.capability_ledger.denied[0].cap_id.as_str(), CAP_NET_FETCH);
    }

    #[test]
    fn non_net_deny_rejects() {
        let mut policy = web_policy();
        policy.capability_rules.push(CapabilityRule {
            cap_id: CAP_NATIVE_EXEC.parse().unwrap(),
            effect: CapEffect::Deny,
            reason_code: codes::CAP_DENY_NATIVE.to_string(),
        });
        let mut m = mint();
        m.has_native_binaries = true;
        let d = evaluate(&m, &policy);
        assert_eq!(d.action, Action::Reject);
    }

    #[test]
    fn unruled_cap_holds() {
        let mut m = mint();
        m.has_native_binaries = true; // web_policy has no native rule
        let d = evaluate(&m, &web_policy());
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.verdict, Verdict::Withheld);
        assert!(d
            .reason_codes
            .contains(&codes::CAP_WITHHOLD_REVIEW.to_string()));
    }

    #[test]
    fn deny_takes_precedence_over_withhold_and_grant() {
        let mut m = mint();
        m.external_refs = vec!["https://x.example".to_string()];
        m.has_scripts = true;
        m.has_native_binaries = true; // unruled → withhold
        let d = evaluate(&m, &web_policy());
        // A deny anywhere dominates the withhold.
        assert_eq!(d.verdict, Verdict::Deny);
        // And the non-net deny set is empty, but a withheld non-net cap
        // exists; queue applies only when every *denied* cap is net.
        assert_eq!(d.action, Action::Queue);
    }

    #[test]
    fn invalid_mint_holds() {
        let mut m = mint();
        m.external_refs = vec!["b".to_string(), "a".to_string()]; // unsorted
        let d = evaluate(&m, &web_policy());
        assert_eq!(d.action, Action::Hold);
        assert_eq!(d.reason_codes, vec![codes::MINT_INVALID.to_string()]);
    }

    #[test]
    fn archive_depth_threshold_withholds() {
        let mut m = mint();
        m.artifact_kind = ArtifactKind::Archive;
        m.archive_depth_max = 9;
        let mut p = web_policy();
        p.capability_rules.push(CapabilityRule {
            cap_id: CAP_ARCHIVE_EXTRACT.parse().unwrap(),
            effect: CapEffect::Grant,
            reason_code: "CAP_GRANT_ARCHIVE".to_string(),
        });
        let d = evaluate(&m, &p);
        assert_eq!(d.action, Action::Hold);
        assert!(d
            .reason_codes
            .contains(&codes::LIMIT_ARCHIVE_DEPTH_EXCEEDED.to_string()));
    }

    // ---- algebraic properties ----

    fn arb_contribution() -> impl Strategy<Value = Contribution> {
        (
            prop_oneof![
                Just(CAP_NET_FETCH),
                Just(CAP_SCRIPT_EVAL),
                Just(CAP_NATIVE_EXEC),
                Just(CAP_ARCHIVE_EXTRACT),
            ],
            prop_oneof![
                Just(CapVerdict::Grant),
                Just(CapVerdict::Withhold),
                Just(CapVerdict::Deny),
            ],
            proptest::collection::vec("[A-Z][A-Z_]{0,8}", 0..3),
        )
            .prop_map(|(id, verdict, codes)| Contribution {
                cap_id: id.parse().unwrap(),
                verdict,
                reason_codes: codes,
            })
    }

    proptest! {
        #[test]
        fn fold_is_commutative(
            mut contribs in proptest::collection::vec(arb_contribution(), 0..12),
            seed in 0u64..1000
        ) {
            let forward = fold_contributions(&contribs);
            // Deterministic permutation derived from the seed.
            let len = contribs.len();
            if len > 1 {
                for i in 0..len {
                    let j = ((seed as usize).wrapping_mul(31).wrapping_add(i * 7)) % len;
                    contribs.swap(i, j);
                }
            }
            prop_assert_eq!(forward, fold_contributions(&contribs));
        }

        #[test]
        fn fold_is_idempotent(contribs in proptest::collection::vec(arb_contribution(), 0..12)) {
            let once = fold_contributions(&contribs);
            let mut doubled = contribs.clone();
            doubled.extend(contribs.iter().cloned());
            prop_assert_eq!(once, fold_contributions(&doubled));
        }

        #[test]
        fn fold_is_associative(
            a in proptest::collection::vec(arb_contribution(), 0..6),
            b in proptest::collection::vec(arb_contribution(), 0..6),
            c in proptest::collection::vec(arb_contribution(), 0..6)
        ) {
            // Folding is defined over multisets: (a ++ b) ++ c == a ++ (b ++ c).
            let mut left = a.clone();
            left.extend(b.iter().cloned());
            left.extend(c.iter().cloned());
            let mut right = c.clone();
            let mut bc = b.clone();
            bc.extend(right.drain(..));
            let mut full = a.clone();
            full.extend(bc.iter().cloned());
            prop_assert_eq!(fold_contributions(&left), fold_contributions(&full));
        }
    }
}
