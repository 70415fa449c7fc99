//! Property tests for the canonical serializer: round-trip fidelity and
//! byte-identity of semantically equal values.

use proptest::prelude::*;
use serde_json::Value;
use weftend_io::canonical_json::to_canonical_json_bytes;

/// Arbitrary evidence-shaped JSON: integers only, bounded depth.
fn arb_json() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        (-9_007_199_254_740_991i64..=9_007_199_254_740_991i64).prop_map(|i| Value::from(i)),
        "[ -~]{0,12}".prop_map(Value::String),
        // Non-ASCII strings pass through canonical serialization unescaped.
        "\\PC{0,6}".prop_map(Value::String),
    ];
    leaf.prop_recursive(4, 32, 6, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            proptest::collection::btree_map("[a-zA-Z0-9_]{1,8}", inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    /// parse(canonicalJSON(v)) ≡ v
    #[test]
    fn canonical_round_trips(v in arb_json()) {
        let bytes = to_canonical_json_bytes(&v).unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        prop_assert_eq!(&parsed, &v);
    }

    /// Canonicalization is a fixpoint: serializing the parse of canonical
    /// bytes yields the same bytes.
    #[test]
    fn canonicalization_is_idempotent(v in arb_json()) {
        let once = to_canonical_json_bytes(&v).unwrap();
        let parsed: Value = serde_json::from_slice(&once).unwrap();
        let twice = to_canonical_json_bytes(&parsed).unwrap();
        prop_assert_eq!(once, twice);
    }

    /// Key insertion order never reaches the bytes.
    #[test]
    fn insertion_order_is_invisible(
        keys in proptest::collection::btree_set("[a-z]{1,6}", 1..8),
        seed in 0u64..1000
    ) {
        let keys: Vec<String> = keys.into_iter().collect();
        let forward: serde_json::Map<String, Value> = keys
            .iter()
            .enumerate()
            .map(|(i, k)| (k.clone(), Value::from(i as i64)))
            .collect();

        let mut shuffled = keys.clone();
        let len = shuffled.len();
        for i in 0..len {
            let j = ((seed as usize).wrapping_mul(37).wrapping_add(i * 11)) % len;
            shuffled.swap(i, j);
        }
        let backward: serde_json::Map<String, Value> = shuffled
            .iter()
            .map(|k| {
                let idx = keys.iter().position(|x| x == k).unwrap();
                (k.clone(), Value::from(idx as i64))
            })
            .collect();

        prop_assert_eq!(
            to_canonical_json_bytes(&Value::Object(forward)).unwrap(),
            to_canonical_json_bytes(&Value::Object(backward)).unwrap()
        );
    }
}
