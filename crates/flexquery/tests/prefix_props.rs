#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Property tests for `Q::prefix`.

use flexquery::{LOOKUP_SEP, Node, Q};
use proptest::prelude::*;

fn arb_q() -> impl Strategy<Value = Q> {
    let leaf = ("[a-z]{1,6}(__[a-z]{1,4})?", any::<i32>())
        .prop_map(|(key, value)| Q::lookup(key, value));
    leaf.prop_recursive(4, 32, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a & b),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| a | b),
            inner.prop_map(|q| !q),
        ]
    })
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{1,5}", 1..4).prop_map(|segments| segments.join(LOOKUP_SEP))
}

/// Same connectors, negation, nesting and values; keys may differ.
fn same_shape(a: &Q, b: &Q) -> bool {
    a.connector() == b.connector()
        && a.is_negated() == b.is_negated()
        && a.len() == b.len()
        && a.children().iter().zip(b.children()).all(|pair| match pair {
            (Node::Q(x), Node::Q(y)) => same_shape(x, y),
            (Node::Lookup(x), Node::Lookup(y)) => x.value == y.value,
            _ => false,
        })
}

fn keys(q: &Q) -> Vec<String> {
    q.lookups().map(|lookup| lookup.key.clone()).collect()
}

proptest! {
    #[test]
    fn prefix_preserves_shape(q in arb_q(), path in arb_path()) {
        let prefixed = q.prefix(&path);
        prop_assert!(same_shape(&q, &prefixed));
    }

    #[test]
    fn prefix_rewrites_every_key(q in arb_q(), path in arb_path()) {
        let expected: Vec<String> = keys(&q)
            .into_iter()
            .map(|key| format!("{path}{LOOKUP_SEP}{key}"))
            .collect();
        prop_assert_eq!(keys(&q.prefix(&path)), expected);
    }

    #[test]
    fn prefix_leaves_input_untouched(q in arb_q(), path in arb_path()) {
        let before = q.clone();
        let _ = q.prefix(&path);
        prop_assert_eq!(q, before);
    }

    #[test]
    fn prefix_composes(q in arb_q(), first in arb_path(), second in arb_path()) {
        let twice = q.prefix(&first).prefix(&second);
        let once = q.prefix(&format!("{second}{LOOKUP_SEP}{first}"));
        prop_assert_eq!(twice, once);
    }

    #[test]
    fn negation_commutes_with_prefix(q in arb_q(), path in arb_path()) {
        prop_assert_eq!((!&q).prefix(&path), !q.prefix(&path));
    }
}
