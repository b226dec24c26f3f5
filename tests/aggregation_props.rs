use proptest::prelude::*;
use serde_json::{Map, Value};
use weaksup::{
    config::merge::{merge_into, merged},
    supervision::majority::{majority_row, soft_majority_row},
};

fn vote() -> impl Strategy<Value = i8> {
    prop_oneof![Just(-1i8), Just(0i8), Just(1i8)]
}

fn layer() -> impl Strategy<Value = Map<String, Value>> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i32>().prop_map(Value::from),
        "[a-z]{0,4}".prop_map(Value::from),
    ];
    let value = leaf.prop_recursive(2, 16, 4, |inner| {
        prop::collection::btree_map("[a-d]", inner, 0..4)
            .prop_map(|m| Value::Object(m.into_iter().collect()))
    });
    prop::collection::btree_map("[a-f]", value, 0..6).prop_map(|m| m.into_iter().collect())
}

proptest! {
    #[test]
    fn majority_is_binary_and_ties_go_negative(votes in prop::collection::vec(vote(), 0..12)) {
        let m = majority_row(votes.iter().copied());
        prop_assert!(m == 0.0 || m == 1.0);
        let net: i32 = votes.iter().map(|&v| i32::from(v)).sum();
        if net <= 0 {
            prop_assert_eq!(m, 0.0);
        }
    }

    #[test]
    fn soft_majority_stays_in_unit_interval(votes in prop::collection::vec(vote(), 0..12)) {
        let m = soft_majority_row(votes.iter().copied());
        prop_assert!(m.is_finite());
        prop_assert!((0.0..=1.0).contains(&m));
        if votes.iter().all(|&v| v == 0) {
            prop_assert_eq!(m, 0.5);
        }
    }

    #[test]
    fn merge_is_idempotent(x in layer(), y in layer()) {
        let once = merged(x, &y);
        let twice = merged(once.clone(), &y);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn null_only_layer_changes_nothing(x in layer(), keys in prop::collection::vec("[a-f]", 0..6)) {
        let nulls: Map<String, Value> = keys.into_iter().map(|k| (k, Value::Null)).collect();
        let mut acc = x.clone();
        merge_into(&mut acc, &nulls);
        prop_assert_eq!(acc, x);
    }
}
