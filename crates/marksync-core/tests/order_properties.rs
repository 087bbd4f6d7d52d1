//! Property tests for order keys.
//!
//! Run with: `cargo test -p marksync-core --test order_properties`

use std::cmp::Ordering;

use proptest::prelude::*;

use marksync_core::order;

fn key_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec(0u64..12, 1..5).prop_map(|segments| join(&segments))
}

fn join(segments: &[u64]) -> String {
    segments
        .iter()
        .map(u64::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn compare_matches_integer_sequences(
        a in prop::collection::vec(0u64..1000, 0..6),
        b in prop::collection::vec(0u64..1000, 0..6),
    ) {
        prop_assert_eq!(order::compare(&join(&a), &join(&b)), a.cmp(&b));
    }

    #[test]
    fn compare_is_a_total_order(a in key_strategy(), b in key_strategy(), c in key_strategy()) {
        prop_assert_eq!(order::compare(&a, &b), order::compare(&b, &a).reverse());
        if order::compare(&a, &b) != Ordering::Greater && order::compare(&b, &c) != Ordering::Greater {
            prop_assert_ne!(order::compare(&a, &c), Ordering::Greater);
        }
    }

    #[test]
    fn format_round_trips(segments in prop::collection::vec(0i64..1_000_000, 0..8)) {
        let key = order::format(&segments);
        let parsed: Vec<i64> = order::parse(&key)
            .unwrap()
            .into_iter()
            .map(|segment| i64::try_from(segment).unwrap())
            .collect();
        prop_assert_eq!(order::format(&parsed), key);
    }

    #[test]
    fn insertion_keeps_list_ordered(keys in prop::collection::vec(key_strategy(), 0..40)) {
        let mut sorted: Vec<String> = Vec::new();
        for key in keys {
            let index = order::insertion_index(&sorted, &key);
            sorted.insert(index, key);
            prop_assert!(order::is_ordered(&sorted));
        }
    }

    #[test]
    fn between_is_strictly_between(a in key_strategy(), b in key_strategy()) {
        let (low, high) = match order::compare(&a, &b) {
            Ordering::Less => (a, b),
            Ordering::Greater => (b, a),
            Ordering::Equal => return Ok(()),
        };

        if let Some(key) = order::between(Some(&low), Some(&high), "") {
            prop_assert_eq!(order::compare(&low, &key), Ordering::Less);
            prop_assert_eq!(order::compare(&key, &high), Ordering::Less);
            prop_assert!(!key.ends_with(".0") && key != "0");
        }

        let after = order::between(Some(&low), None, "").unwrap();
        prop_assert_eq!(order::compare(&low, &after), Ordering::Less);
    }

    #[test]
    fn first_key_sorts_below_next_under_any_parent(next in key_strategy(), parent in key_strategy()) {
        if let Some(key) = order::between(None, Some(&next), &parent) {
            prop_assert_eq!(order::compare(&key, &next), Ordering::Less);
            prop_assert!(!key.ends_with(".0") && key != "0");
        }
    }

    #[test]
    fn positional_keys_stay_sorted(indexes in prop::collection::vec(any::<prop::sample::Index>(), 1..40)) {
        let parent = "1.5";
        let mut siblings: Vec<String> = Vec::new();

        for pick in indexes {
            let index = pick.index(siblings.len() + 1);
            let prev = index.checked_sub(1).map(|i| siblings[i].as_str());
            let next = siblings.get(index).map(String::as_str);
            let key = order::for_position(parent, index, prev, next);
            prop_assert_eq!(order::compare(parent, &key), Ordering::Less);
            siblings.insert(index, key);
        }

        for pair in siblings.windows(2) {
            prop_assert_eq!(order::compare(&pair[0], &pair[1]), Ordering::Less, "{:?}", siblings);
        }
    }
}
