use std::collections::BTreeMap;

use leafchain::{BpMap, TreeError};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum MapOp {
    Put(i64, i64),
    Remove(i64),
    Get(i64),
    Has(i64),
}

fn map_op() -> impl Strategy<Value = MapOp> {
    // A domain narrower than the op count guarantees overwrites.
    let key = -64i64..64;
    prop_oneof![
        5 => (key.clone(), any::<i64>()).prop_map(|(k, v)| MapOp::Put(k, v)),
        3 => key.clone().prop_map(MapOp::Remove),
        2 => key.clone().prop_map(MapOp::Get),
        1 => key.prop_map(MapOp::Has),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Replays random put/remove/get traffic against `std::collections::BTreeMap`
    /// and demands identical answers at every step.
    #[test]
    fn map_ops_match_btreemap(
        capacity in 3usize..24,
        ops in proptest::collection::vec(map_op(), 1..600),
    ) {
        let mut map: BpMap<i64, i64> = BpMap::new(capacity);
        let mut model: BTreeMap<i64, i64> = BTreeMap::new();

        for op in &ops {
            match op {
                MapOp::Put(k, v) => {
                    map.put(*k, *v).unwrap();
                    model.insert(*k, *v);
                }
                MapOp::Remove(k) => {
                    let got = map.remove(k);
                    match model.remove(k) {
                        Some(v) => prop_assert_eq!(got, Ok(v)),
                        None => prop_assert_eq!(got, Err(TreeError::NotFound)),
                    }
                }
                MapOp::Get(k) => {
                    let got = map.get(k);
                    match model.get(k) {
                        Some(v) => prop_assert_eq!(got, Ok(v)),
                        None => prop_assert_eq!(got, Err(TreeError::NotFound)),
                    }
                }
                MapOp::Has(k) => {
                    prop_assert_eq!(map.has(k), model.contains_key(k));
                }
            }
            prop_assert_eq!(map.len(), model.len());
            prop_assert_eq!(map.is_empty(), model.is_empty());
        }

        // Full ordered comparison at the end, both directions.
        let entries: Vec<(i64, i64)> = map.iter().map(|(k, v)| (*k, *v)).collect();
        let expected: Vec<(i64, i64)> = model.iter().map(|(k, v)| (*k, *v)).collect();
        prop_assert_eq!(&entries, &expected);

        let mut backward: Vec<(i64, i64)> = map.backward().map(|(k, v)| (*k, *v)).collect();
        backward.reverse();
        prop_assert_eq!(&backward, &expected);

        // Unique keys: the ascending key stream never repeats.
        let keys: Vec<i64> = map.keys().copied().collect();
        let mut deduped = keys.clone();
        deduped.dedup();
        prop_assert_eq!(keys, deduped);
    }
}

/// The double-put pattern: first a placeholder, then the real value.
#[test]
fn put_twice_then_drain() {
    let mut map: BpMap<String, String> = BpMap::new(23);
    let records: Vec<(String, String)> =
        (0..400).map(|i| (format!("key-{i:04}"), format!("value-{i:04}"))).collect();

    for (key, value) in &records {
        map.put(key.clone(), String::new()).unwrap();
        map.put(key.clone(), value.clone()).unwrap();
    }
    assert_eq!(map.len(), records.len());

    for (key, value) in &records {
        assert!(map.has(key));
        assert!(!map.has("no such key"));
        assert_eq!(map.get(key.as_str()).unwrap(), value);
    }

    for (i, (key, value)) in records.iter().enumerate() {
        assert_eq!(map.remove(key.as_str()).unwrap(), *value);
        for (later, later_value) in &records[i + 1..] {
            assert!(map.has(later));
            assert_eq!(map.get(later.as_str()).unwrap(), later_value);
        }
    }
    assert!(map.is_empty());
}
