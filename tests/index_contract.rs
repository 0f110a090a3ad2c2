//! End-to-end contract tests across index kinds.

use std::sync::Arc;

use ordex::index::factory;
use ordex::measure::{MeasureSet, COUNT};
use ordex::{
    Direction, Entire, IndexConfig, IndexError, IndexOptions, OrderedIndex, Range, Ray, SeekResult,
};

type Item = (i64, String);

fn config() -> IndexConfig<i64, Item> {
    IndexConfig::new(
        Arc::new(|item: &Item| item.0),
        ordex::algebra::ord_compare(),
    )
    .with_options(IndexOptions::compact())
    .with_measures(MeasureSet::new().ensure_defaults())
}

fn item(key: i64) -> Item {
    (key, format!("value-{key}"))
}

#[test]
fn btree_round_trip_orders_keys() {
    let mut idx = factory::create_unique_memory(config()).unwrap();
    for key in [5, 1, 9, 3] {
        idx.add(item(key)).unwrap();
    }
    let keys: Vec<i64> = idx
        .reader(&Range::full())
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![1, 3, 5, 9]);
}

#[test]
fn bloom_negative_is_authoritative() {
    let mut idx = factory::create_unique_memory(config()).unwrap();
    for key in 0..512 {
        idx.add(item(key)).unwrap();
    }
    // No false negatives: every inserted key must resolve.
    for key in 0..512 {
        assert!(idx.contains_key(&key).unwrap(), "key {key}");
    }
    // Never-inserted keys answer false regardless of filter noise.
    for key in 10_000..10_256 {
        assert!(!idx.contains_key(&key).unwrap(), "key {key}");
    }
}

#[test]
fn seek_nearest_semantics() {
    let mut idx = factory::create_unique_memory(config()).unwrap();
    for key in [1, 3, 5] {
        idx.add(item(key)).unwrap();
    }
    match idx.seek(&Ray::at(2, Direction::Positive)).unwrap() {
        SeekResult::Nearest(found) => assert_eq!(found.0, 3),
        other => panic!("expected nearest 3, got {other:?}"),
    }
    match idx.seek(&Ray::at(2, Direction::Negative)).unwrap() {
        SeekResult::Nearest(found) => assert_eq!(found.0, 1),
        other => panic!("expected nearest 1, got {other:?}"),
    }
    assert!(idx.seek(&Ray::at(0, Direction::Negative)).unwrap().is_none());
    assert!(idx.seek(&Ray::at(6, Direction::Positive)).unwrap().is_none());
}

#[test]
fn count_measure_matches_len_through_mutations() {
    let mut idx = factory::create_unique_memory(config()).unwrap();
    for key in 0..100 {
        idx.add(item(key)).unwrap();
    }
    for key in (0..100).step_by(3) {
        idx.remove_key(&key).unwrap();
    }
    idx.replace(item(50)).unwrap();
    assert_eq!(idx.measure(COUNT).unwrap(), idx.len() as i64);

    idx.clear().unwrap();
    assert_eq!(idx.measure(COUNT).unwrap(), 0);
    assert_eq!(idx.len(), 0);
}

#[test]
fn capability_flags_gate_writes() {
    use ordex::{Features, MemoryPageProvider};

    let mut read_only = ordex::BTreeIndex::open(
        config().with_features(Features::READ),
        MemoryPageProvider::with_features(Features::READ),
    )
    .unwrap();
    assert!(matches!(
        read_only.add(item(1)),
        Err(IndexError::Unsupported(_))
    ));
    assert!(matches!(
        read_only.clear(),
        Err(IndexError::Unsupported(_))
    ));
    assert_eq!(read_only.get(&1).unwrap(), None);
}

#[test]
fn readers_are_restartable() {
    let mut idx = factory::create_unique_memory(config()).unwrap();
    for key in 0..32 {
        idx.add(item(key)).unwrap();
    }
    let range = Range::new(Entire::Exact(8), Entire::Before(16));
    let first: Vec<i64> = idx
        .reader(&range)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    let second: Vec<i64> = idx
        .reader(&range)
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(first, second);
    assert_eq!(first, (8..16).collect::<Vec<_>>());
}

#[test]
fn flat_and_tree_agree_on_the_contract() {
    let mut tree = factory::create_unique_memory(config()).unwrap();
    let mut flat = factory::create_flat(config()).unwrap();
    for key in [42, 7, 19, 3, 27] {
        tree.add(item(key)).unwrap();
        flat.add(item(key)).unwrap();
    }
    tree.remove_key(&19).unwrap();
    flat.remove_key(&19).unwrap();

    for key in 0..50 {
        assert_eq!(
            tree.get(&key).unwrap(),
            flat.get(&key).unwrap(),
            "key {key}"
        );
    }
    let from_tree: Vec<i64> = tree
        .reader(&Range::closed(5, 30))
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    let from_flat: Vec<i64> = flat
        .reader(&Range::closed(5, 30))
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(from_tree, from_flat);
}
