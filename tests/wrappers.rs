//! Composition wrappers exercised through the public factory.

use std::sync::Arc;

use ordex::index::factory;
use ordex::measure::{MeasureSet, COUNT};
use ordex::{IndexConfig, IndexOptions, OrderedIndex, Range};

type Item = (String, u64, i64);

fn config() -> IndexConfig<String, Item> {
    IndexConfig::new(
        Arc::new(|item: &Item| item.0.clone()),
        ordex::algebra::ord_compare(),
    )
    .with_options(IndexOptions::compact())
    .with_measures(MeasureSet::new().ensure_defaults())
}

#[test]
fn non_unique_stores_duplicates_in_disambiguator_order() {
    let mut idx = factory::create_non_unique(config(), Arc::new(|item: &Item| item.1)).unwrap();
    idx.add(("A".into(), 2, 200)).unwrap();
    idx.add(("A".into(), 1, 100)).unwrap();
    idx.add(("B".into(), 1, 300)).unwrap();

    let hits: Vec<Item> = idx
        .reader(&Range::point("A".to_string()))
        .unwrap()
        .map(|entry| entry.unwrap())
        .collect();
    assert_eq!(
        hits,
        vec![("A".to_string(), 1, 100), ("A".to_string(), 2, 200)]
    );
    assert_eq!(idx.measure(COUNT).unwrap(), 3);
}

#[test]
fn differential_overlay_leaves_the_base_alone() {
    let int_config: IndexConfig<i64, (i64, String)> = IndexConfig::new(
        Arc::new(|item: &(i64, String)| item.0),
        ordex::algebra::ord_compare(),
    )
    .with_measures(MeasureSet::new().ensure_defaults());

    let mut base = factory::create_flat(int_config.clone()).unwrap();
    for key in [1, 2, 3] {
        base.add((key, "base".to_string())).unwrap();
    }
    let mut overlay = factory::create_differential(base, int_config).unwrap();

    assert!(overlay.remove_key(&2).unwrap());
    overlay.add((2, "patched".to_string())).unwrap();

    assert_eq!(overlay.get(&2).unwrap(), Some((2, "patched".to_string())));
    assert_eq!(overlay.base().get(&2).unwrap(), Some((2, "base".to_string())));
    assert_eq!(overlay.base().len(), 3);
    assert_eq!(overlay.len(), 3);
    assert_eq!(overlay.measure(COUNT).unwrap(), 3);
}

#[test]
fn composite_presents_one_view_over_segments() {
    let int_config: IndexConfig<i64, (i64, String)> = IndexConfig::new(
        Arc::new(|item: &(i64, String)| item.0),
        ordex::algebra::ord_compare(),
    )
    .with_measures(MeasureSet::new().ensure_defaults());

    let make_segment = || {
        factory::create_flat(int_config.clone()).unwrap()
    };
    let mut idx = factory::create_composite(
        vec![
            ("cold".to_string(), Range::closed(0, 999), make_segment()),
            (
                "hot".to_string(),
                Range::closed(1000, 1_999),
                make_segment(),
            ),
        ],
        int_config.clone(),
    )
    .unwrap();

    for key in [10, 500, 1_000, 1_500] {
        idx.add((key, format!("v{key}"))).unwrap();
    }
    assert_eq!(idx.len(), 4);
    assert_eq!(idx.measure(COUNT).unwrap(), 4);

    let keys: Vec<i64> = idx
        .reader(&Range::closed(400, 1_200))
        .unwrap()
        .map(|entry| entry.unwrap().0)
        .collect();
    assert_eq!(keys, vec![500, 1_000]);

    assert!(idx.remove_key(&500).unwrap());
    assert_eq!(idx.measure(COUNT).unwrap(), 3);
}
